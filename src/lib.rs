//! bucketsync - Concurrent file transfer between a local workspace and a
//! Cloud Storage bucket.
//!
//! This library resolves a source specification (a path, a directory tree or
//! comma-separated glob patterns with exclusions) into a file set and uploads
//! it with bounded parallelism, or mirrors a bucket prefix into a local
//! directory.
//!
//! # Features
//!
//! - **Pattern Resolution**: Literal paths, directory walks and `**` globs
//! - **Streaming Compression**: On-the-fly gzip for selected extensions
//! - **Bounded Concurrency**: At most 100 transfers in flight
//! - **Automatic Retry**: Exponential backoff with jitter for failed uploads
//! - **Failure Isolation**: One failing file never stops the others
//!
//! # Example
//!
//! ```no_run
//! use bucketsync::storage::GcsClient;
//! use bucketsync::{execute, TransferConfig};
//! use indicatif::ProgressBar;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(GcsClient::new("https://storage.googleapis.com", None)?);
//! let config = TransferConfig {
//!     source: "dist/**/*.js".to_string(),
//!     target: "my-bucket/assets".to_string(),
//!     gzip: vec!["js".to_string()],
//!     ..TransferConfig::default()
//! };
//!
//! let report = execute(&config, store, ProgressBar::hidden()).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

pub mod content;
pub mod download;
pub mod error;
pub mod keys;
pub mod orchestrator;
pub mod resolve;
pub mod retry;
pub mod storage;
pub mod types;
mod upload;

pub use content::ContentPipeline;
pub use download::DownloadEngine;
pub use error::TransferError;
pub use orchestrator::TransferEngine;
pub use resolve::PatternResolver;
pub use retry::RetryPolicy;
pub use storage::StorageClient;
pub use types::{AclRule, Direction, TransferConfig, TransferOutcome, TransferReport};

use indicatif::ProgressBar;
use std::sync::Arc;

/// Runs one transfer in the direction selected by `config`, relative to the
/// process working directory.
///
/// Configuration and resolution errors, and any download error, are
/// returned as `Err`. Upload failures of individual files are recorded in
/// the report instead.
pub async fn execute(
    config: &TransferConfig,
    store: Arc<dyn StorageClient>,
    progress: ProgressBar,
) -> Result<TransferReport, TransferError> {
    let resolver = PatternResolver::from_current_dir()?;
    match config.direction {
        Direction::Upload => {
            TransferEngine::new(store, resolver)
                .with_progress(progress)
                .run(config)
                .await
        }
        Direction::Download => {
            DownloadEngine::new(store, resolver.working_dir())
                .with_progress(progress)
                .run(config)
                .await
        }
    }
}
