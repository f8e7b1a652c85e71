//! Single-file upload with retry.

use crate::content::ContentPipeline;
use crate::error::TransferError;
use crate::keys::{object_key, relative_name};
use crate::retry::RetryPolicy;
use crate::storage::StorageClient;
use crate::types::{ResolvedFile, TransferOutcome};
use std::path::Path;
use std::sync::Arc;
use tokio_retry2::{Retry, RetryError};
use tracing::{debug, warn};

/// Everything a worker needs to upload one file. Shared read-only between
/// workers.
pub(crate) struct UploadContext {
    pub store: Arc<dyn StorageClient>,
    pub bucket: String,
    pub prefix: String,
    pub folder: String,
    pub pipeline: ContentPipeline,
    pub retry: RetryPolicy,
}

impl UploadContext {
    /// Uploads `file` under its computed key, retrying transient failures.
    pub(crate) async fn transfer(&self, file: &ResolvedFile) -> TransferOutcome {
        let name = match relative_name(&file.base_dir, &file.path) {
            Ok(name) => name,
            Err(e) => return TransferOutcome::failure(file.path.display().to_string(), e),
        };
        let key = match object_key(&file.base_dir, &file.path, &self.prefix, &self.folder) {
            Ok(key) => key,
            Err(e) => return TransferOutcome::failure(name, e),
        };

        match self.retry_upload(&key, &file.path).await {
            Ok(()) => TransferOutcome::success(name),
            Err(e) => TransferOutcome::failure(name, e),
        }
    }

    /// Calls [`upload_file`](Self::upload_file) until it succeeds, fails
    /// permanently, or the retry budget is spent. Returns the last error.
    pub(crate) async fn retry_upload(&self, key: &str, path: &Path) -> Result<(), TransferError> {
        let delays = self.retry.delays().inspect(|delay| {
            debug!(
                "retrying {} in {}",
                key,
                humantime::format_duration(*delay)
            );
        });

        let mut attempt = 0u32;
        Retry::spawn(delays, || {
            attempt += 1;
            let attempt = attempt;
            async move {
                match self.upload_file(key, path).await {
                    Ok(()) => Ok(()),
                    Err(e) if e.is_retryable() => {
                        warn!("{}: attempt {} failed: {}", key, attempt, e);
                        RetryError::to_transient(e)
                    }
                    Err(e) => RetryError::to_permanent(e),
                }
            }
        })
        .await
    }

    /// Uploads `path` as `key` once.
    ///
    /// A compression failure fails the upload even if the store accepted
    /// the (then truncated) stream.
    pub(crate) async fn upload_file(&self, key: &str, path: &Path) -> Result<(), TransferError> {
        let content = self.pipeline.prepare(path).await?;
        let attributes = self.pipeline.attributes(&content)?;
        let (stream, compressor) = content.into_parts();

        let written = self
            .store
            .write_object(&self.bucket, key, stream, &attributes)
            .await;
        let compressed = compressor.finish().await;
        written?;
        compressed
    }
}
