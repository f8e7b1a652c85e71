//! Main orchestration logic for uploading file sets.

use crate::content::ContentPipeline;
use crate::error::TransferError;
use crate::keys::{bucket_and_prefix, relative_name};
use crate::resolve::PatternResolver;
use crate::retry::RetryPolicy;
use crate::storage::StorageClient;
use crate::types::{ResolvedFile, TransferConfig, TransferOutcome, TransferReport};
use crate::upload::UploadContext;
use indicatif::ProgressBar;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, error, info};

/// Upper bound on simultaneous transfers. Never zero.
pub const MAX_CONCURRENT_TRANSFERS: usize = 100;

/// Files are scheduled in batches of this size; a batch is fully drained
/// before the next one starts.
pub const CHUNK_SIZE: usize = 500;

/// Uploads a resolved file set with bounded parallelism.
///
/// A failing file never stops the others: every file gets an outcome in the
/// returned report, and the caller decides what a failed report means.
pub struct TransferEngine {
    store: Arc<dyn StorageClient>,
    resolver: PatternResolver,
    retry: RetryPolicy,
    progress: ProgressBar,
}

impl TransferEngine {
    /// Creates an engine writing to `store`, resolving sources with
    /// `resolver`.
    pub fn new(store: Arc<dyn StorageClient>, resolver: PatternResolver) -> Self {
        Self {
            store,
            resolver,
            retry: RetryPolicy::default(),
            progress: ProgressBar::hidden(),
        }
    }

    /// Replaces the default backoff schedule.
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Reports per-file progress on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Uploads every file selected by `config`.
    ///
    /// Configuration and resolution problems are returned as errors before
    /// anything is uploaded. Per-file failures are recorded in the report.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use bucketsync::storage::GcsClient;
    /// use bucketsync::{PatternResolver, TransferConfig, TransferEngine};
    /// use std::sync::Arc;
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let store = Arc::new(GcsClient::new("https://storage.googleapis.com", None)?);
    /// let engine = TransferEngine::new(store, PatternResolver::from_current_dir()?);
    /// let config = TransferConfig {
    ///     source: "dist".to_string(),
    ///     target: "my-bucket/site".to_string(),
    ///     ..TransferConfig::default()
    /// };
    /// let report = engine.run(&config).await?;
    /// assert!(report.is_success());
    /// # Ok(())
    /// # }
    /// ```
    pub async fn run(&self, config: &TransferConfig) -> Result<TransferReport, TransferError> {
        config.validate()?;

        let files = self.resolver.resolve(&config.source, &config.ignore)?;
        if files.is_empty() {
            info!("No files matched {:?}, nothing to upload", config.source);
            return Ok(TransferReport::default());
        }

        let (bucket, prefix) = bucket_and_prefix(&config.target);
        info!(
            "Uploading {} file(s) to gs://{}/{}",
            files.len(),
            bucket,
            prefix
        );

        let ctx = Arc::new(UploadContext {
            store: Arc::clone(&self.store),
            bucket,
            prefix,
            folder: config.folder.clone(),
            pipeline: ContentPipeline::new(config),
            retry: self.retry,
        });
        let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_TRANSFERS));
        self.progress.set_length(files.len() as u64);

        let mut report = TransferReport::default();
        for (index, chunk) in files.chunks(CHUNK_SIZE).enumerate() {
            debug!("Starting chunk {} ({} files)", index + 1, chunk.len());
            for outcome in upload_chunk(&ctx, &semaphore, chunk).await? {
                match &outcome.error {
                    None => info!("{}", outcome.name),
                    Some(e) => error!("{}: {}", outcome.name, e),
                }
                self.progress.inc(1);
                report.outcomes.push(outcome);
            }
        }

        let failed = report.failures().count();
        if failed == 0 {
            self.progress
                .finish_with_message(format!("✅ Uploaded {} file(s)", report.succeeded()));
        } else {
            self.progress
                .abandon_with_message(format!("❌ {failed} of {} file(s) failed", files.len()));
            error!("{} of {} file(s) failed to upload", failed, files.len());
        }
        Ok(report)
    }
}

/// Uploads one chunk, one task per file, at most
/// [`MAX_CONCURRENT_TRANSFERS`] at a time, and waits for all of them.
async fn upload_chunk(
    ctx: &Arc<UploadContext>,
    semaphore: &Arc<Semaphore>,
    chunk: &[ResolvedFile],
) -> Result<Vec<TransferOutcome>, TransferError> {
    let mut tasks = Vec::with_capacity(chunk.len());
    for file in chunk {
        // Acquire before spawning so no more than the cap ever exist.
        let permit = Arc::clone(semaphore)
            .acquire_owned()
            .await
            .map_err(|e| TransferError::TaskFailed(e.to_string()))?;
        let name = relative_name(&file.base_dir, &file.path)
            .unwrap_or_else(|_| file.path.display().to_string());
        let ctx = Arc::clone(ctx);
        let file = file.clone();

        let task = tokio::spawn(async move {
            let _permit = permit;
            ctx.transfer(&file).await
        });
        tasks.push((name, task));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for (name, task) in tasks {
        let outcome = match task.await {
            Ok(outcome) => outcome,
            Err(e) => TransferOutcome::failure(name, TransferError::TaskFailed(e.to_string())),
        };
        outcomes.push(outcome);
    }
    Ok(outcomes)
}
