//! Object download functionality.

use crate::error::TransferError;
use crate::keys::{bucket_and_prefix, local_path};
use crate::storage::{ObjectInfo, StorageClient};
use crate::types::{TransferConfig, TransferOutcome, TransferReport};
use indicatif::ProgressBar;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};

/// Copies every object under a bucket prefix into a local directory.
///
/// Objects are fetched one after another and the first error stops the
/// run; unlike uploads there is no per-file isolation.
pub struct DownloadEngine {
    store: Arc<dyn StorageClient>,
    working_dir: PathBuf,
    progress: ProgressBar,
}

impl DownloadEngine {
    /// Creates an engine reading from `store`. A relative target directory
    /// is resolved against `working_dir`.
    pub fn new(store: Arc<dyn StorageClient>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            working_dir: working_dir.into(),
            progress: ProgressBar::hidden(),
        }
    }

    /// Reports per-object progress on `progress`.
    pub fn with_progress(mut self, progress: ProgressBar) -> Self {
        self.progress = progress;
        self
    }

    /// Downloads every object under `config.source` into `config.target`.
    ///
    /// Each object lands at `target/<object name>`, with intermediate
    /// directories created as needed.
    pub async fn run(&self, config: &TransferConfig) -> Result<TransferReport, TransferError> {
        config.validate()?;

        let (bucket, prefix) = bucket_and_prefix(&config.source);
        let target_dir = self.working_dir.join(&config.target);
        info!(
            "Downloading gs://{}/{} into {}",
            bucket,
            prefix,
            target_dir.display()
        );

        let mut report = TransferReport::default();
        let mut page_token = None;
        loop {
            let page = self
                .store
                .list_objects(&bucket, &prefix, page_token.take())
                .await?;

            for object in page.objects {
                if object.name.ends_with('/') {
                    debug!("Skipping directory placeholder {}", object.name);
                    continue;
                }
                let path = local_path(&target_dir, &object.name)?;
                self.download_object(&bucket, &object, &path).await?;

                info!("{}", object.name);
                self.progress.inc(1);
                report.outcomes.push(TransferOutcome::success(object.name));
            }

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        self.progress
            .finish_with_message(format!("✅ Downloaded {} object(s)", report.succeeded()));
        Ok(report)
    }

    async fn download_object(
        &self,
        bucket: &str,
        object: &ObjectInfo,
        path: &Path,
    ) -> Result<(), TransferError> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut body = self.store.read_object(bucket, &object.name).await?;
        let mut file = BufWriter::new(tokio::fs::File::create(path).await?);
        let written = tokio::io::copy(&mut body, &mut file).await?;
        file.flush().await?;

        // Encoded objects are served decoded, so the listed size does not
        // describe the bytes received.
        if let (Some(expected), None) = (object.size, &object.content_encoding) {
            if written != expected {
                return Err(TransferError::Download(format!(
                    "size mismatch for {}: expected {} bytes, got {} bytes",
                    object.name, expected, written
                )));
            }
        }
        Ok(())
    }
}
