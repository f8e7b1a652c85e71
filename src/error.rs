//! Error types for transfer operations.

use std::io;
use thiserror::Error;

/// Errors that can occur while resolving, uploading or downloading files.
///
/// `Configuration` and `Resolution` errors are raised before any transfer
/// starts and abort the run. All other variants describe a single file's
/// failure during upload, or abort the run in download mode.
#[derive(Error, Debug)]
pub enum TransferError {
    /// I/O error during file operations.
    #[error(transparent)]
    IoError(#[from] io::Error),

    /// HTTP request error while talking to the storage API.
    #[error(transparent)]
    ReqwestError(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error(transparent)]
    SerdeJsonError(#[from] serde_json::Error),

    /// Directory walk error.
    #[error(transparent)]
    WalkError(#[from] walkdir::Error),

    /// Invalid configuration, detected before any transfer begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The source specification could not be turned into a file list.
    #[error("local files: {0}")]
    Resolution(String),

    /// On-the-fly gzip compression of a file failed.
    #[error("compression failed: {0}")]
    Compression(String),

    /// The storage service reported that the object or bucket does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The storage service rejected a request.
    #[error("storage service returned HTTP {status}: {message}")]
    Rejected {
        /// HTTP status code.
        status: u16,
        /// Response body, or the reason phrase when the body is empty.
        message: String,
    },

    /// Fatal download-mode failure.
    #[error("download failed: {0}")]
    Download(String),

    /// A worker task panicked or was cancelled.
    #[error("task failed: {0}")]
    TaskFailed(String),
}

impl TransferError {
    /// Reports whether repeating the operation could succeed.
    ///
    /// A missing object or bucket (HTTP 404) will not appear by retrying,
    /// and configuration problems never fix themselves.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::NotFound(_) | Self::Configuration(_) | Self::Resolution(_)
        )
    }
}
