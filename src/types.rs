//! Data structures for transfer operations.

use crate::error::TransferError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Which way files move between the local workspace and the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Push local files into the bucket.
    #[default]
    Upload,
    /// Pull every object under a prefix into a local directory.
    Download,
}

/// Configuration for a single invocation.
///
/// # Example
///
/// ```
/// use bucketsync::{Direction, TransferConfig};
///
/// let config = TransferConfig {
///     source: "dist".to_string(),
///     target: "my-bucket/site".to_string(),
///     gzip: vec!["js".to_string(), "css".to_string()],
///     acl: vec!["allUsers:READER".to_string()],
///     direction: Direction::Upload,
///     ..TransferConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransferConfig {
    /// Path, directory or comma-separated glob patterns to upload.
    /// In download mode, `bucket[/prefix]` to list.
    pub source: String,
    /// Comma-separated patterns of files to skip, matched relative to each
    /// file's base directory.
    pub ignore: String,
    /// `bucket[/prefix]` to upload into. In download mode, the local
    /// directory objects are written to.
    pub target: String,
    /// Extra key segment appended after the target prefix.
    pub folder: String,
    /// ACL rules as `entity:role` pairs.
    pub acl: Vec<String>,
    /// Extensions (without the leading dot) compressed with gzip on upload.
    pub gzip: Vec<String>,
    /// Cache-Control header stored verbatim on every object.
    pub cache_control: String,
    /// Custom metadata stored verbatim on every object.
    pub metadata: HashMap<String, String>,
    /// Upload or download.
    pub direction: Direction,
}

impl TransferConfig {
    /// Checks everything that can be checked without touching the network
    /// or the filesystem.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.source.trim().is_empty() {
            return Err(TransferError::Configuration(
                "source must not be empty".to_string(),
            ));
        }
        if self.direction == Direction::Upload {
            let bucket = self.target.split('/').next().unwrap_or_default();
            if bucket.trim().is_empty() {
                return Err(TransferError::Configuration(
                    "target bucket must be set for uploads".to_string(),
                ));
            }
        }
        for entry in &self.acl {
            AclRule::parse(entry)?;
        }
        Ok(())
    }

    /// Parses the ACL entries into rules.
    pub fn acl_rules(&self) -> Result<Vec<AclRule>, TransferError> {
        self.acl.iter().map(|entry| AclRule::parse(entry)).collect()
    }

    /// Parses a JSON object of string keys and values into a metadata map.
    ///
    /// An empty or blank string yields an empty map.
    pub fn parse_metadata(raw: &str) -> Result<HashMap<String, String>, TransferError> {
        if raw.trim().is_empty() {
            return Ok(HashMap::new());
        }
        serde_json::from_str(raw).map_err(|e| {
            TransferError::Configuration(format!("metadata must be a JSON object of strings: {e}"))
        })
    }
}

/// A single access rule granting `role` to `entity`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AclRule {
    /// Principal, e.g. `allUsers` or `user-someone@example.com`.
    pub entity: String,
    /// Permission, e.g. `READER` or `OWNER`.
    pub role: String,
}

impl AclRule {
    /// Parses an `entity:role` pair. Both fields must be present and
    /// non-empty, and no further colon may appear.
    pub fn parse(entry: &str) -> Result<Self, TransferError> {
        let fields: Vec<&str> = entry.split(':').collect();
        match fields.as_slice() {
            [entity, role] if !entity.is_empty() && !role.is_empty() => Ok(Self {
                entity: (*entity).to_string(),
                role: (*role).to_string(),
            }),
            _ => Err(TransferError::Configuration(format!(
                "invalid ACL {entry:?}: expected entity:role"
            ))),
        }
    }
}

/// A local file selected for upload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedFile {
    /// Absolute path of a regular file.
    pub path: PathBuf,
    /// Ancestor of `path` that object keys are computed relative to.
    pub base_dir: PathBuf,
}

/// Result of transferring a single file.
#[derive(Debug)]
pub struct TransferOutcome {
    /// Path relative to the file's base directory (upload) or object name
    /// (download).
    pub name: String,
    /// Why the transfer failed, if it did.
    pub error: Option<TransferError>,
}

impl TransferOutcome {
    pub(crate) fn success(name: String) -> Self {
        Self { name, error: None }
    }

    pub(crate) fn failure(name: String, error: TransferError) -> Self {
        Self {
            name,
            error: Some(error),
        }
    }

    /// Whether this file transferred successfully.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Aggregated outcome of a run.
#[derive(Debug, Default)]
pub struct TransferReport {
    /// One entry per attempted file, in resolution order.
    pub outcomes: Vec<TransferOutcome>,
}

impl TransferReport {
    /// True when no file failed. An empty report is a success.
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(TransferOutcome::is_success)
    }

    /// Number of files that transferred successfully.
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    /// Outcomes that carry an error.
    pub fn failures(&self) -> impl Iterator<Item = &TransferOutcome> {
        self.outcomes.iter().filter(|o| !o.is_success())
    }
}
