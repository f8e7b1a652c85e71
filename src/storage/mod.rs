//! Object storage capability used by the transfer engines.
//!
//! Engines only see [`StorageClient`]; how the handle was authenticated is
//! the caller's business.

use crate::error::TransferError;
use crate::types::AclRule;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::io::AsyncRead;

pub mod gcs;
#[cfg(test)]
pub(crate) mod memory;

pub use gcs::GcsClient;

/// Byte stream handed to or returned by a storage client.
pub type ContentStream = Box<dyn AsyncRead + Send + Unpin>;

/// Attributes stored alongside an uploaded object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectAttributes {
    /// MIME type of the stored bytes before any content encoding.
    pub content_type: String,
    /// `Some("gzip")` when the stream was compressed on the fly.
    pub content_encoding: Option<String>,
    /// Cache-Control header, verbatim.
    pub cache_control: Option<String>,
    /// Custom metadata, verbatim.
    pub metadata: HashMap<String, String>,
    /// Access rules applied at creation.
    pub acl: Vec<AclRule>,
}

/// Information about a listed object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Full object name within the bucket.
    pub name: String,
    /// Stored size in bytes, when reported. For an object with a content
    /// encoding this is the encoded size, not the size a read returns.
    pub size: Option<u64>,
    /// Content encoding the object was stored with, e.g. `gzip`.
    pub content_encoding: Option<String>,
}

/// One page of a listing.
#[derive(Debug, Clone, Default)]
pub struct ObjectPage {
    /// Objects on this page.
    pub objects: Vec<ObjectInfo>,
    /// Token for the next page, `None` on the last page.
    pub next_page_token: Option<String>,
}

/// Authenticated access to an object store.
#[async_trait]
pub trait StorageClient: Send + Sync {
    /// Stores `body` as `bucket/key` with the given attributes.
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        body: ContentStream,
        attributes: &ObjectAttributes,
    ) -> Result<(), TransferError>;

    /// Lists one page of objects whose names start with `prefix`.
    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, TransferError>;

    /// Opens `bucket/key` for streaming reads.
    async fn read_object(&self, bucket: &str, key: &str) -> Result<ContentStream, TransferError>;
}
