//! In-memory [`StorageClient`] used by the engine tests.

use super::{ContentStream, ObjectAttributes, ObjectInfo, ObjectPage, StorageClient};
use crate::content::GZIP_ENCODING;
use crate::error::TransferError;
use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{BTreeMap, HashMap};
use std::io::{Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

/// An object as the store received it.
#[derive(Debug, Clone)]
pub(crate) struct StoredObject {
    pub body: Vec<u8>,
    pub attributes: ObjectAttributes,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    /// Fail this many times with a retryable error, then succeed.
    Transient(usize),
    /// Fail every attempt with a retryable error.
    Always,
    /// Fail every attempt with HTTP 404.
    NotFound,
}

#[derive(Default)]
pub(crate) struct MemoryStore {
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    failures: Mutex<HashMap<String, Failure>>,
    attempts: Mutex<HashMap<String, Vec<Instant>>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    write_delay: Option<Duration>,
    page_size: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            page_size: 2,
            ..Self::default()
        }
    }

    /// Holds every write open for `delay`, so concurrent writers overlap.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }

    pub fn fail_first(&self, key: &str, times: usize) {
        self.set_failure(key, Failure::Transient(times));
    }

    pub fn fail_always(&self, key: &str) {
        self.set_failure(key, Failure::Always);
    }

    pub fn fail_not_found(&self, key: &str) {
        self.set_failure(key, Failure::NotFound);
    }

    fn set_failure(&self, key: &str, failure: Failure) {
        self.failures
            .lock()
            .unwrap()
            .insert(key.to_string(), failure);
    }

    pub fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: body.to_vec(),
                attributes: ObjectAttributes::default(),
            },
        );
    }

    /// Stores `body` gzip-compressed with a `gzip` content encoding, the
    /// way an upload with compression leaves it.
    pub fn insert_gzipped(&self, bucket: &str, key: &str, body: &[u8]) {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(body).unwrap();
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: encoder.finish().unwrap(),
                attributes: ObjectAttributes {
                    content_encoding: Some(GZIP_ENCODING.to_string()),
                    ..ObjectAttributes::default()
                },
            },
        );
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<StoredObject> {
        self.objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
    }

    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .keys()
            .filter(|(b, _)| b == bucket)
            .map(|(_, k)| k.clone())
            .collect()
    }

    /// Times at which writes of `key` started.
    pub fn attempts(&self, key: &str) -> Vec<Instant> {
        self.attempts
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Highest number of writes observed in flight at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    fn scripted_failure(&self, key: &str) -> Option<TransferError> {
        let mut failures = self.failures.lock().unwrap();
        match failures.get_mut(key)? {
            Failure::Transient(0) => None,
            Failure::Transient(remaining) => {
                *remaining -= 1;
                Some(TransferError::Rejected {
                    status: 503,
                    message: "service unavailable".to_string(),
                })
            }
            Failure::Always => Some(TransferError::Rejected {
                status: 500,
                message: "backend error".to_string(),
            }),
            Failure::NotFound => Some(TransferError::NotFound(key.to_string())),
        }
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageClient for MemoryStore {
    async fn write_object(
        &self,
        bucket: &str,
        key: &str,
        mut body: ContentStream,
        attributes: &ObjectAttributes,
    ) -> Result<(), TransferError> {
        self.attempts
            .lock()
            .unwrap()
            .entry(key.to_string())
            .or_default()
            .push(Instant::now());

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = ActiveGuard(&self.active);
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        let mut bytes = Vec::new();
        body.read_to_end(&mut bytes).await?;
        if let Some(delay) = self.write_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.scripted_failure(key) {
            return Err(err);
        }

        self.objects.lock().unwrap().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                body: bytes,
                attributes: attributes.clone(),
            },
        );
        Ok(())
    }

    async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        page_token: Option<String>,
    ) -> Result<ObjectPage, TransferError> {
        let start: usize = match page_token {
            Some(token) => token
                .parse()
                .map_err(|_| TransferError::Rejected {
                    status: 400,
                    message: format!("bad page token {token}"),
                })?,
            None => 0,
        };
        let matching: Vec<ObjectInfo> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((b, k), _)| b == bucket && k.starts_with(prefix))
            .map(|((_, k), object)| ObjectInfo {
                name: k.clone(),
                size: Some(object.body.len() as u64),
                content_encoding: object.attributes.content_encoding.clone(),
            })
            .collect();
        if matching.is_empty() && !self.objects.lock().unwrap().keys().any(|(b, _)| b == bucket) {
            return Err(TransferError::NotFound(bucket.to_string()));
        }

        let end = (start + self.page_size).min(matching.len());
        Ok(ObjectPage {
            objects: matching[start.min(end)..end].to_vec(),
            next_page_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn read_object(&self, bucket: &str, key: &str) -> Result<ContentStream, TransferError> {
        let object = self
            .object(bucket, key)
            .ok_or_else(|| TransferError::NotFound(format!("{bucket}/{key}")))?;
        // Encoded objects are served decoded, as Cloud Storage does for
        // clients that do not accept gzip.
        let body = match object.attributes.content_encoding.as_deref() {
            Some(GZIP_ENCODING) => {
                let mut decoded = Vec::new();
                GzDecoder::new(object.body.as_slice()).read_to_end(&mut decoded)?;
                decoded
            }
            _ => object.body,
        };
        Ok(Box::new(std::io::Cursor::new(body)))
    }
}
