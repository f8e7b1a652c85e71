//! Per-file content preparation: MIME type, optional gzip, object attributes.

use crate::error::TransferError;
use crate::storage::{ContentStream, ObjectAttributes};
use crate::types::{AclRule, TransferConfig};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read, Write};
use std::path::Path;
use tokio::task::JoinHandle;
use tokio_util::io::SyncIoBridge;

/// Bytes buffered between the compressor and the uploader. The compressor
/// blocks once this much compressed output is waiting to be read.
const PIPE_CAPACITY: usize = 64 * 1024;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Content encoding recorded on compressed objects.
pub const GZIP_ENCODING: &str = "gzip";

/// Turns local files into streams and object attributes.
#[derive(Debug, Clone, Default)]
pub struct ContentPipeline {
    gzip: HashSet<String>,
    cache_control: Option<String>,
    metadata: HashMap<String, String>,
    acl: Vec<String>,
}

/// A file opened for upload.
pub struct PreparedContent {
    /// Bytes to upload, compressed when `compressed` is set.
    pub stream: ContentStream,
    /// Whether `stream` carries gzip output.
    pub compressed: bool,
    /// MIME type derived from the file extension.
    pub content_type: String,
    compressor: Compressor,
}

impl PreparedContent {
    /// Splits off the stream, leaving a handle that reports how the
    /// compression of that stream ended.
    pub fn into_parts(self) -> (ContentStream, Compressor) {
        (self.stream, self.compressor)
    }
}

/// Background gzip task feeding a [`PreparedContent`] stream.
#[derive(Default)]
pub struct Compressor(Option<JoinHandle<Result<(), TransferError>>>);

impl Compressor {
    /// Waits for the compressor to finish and returns its result. Uncompressed
    /// content has nothing to wait for.
    pub async fn finish(self) -> Result<(), TransferError> {
        match self.0 {
            Some(handle) => handle
                .await
                .map_err(|e| TransferError::TaskFailed(format!("compressor: {e}")))?,
            None => Ok(()),
        }
    }
}

impl ContentPipeline {
    /// Builds a pipeline from the gzip, cache-control, metadata and ACL
    /// settings of `config`.
    pub fn new(config: &TransferConfig) -> Self {
        Self {
            gzip: config
                .gzip
                .iter()
                .map(|ext| ext.trim().to_string())
                .filter(|ext| !ext.is_empty())
                .collect(),
            cache_control: Some(config.cache_control.clone()).filter(|c| !c.is_empty()),
            metadata: config.metadata.clone(),
            acl: config.acl.clone(),
        }
    }

    /// MIME type for `path` based on its extension.
    pub fn content_type(path: &Path) -> String {
        mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string()
    }

    /// Whether `path`'s extension is in the gzip set. Matching is exact and
    /// case-sensitive.
    pub fn should_compress(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| self.gzip.contains(ext))
    }

    /// Opens `path` for upload, compressing on the fly when its extension
    /// is in the gzip set.
    ///
    /// Compression runs on a blocking thread and writes into a bounded pipe,
    /// so only a bounded amount of output waits for the uploader.
    /// The source file is closed when that thread ends, on every path.
    pub async fn prepare(&self, path: &Path) -> Result<PreparedContent, TransferError> {
        let content_type = Self::content_type(path);
        let file = tokio::fs::File::open(path).await?;

        if !self.should_compress(path) {
            return Ok(PreparedContent {
                stream: Box::new(file),
                compressed: false,
                content_type,
                compressor: Compressor::default(),
            });
        }

        let source = file.into_std().await;
        let (reader, writer) = tokio::io::duplex(PIPE_CAPACITY);
        let sink = SyncIoBridge::new(writer);
        let display = path.display().to_string();
        let handle = tokio::task::spawn_blocking(move || {
            compress(source, sink).map_err(|e| TransferError::Compression(format!("{display}: {e}")))
        });

        Ok(PreparedContent {
            stream: Box::new(reader),
            compressed: true,
            content_type,
            compressor: Compressor(Some(handle)),
        })
    }

    /// Attributes to store with `content`.
    ///
    /// ACL entries were validated with the configuration; a malformed entry
    /// still fails this file instead of being dropped.
    pub fn attributes(&self, content: &PreparedContent) -> Result<ObjectAttributes, TransferError> {
        let acl = self
            .acl
            .iter()
            .map(|entry| AclRule::parse(entry))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ObjectAttributes {
            content_type: content.content_type.clone(),
            content_encoding: content.compressed.then(|| GZIP_ENCODING.to_string()),
            cache_control: self.cache_control.clone(),
            metadata: self.metadata.clone(),
            acl,
        })
    }
}

fn compress<R: Read, W>(mut source: R, sink: SyncIoBridge<W>) -> io::Result<()>
where
    W: tokio::io::AsyncWrite + Unpin,
{
    let mut encoder = GzEncoder::new(sink, Compression::default());
    io::copy(&mut source, &mut encoder)?;
    let mut sink = encoder.finish()?;
    sink.flush()?;
    sink.shutdown()
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use tokio::io::AsyncReadExt;

    fn pipeline(gzip: &[&str]) -> ContentPipeline {
        ContentPipeline::new(&TransferConfig {
            gzip: gzip.iter().map(|s| s.to_string()).collect(),
            cache_control: "public,max-age=10".to_string(),
            metadata: HashMap::from([("x-foo".to_string(), "bar".to_string())]),
            acl: vec!["allUsers:READER".to_string()],
            ..TransferConfig::default()
        })
    }

    /// Incompressible bytes, so the gzip output outgrows the pipe.
    fn noise(len: usize) -> Vec<u8> {
        let mut state = 0x2545_f491_u32;
        (0..len)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state as u8
            })
            .collect()
    }

    async fn read_all(mut stream: ContentStream) -> Vec<u8> {
        let mut bytes = Vec::new();
        stream.read_to_end(&mut bytes).await.unwrap();
        bytes
    }

    fn gunzip(bytes: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(bytes).read_to_end(&mut out).unwrap();
        out
    }

    #[test]
    fn test_content_type() {
        assert_eq!(ContentPipeline::content_type(Path::new("a/file.txt")), "text/plain");
        assert_eq!(ContentPipeline::content_type(Path::new("file.css")), "text/css");
        assert_eq!(
            ContentPipeline::content_type(Path::new("file.unknownext")),
            DEFAULT_CONTENT_TYPE
        );
        assert_eq!(ContentPipeline::content_type(Path::new("Makefile")), DEFAULT_CONTENT_TYPE);
    }

    #[test]
    fn test_should_compress() {
        let p = pipeline(&["js", "css"]);
        assert!(p.should_compress(Path::new("/x/app.js")));
        assert!(p.should_compress(Path::new("site.min.css")));
        assert!(!p.should_compress(Path::new("APP.JS")));
        assert!(!p.should_compress(Path::new("app.jsx")));
        assert!(!p.should_compress(Path::new("js")));
    }

    #[tokio::test]
    async fn test_compressed_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.js");
        let original = noise(1024 * 1024);
        std::fs::write(&path, &original).unwrap();

        let p = pipeline(&["js"]);
        let content = p.prepare(&path).await.unwrap();
        assert!(content.compressed);
        let attributes = p.attributes(&content).unwrap();
        assert_eq!(attributes.content_encoding.as_deref(), Some(GZIP_ENCODING));

        let (stream, compressor) = content.into_parts();
        let uploaded = read_all(stream).await;
        compressor.finish().await.unwrap();
        assert_eq!(gunzip(&uploaded), original);
    }

    #[tokio::test]
    async fn test_uncompressed_is_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "text").unwrap();

        let p = pipeline(&["js"]);
        let content = p.prepare(&path).await.unwrap();
        assert!(!content.compressed);
        let attributes = p.attributes(&content).unwrap();
        assert_eq!(attributes.content_encoding, None);
        assert_eq!(attributes.content_type, "text/plain");
        assert_eq!(attributes.cache_control.as_deref(), Some("public,max-age=10"));
        assert_eq!(attributes.metadata.get("x-foo").map(String::as_str), Some("bar"));
        assert_eq!(attributes.acl.len(), 1);

        let (stream, compressor) = content.into_parts();
        assert_eq!(read_all(stream).await, b"text");
        compressor.finish().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_stream_reports_compression_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.js");
        std::fs::write(&path, noise(1024 * 1024)).unwrap();

        let content = pipeline(&["js"]).prepare(&path).await.unwrap();
        let (stream, compressor) = content.into_parts();
        drop(stream);
        assert!(matches!(
            compressor.finish().await,
            Err(TransferError::Compression(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_file() {
        let err = pipeline(&[]).prepare(Path::new("/does/not/exist.txt")).await;
        assert!(matches!(err, Err(TransferError::IoError(_))));
    }

    #[tokio::test]
    async fn test_malformed_acl_fails_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("file.txt");
        std::fs::write(&path, "text").unwrap();

        let p = ContentPipeline::new(&TransferConfig {
            acl: vec!["nocolon".to_string()],
            ..TransferConfig::default()
        });
        let content = p.prepare(&path).await.unwrap();
        assert!(matches!(
            p.attributes(&content),
            Err(TransferError::Configuration(_))
        ));
    }
}
