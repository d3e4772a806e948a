//! Storage abstraction trait
//!
//! All object-storage backends used by the upload pipeline implement
//! [`ObjectStorage`]. The worker and the reconciler depend only on this
//! trait, never on a concrete client.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncRead;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A byte-count progress event emitted during a transfer.
///
/// `total_bytes` is the declared stream size when known; callers fall back
/// to their own size estimate when it is `None`.
#[derive(Debug, Clone, Copy)]
pub struct TransferProgress {
    pub loaded_bytes: u64,
    pub total_bytes: Option<u64>,
}

/// Progress callback invoked as parts of a multipart transfer complete.
pub type ProgressFn = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Result of a completed multipart upload.
#[derive(Debug, Clone)]
pub struct UploadOutcome {
    /// Content ETag reported by the storage service, when available.
    pub e_tag: Option<String>,
    /// Storage-reported object location, when available.
    pub location: Option<String>,
    /// Observed stream size in bytes.
    pub size: u64,
}

/// Object storage abstraction for the upload pipeline.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Stream `reader` to the object at `key` as a multipart upload.
    ///
    /// `metadata` must already be string-only key/value pairs. The part
    /// size and part concurrency are fixed at construction. `declared_size`
    /// is echoed back through progress events as the total when the backend
    /// cannot determine it itself.
    async fn upload_multipart(
        &self,
        key: &str,
        reader: Pin<Box<dyn AsyncRead + Send + Unpin>>,
        content_type: &str,
        metadata: HashMap<String, String>,
        declared_size: Option<u64>,
        progress: Option<ProgressFn>,
    ) -> StorageResult<UploadOutcome>;

    /// Delete the object at `key`. Deleting a missing object is not an
    /// error.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Bucket this client writes to.
    fn bucket(&self) -> &str;

    /// Deterministic public URL for an object in this bucket.
    fn public_url(&self, key: &str) -> String;
}
