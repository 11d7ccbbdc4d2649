//! Object storage for harvested media.
//!
//! The catalog stores keys, not bytes; everything binary lives in a bucket
//! behind the [`ObjectStore`] trait. Production runs against an
//! S3-compatible endpoint (MinIO); the filesystem backend covers local use
//! and tests.

mod fs;
mod s3;

pub use fs::FsStore;
pub use s3::S3Store;

use async_trait::async_trait;

/// Metadata for a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub content_type: Option<String>,
}

/// Object store errors.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("storage backend error: {0}")]
    Backend(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Idempotent object operations against one bucket.
///
/// `put` overwrites silently, so retries of the same storage key converge
/// on a single object.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes under a key with a content type and opaque metadata pairs.
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        content_type: &str,
        metadata: &[(String, String)],
    ) -> Result<(), StorageError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Read `length` bytes starting at `offset`.
    async fn get_range(&self, key: &str, offset: u64, length: u64)
        -> Result<Vec<u8>, StorageError>;

    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// Proxy-relative address for a stored object.
///
/// The web layer serves bytes through its own proxy endpoint; a query
/// parameter avoids slash-routing issues with nested keys.
pub fn public_url(key: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(key.as_bytes()).collect();
    format!("/feed/media?key={encoded}")
}
