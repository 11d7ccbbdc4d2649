//! Filesystem object store backend.
//!
//! Keys map directly onto paths under a root directory. Content types are
//! recovered from the file extension on `stat`, so no sidecar metadata is
//! written.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::{ObjectMeta, ObjectStore, StorageError};

/// Object store rooted at a local directory.
#[derive(Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

#[async_trait]
impl ObjectStore for FsStore {
    async fn put(
        &self,
        key: &str,
        bytes: &[u8],
        _content_type: &str,
        _metadata: &[(String, String)],
    ) -> Result<(), StorageError> {
        let path = self.object_path(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get_range(
        &self,
        key: &str,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, StorageError> {
        let path = self.object_path(key);
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        file.seek(SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; length as usize];
        let mut read = 0usize;
        while read < buf.len() {
            let n = file.read(&mut buf[read..]).await?;
            if n == 0 {
                break;
            }
            read += n;
        }
        buf.truncate(read);
        Ok(buf)
    }

    async fn stat(&self, key: &str) -> Result<ObjectMeta, StorageError> {
        let path = self.object_path(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(ObjectMeta {
                size: meta.len(),
                content_type: mime_guess::from_path(&path)
                    .first()
                    .map(|m| m.essence_str().to_string()),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.object_path(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Deletes are idempotent
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store
            .put("c1/100_ab12cd34_a.png", b"png-bytes", "image/png", &[])
            .await
            .unwrap();

        let bytes = store.get("c1/100_ab12cd34_a.png").await.unwrap();
        assert_eq!(bytes, b"png-bytes");

        let meta = store.stat("c1/100_ab12cd34_a.png").await.unwrap();
        assert_eq!(meta.size, 9);
        assert_eq!(meta.content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_get_range() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store
            .put("c1/clip.mp4", b"0123456789", "video/mp4", &[])
            .await
            .unwrap();

        assert_eq!(store.get_range("c1/clip.mp4", 2, 4).await.unwrap(), b"2345");
        // Range past the end truncates rather than erroring
        assert_eq!(store.get_range("c1/clip.mp4", 8, 10).await.unwrap(), b"89");
        // Zero-length reads yield zero bytes, never one
        assert!(store.get_range("c1/clip.mp4", 3, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_is_not_found() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());

        assert!(matches!(
            store.get("c1/absent.png").await,
            Err(StorageError::NotFound(_))
        ));
        // Idempotent delete
        store.delete("c1/absent.png").await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites() {
        let dir = tempdir().unwrap();
        let store = FsStore::new(dir.path());

        store.put("k", b"first", "image/png", &[]).await.unwrap();
        store.put("k", b"second", "image/png", &[]).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), b"second");
    }
}
