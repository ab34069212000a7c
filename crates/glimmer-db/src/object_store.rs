//! Filesystem-backed object store.

use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use glimmer_core::{Error, ObjectStore, Result};

/// Blobs stored as files under a base directory.
#[derive(Debug, Clone)]
pub struct FilesystemObjectStore {
    base_path: PathBuf,
}

impl FilesystemObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    /// Resolve `key` below the base directory, refusing absolute paths and `..`.
    fn full_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let safe = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !safe {
            return Err(Error::InvalidInput(format!("Invalid object key: {}", key)));
        }
        Ok(self.base_path.join(relative))
    }

    /// Write `data` under `key`, creating parent directories.
    pub async fn put(&self, key: &str, data: &[u8]) -> Result<()> {
        let path = self.full_path(key)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&path, data).await?;
        debug!(
            subsystem = "storage",
            component = "object_store",
            op = "put",
            object_key = %key,
            size = data.len(),
            "Stored object"
        );
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for FilesystemObjectStore {
    async fn fetch(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.full_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(format!("object {}", key)))
            }
            Err(e) => Err(Error::Storage(format!("read {}: {}", key, e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        store.put("photos/u1/face.jpg", b"jpeg-bytes").await.unwrap();
        assert_eq!(store.fetch("photos/u1/face.jpg").await.unwrap(), b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        let err = store.fetch("nope.jpg").await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_path_escape_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FilesystemObjectStore::new(dir.path());
        for key in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            let err = store.fetch(key).await.unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "{}", key);
        }
    }
}
