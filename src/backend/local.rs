//! Durable local backend: one file per key under a configured directory.

use std::path::Path;

use async_trait::async_trait;

use super::fs::FileStore;
use super::{Backend, BackendError, BackendKind};

#[derive(Debug)]
pub struct LocalBackend {
    store: FileStore,
}

impl LocalBackend {
    /// Open (or create) the store rooted at `dir`
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, BackendError> {
        Ok(Self {
            store: FileStore::create(dir.as_ref())?,
        })
    }

    pub fn path(&self) -> &Path {
        self.store.root()
    }
}

#[async_trait]
impl Backend for LocalBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        self.store.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.store.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.store.remove(key).await
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.store.clear().await
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        self.store.keys().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_data_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let backend = LocalBackend::open(dir.path()).unwrap();
            backend.set("durable", b"yes").await.unwrap();
        }

        let reopened = LocalBackend::open(dir.path()).unwrap();
        assert_eq!(reopened.get("durable").await.unwrap(), Some(b"yes".to_vec()));
    }

    #[tokio::test]
    async fn test_open_creates_nested_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let backend = LocalBackend::open(&nested).unwrap();

        assert!(nested.is_dir());
        assert_eq!(backend.path(), nested.as_path());
    }
}
