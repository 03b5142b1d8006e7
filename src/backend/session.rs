//! Session-scoped backend.
//!
//! Data lives in a private temporary directory that is deleted when the
//! backend is dropped, so nothing outlives the session that wrote it.

use std::path::Path;

use async_trait::async_trait;
use tempfile::TempDir;

use super::fs::FileStore;
use super::{Backend, BackendError, BackendKind};

#[derive(Debug)]
pub struct SessionBackend {
    store: FileStore,
    // Declared after `store`; removing the directory happens last on drop
    _dir: TempDir,
}

impl SessionBackend {
    pub fn new() -> Result<Self, BackendError> {
        let dir = tempfile::Builder::new()
            .prefix("stashkit-session-")
            .tempdir()
            .map_err(|e| BackendError::io(std::env::temp_dir(), e))?;
        let store = FileStore::create(dir.path())?;
        Ok(Self { store, _dir: dir })
    }

    /// Directory backing this session
    pub fn path(&self) -> &Path {
        self.store.root()
    }
}

#[async_trait]
impl Backend for SessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Session
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
