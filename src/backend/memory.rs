//! Process-memory backend.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{Backend, BackendError, BackendKind};

/// In-memory store; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    data: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total bytes held across all values
    pub fn size_bytes(&self) -> usize {
        self.data.iter().map(|entry| entry.value().len()).sum()
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError> {
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), BackendError> {
        self.data.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), BackendError> {
        self.data.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, BackendError> {
        Ok(self.data.iter().map(|entry| entry.key().clone()).collect())
    }

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(self.data.len())
    }

    async fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.data.contains_key(key))
    }
}
