//! Facade-level error type
//!
//! Module errors convert into [`StorageError`] with `?`; callers of the
//! facade only ever match on this enum.

use thiserror::Error;

use crate::backend::BackendError;
use crate::compression::CompressionError;
use crate::encryption::{EncryptionError, KeyDerivationError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("integrity check failed for key {key}: {reason}")]
    Integrity { key: String, reason: String },

    #[error(transparent)]
    Compression(#[from] CompressionError),

    #[error(transparent)]
    Encryption(#[from] EncryptionError),

    #[error("key derivation failed: {0}")]
    KeyDerivation(#[from] KeyDerivationError),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("sync failed after {replayed} of {total} changes: {source}")]
    Sync {
        replayed: usize,
        total: usize,
        #[source]
        source: Box<StorageError>,
    },

    #[error("a sync is already in progress")]
    SyncInProgress,

    #[error("configuration error: {0}")]
    Config(String),
}

impl StorageError {
    /// Whether retrying the same operation may succeed
    ///
    /// Only transient backend failures qualify; corrupted or undecryptable
    /// data stays corrupted.
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::Backend(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn integrity(key: &str, reason: impl Into<String>) -> Self {
        StorageError::Integrity {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(e: serde_json::Error) -> Self {
        StorageError::Serialization(e.to_string())
    }
}
