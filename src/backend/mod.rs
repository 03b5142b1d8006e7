//! Backing store adapters
//!
//! One async capability trait, four interchangeable implementations. The
//! facade only ever sees `Arc<dyn Backend>`; which one it gets is decided
//! once, when the facade is built. Swapping backends changes how long data
//! lives, never how the facade behaves.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::StashConfig;

#[cfg(feature = "cloud")]
pub mod cloud;
mod fs;
pub mod local;
pub mod memory;
pub mod session;

#[cfg(feature = "cloud")]
pub use cloud::CloudBackend;
pub use local::LocalBackend;
pub use memory::MemoryBackend;
pub use session::SessionBackend;

/// Persistence lifetime of a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Process memory; gone when the process exits
    Memory,
    /// Private temporary directory; gone when the backend is dropped
    Session,
    /// Files under a configured directory; survives restarts
    Local,
    /// Remote object store
    Cloud,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Session => "session",
            BackendKind::Local => "local",
            BackendKind::Cloud => "cloud",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Storage-layer failures
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("request to {url} failed: {message}")]
    Request {
        url: String,
        message: String,
        transient: bool,
    },

    #[error("unexpected status {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error("backend misconfigured: {0}")]
    Misconfigured(String),
}

impl BackendError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BackendError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::WouldBlock
            ),
            BackendError::Request { transient, .. } => *transient,
            BackendError::Status { status, .. } => *status == 429 || *status >= 500,
            BackendError::Unavailable(_) => true,
            BackendError::Misconfigured(_) => false,
        }
    }
}

/// Uniform key-value operations over a physical store
///
/// All methods are async even where the store is synchronous underneath,
/// so call sites never depend on the backend in use.
#[async_trait]
pub trait Backend: Send + Sync + fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Raw bytes under `key`, `None` when absent
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BackendError>;

    /// Store `value` under `key`, replacing any previous value
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), BackendError>;

    /// Delete `key`; deleting an absent key succeeds
    async fn remove(&self, key: &str) -> Result<(), BackendError>;

    /// Delete every key
    async fn clear(&self) -> Result<(), BackendError>;

    /// All keys currently stored, in no particular order
    async fn keys(&self) -> Result<Vec<String>, BackendError>;

    async fn len(&self) -> Result<usize, BackendError> {
        Ok(self.keys().await?.len())
    }

    async fn contains(&self, key: &str) -> Result<bool, BackendError> {
        Ok(self.get(key).await?.is_some())
    }
}

/// Build the backend selected by `config.backend`
pub fn open_backend(config: &StashConfig) -> Result<Arc<dyn Backend>, BackendError> {
    open_backend_kind(config.backend, config)
}

/// Build a backend of an explicit kind from the shared configuration
pub fn open_backend_kind(
    kind: BackendKind,
    config: &StashConfig,
) -> Result<Arc<dyn Backend>, BackendError> {
    let backend: Arc<dyn Backend> = match kind {
        BackendKind::Memory => Arc::new(MemoryBackend::new()),
        BackendKind::Session => Arc::new(SessionBackend::new()?),
        BackendKind::Local => Arc::new(LocalBackend::open(&config.local_dir)?),
        #[cfg(feature = "cloud")]
        BackendKind::Cloud => Arc::new(CloudBackend::new(&config.cloud)?),
        #[cfg(not(feature = "cloud"))]
        BackendKind::Cloud => {
            return Err(BackendError::Misconfigured(
                "cloud backend requires the `cloud` feature".into(),
            ))
        }
    };
    tracing::debug!(backend = %kind, "opened storage backend");
    Ok(backend)
}
