//! # stashkit-core
//!
//! Key-value storage facade with pluggable backends, xxHash3 integrity,
//! LZ4 compression and AES-256-GCM encryption.
//!
//! Values are serialized to JSON, optionally compressed and encrypted,
//! checksummed and wrapped in a MessagePack envelope before they reach a
//! backend. Mutations are queued and replayed against a sync target (usually
//! a remote object store) by `sync()`.
//!
//! ## Backends
//!
//! | Backend | Lifetime | Feature |
//! |:--------|:---------|:-------:|
//! | `memory` | process | - |
//! | `session` | backend instance (temporary directory) | - |
//! | `local` | durable, one file per key | - |
//! | `cloud` | remote HTTP object store | `cloud` (default) |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use stashkit_core::{ItemOptions, StashConfig, StashRuntime};
//!
//! # async fn demo() -> Result<(), stashkit_core::StorageError> {
//! let runtime = StashRuntime::open(StashConfig::from_env())?;
//! let storage = runtime.manager();
//!
//! storage.set_item("profile", &"alice", &ItemOptions::new()).await?;
//! let name: Option<String> = storage.get_item("profile", &ItemOptions::new()).await?;
//! assert_eq!(name.as_deref(), Some("alice"));
//!
//! runtime.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! - **AES-256-GCM**: Authenticated encryption via `ring`, ciphertext bound to its key
//! - **HKDF-SHA256**: Payload key derived from `STASHKIT_ENCRYPTION_KEY` per namespace
//! - **xxHash3-64**: Fast non-cryptographic checksums (corruption detection)
//! - **Nonce safety**: Per-instance counter nonces, never reused within a process
//! - **Memory safety**: `zeroize` for derived key material

pub mod backend;
pub mod benchmark;
pub mod compression;
pub mod config;
pub mod encryption;
pub mod error;
pub mod integrity;
pub mod item;
pub mod manager;
pub mod metrics;
pub mod runtime;

pub use backend::{Backend, BackendError, BackendKind, LocalBackend, MemoryBackend, SessionBackend};
#[cfg(feature = "cloud")]
pub use backend::CloudBackend;
pub use benchmark::{Benchmark, BenchmarkOptions, BenchmarkReport, BenchmarkSuite};
pub use config::StashConfig;
pub use encryption::{EncryptionError, KeyDerivationError, PayloadCipher};
pub use error::StorageError;
pub use item::{ItemCodec, ItemError, StorageItem};
pub use manager::{
    ChangeKind, ChangeQueueEntry, FailedChange, ItemOptions, StorageManager, SyncState, SyncStatus, WriteProgress,
};
pub use metrics::{MetricsCollector, OperationKind, OperationRecord, PerformanceMetrics, TransformMetrics};
pub use runtime::{MemoryPressure, StashRuntime};
