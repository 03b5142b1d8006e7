//! Storage facade
//!
//! [`StorageManager`] owns one backend (chosen at construction), the item
//! codec, the change queue and the sync bookkeeping. Every public operation
//! is timed into the shared [`MetricsCollector`] and every failure is logged
//! before it is returned.
//!
//! # Ordering
//!
//! Operations on one key run strictly one after another in arrival order;
//! operations on different keys run concurrently. `clear()` and the sync
//! snapshot take an exclusive gate and so wait for everything in flight.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::backend::{self, Backend, BackendKind};
use crate::config::StashConfig;
use crate::error::StorageError;
use crate::item::{now_millis, ItemCodec, CHUNK_MARKER};
use crate::metrics::{MetricsCollector, OperationKind, OperationRecord, TransformMetrics};

mod envelope;
mod locks;
pub mod options;
pub mod queue;

use envelope::{delete_envelope, peek_envelope, read_envelope, replace_envelope};
use locks::KeyLocks;
pub use options::{Chunk, ChunkHandler, ChunkHandlerError, ItemOptions, ProgressFn, WriteProgress};
pub use queue::{ChangeKind, ChangeQueueEntry, FailedChange, SyncState, SyncStatus};
use queue::ChangeQueue;

/// Longest accepted key in bytes
///
/// Keeps hex-encoded file names of keys and their chunk records within
/// common file-system limits.
pub const MAX_KEY_LENGTH: usize = 100;

pub struct StorageManager {
    backend: Arc<dyn Backend>,
    sync_target: Option<Arc<dyn Backend>>,
    codec: ItemCodec,
    metrics: Arc<MetricsCollector>,
    config: StashConfig,
    locks: KeyLocks,
    gate: RwLock<()>,
    queue: ChangeQueue,
    failed: Mutex<Vec<FailedChange>>,
    sync_state: Mutex<SyncState>,
    syncing: AtomicBool,
}

impl std::fmt::Debug for StorageManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageManager")
            .field("backend", &self.backend.kind())
            .field("sync_target", &self.sync_target.as_ref().map(|t| t.kind()))
            .field("pending_changes", &self.queue.len())
            .finish_non_exhaustive()
    }
}

/// Clears the in-progress flag however `sync()` exits
struct SyncFlag<'a>(&'a AtomicBool);

impl Drop for SyncFlag<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Status bookkeeping for one sync run
///
/// Marks the state `Syncing` on creation. A run dropped before
/// [`SyncRun::finish`] (its future was cancelled) puts the status back to
/// `Idle`; the changes it had not replayed are still at the head of the
/// queue.
struct SyncRun<'a> {
    state: &'a Mutex<SyncState>,
    finished: bool,
}

impl<'a> SyncRun<'a> {
    fn begin(state: &'a Mutex<SyncState>) -> Self {
        state.lock().status = SyncStatus::Syncing;
        Self { state, finished: false }
    }

    fn finish(mut self, result: &Result<(), StorageError>, total: usize) {
        self.finished = true;
        let mut state = self.state.lock();
        match result {
            Ok(()) => {
                state.last_sync = Some(now_millis());
                state.status = SyncStatus::Idle;
                state.last_error = None;
                tracing::info!(changes = total, "sync completed");
            }
            Err(e) => {
                state.sync_errors += 1;
                state.last_error = Some(e.to_string());
                state.status = SyncStatus::Error;
            }
        }
    }
}

impl Drop for SyncRun<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.state.lock().status = SyncStatus::Idle;
            tracing::warn!("sync cancelled; unreplayed changes stay queued");
        }
    }
}

impl StorageManager {
    /// Build a facade over an already opened backend
    pub fn new(
        backend: Arc<dyn Backend>,
        config: StashConfig,
        metrics: Arc<MetricsCollector>,
    ) -> Result<Self, StorageError> {
        let codec = ItemCodec::from_config(&config)?;
        Ok(Self {
            backend,
            sync_target: None,
            codec,
            metrics,
            config,
            locks: KeyLocks::new(),
            gate: RwLock::new(()),
            queue: ChangeQueue::default(),
            failed: Mutex::new(Vec::new()),
            sync_state: Mutex::new(SyncState::default()),
            syncing: AtomicBool::new(false),
        })
    }

    /// Validate `config`, open its backend and, when a cloud store is
    /// configured alongside a different primary backend, use the cloud
    /// store as the sync target
    pub fn from_config(config: StashConfig, metrics: Arc<MetricsCollector>) -> Result<Self, StorageError> {
        config.validate()?;
        let primary = backend::open_backend(&config)?;

        let target = if config.backend != BackendKind::Cloud && config.cloud.is_configured() {
            Some(backend::open_backend_kind(BackendKind::Cloud, &config)?)
        } else {
            None
        };

        let manager = Self::new(primary, config, metrics)?;
        Ok(match target {
            Some(target) => manager.with_sync_target(target),
            None => manager,
        })
    }

    /// Replay the change queue against `target` on `sync()`
    pub fn with_sync_target(mut self, target: Arc<dyn Backend>) -> Self {
        self.sync_target = Some(target);
        self
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn sync_target_kind(&self) -> Option<BackendKind> {
        self.sync_target.as_ref().map(|target| target.kind())
    }

    pub fn config(&self) -> &StashConfig {
        &self.config
    }

    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.metrics
    }

    /// Transform timings of the most recent encode or decode
    pub fn transform_metrics(&self) -> TransformMetrics {
        self.codec.last_metrics()
    }

    /// Entries waiting for the next sync, oldest first
    pub fn pending_changes(&self) -> Vec<ChangeQueueEntry> {
        self.queue.snapshot()
    }

    /// Serialize, transform and store `value` under `key`
    pub async fn set_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &ItemOptions,
    ) -> Result<(), StorageError> {
        self.timed(OperationKind::Set, key, self.write_item(key, value, options))
            .await
    }

    /// Load and decode the value under `key`; `Ok(None)` when absent or expired
    pub async fn get_item<T: DeserializeOwned>(
        &self,
        key: &str,
        options: &ItemOptions,
    ) -> Result<Option<T>, StorageError> {
        let started = Instant::now();
        let result = self.read_item(key, options).await;
        match &result {
            Ok(value) => {
                self.metrics
                    .record(OperationRecord::read(started.elapsed(), value.is_some()));
                tracing::debug!(key, hit = value.is_some(), "get_item");
            }
            Err(e) => {
                self.metrics
                    .record(OperationRecord::new(OperationKind::Get, started.elapsed(), false));
                log_failure(OperationKind::Get, key, e);
            }
        }
        result
    }

    /// Delete `key` and its chunk records
    pub async fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.timed(OperationKind::Remove, key, self.delete_item(key, true))
            .await
    }

    /// Remove without recording a change; used for scratch keys
    pub(crate) async fn discard_item(&self, key: &str) -> Result<(), StorageError> {
        self.delete_item(key, false).await
    }

    /// Wait for every in-flight operation, then empty the backend
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.timed(OperationKind::Clear, "*", self.clear_all()).await
    }

    /// Replay queued changes against the sync target
    ///
    /// A no-op when sync is disabled. Only one sync runs at a time; a second
    /// caller gets [`StorageError::SyncInProgress`] immediately.
    ///
    /// The run covers the changes queued when it starts; later changes wait
    /// for the next sync. Each change leaves the queue only once the target
    /// has accepted it, so dropping this future (a timeout, runtime shutdown)
    /// loses nothing and a later call picks up where it stopped.
    ///
    /// A change the target refuses for good is moved to
    /// [`failed_changes`](Self::failed_changes) and the replay carries on
    /// with the rest. A transient failure that outlasts `max_retries` stops
    /// the replay with that change still at the head of the queue. Either
    /// way the call returns [`StorageError::Sync`].
    pub async fn sync(&self) -> Result<(), StorageError> {
        if !self.sync_enabled() {
            return Ok(());
        }
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sync already running");
            return Err(StorageError::SyncInProgress);
        }
        let _flag = SyncFlag(&self.syncing);
        self.timed(OperationKind::Sync, "*", self.sync_queue()).await
    }

    /// Copy of the current sync bookkeeping
    pub fn sync_state(&self) -> SyncState {
        let mut state = self.sync_state.lock().clone();
        state.pending_changes = self.queue.len();
        state.failed_changes = self.failed.lock().len();
        state
    }

    /// Changes the sync target refused permanently, oldest first
    pub fn failed_changes(&self) -> Vec<FailedChange> {
        self.failed.lock().clone()
    }

    /// Remove and return the refused changes
    pub fn take_failed_changes(&self) -> Vec<FailedChange> {
        std::mem::take(&mut *self.failed.lock())
    }

    pub fn sync_enabled(&self) -> bool {
        self.config.sync.enabled
    }

    /// Whether an unexpired item is stored under `key`
    pub async fn contains_key(&self, key: &str) -> Result<bool, StorageError> {
        validate_key(key)?;
        let item = peek_envelope(self.backend.as_ref(), key).await?;
        Ok(item.is_some_and(|item| !item.is_expired(now_millis())))
    }

    /// Keys of stored items; chunk records are not listed
    pub async fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.item_keys().await
    }

    pub async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.item_keys().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len().await? == 0)
    }

    /// Delete every expired item, returning how many were removed
    pub async fn purge_expired(&self) -> Result<usize, StorageError> {
        let now = now_millis();
        let mut purged = 0;
        for key in self.item_keys().await? {
            let _gate = self.gate.read().await;
            let _lock = self.locks.lock(&key).await;
            let expired = match peek_envelope(self.backend.as_ref(), &key).await {
                Ok(Some(item)) => item.is_expired(now),
                Ok(None) => false,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping unreadable item during purge");
                    false
                }
            };
            if expired {
                self.remove_locked(&key, true).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::info!(purged, "purged expired items");
        }
        Ok(purged)
    }

    async fn timed<T>(
        &self,
        kind: OperationKind,
        key: &str,
        operation: impl Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        let started = Instant::now();
        let result = operation.await;
        self.metrics
            .record(OperationRecord::new(kind, started.elapsed(), result.is_ok()));
        match &result {
            Ok(_) => tracing::debug!(op = kind.as_str(), key, "storage operation completed"),
            Err(e) => log_failure(kind, key, e),
        }
        result
    }

    async fn write_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        options: &ItemOptions,
    ) -> Result<(), StorageError> {
        validate_key(key)?;
        let chunk_size = options.chunk_size.unwrap_or(self.config.chunk_size);
        if chunk_size == 0 {
            return Err(StorageError::Validation("chunk_size must be greater than zero".into()));
        }
        let encrypt = options.encrypt.unwrap_or(self.config.encryption_enabled);
        let compress = options.compress.unwrap_or(self.config.compression_enabled);

        let _gate = self.gate.read().await;
        let _lock = self.locks.lock(key).await;

        let mut item = self.codec.encode(key, value, encrypt, compress)?;
        item.metadata = options.metadata.clone();
        item.expires_at = options
            .ttl
            .or(self.config.ttl)
            .map(|ttl| item.timestamp.saturating_add(ttl.as_millis() as u64));

        let queued = if self.sync_enabled() && !options.skip_change_queue {
            Some(item.to_bytes().map_err(|e| e.for_key(key))?)
        } else {
            None
        };

        replace_envelope(self.backend.as_ref(), item, chunk_size, Some(options)).await?;

        if let Some(envelope) = queued {
            self.queue.push(ChangeQueueEntry::set(key, envelope));
        }
        Ok(())
    }

    async fn read_item<T: DeserializeOwned>(
        &self,
        key: &str,
        _options: &ItemOptions,
    ) -> Result<Option<T>, StorageError> {
        validate_key(key)?;
        let _gate = self.gate.read().await;
        let _lock = self.locks.lock(key).await;

        let Some(item) = read_envelope(self.backend.as_ref(), key).await? else {
            return Ok(None);
        };
        if item.is_expired(now_millis()) {
            tracing::debug!(key, "item expired; removing");
            self.remove_locked(key, true).await?;
            return Ok(None);
        }
        self.codec.decode(&item).map(Some)
    }

    async fn delete_item(&self, key: &str, record_change: bool) -> Result<(), StorageError> {
        validate_key(key)?;
        let _gate = self.gate.read().await;
        let _lock = self.locks.lock(key).await;
        self.remove_locked(key, record_change).await
    }

    /// Caller holds the gate and the key lock
    async fn remove_locked(&self, key: &str, record_change: bool) -> Result<(), StorageError> {
        delete_envelope(self.backend.as_ref(), key).await?;
        if record_change && self.sync_enabled() {
            self.queue.push(ChangeQueueEntry::delete(key));
        }
        Ok(())
    }

    async fn item_keys(&self) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .backend
            .keys()
            .await?
            .into_iter()
            .filter(|key| !key.contains(CHUNK_MARKER))
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn clear_all(&self) -> Result<(), StorageError> {
        let _gate = self.gate.write().await;
        let keys = if self.sync_enabled() {
            self.item_keys().await?
        } else {
            Vec::new()
        };
        self.backend.clear().await?;
        for key in keys {
            self.queue.push(ChangeQueueEntry::delete(key));
        }
        tracing::info!(backend = %self.backend.kind(), "storage cleared");
        Ok(())
    }

    async fn sync_queue(&self) -> Result<(), StorageError> {
        let run = SyncRun::begin(&self.sync_state);

        // Everything appended after this point waits for the next sync
        let total = {
            let _gate = self.gate.write().await;
            self.queue.len()
        };
        let result = self.replay(total).await;
        run.finish(&result, total);
        result
    }

    /// Replay the first `total` queued changes
    ///
    /// Only one sync runs at a time, so the head of the queue belongs to this
    /// run; writers append at the back.
    async fn replay(&self, total: usize) -> Result<(), StorageError> {
        let Some(target) = self.sync_target.clone() else {
            for _ in 0..total {
                self.queue.pop_front();
            }
            tracing::debug!(changes = total, "no sync target; changes acknowledged");
            return Ok(());
        };

        let mut replayed = 0;
        let mut refused = None;
        for _ in 0..total {
            let Some(entry) = self.queue.front() else {
                break;
            };
            match self.replay_with_retry(target.as_ref(), &entry).await {
                Ok(()) => {
                    self.queue.pop_front();
                    replayed += 1;
                }
                Err(source) if source.is_retryable() => {
                    return Err(StorageError::Sync {
                        replayed,
                        total,
                        source: Box::new(source),
                    });
                }
                Err(source) => {
                    self.queue.pop_front();
                    tracing::error!(
                        key = %entry.key,
                        kind = ?entry.kind,
                        error = %source,
                        "sync target refused change; set aside"
                    );
                    self.failed.lock().push(FailedChange {
                        entry,
                        error: source.to_string(),
                        failed_at: now_millis(),
                    });
                    refused.get_or_insert(source);
                }
            }
        }

        match refused {
            Some(source) => Err(StorageError::Sync {
                replayed,
                total,
                source: Box::new(source),
            }),
            None => Ok(()),
        }
    }

    async fn replay_with_retry(&self, target: &dyn Backend, entry: &ChangeQueueEntry) -> Result<(), StorageError> {
        let retries = self.config.sync.max_retries;
        let mut attempt = 0u32;
        loop {
            match self.replay_entry(target, entry).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_retryable() && attempt < retries => {
                    let delay = self
                        .config
                        .sync
                        .retry_delay
                        .saturating_mul(2u32.saturating_pow(attempt));
                    tracing::warn!(
                        key = %entry.key,
                        attempt = attempt + 1,
                        max_retries = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying sync of change"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn replay_entry(&self, target: &dyn Backend, entry: &ChangeQueueEntry) -> Result<(), StorageError> {
        match entry.kind {
            ChangeKind::Set => {
                let bytes = entry.value.as_deref().ok_or_else(|| {
                    StorageError::integrity(&entry.key, "queued set carries no envelope")
                })?;
                let item = crate::item::StorageItem::from_bytes(bytes).map_err(|e| e.for_key(&entry.key))?;
                item.verify().map_err(|e| e.for_key(&entry.key))?;
                replace_envelope(target, item, self.config.chunk_size, None).await
            }
            ChangeKind::Delete => delete_envelope(target, &entry.key).await,
        }
    }
}

fn validate_key(key: &str) -> Result<(), StorageError> {
    if key.is_empty() {
        return Err(StorageError::Validation("key must not be empty".into()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StorageError::Validation(format!(
            "key is {} bytes; the limit is {MAX_KEY_LENGTH}",
            key.len()
        )));
    }
    if key.contains(CHUNK_MARKER) {
        return Err(StorageError::Validation(format!(
            "key {key:?} contains the reserved sequence {CHUNK_MARKER:?}"
        )));
    }
    Ok(())
}

fn log_failure(kind: OperationKind, key: &str, error: &StorageError) {
    match error {
        StorageError::SyncInProgress => tracing::debug!(op = kind.as_str(), "sync skipped: already running"),
        _ => tracing::error!(op = kind.as_str(), key, error = %error, "storage operation failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::time::Duration;

    fn manager_with(config: StashConfig) -> (StorageManager, MemoryBackend) {
        let backend = MemoryBackend::new();
        let manager = StorageManager::new(
            Arc::new(backend.clone()),
            config,
            Arc::new(MetricsCollector::default()),
        )
        .unwrap();
        (manager, backend)
    }

    fn sync_config() -> StashConfig {
        let mut config = StashConfig {
            backend: BackendKind::Memory,
            ..StashConfig::default()
        };
        config.sync.enabled = true;
        config.sync.retry_delay = Duration::from_millis(1);
        config
    }

    #[tokio::test]
    async fn test_invalid_keys_rejected() {
        let (manager, _) = manager_with(StashConfig::default());
        let opts = ItemOptions::new();

        for key in ["", "a#chunk0", &"x".repeat(MAX_KEY_LENGTH + 1)] {
            assert!(matches!(
                manager.set_item(key, &1, &opts).await,
                Err(StorageError::Validation(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_ttl_expiry_reads_as_absent() {
        let (manager, backend) = manager_with(StashConfig::default());
        let opts = ItemOptions::new().ttl(Duration::from_millis(1));

        manager.set_item("short", &"lived", &opts).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(!manager.contains_key("short").await.unwrap());
        assert_eq!(manager.get_item::<String>("short", &opts).await.unwrap(), None);
        assert!(backend.get("short").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let (manager, _) = manager_with(StashConfig::default());
        manager
            .set_item("old", &1, &ItemOptions::new().ttl(Duration::from_millis(1)))
            .await
            .unwrap();
        manager.set_item("keep", &2, &ItemOptions::new()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(manager.purge_expired().await.unwrap(), 1);
        assert_eq!(manager.keys().await.unwrap(), vec!["keep".to_string()]);
    }

    #[tokio::test]
    async fn test_queue_only_grows_when_sync_enabled() {
        let (manager, _) = manager_with(StashConfig::default());
        manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();
        assert_eq!(manager.sync_state().pending_changes, 0);

        let (manager, _) = manager_with(sync_config());
        manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();
        manager.remove_item("k").await.unwrap();
        let kinds: Vec<_> = manager.pending_changes().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, [ChangeKind::Set, ChangeKind::Delete]);
    }

    #[tokio::test]
    async fn test_sync_disabled_is_noop() {
        let (manager, _) = manager_with(StashConfig::default());
        manager.sync().await.unwrap();
        assert_eq!(manager.sync_state().last_sync, None);
    }

    #[tokio::test]
    async fn test_sync_replays_to_target() {
        let (manager, _) = manager_with(sync_config());
        let target = MemoryBackend::new();
        let manager = manager.with_sync_target(Arc::new(target.clone()));

        manager.set_item("a", &"one", &ItemOptions::new()).await.unwrap();
        manager.set_item("b", &"two", &ItemOptions::new()).await.unwrap();
        manager.remove_item("a").await.unwrap();

        let before = now_millis();
        manager.sync().await.unwrap();

        let state = manager.sync_state();
        assert_eq!(state.pending_changes, 0);
        assert_eq!(state.status, SyncStatus::Idle);
        assert!(state.last_sync.unwrap() >= before);
        assert_eq!(target.keys().await.unwrap(), vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn test_metrics_recorded_per_operation() {
        let (manager, _) = manager_with(StashConfig::default());
        let opts = ItemOptions::new();
        manager.set_item("k", &1, &opts).await.unwrap();
        let _: Option<i32> = manager.get_item("k", &opts).await.unwrap();
        let _: Option<i32> = manager.get_item("missing", &opts).await.unwrap();

        let snapshot = manager.metrics().observe(0, 1);
        assert_eq!(snapshot.operations, 3);
        assert_eq!(snapshot.hit_rate, Some(0.5));
    }
}
