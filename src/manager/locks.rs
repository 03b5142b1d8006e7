//! Per-key async locks.
//!
//! Operations on the same key queue behind one `tokio::sync::Mutex`, which
//! grants the lock in FIFO order. Operations on different keys never touch
//! each other's mutex.
//!
//! # Lifecycle
//!
//! The map holds one `Arc<Mutex<()>>` per key that has a holder or a waiter:
//!
//! 1. [`KeyLocks::lock`] clones the entry's `Arc` (creating the entry if
//!    needed) while the DashMap shard is locked, then awaits the mutex with
//!    the shard released.
//! 2. Each waiter keeps its own clone, so the strong count is one for the
//!    map plus one per holder or waiter.
//! 3. Dropping a [`KeyGuard`] releases the mutex first and then removes the
//!    entry only if the map's reference is the last one. `remove_if` runs
//!    under the shard lock, the same lock step 1 clones under, so a caller
//!    cannot pick up an entry that is being removed.
//!
//! The map therefore never grows beyond the number of keys in use. A
//! cancelled waiter drops its clone with its future, and the entry goes
//! away with the next guard released on that key.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Debug, Default)]
pub(crate) struct KeyLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Wait until every earlier caller for `key` has released it
    pub(crate) async fn lock(&self, key: &str) -> KeyGuard<'_> {
        let mutex = self.locks.entry(key.to_string()).or_default().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self,
            key: key.to_string(),
            guard: Some(guard),
        }
    }

    /// Keys with a holder or waiter
    pub(crate) fn len(&self) -> usize {
        self.locks.len()
    }
}

/// Exclusive access to one key until dropped
pub(crate) struct KeyGuard<'a> {
    locks: &'a KeyLocks,
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        // Release first so the map entry is the only remaining reference
        self.guard.take();
        self.locks
            .locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
