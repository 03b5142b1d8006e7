//! Change queue and sync bookkeeping.

use std::collections::VecDeque;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::item::now_millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    Set,
    Delete,
}

/// One mutation waiting to be replayed against the sync target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeQueueEntry {
    pub kind: ChangeKind,
    pub key: String,
    /// Encoded inline envelope for `Set`, `None` for `Delete`
    pub value: Option<Vec<u8>>,
    /// Enqueue time, ms since the Unix epoch
    pub timestamp: u64,
}

impl ChangeQueueEntry {
    pub fn set(key: impl Into<String>, envelope: Vec<u8>) -> Self {
        Self {
            kind: ChangeKind::Set,
            key: key.into(),
            value: Some(envelope),
            timestamp: now_millis(),
        }
    }

    pub fn delete(key: impl Into<String>) -> Self {
        Self {
            kind: ChangeKind::Delete,
            key: key.into(),
            value: None,
            timestamp: now_millis(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    #[default]
    Idle,
    Syncing,
    Error,
}

/// A change the sync target refused permanently
///
/// Held aside so it cannot block the changes queued behind it. Callers
/// inspect these through [`StorageManager::failed_changes`] and may hand them
/// back with [`StorageManager::retry_failed_changes`].
///
/// [`StorageManager::failed_changes`]: super::StorageManager::failed_changes
/// [`StorageManager::retry_failed_changes`]: super::StorageManager::retry_failed_changes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedChange {
    pub entry: ChangeQueueEntry,
    pub error: String,
    /// ms since the Unix epoch
    pub failed_at: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SyncState {
    /// Completion time of the last successful sync, ms since the Unix epoch
    pub last_sync: Option<u64>,
    pub pending_changes: usize,
    /// Changes set aside after a permanent failure
    pub failed_changes: usize,
    pub sync_errors: u64,
    pub last_error: Option<String>,
    pub status: SyncStatus,
}

/// FIFO of pending changes; no deduplication
#[derive(Debug, Default)]
pub(crate) struct ChangeQueue {
    entries: Mutex<VecDeque<ChangeQueueEntry>>,
}

impl ChangeQueue {
    pub(crate) fn push(&self, entry: ChangeQueueEntry) {
        self.entries.lock().push_back(entry);
    }

    /// Copy of the oldest entry; it stays queued until [`Self::pop_front`]
    pub(crate) fn front(&self) -> Option<ChangeQueueEntry> {
        self.entries.lock().front().cloned()
    }

    pub(crate) fn pop_front(&self) -> Option<ChangeQueueEntry> {
        self.entries.lock().pop_front()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub(crate) fn snapshot(&self) -> Vec<ChangeQueueEntry> {
        self.entries.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_front_leaves_entry_queued() {
        let queue = ChangeQueue::default();
        queue.push(ChangeQueueEntry::set("a", vec![1]));
        queue.push(ChangeQueueEntry::delete("b"));

        assert_eq!(queue.front().unwrap().key, "a");
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front().unwrap().key, "a");
        assert_eq!(queue.front().unwrap().key, "b");

        // New entries land behind the ones already waiting
        queue.push(ChangeQueueEntry::set("late", vec![3]));
        let keys: Vec<_> = queue.snapshot().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, ["b", "late"]);
    }

    #[test]
    fn test_no_deduplication() {
        let queue = ChangeQueue::default();
        queue.push(ChangeQueueEntry::set("k", vec![1]));
        queue.push(ChangeQueueEntry::set("k", vec![2]));
        assert_eq!(queue.len(), 2);
    }
}
