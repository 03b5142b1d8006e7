//! Change Queue Sync Tests
//!
//! WHY THIS TEST EXISTS:
//! `sync()` is the only path by which local mutations reach the remote store.
//! A lost or reordered change silently diverges the two copies, so the queue
//! must survive failures and replay in arrival order.
//!
//! WHAT WE'RE TESTING:
//! - Draining: a successful sync empties the queue and mirrors every change
//! - Retry: transient failures back off and retry up to `max_retries`
//! - Failure: exhausted retries leave the change at the head of the queue;
//!   permanent refusals are set aside without blocking later changes
//! - Cancellation: dropping a sync mid-replay loses nothing
//! - Exclusivity: a second concurrent sync is refused, not interleaved

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fixtures::*;
use stashkit_core::{
    Backend, ChangeKind, ItemCodec, ItemOptions, MemoryBackend, StorageError, StorageItem, StorageManager,
    SyncStatus,
};

fn now_ms() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

fn syncing_manager(target: Arc<FlakyBackend>) -> Arc<StorageManager> {
    let metrics = Arc::new(stashkit_core::MetricsCollector::new(&sync_config().metrics));
    let manager = StorageManager::new(Arc::new(MemoryBackend::new()), sync_config(), metrics)
        .unwrap()
        .with_sync_target(target);
    Arc::new(manager)
}

// ============================================================================
// Draining
// ============================================================================

#[tokio::test]
async fn test_sync_mirrors_changes_in_order() {
    init_tracing();
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    let opts = ItemOptions::new();

    manager.set_item("a", &1, &opts).await.unwrap();
    manager.set_item("b", &2, &opts).await.unwrap();
    manager.set_item("a", &3, &opts).await.unwrap();
    manager.remove_item("b").await.unwrap();

    let kinds: Vec<_> = manager
        .pending_changes()
        .iter()
        .map(|e| (e.kind, e.key.clone()))
        .collect();
    assert_eq!(
        kinds,
        [
            (ChangeKind::Set, "a".to_string()),
            (ChangeKind::Set, "b".to_string()),
            (ChangeKind::Set, "a".to_string()),
            (ChangeKind::Delete, "b".to_string()),
        ]
    );

    let before = now_ms();
    manager.sync().await.unwrap();

    assert_eq!(target.inner().keys().await.unwrap(), vec!["a".to_string()]);
    let raw = target.inner().get("a").await.unwrap().unwrap();
    let item = StorageItem::from_bytes(&raw).unwrap();
    let value: i32 = ItemCodec::new(None).decode(&item).unwrap();
    assert_eq!(value, 3);

    let state = manager.sync_state();
    assert_eq!(state.pending_changes, 0);
    assert_eq!(state.status, SyncStatus::Idle);
    assert_eq!(state.sync_errors, 0);
    assert!(state.last_sync.unwrap() >= before);
}

#[tokio::test]
async fn test_synced_envelope_readable_by_second_manager() {
    // WHY: The remote copy must be a complete envelope another device can
    // decode, including chunked payloads

    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    let data = generate_text(5_000, 21);

    manager
        .set_item("shared", &data, &ItemOptions::new().chunk_size(1_000))
        .await
        .unwrap();
    manager.sync().await.unwrap();

    let mut config = sync_config();
    config.chunk_size = 1_000;
    let reader = manager_over(Arc::new(target.inner().clone()), config);
    let restored: Option<String> = reader.get_item("shared", &ItemOptions::new()).await.unwrap();
    assert_eq!(restored, Some(data));
}

#[tokio::test]
async fn test_clear_queues_deletes_for_existing_keys() {
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));

    manager.set_item("x", &1, &ItemOptions::new()).await.unwrap();
    manager.set_item("y", &2, &ItemOptions::new()).await.unwrap();
    manager.sync().await.unwrap();
    assert_eq!(target.inner().keys().await.unwrap().len(), 2);

    manager.clear().await.unwrap();
    manager.sync().await.unwrap();
    assert!(target.inner().keys().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sync_without_target_acknowledges_changes() {
    let (manager, _) = memory_manager(sync_config());
    manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();
    assert_eq!(manager.sync_state().pending_changes, 1);

    let before = now_ms();
    manager.sync().await.unwrap();
    let state = manager.sync_state();
    assert_eq!(state.pending_changes, 0);
    assert!(state.last_sync.unwrap() >= before);
}

// ============================================================================
// Retry and Failure
// ============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    manager.set_item("k", &"v", &ItemOptions::new()).await.unwrap();

    // max_retries is 3, so two failures still succeed on the third attempt
    target.fail_next(2, FailureKind::Transient);
    manager.sync().await.unwrap();

    assert_eq!(target.attempts(), 3);
    assert!(target.inner().get("k").await.unwrap().is_some());
}

#[tokio::test]
async fn test_retries_exhausted_requeues_change() {
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    manager.set_item("k", &"v", &ItemOptions::new()).await.unwrap();

    target.fail_next(4, FailureKind::Transient);
    let err = manager.sync().await.unwrap_err();

    assert!(matches!(err, StorageError::Sync { replayed: 0, total: 1, .. }));
    assert_eq!(target.attempts(), 4, "one attempt plus three retries");

    let state = manager.sync_state();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.sync_errors, 1);
    assert_eq!(state.pending_changes, 1);
    assert!(state.last_error.is_some());

    // Outage over: the next sync delivers the requeued change
    manager.sync().await.unwrap();
    assert_eq!(manager.sync_state().status, SyncStatus::Idle);
    assert!(target.inner().get("k").await.unwrap().is_some());
}

#[tokio::test]
async fn test_permanent_failure_set_aside_not_retried() {
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    manager.set_item("first", &1, &ItemOptions::new()).await.unwrap();
    manager.set_item("second", &2, &ItemOptions::new()).await.unwrap();
    manager.sync().await.unwrap();

    manager.set_item("fourth", &4, &ItemOptions::new()).await.unwrap();
    manager.set_item("fifth", &5, &ItemOptions::new()).await.unwrap();
    target.fail_next(1, FailureKind::Permanent);

    let attempts_before = target.attempts();
    let err = manager.sync().await.unwrap_err();
    assert_eq!(target.attempts() - attempts_before, 2, "one attempt each, no retries");

    let StorageError::Sync { replayed, total, source } = err else {
        panic!("expected sync error");
    };
    assert_eq!((replayed, total), (1, 2));
    assert!(!source.is_retryable());

    assert!(manager.pending_changes().is_empty());
    assert!(target.inner().get("fifth").await.unwrap().is_some());

    let failed = manager.failed_changes();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].entry.key, "fourth");
    assert!(failed[0].error.contains("injected rejection"));

    let state = manager.sync_state();
    assert_eq!(state.status, SyncStatus::Error);
    assert_eq!(state.failed_changes, 1);
    assert_eq!(state.sync_errors, 1);
    assert!(state.last_error.unwrap().contains("injected rejection"));
}

#[tokio::test]
async fn test_refused_change_does_not_block_later_ones() {
    // WHY: A change the target will never accept must not pin the head of
    // the queue; every later change would stay local forever

    let target = Arc::new(FlakyBackend::new());
    target.reject_key("bad");
    let manager = syncing_manager(Arc::clone(&target));
    manager.set_item("bad", &0, &ItemOptions::new()).await.unwrap();

    for round in 0..5 {
        let key = format!("good{round}");
        manager.set_item(&key, &round, &ItemOptions::new()).await.unwrap();
        let _ = manager.sync().await;
    }

    assert_eq!(
        sorted_keys(target.inner()).await,
        ["good0", "good1", "good2", "good3", "good4"]
    );
    let state = manager.sync_state();
    assert_eq!(state.pending_changes, 0);
    assert_eq!(state.failed_changes, 1);
    assert_eq!(state.status, SyncStatus::Idle);

    let taken = manager.take_failed_changes();
    assert_eq!(taken[0].entry.key, "bad");
    assert!(manager.failed_changes().is_empty());
}

#[tokio::test]
async fn test_unsynced_changes_precede_newer_ones() {
    let target = Arc::new(FlakyBackend::new());
    let manager = syncing_manager(Arc::clone(&target));
    manager.set_item("old", &1, &ItemOptions::new()).await.unwrap();

    target.fail_next(4, FailureKind::Transient);
    assert!(manager.sync().await.is_err());

    manager.set_item("new", &2, &ItemOptions::new()).await.unwrap();
    let pending: Vec<_> = manager.pending_changes().into_iter().map(|e| e.key).collect();
    assert_eq!(pending, ["old", "new"]);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn test_cancelled_sync_keeps_changes_queued() {
    // WHY: Callers bound sync() with timeouts and shutdown aborts the sync
    // task; a dropped future must leave its unreplayed changes for the next
    // call instead of discarding them

    let target = Arc::new(FlakyBackend::new());
    let mut config = sync_config();
    config.sync.retry_delay = Duration::from_millis(200);
    let metrics = Arc::new(stashkit_core::MetricsCollector::new(&config.metrics));
    let manager = StorageManager::new(Arc::new(MemoryBackend::new()), config, metrics)
        .unwrap()
        .with_sync_target(target.clone());
    manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();

    // The first write fails, so the sync sits in its 200ms backoff
    target.fail_next(1, FailureKind::Transient);
    let outcome = tokio::time::timeout(Duration::from_millis(50), manager.sync()).await;
    assert!(outcome.is_err(), "sync should still be backing off");

    let state = manager.sync_state();
    assert_eq!(state.pending_changes, 1);
    assert_eq!(state.status, SyncStatus::Idle);

    manager.sync().await.unwrap();
    assert!(target.inner().get("k").await.unwrap().is_some());
    assert_eq!(manager.sync_state().pending_changes, 0);
}

// ============================================================================
// Exclusivity
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sync_is_refused() {
    let target = Arc::new(FlakyBackend::new());
    let mut config = sync_config();
    config.sync.retry_delay = Duration::from_millis(200);
    config.sync.max_retries = 1;
    let metrics = Arc::new(stashkit_core::MetricsCollector::new(&config.metrics));
    let manager = Arc::new(
        StorageManager::new(Arc::new(MemoryBackend::new()), config, metrics)
            .unwrap()
            .with_sync_target(target.clone()),
    );
    manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();

    // One transient failure parks the first sync in its backoff sleep
    target.fail_next(1, FailureKind::Transient);
    let first = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.sync().await })
    };
    while target.attempts() == 0 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    assert!(matches!(manager.sync().await, Err(StorageError::SyncInProgress)));
    assert_eq!(manager.sync_state().status, SyncStatus::Syncing);

    first.await.unwrap().unwrap();
    assert_eq!(manager.sync_state().status, SyncStatus::Idle);
    manager.sync().await.unwrap();
}

#[tokio::test]
async fn test_sync_disabled_never_queues_or_contacts_target() {
    let target = Arc::new(FlakyBackend::new());
    let mut config = memory_config();
    config.sync.enabled = false;
    let metrics = Arc::new(stashkit_core::MetricsCollector::new(&config.metrics));
    let manager = StorageManager::new(Arc::new(MemoryBackend::new()), config, metrics)
        .unwrap()
        .with_sync_target(target.clone());

    manager.set_item("k", &1, &ItemOptions::new()).await.unwrap();
    manager.sync().await.unwrap();

    assert!(manager.pending_changes().is_empty());
    assert_eq!(target.attempts(), 0);
}
