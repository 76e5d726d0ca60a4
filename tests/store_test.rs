//! Integration tests for the queue store: dedup, FIFO order, transitions,
//! the outcome log, and snapshot persistence.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use bridgeq::bridge::BridgeRegistry;
use bridgeq::error::Error;
use bridgeq::model::{FailureKind, NewWorkItem, Status, WorkId, WorkItem};
use bridgeq::notify::StatusHub;
use bridgeq::store::QueueStore;

fn test_store() -> QueueStore {
    QueueStore::new(Arc::new(StatusHub::new(Arc::new(BridgeRegistry::empty()))))
}

// ---------------------------------------------------------------------------
// Intake and dedup
// ---------------------------------------------------------------------------

#[test]
fn submit_enqueues_pending_item() {
    let store = test_store();

    let item = store
        .submit(
            NewWorkItem::new("commitment-create")
                .year(2025)
                .payload(json!({"amount": 1200}))
                .dedup_key("commitment:42")
                .callback("req-1"),
        )
        .unwrap();

    assert_eq!(item.kind, "commitment-create");
    assert_eq!(item.year, Some(2025));
    assert_eq!(item.status, Status::Pending);
    assert_eq!(item.assigned, None);
    assert_eq!(item.dedup_key, "commitment:42");
    assert_eq!(item.callback.as_deref(), Some("req-1"));
    assert_eq!(store.len_pending(), 1);
    assert_eq!(store.len_active(), 0);
}

#[test]
fn duplicate_key_rejected_while_pending() {
    let store = test_store();

    store
        .submit(NewWorkItem::new("commitment-create").dedup_key("tx-1"))
        .unwrap();
    let err = store
        .submit(NewWorkItem::new("commitment-create").dedup_key("tx-1"))
        .unwrap_err();

    match err {
        Error::Duplicate { dedup_key } => assert_eq!(dedup_key, "tx-1"),
        other => panic!("expected Duplicate, got {other}"),
    }
    assert_eq!(store.len_pending(), 1);
}

#[test]
fn duplicate_rejected_while_active_and_released_after_terminal() {
    let store = test_store();

    let item = store
        .submit(NewWorkItem::new("commitment-create").dedup_key("tx-2"))
        .unwrap();
    store.mark_active(item.id, "bridge-1").unwrap();

    // Still held while executing.
    assert!(matches!(
        store.submit(NewWorkItem::new("commitment-create").dedup_key("tx-2")),
        Err(Error::Duplicate { .. })
    ));

    // Terminal settle releases the key for resubmission.
    store.mark_done(item.id, json!({"ok": true})).unwrap();
    let resubmitted = store
        .submit(NewWorkItem::new("commitment-create").dedup_key("tx-2"))
        .unwrap();
    assert_ne!(resubmitted.id, item.id);
}

#[test]
fn derived_keys_collide_only_for_equal_kind_and_payload() {
    let store = test_store();

    store
        .submit(NewWorkItem::new("commitment-create").payload(json!({"n": 1})))
        .unwrap();
    assert!(matches!(
        store.submit(NewWorkItem::new("commitment-create").payload(json!({"n": 1}))),
        Err(Error::Duplicate { .. })
    ));

    // Different payload derives a different key.
    store
        .submit(NewWorkItem::new("commitment-create").payload(json!({"n": 2})))
        .unwrap();
    // Same payload under a different kind too.
    store
        .submit(NewWorkItem::new("payment-order").payload(json!({"n": 1})))
        .unwrap();
    assert_eq!(store.len_pending(), 3);
}

// ---------------------------------------------------------------------------
// FIFO order
// ---------------------------------------------------------------------------

#[test]
fn peek_returns_oldest_without_claiming() {
    let store = test_store();

    let first = store
        .submit(NewWorkItem::new("a").dedup_key("k-a"))
        .unwrap();
    store.submit(NewWorkItem::new("b").dedup_key("k-b")).unwrap();

    assert_eq!(store.peek_next().unwrap().id, first.id);
    // Peeking claims nothing.
    assert_eq!(store.peek_next().unwrap().id, first.id);
    assert_eq!(store.len_pending(), 2);
    assert_eq!(store.len_active(), 0);
}

#[test]
fn fifo_order_survives_claims() {
    let store = test_store();

    let a = store.submit(NewWorkItem::new("a").dedup_key("k-a")).unwrap();
    let b = store.submit(NewWorkItem::new("b").dedup_key("k-b")).unwrap();
    let c = store.submit(NewWorkItem::new("c").dedup_key("k-c")).unwrap();

    store.mark_active(a.id, "bridge-1").unwrap();
    assert_eq!(store.peek_next().unwrap().id, b.id);

    let order: Vec<WorkId> = store.pending_items().iter().map(|w| w.id).collect();
    assert_eq!(order, vec![b.id, c.id]);
}

// ---------------------------------------------------------------------------
// State transition validation
// ---------------------------------------------------------------------------

#[test]
fn claim_sets_status_and_assignee() {
    let store = test_store();

    let item = store.submit(NewWorkItem::new("a").dedup_key("k")).unwrap();
    let claimed = store.mark_active(item.id, "bridge-1").unwrap();

    assert_eq!(claimed.status, Status::Active);
    assert_eq!(claimed.assigned.as_deref(), Some("bridge-1"));
    assert_eq!(store.len_pending(), 0);
    assert_eq!(store.len_active(), 1);
}

#[test]
fn settling_a_pending_item_is_an_invalid_transition() {
    let store = test_store();

    let item = store.submit(NewWorkItem::new("a").dedup_key("k")).unwrap();
    let err = store.mark_done(item.id, Value::Null).unwrap_err();

    assert!(matches!(err, Error::InvalidTransition { .. }));
    // The item is untouched.
    assert_eq!(store.get(item.id).unwrap().status, Status::Pending);
}

#[test]
fn double_claim_is_an_invalid_transition() {
    let store = test_store();

    let item = store.submit(NewWorkItem::new("a").dedup_key("k")).unwrap();
    store.mark_active(item.id, "bridge-1").unwrap();

    let err = store.mark_active(item.id, "bridge-2").unwrap_err();
    match err {
        Error::InvalidTransition { from, to } => {
            assert_eq!(from, "active");
            assert_eq!(to, "active");
        }
        other => panic!("expected InvalidTransition, got {other}"),
    }
    assert_eq!(store.get(item.id).unwrap().assigned.as_deref(), Some("bridge-1"));
}

#[test]
fn unknown_id_is_not_found() {
    let store = test_store();
    assert!(matches!(
        store.mark_active(WorkId::new(), "bridge-1"),
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        store.mark_done(WorkId::new(), Value::Null),
        Err(Error::NotFound(_))
    ));
}

#[test]
fn settled_items_leave_the_live_queue() {
    let store = test_store();

    let item = store.submit(NewWorkItem::new("a").dedup_key("k")).unwrap();
    store.mark_active(item.id, "bridge-1").unwrap();
    let failed = store
        .mark_failed(item.id, FailureKind::Execution("step rejected".into()))
        .unwrap();

    assert_eq!(failed.status, Status::Failed);
    assert!(failed.completed_at.is_some());
    assert_eq!(
        failed.error,
        Some(FailureKind::Execution("step rejected".into()))
    );
    // Terminal items are only reachable through the outcome log.
    assert!(store.get(item.id).is_none());
    assert_eq!(store.len_active(), 0);
}

// ---------------------------------------------------------------------------
// Outcome log
// ---------------------------------------------------------------------------

fn settle_one(store: &QueueStore, kind: &str, key: &str, callback: Option<&str>) -> WorkItem {
    let mut new = NewWorkItem::new(kind).dedup_key(key);
    if let Some(cb) = callback {
        new = new.callback(cb);
    }
    let item = store.submit(new).unwrap();
    store.mark_active(item.id, "bridge-1").unwrap();
    store.mark_done(item.id, json!({"ok": true})).unwrap()
}

#[test]
fn outcomes_are_newest_first() {
    let store = test_store();

    let a = settle_one(&store, "a", "k-a", None);
    let b = settle_one(&store, "b", "k-b", None);

    let outcomes = store.recent_outcomes(None);
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes[0].id, b.id);
    assert_eq!(outcomes[1].id, a.id);
}

#[test]
fn outcome_log_evicts_oldest_past_cap() {
    let store = QueueStore::new(Arc::new(StatusHub::new(Arc::new(BridgeRegistry::empty()))))
        .with_outcome_cap(3);

    for i in 0..5 {
        settle_one(&store, "a", &format!("k-{i}"), None);
    }

    let outcomes = store.recent_outcomes(None);
    assert_eq!(outcomes.len(), 3);
    // The two oldest are gone.
    assert_eq!(outcomes[2].dedup_key, "k-2");
    assert_eq!(outcomes[0].dedup_key, "k-4");
}

#[test]
fn outcomes_filter_by_callback_or_item_id() {
    let store = test_store();

    let with_cb = settle_one(&store, "a", "k-a", Some("req-7"));
    let without = settle_one(&store, "b", "k-b", None);

    let by_callback = store.recent_outcomes(Some("req-7"));
    assert_eq!(by_callback.len(), 1);
    assert_eq!(by_callback[0].id, with_cb.id);

    let by_id = store.recent_outcomes(Some(&without.id.0.to_string()));
    assert_eq!(by_id.len(), 1);
    assert_eq!(by_id[0].id, without.id);

    assert!(store.recent_outcomes(Some("nobody")).is_empty());
}

// ---------------------------------------------------------------------------
// Snapshot persistence
// ---------------------------------------------------------------------------

#[test]
fn persist_restore_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store();

    let kept = store
        .submit(
            NewWorkItem::new("commitment-create")
                .year(2025)
                .payload(json!({"amount": 900}))
                .dedup_key("tx-kept")
                .callback("req-9"),
        )
        .unwrap();
    settle_one(&store, "payment-order", "tx-done", None);
    store.persist(dir.path()).unwrap();

    let fresh = test_store();
    let restored = fresh.restore(dir.path()).unwrap();
    assert_eq!(restored, 1);

    let items = fresh.pending_items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].id, kept.id);
    assert_eq!(items[0].year, Some(2025));
    assert_eq!(items[0].payload, json!({"amount": 900}));
    assert_eq!(items[0].callback.as_deref(), Some("req-9"));

    // The outcome log came back too.
    let outcomes = fresh.recent_outcomes(None);
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].dedup_key, "tx-done");
}

#[test]
fn restore_resets_interrupted_items_to_pending() {
    let dir = tempfile::tempdir().unwrap();

    // A snapshot written mid-shutdown can carry an item that was mid-flight.
    let interrupted = WorkItem {
        id: WorkId::new(),
        kind: "commitment-create".into(),
        year: Some(2025),
        payload: Value::Null,
        dedup_key: "tx-interrupted".into(),
        status: Status::Active,
        assigned: Some("bridge-1".into()),
        callback: None,
        created_at: Utc::now(),
        completed_at: None,
        result: Some(json!({"partial": true})),
        error: None,
    };
    std::fs::write(
        dir.path().join("pending.json"),
        serde_json::to_string_pretty(&vec![interrupted.clone()]).unwrap(),
    )
    .unwrap();

    let store = test_store();
    assert_eq!(store.restore(dir.path()).unwrap(), 1);

    let item = store.get(interrupted.id).unwrap();
    assert_eq!(item.status, Status::Pending);
    assert_eq!(item.assigned, None);
    assert_eq!(item.result, None);
}

#[test]
fn restore_skips_snapshot_items_whose_key_is_live() {
    let dir = tempfile::tempdir().unwrap();
    let writer = test_store();
    writer.submit(NewWorkItem::new("a").dedup_key("k-1")).unwrap();
    writer.submit(NewWorkItem::new("b").dedup_key("k-2")).unwrap();
    writer.persist(dir.path()).unwrap();

    let store = test_store();
    store.submit(NewWorkItem::new("a").dedup_key("k-1")).unwrap();

    // Only the item with the free key comes back.
    assert_eq!(store.restore(dir.path()).unwrap(), 1);
    assert_eq!(store.len_pending(), 2);
    let kinds: Vec<String> = store.pending_items().iter().map(|w| w.kind.clone()).collect();
    assert_eq!(kinds, vec!["a".to_string(), "b".to_string()]);
}

#[test]
fn restore_from_empty_dir_is_an_empty_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let store = test_store();
    assert_eq!(store.restore(dir.path()).unwrap(), 0);
    assert_eq!(store.restore(&dir.path().join("never-written")).unwrap(), 0);
    assert_eq!(store.len_pending(), 0);
}
