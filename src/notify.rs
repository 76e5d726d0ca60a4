//! Outbound notification and live status fan-out.
//!
//! `Notifier` is the delivery contract for completion notices; the transport
//! behind it is external. `StatusHub` is the in-process publish/subscribe
//! side: every queue transition produces a fresh `StatusSnapshot` on a
//! `tokio::sync::broadcast` channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tracing::info;

use crate::bridge::BridgeRegistry;
use crate::error::Result;
use crate::model::{WorkId, WorkItem};
use crate::pipeline::BoxFuture;

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

/// Delivery contract for outbound completion notices. Items of the reserved
/// callback kind bypass the bridge fleet and land here instead.
pub trait Notifier: Send + Sync {
    /// Deliver the notice carried by `item`. The returned value becomes the
    /// item's result. Delivery is attempted once; failures surface as the
    /// item's failure, never as a retry.
    fn notify(&self, item: &WorkItem) -> BoxFuture<Result<Value>>;
}

/// Notifier that writes the notice to the log. Stands in for a real
/// transport in the CLI and in tests.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, item: &WorkItem) -> BoxFuture<Result<Value>> {
        let id = item.id;
        let callback = item.callback.clone();
        let payload = item.payload.clone();
        Box::pin(async move {
            info!(
                item = %id,
                callback = callback.as_deref().unwrap_or("-"),
                payload = %payload,
                "outbound notice",
            );
            Ok(json!({ "delivered": true }))
        })
    }
}

// ---------------------------------------------------------------------------
// Status snapshots
// ---------------------------------------------------------------------------

/// One bridge's line in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeStatus {
    pub name: String,
    pub operational: bool,
    /// Item the bridge is executing right now, if any.
    pub current: Option<WorkId>,
}

/// Point-in-time view of the queue and the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub pending: usize,
    pub active: usize,
    pub bridges: Vec<BridgeStatus>,
    pub at: DateTime<Utc>,
}

/// Default buffer for the broadcast channel. Slow subscribers observe
/// `RecvError::Lagged` rather than blocking the store.
const HUB_CAPACITY: usize = 256;

/// Fan-out hub for status snapshots.
///
/// The store pushes queue depths on every transition; the hub composes the
/// fleet half from the registry and broadcasts the result. Subscribers that
/// prefer pulling call [`StatusHub::current`] directly.
pub struct StatusHub {
    registry: Arc<BridgeRegistry>,
    sender: broadcast::Sender<StatusSnapshot>,
}

impl StatusHub {
    pub fn new(registry: Arc<BridgeRegistry>) -> Self {
        let (sender, _) = broadcast::channel(HUB_CAPACITY);
        Self { registry, sender }
    }

    /// Compose a snapshot from the given queue depths and live fleet state.
    pub fn current(&self, pending: usize, active: usize) -> StatusSnapshot {
        let bridges = self
            .registry
            .all()
            .iter()
            .map(|b| BridgeStatus {
                name: b.name().to_string(),
                operational: b.is_operational(),
                current: b.current(),
            })
            .collect();
        StatusSnapshot { pending, active, bridges, at: Utc::now() }
    }

    /// Compose and broadcast. A zero-subscriber send error is not an error.
    pub fn publish(&self, pending: usize, active: usize) {
        let _ = self.sender.send(self.current(pending, active));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::Bridge;
    use crate::session::DryRunSession;

    fn hub_with_one_bridge() -> (StatusHub, Arc<Bridge>) {
        let bridge = Arc::new(Bridge::new("b1", Arc::new(DryRunSession::new())));
        let registry = Arc::new(BridgeRegistry::new(vec![bridge.clone()]));
        (StatusHub::new(registry), bridge)
    }

    #[tokio::test]
    async fn snapshot_reflects_fleet_state() {
        let (hub, bridge) = hub_with_one_bridge();
        let id = WorkId::new();
        bridge.begin(id);

        let snap = hub.current(3, 1);
        assert_eq!(snap.pending, 3);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.bridges.len(), 1);
        assert_eq!(snap.bridges[0].name, "b1");
        assert!(!snap.bridges[0].operational);
        assert_eq!(snap.bridges[0].current, Some(id));
    }

    #[tokio::test]
    async fn publish_reaches_subscribers() {
        let (hub, _bridge) = hub_with_one_bridge();
        let mut rx = hub.subscribe();

        hub.publish(2, 0);

        let snap = rx.recv().await.expect("subscriber should receive");
        assert_eq!(snap.pending, 2);
        assert_eq!(snap.active, 0);
    }

    #[test]
    fn publish_without_subscribers_does_not_panic() {
        let (hub, _bridge) = hub_with_one_bridge();
        hub.publish(0, 0);
    }

    #[tokio::test]
    async fn log_notifier_reports_delivery() {
        let item = WorkItem {
            id: WorkId::new(),
            kind: crate::model::KIND_CALLBACK.into(),
            year: None,
            payload: json!({ "outcome": "done" }),
            dedup_key: "cb".into(),
            status: crate::model::Status::Active,
            assigned: Some("notifier".into()),
            callback: Some("req-1".into()),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };
        let value = LogNotifier.notify(&item).await.expect("delivery should succeed");
        assert_eq!(value["delivered"], json!(true));
    }
}
