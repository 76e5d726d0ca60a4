//! Dispatch scheduler: matches pending work to operational idle bridges.
//!
//! One cooperative polling loop. Each tick drains assignments until the
//! queue head cannot move; executions run as spawned tasks with exactly one
//! in flight per bridge. The reserved callback kind bypasses the fleet and
//! goes to the notifier collaborator.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use rand::seq::IndexedRandom;
use tokio::sync::Notify;
use tracing::{Instrument, debug, error, info, warn};

use crate::bridge::{Bridge, BridgeRegistry};
use crate::model::{FailureKind, KIND_CALLBACK, WorkItem};
use crate::notify::Notifier;
use crate::store::QueueStore;
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_work_span};

/// Reserved assignee name for bypass items settled by the notifier.
const NOTIFIER_NAME: &str = "notifier";

/// Knobs for the dispatch loop.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Interval between scheduling passes.
    pub tick: Duration,
    /// Hard deadline for one execution; firing terminates the session.
    pub exec_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            exec_timeout: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Affinity matching
// ---------------------------------------------------------------------------

/// Two-pass affinity match for `item`, pure over the fleet's current state.
///
/// Pass (a): operational, idle bridges with the item's year that explicitly
/// list its kind. Pass (b), only when (a) is empty: operational, idle
/// catch-all bridges with the item's year. A year-specific bridge never
/// matches a yearless item or vice versa.
pub fn eligible_bridges(registry: &BridgeRegistry, item: &WorkItem) -> Vec<Arc<Bridge>> {
    let fit = |b: &&Arc<Bridge>| b.is_operational() && b.year() == item.year && b.is_idle();

    let specific: Vec<_> = registry
        .all()
        .iter()
        .filter(fit)
        .filter(|b| b.accepts_specifically(&item.kind))
        .cloned()
        .collect();
    if !specific.is_empty() {
        return specific;
    }
    registry
        .all()
        .iter()
        .filter(fit)
        .filter(|b| b.is_catch_all())
        .cloned()
        .collect()
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// The scheduling loop. Owns nothing but references; the store, fleet, and
/// notifier are handed in at construction.
pub struct Dispatcher {
    store: Arc<QueueStore>,
    registry: Arc<BridgeRegistry>,
    notifier: Arc<dyn Notifier>,
    config: DispatchConfig,
    shutdown: Arc<Notify>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<QueueStore>,
        registry: Arc<BridgeRegistry>,
        notifier: Arc<dyn Notifier>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            store,
            registry,
            notifier,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the loop to stop after the current pass.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the dispatch loop until shutdown.
    pub async fn run(&self) {
        info!(
            tick_ms = self.config.tick.as_millis() as u64,
            exec_timeout_s = self.config.exec_timeout.as_secs(),
            "dispatcher started",
        );
        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("dispatcher shutting down");
                    return;
                }
                _ = tokio::time::sleep(self.config.tick) => {}
            }
            self.tick();
        }
    }

    /// One scheduling pass: assign from the queue head until it stalls.
    /// Only the head is ever considered; an unroutable head intentionally
    /// blocks the items behind it until the fleet can take it.
    pub fn tick(&self) {
        loop {
            if self.registry.operational_count() == 0 {
                return;
            }
            let Some(item) = self.store.peek_next() else {
                return;
            };

            if item.kind == KIND_CALLBACK {
                if !self.dispatch_callback(item) {
                    return;
                }
                continue;
            }

            let candidates = eligible_bridges(&self.registry, &item);
            if candidates.is_empty() {
                metrics::dispatch_stalled().add(1, &[KeyValue::new("kind", item.kind.clone())]);
                debug!(
                    item = %item.id,
                    kind = %item.kind,
                    year = ?item.year,
                    "no eligible bridge, item stays pending",
                );
                return;
            }
            let Some(bridge) = candidates.choose(&mut rand::rng()).cloned() else {
                return;
            };
            if !self.assign(item, bridge) {
                return;
            }
        }
    }

    /// Claim the item for `bridge` and spawn its execution. Returns false
    /// when the claim failed and the pass should stop.
    fn assign(&self, item: WorkItem, bridge: Arc<Bridge>) -> bool {
        let item = match self.store.mark_active(item.id, bridge.name()) {
            Ok(item) => item,
            Err(e) => {
                error!(item = %item.id, error = %e, "claim failed");
                return false;
            }
        };
        bridge.begin(item.id);
        metrics::dispatch_assigned().add(
            1,
            &[
                KeyValue::new("bridge", bridge.name().to_string()),
                KeyValue::new("kind", item.kind.clone()),
            ],
        );
        info!(item = %item.id, kind = %item.kind, bridge = %bridge.name(), "work assigned");

        let store = Arc::clone(&self.store);
        let deadline = self.config.exec_timeout;
        tokio::spawn(async move {
            execute_on_bridge(store, bridge, item, deadline).await;
        });
        true
    }

    /// Hand a callback item straight to the notifier. Returns false when the
    /// claim failed and the pass should stop.
    fn dispatch_callback(&self, item: WorkItem) -> bool {
        let item = match self.store.mark_active(item.id, NOTIFIER_NAME) {
            Ok(item) => item,
            Err(e) => {
                error!(item = %item.id, error = %e, "claim failed");
                return false;
            }
        };
        info!(
            item = %item.id,
            callback = item.callback.as_deref().unwrap_or("-"),
            "callback item handed to notifier",
        );

        let store = Arc::clone(&self.store);
        let notifier = Arc::clone(&self.notifier);
        tokio::spawn(async move {
            let settled = match notifier.notify(&item).await {
                Ok(value) => store.mark_done(item.id, value),
                Err(e) => store.mark_failed(item.id, FailureKind::Callback(e.to_string())),
            };
            if let Err(e) = settled {
                error!(item = %item.id, error = %e, "settle failed");
            }
        });
        true
    }
}

/// Run one claimed item on its bridge under the execution deadline, then
/// settle it. The bridge is freed on every path, even when the session never
/// settles on its own.
async fn execute_on_bridge(
    store: Arc<QueueStore>,
    bridge: Arc<Bridge>,
    item: WorkItem,
    deadline: Duration,
) {
    let span = start_work_span(&item.kind, &item.id);
    let started = Instant::now();
    async {
        record_state_transition(&span, "pending", "active");
        let outcome = tokio::time::timeout(deadline, bridge.execute(&item)).await;
        if outcome.is_err() {
            warn!(
                item = %item.id,
                bridge = %bridge.name(),
                secs = deadline.as_secs(),
                "execution deadline fired, terminating session",
            );
            if let Err(e) = bridge.abort().await {
                warn!(bridge = %bridge.name(), error = %e, "session terminate failed");
            }
        }
        bridge.finish();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let settled = match outcome {
            Ok(Ok(result)) => {
                record_state_transition(&span, "active", "done");
                store.mark_done(item.id, result)
            }
            Ok(Err(e)) => {
                record_state_transition(&span, "active", "failed");
                store.mark_failed(item.id, FailureKind::Execution(e.to_string()))
            }
            Err(_) => {
                record_state_transition(&span, "active", "failed");
                store.mark_failed(
                    item.id,
                    FailureKind::Timeout(format!("no result within {}s", deadline.as_secs())),
                )
            }
        };
        metrics::work_duration_ms().record(
            elapsed_ms as f64,
            &[KeyValue::new("kind", item.kind.clone())],
        );
        if let Err(e) = settled {
            error!(item = %item.id, error = %e, "settle failed");
        }
    }
    .instrument(span.clone())
    .await;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
