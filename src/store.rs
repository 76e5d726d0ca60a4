//! Queue store: dedup-gated intake, FIFO order, bounded outcome log.
//!
//! All queue state lives behind one mutex; every critical section is
//! synchronous and short, so submit's check-then-insert is atomic with
//! respect to concurrent submitters. Persistence is a JSON snapshot for the
//! graceful-shutdown path, not crash safety.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use opentelemetry::KeyValue;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::model::{FailureKind, NewWorkItem, OutcomeEntry, Status, WorkId, WorkItem};
use crate::notify::StatusHub;
use crate::telemetry::metrics;

/// Default cap on the outcome log. Oldest entries are evicted past this.
pub const DEFAULT_OUTCOME_CAP: usize = 200;

const PENDING_FILE: &str = "pending.json";
const OUTCOMES_FILE: &str = "outcomes.json";

/// Validate a status transition, returning an error if disallowed.
fn validate_transition(from: Status, to: Status) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

struct Inner {
    /// FIFO. The dispatcher only ever considers the front.
    pending: VecDeque<WorkItem>,
    active: HashMap<WorkId, WorkItem>,
    /// Dedup keys held by a pending or active item.
    keys: HashSet<String>,
    outcomes: VecDeque<OutcomeEntry>,
}

/// In-memory queue with dedup, validated transitions, and status fan-out.
pub struct QueueStore {
    inner: Mutex<Inner>,
    hub: Arc<StatusHub>,
    outcome_cap: usize,
}

impl QueueStore {
    pub fn new(hub: Arc<StatusHub>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                pending: VecDeque::new(),
                active: HashMap::new(),
                keys: HashSet::new(),
                outcomes: VecDeque::new(),
            }),
            hub,
            outcome_cap: DEFAULT_OUTCOME_CAP,
        }
    }

    pub fn with_outcome_cap(mut self, cap: usize) -> Self {
        self.outcome_cap = cap;
        self
    }

    // -----------------------------------------------------------------------
    // Intake
    // -----------------------------------------------------------------------

    /// Submit new work. At most one item per dedup key may be pending or
    /// active; a duplicate is rejected without enqueueing anything.
    pub fn submit(&self, new: NewWorkItem) -> Result<WorkItem> {
        let key = new.resolve_dedup_key();
        let (item, pending, active) = {
            let mut inner = self.inner.lock().unwrap();
            if inner.keys.contains(&key) {
                // Record after the guard is gone, like the success path.
                drop(inner);
                metrics::work_submitted().add(
                    1,
                    &[
                        KeyValue::new("kind", new.kind.clone()),
                        KeyValue::new("result", "duplicate"),
                    ],
                );
                return Err(Error::Duplicate { dedup_key: key });
            }
            let item = WorkItem {
                id: WorkId::new(),
                kind: new.kind,
                year: new.year,
                payload: new.payload,
                dedup_key: key.clone(),
                status: Status::Pending,
                assigned: None,
                callback: new.callback,
                created_at: Utc::now(),
                completed_at: None,
                result: None,
                error: None,
            };
            inner.keys.insert(key);
            inner.pending.push_back(item.clone());
            (item, inner.pending.len(), inner.active.len())
        };

        metrics::work_submitted().add(
            1,
            &[
                KeyValue::new("kind", item.kind.clone()),
                KeyValue::new("result", "ok"),
            ],
        );
        info!(item = %item.id, kind = %item.kind, dedup_key = %item.dedup_key, "work submitted");
        self.hub.publish(pending, active);
        Ok(item)
    }

    // -----------------------------------------------------------------------
    // Dispatch-side transitions
    // -----------------------------------------------------------------------

    /// Oldest pending item, if any. Does not claim it.
    pub fn peek_next(&self) -> Option<WorkItem> {
        self.inner.lock().unwrap().pending.front().cloned()
    }

    /// Claim a pending item for `worker`: Pending → Active.
    pub fn mark_active(&self, id: WorkId, worker: &str) -> Result<WorkItem> {
        let (item, pending, active) = {
            let mut inner = self.inner.lock().unwrap();
            let Some(pos) = inner.pending.iter().position(|w| w.id == id) else {
                return match inner.active.get(&id) {
                    Some(w) => Err(Error::InvalidTransition {
                        from: w.status.to_string(),
                        to: Status::Active.to_string(),
                    }),
                    None => Err(Error::NotFound(format!("work item {id}"))),
                };
            };
            validate_transition(inner.pending[pos].status, Status::Active)?;
            let Some(mut item) = inner.pending.remove(pos) else {
                return Err(Error::NotFound(format!("work item {id}")));
            };
            item.status = Status::Active;
            item.assigned = Some(worker.to_string());
            inner.active.insert(item.id, item.clone());
            (item, inner.pending.len(), inner.active.len())
        };

        metrics::work_state_transitions().add(
            1,
            &[
                KeyValue::new("from", "pending"),
                KeyValue::new("to", "active"),
            ],
        );
        debug!(item = %item.id, worker, "work claimed");
        self.hub.publish(pending, active);
        Ok(item)
    }

    /// Settle an active item successfully: Active → Done.
    pub fn mark_done(&self, id: WorkId, result: Value) -> Result<WorkItem> {
        let item = self.settle(id, Status::Done, Some(result), None)?;
        info!(item = %item.id, kind = %item.kind, "work completed");
        Ok(item)
    }

    /// Settle an active item with a failure: Active → Failed.
    pub fn mark_failed(&self, id: WorkId, error: FailureKind) -> Result<WorkItem> {
        let item = self.settle(id, Status::Failed, None, Some(error.clone()))?;
        warn!(item = %item.id, kind = %item.kind, error = %error, "work failed");
        Ok(item)
    }

    /// Shared terminal transition: releases the dedup key and appends to the
    /// bounded outcome log.
    fn settle(
        &self,
        id: WorkId,
        to: Status,
        result: Option<Value>,
        error: Option<FailureKind>,
    ) -> Result<WorkItem> {
        let (item, pending, active) = {
            let mut inner = self.inner.lock().unwrap();
            match inner.active.get(&id) {
                Some(w) => validate_transition(w.status, to)?,
                None => {
                    return match inner.pending.iter().find(|w| w.id == id) {
                        Some(w) => Err(Error::InvalidTransition {
                            from: w.status.to_string(),
                            to: to.to_string(),
                        }),
                        None => Err(Error::NotFound(format!("work item {id}"))),
                    };
                }
            }
            let Some(mut item) = inner.active.remove(&id) else {
                return Err(Error::NotFound(format!("work item {id}")));
            };
            let now = Utc::now();
            item.status = to;
            item.completed_at = Some(now);
            item.result = result;
            item.error = error;
            inner.keys.remove(&item.dedup_key);
            inner.outcomes.push_back(OutcomeEntry {
                id: item.id,
                kind: item.kind.clone(),
                dedup_key: item.dedup_key.clone(),
                callback: item.callback.clone(),
                status: to,
                result: item.result.clone(),
                error: item.error.clone(),
                completed_at: now,
            });
            while inner.outcomes.len() > self.outcome_cap {
                inner.outcomes.pop_front();
            }
            (item, inner.pending.len(), inner.active.len())
        };

        metrics::work_state_transitions().add(
            1,
            &[
                KeyValue::new("from", "active"),
                KeyValue::new("to", to.to_string()),
            ],
        );
        self.hub.publish(pending, active);
        Ok(item)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Look up a live (pending or active) item.
    pub fn get(&self, id: WorkId) -> Option<WorkItem> {
        let inner = self.inner.lock().unwrap();
        inner
            .active
            .get(&id)
            .cloned()
            .or_else(|| inner.pending.iter().find(|w| w.id == id).cloned())
    }

    /// Snapshot of the pending queue in FIFO order.
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.inner.lock().unwrap().pending.iter().cloned().collect()
    }

    pub fn len_pending(&self) -> usize {
        self.inner.lock().unwrap().pending.len()
    }

    pub fn len_active(&self) -> usize {
        self.inner.lock().unwrap().active.len()
    }

    /// Pull from the bounded outcome log, newest first, optionally filtered
    /// by correlation id (a requester's callback id or an item id).
    pub fn recent_outcomes(&self, correlation: Option<&str>) -> Vec<OutcomeEntry> {
        let inner = self.inner.lock().unwrap();
        inner
            .outcomes
            .iter()
            .rev()
            .filter(|e| correlation.map_or(true, |c| e.matches(c)))
            .cloned()
            .collect()
    }

    // -----------------------------------------------------------------------
    // Snapshot persistence
    // -----------------------------------------------------------------------

    /// Write the pending set and the outcome log under `dir`. Best effort
    /// on the signal-driven shutdown path; active items are not captured.
    pub fn persist(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let (pending, outcomes) = {
            let inner = self.inner.lock().unwrap();
            (
                inner.pending.iter().cloned().collect::<Vec<_>>(),
                inner.outcomes.iter().cloned().collect::<Vec<_>>(),
            )
        };
        std::fs::write(
            dir.join(PENDING_FILE),
            serde_json::to_string_pretty(&pending)?,
        )?;
        std::fs::write(
            dir.join(OUTCOMES_FILE),
            serde_json::to_string_pretty(&outcomes)?,
        )?;
        info!(
            dir = %dir.display(),
            pending = pending.len(),
            outcomes = outcomes.len(),
            "queue snapshot written",
        );
        Ok(())
    }

    /// Reload a snapshot written by [`persist`](Self::persist). Items come
    /// back as fresh pending work (status and assignment reset); entries
    /// whose dedup key is already live are skipped. Missing files are an
    /// empty snapshot, not an error. Returns the number of items restored.
    pub fn restore(&self, dir: &Path) -> Result<usize> {
        let mut restored = 0;
        let pending_path = dir.join(PENDING_FILE);
        if pending_path.exists() {
            let items: Vec<WorkItem> =
                serde_json::from_str(&std::fs::read_to_string(&pending_path)?)?;
            let mut inner = self.inner.lock().unwrap();
            for mut item in items {
                if inner.keys.contains(&item.dedup_key) {
                    debug!(item = %item.id, dedup_key = %item.dedup_key, "snapshot item skipped, key already live");
                    continue;
                }
                item.status = Status::Pending;
                item.assigned = None;
                item.completed_at = None;
                item.result = None;
                item.error = None;
                inner.keys.insert(item.dedup_key.clone());
                inner.pending.push_back(item);
                restored += 1;
            }
        }

        let outcomes_path = dir.join(OUTCOMES_FILE);
        if outcomes_path.exists() {
            let entries: Vec<OutcomeEntry> =
                serde_json::from_str(&std::fs::read_to_string(&outcomes_path)?)?;
            let mut inner = self.inner.lock().unwrap();
            for entry in entries {
                inner.outcomes.push_back(entry);
            }
            while inner.outcomes.len() > self.outcome_cap {
                inner.outcomes.pop_front();
            }
        }

        if restored > 0 {
            info!(dir = %dir.display(), restored, "queue snapshot restored");
            let inner = self.inner.lock().unwrap();
            let (pending, active) = (inner.pending.len(), inner.active.len());
            drop(inner);
            self.hub.publish(pending, active);
        }
        Ok(restored)
    }
}
