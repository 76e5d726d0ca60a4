//! Bridge workers and the fleet registry.
//!
//! A bridge owns one automation session, declares which fiscal year and
//! transaction kinds it serves, and executes one work item at a time through
//! a step pipeline picked from its dispatch table. The registry is the
//! explicitly-owned fleet handed to the dispatcher at construction.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{WorkId, WorkItem};
use crate::pipeline::StepPipeline;
use crate::session::Session;

/// One transaction kind's implementation: given an item and the bridge's
/// session, produce the pipeline that performs it.
pub trait TransactionScript: Send + Sync {
    /// Kind discriminator this script implements.
    fn kind(&self) -> &str;

    /// Build the per-invocation pipeline. Scripts typically open each
    /// multi-actor phase with a role-switch step whose result gates the
    /// role-specific steps that follow; role state stays inside the session.
    fn build(&self, item: &WorkItem, session: &Arc<dyn Session>) -> StepPipeline;
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

/// A capability-bearing execution unit bound to one session.
pub struct Bridge {
    name: String,
    year: Option<i32>,
    /// Kinds this bridge explicitly handles. `None` marks a default bridge
    /// that accepts anything unclaimed by a specific one.
    kinds: Option<HashSet<String>>,
    session: Arc<dyn Session>,
    scripts: HashMap<String, Arc<dyn TransactionScript>>,
    /// Set by `self_test` only; read by the dispatcher.
    operational: AtomicBool,
    /// Written by the dispatcher at claim time, cleared on settle. Every
    /// execute path clears it, so empty means idle.
    current: Mutex<Option<WorkId>>,
}

impl Bridge {
    pub fn new(name: impl Into<String>, session: Arc<dyn Session>) -> Self {
        Self {
            name: name.into(),
            year: None,
            kinds: None,
            session,
            scripts: HashMap::new(),
            operational: AtomicBool::new(false),
            current: Mutex::new(None),
        }
    }

    /// Bind this bridge to a fiscal year.
    pub fn with_year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    /// Restrict this bridge to an explicit set of kinds. Without this the
    /// bridge is a catch-all for its year.
    pub fn with_kinds<I, S>(mut self, kinds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.kinds = Some(kinds.into_iter().map(Into::into).collect());
        self
    }

    /// Register a transaction script in the dispatch table.
    pub fn with_script(mut self, script: Arc<dyn TransactionScript>) -> Self {
        self.scripts.insert(script.kind().to_string(), script);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn year(&self) -> Option<i32> {
        self.year
    }

    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Probe the session and flip the operational flag on success. Failure
    /// is logged and leaves the bridge non-operational; never fatal.
    pub async fn self_test(&self) {
        match self.session.probe().await {
            Ok(()) => {
                self.operational.store(true, Ordering::SeqCst);
                info!(bridge = %self.name, "self-test passed");
            }
            Err(e) => {
                warn!(bridge = %self.name, error = %e, "self-test failed, bridge stays non-operational");
            }
        }
    }

    pub fn is_operational(&self) -> bool {
        self.operational.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.current.lock().unwrap().is_none()
    }

    /// True when the kind is in the explicit set, or the bridge is a
    /// catch-all.
    pub fn accepts(&self, kind: &str) -> bool {
        match &self.kinds {
            Some(set) => set.contains(kind),
            None => true,
        }
    }

    /// True only for explicit membership, the first-pass affinity test.
    pub fn accepts_specifically(&self, kind: &str) -> bool {
        self.kinds.as_ref().is_some_and(|set| set.contains(kind))
    }

    pub fn is_catch_all(&self) -> bool {
        self.kinds.is_none()
    }

    /// Claim: record the item this bridge is now executing.
    pub fn begin(&self, id: WorkId) {
        *self.current.lock().unwrap() = Some(id);
    }

    /// Settle: the bridge is idle again.
    pub fn finish(&self) {
        *self.current.lock().unwrap() = None;
    }

    pub fn current(&self) -> Option<WorkId> {
        *self.current.lock().unwrap()
    }

    /// Run the pipeline for the item's kind against this bridge's session.
    pub async fn execute(&self, item: &WorkItem) -> Result<Value> {
        let script = self.scripts.get(&item.kind).ok_or_else(|| Error::NoHandler {
            bridge: self.name.clone(),
            kind: item.kind.clone(),
        })?;
        let pipeline = script.build(item, &self.session);
        pipeline.run().await
    }

    /// Force the underlying session to stop. Timeout cancellation path.
    pub async fn abort(&self) -> Result<()> {
        self.session.terminate().await
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// The fleet. Owned explicitly and passed into the dispatcher; no
/// process-wide bridge list.
pub struct BridgeRegistry {
    bridges: Vec<Arc<Bridge>>,
}

impl BridgeRegistry {
    /// An empty fleet, mostly for tests.
    pub fn empty() -> Self {
        Self { bridges: Vec::new() }
    }

    pub fn new(bridges: Vec<Arc<Bridge>>) -> Self {
        Self { bridges }
    }

    pub fn all(&self) -> &[Arc<Bridge>] {
        &self.bridges
    }

    pub fn len(&self) -> usize {
        self.bridges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bridges.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Bridge>> {
        self.bridges.iter().find(|b| b.name() == name)
    }

    pub fn operational_count(&self) -> usize {
        self.bridges.iter().filter(|b| b.is_operational()).count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
