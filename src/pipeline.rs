//! Conditional step-pipeline executor.
//!
//! A transaction is an ordered list of named steps. Each step carries an
//! optional synchronous guard over the results produced so far; a false guard
//! skips the step without error. A rejecting action halts the main list, and
//! the recovery list then runs unconditionally; it is the one mechanism that
//! guarantees external resources are released on every exit path.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// A boxed future, the currency of dyn-compatible async callbacks.
pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A step's unit of work. The closure reads prior results synchronously and
/// returns an owned future, so nothing borrows across the suspension point.
pub type StepAction = Box<dyn Fn(&StepOutputs) -> BoxFuture<Result<Value>> + Send + Sync>;

/// A step's gate: a pure, synchronous predicate over prior results.
pub type StepGuard = Box<dyn Fn(&StepOutputs) -> bool + Send + Sync>;

/// One named, optionally-gated step.
pub struct Step {
    name: String,
    guard: Option<StepGuard>,
    action: StepAction,
}

// ---------------------------------------------------------------------------
// Step outputs
// ---------------------------------------------------------------------------

enum StepState {
    Ran(Value),
    Skipped,
    Failed,
}

struct StepRecord {
    name: String,
    state: StepState,
}

/// Accumulated results, addressable by step name or by position.
///
/// A skipped step has no result at all (`get` returns `None`), which keeps
/// it distinguishable from a step that ran and returned a falsy value.
/// Step names should be unique within one pipeline; on collision the name
/// index points at the most recent record.
#[derive(Default)]
pub struct StepOutputs {
    entries: Vec<StepRecord>,
    index: HashMap<String, usize>,
    halt_error: Option<String>,
}

impl StepOutputs {
    fn push(&mut self, name: String, state: StepState) {
        self.index.insert(name.clone(), self.entries.len());
        self.entries.push(StepRecord { name, state });
    }

    /// Result of the named step, `None` if it was skipped, failed, or never
    /// reached.
    pub fn get(&self, name: &str) -> Option<&Value> {
        let i = *self.index.get(name)?;
        match &self.entries[i].state {
            StepState::Ran(value) => Some(value),
            _ => None,
        }
    }

    /// Result by position in declaration order (skipped steps hold a slot).
    pub fn at(&self, index: usize) -> Option<&Value> {
        match &self.entries.get(index)?.state {
            StepState::Ran(value) => Some(value),
            _ => None,
        }
    }

    /// True iff the named step ran to completion.
    pub fn ran(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// True iff the named step was gated off by its guard.
    pub fn skipped(&self, name: &str) -> bool {
        self.index
            .get(name)
            .is_some_and(|&i| matches!(self.entries[i].state, StepState::Skipped))
    }

    /// Loose truthiness over a step result, for guards written against
    /// flag-like step values. Skipped or absent counts as false.
    pub fn truthy(&self, name: &str) -> bool {
        match self.get(name) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Result of the most recent step that actually ran.
    pub fn last(&self) -> Option<&Value> {
        self.entries.iter().rev().find_map(|r| match &r.state {
            StepState::Ran(value) => Some(value),
            _ => None,
        })
    }

    /// The error that halted the main list. Only visible to the recovery
    /// list's guards and actions.
    pub fn halt_error(&self) -> Option<&str> {
        self.halt_error.as_deref()
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// What a halting error becomes once the recovery list has run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// The pipeline rejects with the halting error.
    #[default]
    Propagate,
    /// The error is logged and the pipeline resolves with the last main-list
    /// result anyway.
    Suppress,
}

/// An ephemeral, per-invocation pipeline: a main step list, an optional
/// recovery list, and the error policy for this invocation.
#[derive(Default)]
pub struct StepPipeline {
    steps: Vec<Step>,
    recovery: Vec<Step>,
    policy: ErrorPolicy,
}

impl StepPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an unconditional step.
    pub fn step<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&StepOutputs) -> BoxFuture<Result<Value>> + Send + Sync + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            guard: None,
            action: Box::new(action),
        });
        self
    }

    /// Append a gated step. The guard runs synchronously against prior
    /// results; false skips the action entirely.
    pub fn step_if<G, F>(mut self, name: impl Into<String>, guard: G, action: F) -> Self
    where
        G: Fn(&StepOutputs) -> bool + Send + Sync + 'static,
        F: Fn(&StepOutputs) -> BoxFuture<Result<Value>> + Send + Sync + 'static,
    {
        self.steps.push(Step {
            name: name.into(),
            guard: Some(Box::new(guard)),
            action: Box::new(action),
        });
        self
    }

    /// Append an unconditional recovery step.
    pub fn recover<F>(mut self, name: impl Into<String>, action: F) -> Self
    where
        F: Fn(&StepOutputs) -> BoxFuture<Result<Value>> + Send + Sync + 'static,
    {
        self.recovery.push(Step {
            name: name.into(),
            guard: None,
            action: Box::new(action),
        });
        self
    }

    /// Append a gated recovery step. Its guard may consult
    /// [`StepOutputs::halt_error`] to react only to failure exits.
    pub fn recover_if<G, F>(mut self, name: impl Into<String>, guard: G, action: F) -> Self
    where
        G: Fn(&StepOutputs) -> bool + Send + Sync + 'static,
        F: Fn(&StepOutputs) -> BoxFuture<Result<Value>> + Send + Sync + 'static,
    {
        self.recovery.push(Step {
            name: name.into(),
            guard: Some(Box::new(guard)),
            action: Box::new(action),
        });
        self
    }

    /// Set the error policy for this invocation.
    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run the pipeline to completion.
    ///
    /// Steps run strictly in list order. The first rejection halts the main
    /// list; the recovery list then runs exactly once whether or not a halt
    /// occurred, with the halting error visible through the outputs. The
    /// result is the last main-list step that actually ran (`Null` if none),
    /// or the halting error under [`ErrorPolicy::Propagate`].
    pub async fn run(self) -> Result<Value> {
        let mut outputs = StepOutputs::default();
        let mut halt: Option<Error> = None;

        for step in self.steps {
            if let Some(guard) = &step.guard {
                if !guard(&outputs) {
                    debug!(step = %step.name, "step skipped");
                    outputs.push(step.name, StepState::Skipped);
                    continue;
                }
            }
            let started = Instant::now();
            let result = (step.action)(&outputs).await;
            let elapsed_ms = started.elapsed().as_millis() as u64;
            match result {
                Ok(value) => {
                    debug!(step = %step.name, elapsed_ms, "step completed");
                    outputs.push(step.name, StepState::Ran(value));
                }
                Err(e) => {
                    warn!(step = %step.name, elapsed_ms, error = %e, "step failed, halting");
                    halt = Some(Error::Step {
                        step: step.name.clone(),
                        message: e.to_string(),
                    });
                    outputs.push(step.name, StepState::Failed);
                    break;
                }
            }
        }

        // The pipeline's value is fixed before recovery appends anything.
        let main_result = outputs.last().cloned();

        if let Some(ref e) = halt {
            outputs.halt_error = Some(e.to_string());
        }
        for step in self.recovery {
            if let Some(guard) = &step.guard {
                if !guard(&outputs) {
                    outputs.push(step.name, StepState::Skipped);
                    continue;
                }
            }
            let result = (step.action)(&outputs).await;
            match result {
                Ok(value) => outputs.push(step.name, StepState::Ran(value)),
                Err(e) => {
                    // Remaining recovery steps still run; a failed recovery
                    // step never masks the halting error.
                    warn!(step = %step.name, error = %e, "recovery step failed");
                    outputs.push(step.name, StepState::Failed);
                }
            }
        }

        match (halt, self.policy) {
            (Some(e), ErrorPolicy::Propagate) => Err(e),
            (Some(e), ErrorPolicy::Suppress) => {
                debug!(error = %e, "halting error suppressed by pipeline policy");
                Ok(main_result.unwrap_or(Value::Null))
            }
            (None, _) => Ok(main_result.unwrap_or(Value::Null)),
        }
    }
}
