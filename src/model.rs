//! Core data model.
//!
//! A work item is one queued form-submission transaction. It has identity
//! (kind + dedup key), a fiscal-year routing key, an opaque payload, and a
//! four-state lifecycle. Terminal items live only in the bounded outcome log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Reserved kind for outbound notification items. The dispatcher hands these
/// straight to the notifier collaborator instead of a bridge.
pub const KIND_CALLBACK: &str = "outbound-callback";

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A unit of work tracked by the queue store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    /// Unique identifier.
    pub id: WorkId,

    /// What kind of transaction this is (e.g., "commitment-create").
    /// Open set; bridges declare which kinds they handle.
    pub kind: String,

    /// Fiscal year this transaction belongs to. Routed only to bridges
    /// with the same year affinity.
    pub year: Option<i32>,

    /// Arbitrary form data for the transaction script. Opaque to the engine.
    pub payload: serde_json::Value,

    /// Identity of the logical transaction. At most one item per key may be
    /// pending or active at a time.
    pub dedup_key: String,

    /// Current lifecycle status.
    pub status: Status,

    /// Name of the bridge (or the notifier) currently executing this item.
    pub assigned: Option<String>,

    /// Requester to notify when the item completes.
    pub callback: Option<String>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,

    /// Result of the last step that ran, set on `Done`.
    pub result: Option<serde_json::Value>,

    /// Failure detail, set on `Failed`.
    pub error: Option<FailureKind>,
}

/// Newtype for work item IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// Queued, waiting for a capable idle bridge.
    Pending,
    /// Claimed and executing.
    Active,
    /// Finished successfully. Terminal.
    Done,
    /// Execution, timeout, or callback failure. Terminal.
    Failed,
}

impl Status {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: Status) -> bool {
        use Status::*;
        matches!((self, to), (Pending, Active) | (Active, Done) | (Active, Failed))
    }

    /// Is this a terminal status?
    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Status::Pending => "pending",
            Status::Active => "active",
            Status::Done => "done",
            Status::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Status::Pending),
            "active" => Ok(Status::Active),
            "done" => Ok(Status::Done),
            "failed" => Ok(Status::Failed),
            other => Err(Error::Other(format!("unknown status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure taxonomy
// ---------------------------------------------------------------------------

/// Why a work item ended `Failed`. Callers distinguish a timed-out
/// cancellation from a transaction-script failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "message", rename_all = "snake_case")]
pub enum FailureKind {
    /// A pipeline step rejected.
    Execution(String),
    /// The external deadline fired; the session was forcibly stopped.
    Timeout(String),
    /// The outbound notifier reported delivery failure.
    Callback(String),
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureKind::Execution(msg) => write!(f, "execution failure: {msg}"),
            FailureKind::Timeout(msg) => write!(f, "timeout: {msg}"),
            FailureKind::Callback(msg) => write!(f, "callback failure: {msg}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome log
// ---------------------------------------------------------------------------

/// One record in the bounded outcome log, written when an item reaches a
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeEntry {
    pub id: WorkId,
    pub kind: String,
    pub dedup_key: String,
    pub callback: Option<String>,
    pub status: Status,
    pub result: Option<serde_json::Value>,
    pub error: Option<FailureKind>,
    pub completed_at: DateTime<Utc>,
}

impl OutcomeEntry {
    /// Whether this entry answers a pull request for `correlation`:
    /// the requester's callback id or the item id itself.
    pub fn matches(&self, correlation: &str) -> bool {
        self.callback.as_deref() == Some(correlation)
            || self.id.0.to_string() == correlation
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting work. The queue store's public entry point.
pub struct NewWorkItem {
    pub(crate) kind: String,
    pub(crate) year: Option<i32>,
    pub(crate) payload: serde_json::Value,
    pub(crate) dedup_key: Option<String>,
    pub(crate) callback: Option<String>,
}

impl NewWorkItem {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            year: None,
            payload: serde_json::Value::Null,
            dedup_key: None,
            callback: None,
        }
    }

    pub fn year(mut self, year: i32) -> Self {
        self.year = Some(year);
        self
    }

    pub fn payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn dedup_key(mut self, key: impl Into<String>) -> Self {
        self.dedup_key = Some(key.into());
        self
    }

    pub fn callback(mut self, callback: impl Into<String>) -> Self {
        self.callback = Some(callback.into());
        self
    }

    /// The dedup key this submission will be checked under: the explicit key
    /// when given, otherwise derived from kind + payload. serde_json keeps
    /// object keys sorted, so equal payloads derive equal keys.
    pub(crate) fn resolve_dedup_key(&self) -> String {
        match &self.dedup_key {
            Some(key) => key.clone(),
            None => format!("{}:{}", self.kind, self.payload),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn status_transition_table() {
        assert!(Status::Pending.can_transition_to(Status::Active));
        assert!(Status::Active.can_transition_to(Status::Done));
        assert!(Status::Active.can_transition_to(Status::Failed));
        assert!(!Status::Pending.can_transition_to(Status::Done));
        assert!(!Status::Done.can_transition_to(Status::Active));
        assert!(!Status::Failed.can_transition_to(Status::Pending));
    }

    #[test]
    fn terminal_statuses() {
        assert!(!Status::Pending.is_terminal());
        assert!(!Status::Active.is_terminal());
        assert!(Status::Done.is_terminal());
        assert!(Status::Failed.is_terminal());
    }

    #[test]
    fn derived_dedup_key_is_stable_across_key_order() {
        let a = NewWorkItem::new("commitment-create")
            .payload(json!({"creditor": "acme", "amount": 1200}));
        let b = NewWorkItem::new("commitment-create")
            .payload(json!({"amount": 1200, "creditor": "acme"}));
        assert_eq!(a.resolve_dedup_key(), b.resolve_dedup_key());
    }

    #[test]
    fn explicit_dedup_key_wins() {
        let new = NewWorkItem::new("commitment-create")
            .payload(json!({"doc": 1}))
            .dedup_key("2025/000123");
        assert_eq!(new.resolve_dedup_key(), "2025/000123");
    }

    #[test]
    fn failure_kind_serializes_with_tag() {
        let kind = FailureKind::Timeout("exceeded 300s".into());
        let json = serde_json::to_value(&kind).unwrap();
        assert_eq!(json["type"], "timeout");
        let back: FailureKind = serde_json::from_value(json).unwrap();
        assert_eq!(back, kind);
    }

    #[test]
    fn status_parses_from_display() {
        for status in [Status::Pending, Status::Active, Status::Done, Status::Failed] {
            let parsed: Status = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert!("queued".parse::<Status>().is_err());
    }
}
