//! Error types for bridgeq.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// A work item with the same dedup key is already pending or active.
    #[error("duplicate submission: an item with dedup key {dedup_key:?} is already queued")]
    Duplicate { dedup_key: String },

    #[error("work item not found: {0}")]
    NotFound(String),

    #[error("invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    /// The bridge's dispatch table has no script for the item's kind.
    #[error("bridge {bridge} has no handler for kind {kind:?}")]
    NoHandler { bridge: String, kind: String },

    #[error("session error: {0}")]
    Session(String),

    /// A pipeline step rejected; halts the step list it belongs to.
    #[error("step {step:?} failed: {message}")]
    Step { step: String, message: String },

    /// The fleet did not become fully operational within the startup window.
    #[error("readiness not reached within {secs}s")]
    ReadinessTimeout { secs: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
