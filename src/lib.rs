//! # bridgeq
//!
//! Queue and dispatch engine for fiscal form-submission bridges.
//!
//! Provides a dedup-gated FIFO work queue, an affinity-aware dispatch
//! scheduler over a fleet of browser-automation bridges, the gated
//! step-pipeline executor those bridges run transactions with, and
//! OpenTelemetry observability.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod notify;
pub mod pipeline;
pub mod session;
pub mod store;
pub mod telemetry;
