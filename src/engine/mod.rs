//! Control plane: readiness gating and the dispatch loop.

pub mod dispatch;
pub mod ready;

pub use dispatch::{DispatchConfig, Dispatcher, eligible_bridges};
pub use ready::ReadinessGate;
