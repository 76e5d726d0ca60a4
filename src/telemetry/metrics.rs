//! Metric instrument factories for bridgeq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"bridgeq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for bridgeq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("bridgeq")
}

/// Counter: number of work items submitted.
/// Labels: `kind`, `result` ("ok" | "duplicate").
pub fn work_submitted() -> Counter<u64> {
    meter()
        .u64_counter("bridgeq.work.submitted")
        .with_description("Number of work items submitted")
        .build()
}

/// Counter: work item status transitions.
/// Labels: `from`, `to`.
pub fn work_state_transitions() -> Counter<u64> {
    meter()
        .u64_counter("bridgeq.work.state_transitions")
        .with_description("Number of work item status transitions")
        .build()
}

/// Counter: items assigned to a bridge.
/// Labels: `bridge`, `kind`.
pub fn dispatch_assigned() -> Counter<u64> {
    meter()
        .u64_counter("bridgeq.dispatch.assigned")
        .with_description("Number of dispatch assignments")
        .build()
}

/// Counter: scheduling passes that left the queue head pending because no
/// eligible bridge existed. Labels: `kind`.
pub fn dispatch_stalled() -> Counter<u64> {
    meter()
        .u64_counter("bridgeq.dispatch.stalled")
        .with_description("Scheduling passes stalled with no eligible bridge")
        .build()
}

/// Histogram: execution duration in milliseconds, claim to settle.
/// Labels: `kind`.
pub fn work_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("bridgeq.work.duration_ms")
        .with_description("Work execution duration in milliseconds")
        .with_unit("ms")
        .build()
}
