//! Work execution span helpers.
//!
//! Provides span creation and status-transition recording for work items
//! flowing through the dispatcher.

use tracing::Span;

use crate::model::WorkId;

/// Start a span for work item execution.
///
/// The `work.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_work_span(kind: &str, id: &WorkId) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.kind" = kind,
        "work.id" = %id,
        "work.state" = tracing::field::Empty,
    )
}

/// Record a status transition event on the given span.
///
/// Emits a tracing `info` event scoped to the span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
