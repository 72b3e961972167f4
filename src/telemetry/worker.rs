//! Worker run span helpers.
//!
//! Provides span creation and state-transition recording for worker loops.

use crate::model::WorkerState;
use tracing::Span;
use uuid::Uuid;

/// Start a span covering one run of a worker loop, from `Starting` to the
/// end of its last iteration.
///
/// The `worker.state` field is declared empty and is updated via
/// [`record_state_transition`].
pub fn start_run_span(worker: &str, run_id: &Uuid) -> Span {
    tracing::info_span!(
        "worker.run",
        "worker.name" = worker,
        "worker.run_id" = %run_id,
        "worker.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
pub fn record_state_transition(span: &Span, worker: &str, from: WorkerState, to: WorkerState) {
    span.record("worker.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::info!(worker, %from, %to, "state_transition");
    });
}
