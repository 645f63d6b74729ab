//! Task execution span helpers.
//!
//! Provides span creation and state-transition recording for tasks
//! flowing through a worker.

use tracing::Span;

use crate::model::{State, TaskId};

/// Start a span for one execution attempt of a task.
///
/// The `task.state` field is declared empty and is updated by
/// [`record_state_transition`].
pub fn start_task_span(task_type: &str, task_id: &TaskId, attempt: u32) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.type" = task_type,
        "task.id" = %task_id,
        "task.attempt" = attempt,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
///
/// Emits a tracing `info` event scoped to the span. Transitions the model
/// does not allow are still recorded, at `warn`.
pub fn record_state_transition(span: &Span, from: State, to: State) {
    span.record("task.state", tracing::field::display(to));
    span.in_scope(|| {
        if from.can_transition_to(to) {
            tracing::info!(%from, %to, "state_transition");
        } else {
            tracing::warn!(%from, %to, "unexpected state_transition");
        }
    });
}
