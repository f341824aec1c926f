//! Stage execution span helpers.

use tracing::Span;
use uuid::Uuid;

use crate::model::work::{Stage, WorkId};

/// Start a span for one stage invocation.
///
/// `correlation_id` is fresh per invocation so concurrent duplicate
/// deliveries of the same id can be told apart in logs.
pub fn start_stage_span(stage: Stage, id: WorkId, correlation_id: &Uuid) -> Span {
    tracing::info_span!(
        "stage.process",
        "stage" = %stage,
        "work.id" = id.0,
        "correlation_id" = %correlation_id,
        "stage.outcome" = tracing::field::Empty,
        "elapsed_ms" = tracing::field::Empty,
    )
}

/// Record the final outcome and emit a summary event inside the span.
pub fn record_outcome(span: &Span, outcome: &str, elapsed_ms: u64) {
    span.record("stage.outcome", outcome);
    span.record("elapsed_ms", elapsed_ms);
    span.in_scope(|| {
        tracing::info!(outcome, elapsed_ms, "stage finished");
    });
}
