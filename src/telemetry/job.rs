//! Job and task span helpers.
//!
//! Provides span creation and status recording for jobs flowing through
//! the engine and for the per-domain tasks inside them.

use tracing::Span;

use crate::model::JobId;

/// Start a span for one job invocation.
///
/// `job.total` and `job.status` are declared empty and filled in as the
/// invocation learns them.
pub fn start_job_span(job_id: &JobId) -> Span {
    tracing::info_span!(
        "job.process",
        "job.id" = %job_id,
        "job.total" = tracing::field::Empty,
        "job.status" = tracing::field::Empty,
    )
}

/// Record the job's size on its span.
pub fn record_job_total(span: &Span, total: u32) {
    span.record("job.total", total);
}

/// Record a job status transition on its span.
///
/// Emits a tracing `info` event scoped to the given span.
pub fn record_status_transition(span: &Span, from: &str, to: &str) {
    span.record("job.status", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "status_transition");
    });
}

/// Start a span for one domain's task.
///
/// `task.outcome` is declared empty and can be filled via
/// [`record_task_outcome`].
pub fn start_task_span(job_id: &JobId, domain: &str) -> Span {
    tracing::info_span!(
        "job.task",
        "job.id" = %job_id,
        "task.domain" = domain,
        "task.outcome" = tracing::field::Empty,
    )
}

pub fn record_task_outcome(span: &Span, outcome: &str) {
    span.record("task.outcome", outcome);
}
