//! Metric instrument factories for favq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"favq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for favq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("favq")
}

/// Counter: jobs accepted by the submission path.
pub fn jobs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("favq.jobs.submitted")
        .with_description("Number of jobs submitted")
        .build()
}

/// Counter: job status writes.
/// Labels: `from`, `to`.
pub fn job_status_transitions() -> Counter<u64> {
    meter()
        .u64_counter("favq.jobs.status_transitions")
        .with_description("Number of job status transitions")
        .build()
}

/// Counter: results that reached a settled status.
/// Labels: `status` ("SUCCESS" | "ERROR").
pub fn results_settled() -> Counter<u64> {
    meter()
        .u64_counter("favq.results.settled")
        .with_description("Number of settled domain results")
        .build()
}

/// Counter: queue-level operations (send, read, delete, archive, retry).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("favq.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: one domain's resolution time in milliseconds.
/// Labels: `outcome`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("favq.task.duration_ms")
        .with_description("Domain resolution duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Histogram: time spent waiting for a result lock in milliseconds.
pub fn lock_wait_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("favq.lock.wait_ms")
        .with_description("Time spent waiting for a result lock")
        .with_unit("ms")
        .build()
}
