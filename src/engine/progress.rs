//! Running completed/failed counts for one job invocation.
//!
//! Counts are packed into a single atomic word (completed in the high half,
//! failed in the low half) so every snapshot is a consistent pair. Publishing
//! a snapshot, persisting it and forwarding it to the progress sink, is
//! serialized and skips anything older than what was already published, so
//! observers only ever see counts move forward.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::error::Result;
use crate::model::{JobId, JobStatus, ResultStatus};
use crate::store::JobStore;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

const COMPLETED_ONE: u64 = 1 << 32;
const FAILED_MASK: u64 = u32::MAX as u64;

/// Whole percentage of successful results; an empty job is done.
pub fn progress_percent(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 100;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    // round(100 * completed / total), halves rounding up
    ((200 * completed + total) / (2 * total)) as u8
}

/// Counts at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProgressSnapshot {
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub progress: u8,
}

impl ProgressSnapshot {
    fn unpack(total: u32, packed: u64) -> Self {
        let completed = (packed >> 32) as u32;
        let failed = (packed & FAILED_MASK) as u32;
        Self {
            total,
            completed,
            failed,
            progress: progress_percent(completed, total),
        }
    }

    pub fn settled(&self) -> u32 {
        self.completed + self.failed
    }
}

/// Receives every published snapshot of a job, in non-decreasing order.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn report(&self, job: JobId, snapshot: ProgressSnapshot);
}

/// Emits each snapshot as a tracing event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

#[async_trait]
impl ProgressSink for TracingProgress {
    async fn report(&self, job: JobId, snapshot: ProgressSnapshot) {
        info!(
            job_id = %job,
            completed = snapshot.completed,
            failed = snapshot.failed,
            total = snapshot.total,
            progress = snapshot.progress,
            "job progress"
        );
    }
}

/// Tracks and publishes one job's counts while its tasks settle.
pub struct ProgressTracker {
    job_id: JobId,
    total: u32,
    counts: AtomicU64,
    /// Packed counts of the last published snapshot.
    published: Mutex<u64>,
    store: Arc<dyn JobStore>,
    sink: Arc<dyn ProgressSink>,
}

impl ProgressTracker {
    /// Start from counts already settled before this invocation.
    pub fn seeded(
        job_id: JobId,
        total: u32,
        completed: u32,
        failed: u32,
        store: Arc<dyn JobStore>,
        sink: Arc<dyn ProgressSink>,
    ) -> Self {
        let packed = (u64::from(completed) << 32) | u64::from(failed);
        Self {
            job_id,
            total,
            counts: AtomicU64::new(packed),
            published: Mutex::new(packed),
            store,
            sink,
        }
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot::unpack(self.total, self.counts.load(Ordering::Acquire))
    }

    /// Terminal status implied by the current counts.
    pub fn final_status(&self) -> JobStatus {
        JobStatus::settled(self.snapshot().failed)
    }

    /// Count one settled result, then persist and report the new counts.
    pub async fn settle(&self, status: ResultStatus) -> Result<ProgressSnapshot> {
        let delta = match status {
            ResultStatus::Success => COMPLETED_ONE,
            ResultStatus::Error => 1,
            ResultStatus::Pending => return Ok(self.snapshot()),
        };
        let packed = self.counts.fetch_add(delta, Ordering::AcqRel) + delta;
        let snapshot = ProgressSnapshot::unpack(self.total, packed);

        metrics::results_settled().add(1, &[KeyValue::new("status", status.to_string())]);

        let mut published = self.published.lock().await;
        if packed > *published {
            let latest = ProgressSnapshot::unpack(self.total, self.counts.load(Ordering::Acquire));
            self.store
                .record_counts(self.job_id, latest.completed, latest.failed)
                .await?;
            self.sink.report(self.job_id, latest).await;
            *published = (u64::from(latest.completed) << 32) | u64::from(latest.failed);
        }
        Ok(snapshot)
    }
}
