//! Job processing engine: the entry point invoked once per delivered job
//! message.
//!
//! Every invocation marks the job PROCESSING, re-derives the counts of
//! results that already settled, runs the pending ones, and writes the
//! terminal status only after all of them have settled. Redelivery of the
//! same job id resumes where the previous invocation left off; results that
//! ended in ERROR are not retried.

use std::sync::Arc;

use opentelemetry::KeyValue;
use tracing::{Instrument, info, warn};

use super::executor::TaskExecutor;
use super::progress::{ProgressSink, ProgressTracker};
use super::scheduler::{Partition, Scheduler};
use crate::config::EngineConfig;
use crate::error::Result;
use crate::model::{Job, JobId, JobStatus};
use crate::resolver::Resolver;
use crate::store::JobStore;
use crate::telemetry::job::{record_job_total, record_status_transition, start_job_span};
use crate::telemetry::metrics;

/// What one invocation did.
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// All results settled and the terminal status was written.
    Finished(JobSummary),
    /// The message named a job the store does not know.
    JobNotFound(JobId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSummary {
    pub job_id: JobId,
    pub status: JobStatus,
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    /// Pending results this invocation ran.
    pub attempted: usize,
}

/// Processes jobs against a store with a resolver.
pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    executor: Arc<TaskExecutor>,
    scheduler: Scheduler,
    sink: Arc<dyn ProgressSink>,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        resolver: Arc<dyn Resolver>,
        sink: Arc<dyn ProgressSink>,
        config: EngineConfig,
    ) -> Self {
        let executor = Arc::new(TaskExecutor::new(
            Arc::clone(&store),
            resolver,
            config.task_timeout,
        ));
        Self {
            store,
            executor,
            scheduler: Scheduler::new(config.max_concurrency),
            sink,
        }
    }

    /// Run one invocation for `job_id`.
    ///
    /// Errors only on store faults; the job then stays PROCESSING and can be
    /// picked up again by a redelivery.
    pub async fn process(&self, job_id: JobId) -> Result<ProcessOutcome> {
        let span = start_job_span(&job_id);
        async {
            let Some(job) = self.store.get_job(job_id).await? else {
                warn!(job_id = %job_id, "job not found");
                return Ok(ProcessOutcome::JobNotFound(job_id));
            };
            record_job_total(&span, job.total);
            if job.status.is_terminal() {
                info!(status = %job.status, "job already finished, re-checking its results");
            }

            self.store
                .set_job_status(job_id, JobStatus::Processing)
                .await?;
            self.transition(&span, job.status, JobStatus::Processing);

            let partition = Partition::of(self.store.list_results(job_id).await?);
            let attempted = partition.pending.len();
            info!(
                total = job.total,
                pending = attempted,
                succeeded = partition.succeeded,
                failed = partition.failed,
                max_concurrency = self.scheduler.max_concurrency(),
                "job invocation started"
            );

            let tracker = Arc::new(ProgressTracker::seeded(
                job_id,
                job.total,
                partition.succeeded,
                partition.failed,
                Arc::clone(&self.store),
                Arc::clone(&self.sink),
            ));

            self.scheduler
                .run(
                    job_id,
                    partition.pending,
                    Arc::clone(&self.executor),
                    Arc::clone(&tracker),
                )
                .await?;

            let counts = tracker.snapshot();
            let status = tracker.final_status();
            let finished: Job = self
                .store
                .finish_job(job_id, status, counts.completed, counts.failed)
                .await?;
            self.transition(&span, JobStatus::Processing, status);

            info!(
                status = %finished.status,
                completed = finished.completed,
                failed = finished.failed,
                total = finished.total,
                "job finished"
            );

            Ok(ProcessOutcome::Finished(JobSummary {
                job_id,
                status: finished.status,
                total: finished.total,
                completed: finished.completed,
                failed: finished.failed,
                attempted,
            }))
        }
        .instrument(span.clone())
        .await
    }

    fn transition(&self, span: &tracing::Span, from: JobStatus, to: JobStatus) {
        let (from, to) = (from.to_string(), to.to_string());
        record_status_transition(span, &from, &to);
        metrics::job_status_transitions()
            .add(1, &[KeyValue::new("from", from), KeyValue::new("to", to)]);
    }
}
