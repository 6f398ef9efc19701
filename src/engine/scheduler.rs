//! Concurrency scheduler: fans a job's pending results out to the executor
//! under a parallelism ceiling and joins them all before returning.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::warn;

use super::executor::TaskExecutor;
use super::progress::ProgressTracker;
use crate::error::{Error, Result};
use crate::model::{DomainResult, JobId, ResultStatus};

/// A job's results split by status at load time.
#[derive(Debug, Default)]
pub struct Partition {
    pub pending: Vec<DomainResult>,
    pub succeeded: u32,
    pub failed: u32,
}

impl Partition {
    /// Settled results are counted and skipped; only pending ones run.
    pub fn of(results: Vec<DomainResult>) -> Self {
        let mut partition = Partition::default();
        for result in results {
            match result.status {
                ResultStatus::Success => partition.succeeded += 1,
                ResultStatus::Error => partition.failed += 1,
                ResultStatus::Pending => partition.pending.push(result),
            }
        }
        partition
    }
}

/// Runs up to `max_concurrency` tasks at once.
#[derive(Debug, Clone, Copy)]
pub struct Scheduler {
    max_concurrency: usize,
}

impl Scheduler {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Execute every pending result and feed each outcome to the tracker.
    ///
    /// Returns once all tasks have settled. A store fault in any task aborts
    /// the remaining ones and is returned; per-domain failures never are.
    pub async fn run(
        &self,
        job_id: JobId,
        pending: Vec<DomainResult>,
        executor: Arc<TaskExecutor>,
        tracker: Arc<ProgressTracker>,
    ) -> Result<()> {
        let slots = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();

        for result in pending {
            let slots = Arc::clone(&slots);
            let executor = Arc::clone(&executor);
            let tracker = Arc::clone(&tracker);
            tasks.spawn(async move {
                let _slot = slots
                    .acquire_owned()
                    .await
                    .map_err(|e| Error::Other(format!("scheduler closed: {e}")))?;
                let outcome = executor.execute(job_id, &result).await?;
                tracker.settle(outcome.status()).await?;
                Ok::<_, Error>(())
            });
        }

        let mut fault = None;
        while let Some(joined) = tasks.join_next().await {
            let err = match joined {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(e) if e.is_cancelled() => continue,
                Err(e) => Error::Other(format!("task panicked: {e}")),
            };
            if fault.is_none() {
                warn!(job_id = %job_id, error = %err, "aborting remaining tasks");
                tasks.abort_all();
                fault = Some(err);
            }
        }

        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
