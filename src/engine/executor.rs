//! Task executor: one domain's resolution under its lock and deadline.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, error};

use crate::error::Result;
use crate::lock::LockKey;
use crate::model::{DomainResult, JobId, ResultMutation, ResultStatus};
use crate::resolver::{ResolveError, Resolver};
use crate::store::JobStore;
use crate::telemetry::job::{record_task_outcome, start_task_span};
use crate::telemetry::metrics;

/// How a task settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The resolver produced a URL and it was stored.
    Succeeded { favicon_url: String },
    /// The resolver failed or missed the deadline; the error was stored.
    Failed { error: String },
    /// Another delivery had already stored a success. Nothing was written.
    AlreadySucceeded,
}

impl TaskOutcome {
    /// Status the result row holds after this task.
    pub fn status(&self) -> ResultStatus {
        match self {
            TaskOutcome::Succeeded { .. } | TaskOutcome::AlreadySucceeded => ResultStatus::Success,
            TaskOutcome::Failed { .. } => ResultStatus::Error,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            TaskOutcome::Succeeded { .. } => "succeeded",
            TaskOutcome::Failed { .. } => "failed",
            TaskOutcome::AlreadySucceeded => "skipped",
        }
    }
}

/// Runs a single result through lock, re-check, deadline race and write.
pub struct TaskExecutor {
    store: Arc<dyn JobStore>,
    resolver: Arc<dyn Resolver>,
    timeout: Duration,
}

impl TaskExecutor {
    pub fn new(store: Arc<dyn JobStore>, resolver: Arc<dyn Resolver>, timeout: Duration) -> Self {
        Self {
            store,
            resolver,
            timeout,
        }
    }

    /// Settle one result.
    ///
    /// Resolution failures become [`TaskOutcome::Failed`]; only store faults
    /// return `Err`. The lock is released on every path, including when the
    /// returned future is dropped.
    pub async fn execute(&self, job_id: JobId, result: &DomainResult) -> Result<TaskOutcome> {
        let span = start_task_span(&job_id, &result.domain);
        async {
            let key = LockKey::for_result(job_id, &result.domain);
            let waited = Instant::now();
            let locked = self.store.lock_result(key, result.id).await?;
            metrics::lock_wait_ms().record(waited.elapsed().as_secs_f64() * 1000.0, &[]);
            debug!(key = %locked.key(), "result lock acquired");

            if locked.current().status == ResultStatus::Success {
                locked.release().await?;
                let outcome = TaskOutcome::AlreadySucceeded;
                record_task_outcome(&span, outcome.label());
                return Ok(outcome);
            }

            let started = Instant::now();
            let mutation = match self.resolve_with_deadline(&result.domain).await {
                Ok(favicon_url) => ResultMutation::Succeeded { favicon_url },
                Err(e) => ResultMutation::Failed { error: e.message() },
            };
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

            locked.commit(&mutation).await?;

            let outcome = match mutation {
                ResultMutation::Succeeded { favicon_url } => TaskOutcome::Succeeded { favicon_url },
                ResultMutation::Failed { error } => {
                    error!(domain = %result.domain, %error, "domain resolution failed");
                    TaskOutcome::Failed { error }
                }
            };
            metrics::task_duration_ms()
                .record(elapsed_ms, &[KeyValue::new("outcome", outcome.label())]);
            record_task_outcome(&span, outcome.label());
            Ok(outcome)
        }
        .instrument(span.clone())
        .await
    }

    /// Race the resolver against the deadline. A late resolver call is
    /// dropped, not left running.
    async fn resolve_with_deadline(&self, domain: &str) -> std::result::Result<String, ResolveError> {
        match tokio::time::timeout(self.timeout, self.resolver.resolve(domain)).await {
            Ok(resolved) => resolved,
            Err(_) => Err(ResolveError::Timeout),
        }
    }
}
