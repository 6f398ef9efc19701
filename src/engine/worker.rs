//! Worker: consumes job messages from pgmq and runs them through the engine.
//!
//! Wakes on `NOTIFY job_ready` or on a poll tick, claims messages while it
//! has spare job slots, and settles each message once its invocation ends:
//! deleted on success, hidden for a backoff delay on a fault, archived once
//! the attempts are used up. While an invocation runs, its message lease is
//! extended every half visibility timeout so a long job is not redelivered
//! mid-run.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use super::processor::{JobProcessor, ProcessOutcome};
use crate::config::{Config, DeliveryPolicy};
use crate::db::Db;
use crate::db::pgmq::PgmqMessage;
use crate::error::Result;
use crate::queue::{JOB_QUEUE, JOB_READY_CHANNEL, JobMessage};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Visibility timeout (seconds) for pgmq reads.
    pub visibility_timeout: i32,
    /// Poll interval fallback when no NOTIFY arrives.
    pub poll_interval: Duration,
    /// Jobs processed at the same time by this worker.
    pub max_concurrent_jobs: usize,
    pub delivery: DeliveryPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: 60,
            poll_interval: Duration::from_secs(5),
            max_concurrent_jobs: 4,
            delivery: DeliveryPolicy::default(),
        }
    }
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            visibility_timeout: config.queue_visibility_timeout,
            max_concurrent_jobs: config.max_concurrent_jobs,
            delivery: config.delivery,
            ..Self::default()
        }
    }
}

/// What to do with a message once its invocation is over.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge: the job finished, or there is nothing left to do for it.
    Delete,
    /// Make the message visible again after `delay`.
    Retry { delay: Duration },
    /// Stop redelivering and keep the message for inspection.
    Archive,
}

impl Disposition {
    /// Decide for a message read `read_ct` times whose invocation returned
    /// `result`.
    pub fn after(result: &Result<ProcessOutcome>, read_ct: i32, policy: &DeliveryPolicy) -> Self {
        match result {
            Ok(_) => Disposition::Delete,
            Err(_) => {
                let attempt = read_ct.max(1) as u32;
                if policy.should_retry(attempt) {
                    Disposition::Retry {
                        delay: policy.backoff_for(attempt),
                    }
                } else {
                    Disposition::Archive
                }
            }
        }
    }
}

/// Whole seconds for pgmq's visibility API, rounded up and at least one.
fn delay_seconds(delay: Duration) -> i32 {
    (delay.as_secs_f64().ceil() as i32).max(1)
}

/// Lease renewal period for a claimed message: half its visibility timeout,
/// at least one second.
fn lease_renewal_every(visibility_timeout: i32) -> Duration {
    Duration::from_secs((visibility_timeout.max(2) / 2) as u64)
}

/// Drive `work` to completion, calling `renew` every `every` while it runs.
/// A failed renewal is logged and the work carries on.
async fn with_lease<T, R, Fut>(work: impl Future<Output = T>, every: Duration, mut renew: R) -> T
where
    R: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tokio::pin!(work);
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            out = &mut work => return out,
            _ = ticker.tick() => {
                if let Err(e) = renew().await {
                    warn!("failed to extend message lease: {e}");
                }
            }
        }
    }
}

/// The worker loop: listen for job messages, run them, settle them.
#[derive(Clone)]
pub struct Worker {
    db: Arc<Db>,
    processor: Arc<JobProcessor>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Worker {
    pub fn new(db: Arc<Db>, processor: Arc<JobProcessor>, config: WorkerConfig) -> Self {
        Self {
            db,
            processor,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker to shut down.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown.
    ///
    /// Jobs still in flight at shutdown are aborted. Their results stay
    /// consistent (uncommitted units of work roll back) and the message
    /// reappears once its visibility timeout lapses.
    pub async fn run(&self) -> Result<()> {
        self.db.create_queue(JOB_QUEUE).await?;

        let mut listener = sqlx::postgres::PgListener::connect_with(self.db.pool()).await?;
        listener.listen(JOB_READY_CHANNEL).await?;

        info!(
            max_concurrent_jobs = self.config.max_concurrent_jobs,
            "worker started, listening for jobs"
        );

        let mut inflight: JoinSet<()> = JoinSet::new();
        loop {
            if let Err(e) = self.claim(&mut inflight).await {
                error!("claim error: {e}");
            }

            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!(inflight = inflight.len(), "worker shutting down");
                    inflight.shutdown().await;
                    return Ok(());
                }
                notif = listener.recv() => {
                    match notif {
                        Ok(n) => info!(job_id = n.payload(), "notified of new job"),
                        Err(e) => warn!("PgListener error: {e}, falling back to poll"),
                    }
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    if let Err(e) = joined {
                        error!("job task failed: {e}");
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
    }

    /// Read and spawn messages until the queue is empty or all slots are
    /// taken.
    async fn claim(&self, inflight: &mut JoinSet<()>) -> Result<()> {
        while inflight.len() < self.config.max_concurrent_jobs {
            let Some(msg) = self
                .db
                .read_from_queue(JOB_QUEUE, self.config.visibility_timeout)
                .await?
            else {
                return Ok(());
            };

            let worker = self.clone();
            inflight.spawn(async move {
                let msg_id = msg.msg_id;
                if let Err(e) = worker.handle(msg).await {
                    // The message reappears after its visibility timeout.
                    error!(msg_id, "failed to settle message: {e}");
                }
            });
        }
        Ok(())
    }

    async fn handle(&self, msg: PgmqMessage) -> Result<()> {
        let job_id = match JobMessage::from_json(&msg.message) {
            Ok(m) => m.job_id,
            Err(e) => {
                warn!(msg_id = msg.msg_id, "{e}, archiving");
                return self.db.archive_message(JOB_QUEUE, msg.msg_id).await;
            }
        };

        info!(%job_id, msg_id = msg.msg_id, read_ct = msg.read_ct, "job message claimed");
        let db = Arc::clone(&self.db);
        let (msg_id, lease) = (msg.msg_id, self.config.visibility_timeout);
        let result = with_lease(
            self.processor.process(job_id),
            lease_renewal_every(lease),
            move || {
                let db = Arc::clone(&db);
                async move { db.extend_lease(JOB_QUEUE, msg_id, lease).await }
            },
        )
        .await;
        if let Err(e) = &result {
            error!(%job_id, read_ct = msg.read_ct, "job invocation failed: {e}");
        }

        match Disposition::after(&result, msg.read_ct, &self.config.delivery) {
            Disposition::Delete => {
                if let Ok(ProcessOutcome::JobNotFound(_)) = &result {
                    warn!(%job_id, "dropping message for unknown job");
                }
                self.db.delete_message(JOB_QUEUE, msg.msg_id).await
            }
            Disposition::Retry { delay } => {
                warn!(%job_id, delay_ms = delay.as_millis() as u64, "scheduling redelivery");
                self.db
                    .set_visibility(JOB_QUEUE, msg.msg_id, delay_seconds(delay))
                    .await
            }
            Disposition::Archive => {
                error!(%job_id, read_ct = msg.read_ct, "attempts exhausted, archiving");
                self.db.archive_message(JOB_QUEUE, msg.msg_id).await
            }
        }
    }
}
