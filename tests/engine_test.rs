//! Integration tests for the job processing engine on the in-memory store.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use favq::config::EngineConfig;
use favq::engine::{
    JobProcessor, JobSummary, ProcessOutcome, ProgressSink, ProgressSnapshot, TaskExecutor,
    TaskOutcome,
};
use favq::error::{Error, Result};
use favq::lock::LockKey;
use favq::model::*;
use favq::resolver::{ResolveError, Resolver};
use favq::store::{JobStore, LockedResult, MemoryStore};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Resolver that sleeps, counts calls and in-flight peaks, and fails any
/// domain starting with `bad`.
#[derive(Default)]
struct ScriptedResolver {
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedResolver {
    fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Resolver for ScriptedResolver {
    async fn resolve(&self, domain: &str) -> std::result::Result<String, ResolveError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if domain.starts_with("bad") {
            Err(ResolveError::Failed(String::new()))
        } else {
            Ok(format!("https://{domain}/favicon.ico"))
        }
    }
}

#[derive(Default)]
struct RecordingSink {
    seen: Mutex<Vec<ProgressSnapshot>>,
}

impl RecordingSink {
    fn snapshots(&self) -> Vec<ProgressSnapshot> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProgressSink for RecordingSink {
    async fn report(&self, _job: JobId, snapshot: ProgressSnapshot) {
        self.seen.lock().unwrap().push(snapshot);
    }
}

fn config(max_concurrency: usize) -> EngineConfig {
    EngineConfig {
        max_concurrency,
        task_timeout: Duration::from_millis(2000),
    }
}

fn processor(
    store: &Arc<MemoryStore>,
    resolver: Arc<dyn Resolver>,
    config: EngineConfig,
) -> JobProcessor {
    JobProcessor::new(
        store.clone(),
        resolver,
        Arc::new(RecordingSink::default()),
        config,
    )
}

async fn create(store: &MemoryStore, domains: &[&str]) -> Job {
    let new = NewJob::new("acme", domains.iter().map(|d| d.to_string()).collect()).unwrap();
    store.create_job(&new).await.unwrap()
}

fn finished(outcome: ProcessOutcome) -> JobSummary {
    match outcome {
        ProcessOutcome::Finished(summary) => summary,
        ProcessOutcome::JobNotFound(id) => panic!("expected Finished, got JobNotFound({id})"),
    }
}

/// Overwrite a stored row with a settled status, as an earlier invocation
/// would have left it.
fn settle_row(store: &MemoryStore, job: JobId, domain: &str, status: ResultStatus) {
    let mut row = store.find_result(job, domain).unwrap();
    row.status = status;
    row.tries = 1;
    match status {
        ResultStatus::Success => row.favicon_url = Some(format!("https://{domain}/favicon.ico")),
        _ => row.error = Some("Timeout exceeded".to_string()),
    }
    row.updated_at = Utc::now();
    store.put_result(row);
}

// ---------------------------------------------------------------------------
// Status derivation
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn all_successes_complete_the_job() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(100));
    let job = create(&store, &["a.com", "b.com", "c.com"]).await;

    let summary = finished(
        processor(&store, resolver.clone(), config(10))
            .process(job.id)
            .await
            .unwrap(),
    );

    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!((summary.completed, summary.failed), (3, 0));
    assert_eq!(summary.attempted, 3);

    let stored = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.progress(), 100);

    for result in store.list_results(job.id).await.unwrap() {
        assert_eq!(result.status, ResultStatus::Success);
        assert_eq!(
            result.favicon_url.as_deref(),
            Some(format!("https://{}/favicon.ico", result.domain).as_str())
        );
        assert_eq!(result.tries, 1);
        assert!(result.error.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn any_failure_fails_the_job() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(10));
    let job = create(&store, &["a.com", "bad.com", "c.com"]).await;

    let summary = finished(
        processor(&store, resolver, config(10))
            .process(job.id)
            .await
            .unwrap(),
    );

    assert_eq!(summary.status, JobStatus::Failed);
    assert_eq!((summary.completed, summary.failed), (2, 1));

    let stored = store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.progress(), 67);

    let bad = store.find_result(job.id, "bad.com").unwrap();
    assert_eq!(bad.status, ResultStatus::Error);
    assert_eq!(bad.error.as_deref(), Some("Unknown error"));
    assert!(bad.favicon_url.is_none());
    assert_eq!(bad.tries, 1);
}

// ---------------------------------------------------------------------------
// Deadline
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn slow_resolution_times_out() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_secs(5));
    let job = create(&store, &["slow.com"]).await;

    let summary = finished(
        processor(&store, resolver, config(10))
            .process(job.id)
            .await
            .unwrap(),
    );

    assert_eq!(summary.status, JobStatus::Failed);
    let row = store.find_result(job.id, "slow.com").unwrap();
    assert_eq!(row.status, ResultStatus::Error);
    assert_eq!(row.error.as_deref(), Some("Timeout exceeded"));
    assert_eq!(row.tries, 1);
}

// ---------------------------------------------------------------------------
// Concurrency ceiling
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resolutions_never_exceed_max_concurrency() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(100));
    let domains: Vec<String> = (0..20).map(|i| format!("d{i}.com")).collect();
    let refs: Vec<&str> = domains.iter().map(String::as_str).collect();
    let job = create(&store, &refs).await;

    let summary = finished(
        processor(&store, resolver.clone(), config(3))
            .process(job.id)
            .await
            .unwrap(),
    );

    assert_eq!(summary.completed, 20);
    assert_eq!(resolver.calls(), 20);
    assert!(resolver.peak() <= 3, "peak was {}", resolver.peak());
    assert_eq!(resolver.peak(), 3);
}

// ---------------------------------------------------------------------------
// Resume and idempotence
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn resume_skips_settled_results_and_keeps_errors() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(10));
    let job = create(&store, &["done.com", "broken.com", "todo.com"]).await;
    settle_row(&store, job.id, "done.com", ResultStatus::Success);
    settle_row(&store, job.id, "broken.com", ResultStatus::Error);

    let summary = finished(
        processor(&store, resolver.clone(), config(10))
            .process(job.id)
            .await
            .unwrap(),
    );

    // Only the pending row runs; the ERROR row is not retried.
    assert_eq!(resolver.calls(), 1);
    assert_eq!(summary.attempted, 1);
    assert_eq!((summary.completed, summary.failed), (2, 1));
    assert_eq!(summary.status, JobStatus::Failed);

    let broken = store.find_result(job.id, "broken.com").unwrap();
    assert_eq!(broken.status, ResultStatus::Error);
    assert_eq!(broken.tries, 1);
}

#[tokio::test(start_paused = true)]
async fn redelivery_of_finished_job_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(10));
    let job = create(&store, &["a.com", "bad.com"]).await;
    let engine = processor(&store, resolver.clone(), config(10));

    let first = finished(engine.process(job.id).await.unwrap());
    let second = finished(engine.process(job.id).await.unwrap());

    assert_eq!(resolver.calls(), 2);
    assert_eq!(second.attempted, 0);
    assert_eq!(
        (second.status, second.completed, second.failed),
        (first.status, first.completed, first.failed)
    );
    for row in store.list_results(job.id).await.unwrap() {
        assert_eq!(row.tries, 1);
    }
}

#[tokio::test(start_paused = true)]
async fn concurrent_deliveries_resolve_each_domain_once() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(50));
    let job = create(&store, &["a.com", "b.com", "c.com", "d.com"]).await;

    let left = processor(&store, resolver.clone(), config(2));
    let right = processor(&store, resolver.clone(), config(2));
    let (l, r) = tokio::join!(left.process(job.id), right.process(job.id));
    let (l, r) = (finished(l.unwrap()), finished(r.unwrap()));

    assert_eq!(resolver.calls(), 4);
    for summary in [l, r] {
        assert_eq!(summary.status, JobStatus::Completed);
        assert_eq!(summary.completed, 4);
    }
    for row in store.list_results(job.id).await.unwrap() {
        assert_eq!(row.status, ResultStatus::Success);
        assert_eq!(row.tries, 1);
    }
}

#[tokio::test]
async fn empty_job_completes() {
    let store = Arc::new(MemoryStore::new());
    let now = Utc::now();
    let job = Job {
        id: JobId::new(),
        client_id: ClientId(uuid::Uuid::new_v4()),
        status: JobStatus::Processing,
        total: 0,
        completed: 0,
        failed: 0,
        created_at: now,
        updated_at: now,
    };
    store.put_job(job.clone());

    let summary = finished(
        processor(&store, ScriptedResolver::with_delay(Duration::ZERO), config(10))
            .process(job.id)
            .await
            .unwrap(),
    );
    assert_eq!(summary.status, JobStatus::Completed);
    assert_eq!(summary.attempted, 0);
    assert_eq!(store.get_job(job.id).await.unwrap().unwrap().progress(), 100);
}

#[tokio::test]
async fn unknown_job_is_reported() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::ZERO);
    let missing = JobId::new();

    let outcome = processor(&store, resolver, config(10))
        .process(missing)
        .await
        .unwrap();
    assert!(matches!(outcome, ProcessOutcome::JobNotFound(id) if id == missing));
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn progress_reports_never_move_backwards() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(25));
    let sink = Arc::new(RecordingSink::default());
    let domains: Vec<String> = (0..12)
        .map(|i| if i % 4 == 0 { format!("bad{i}.com") } else { format!("ok{i}.com") })
        .collect();
    let refs: Vec<&str> = domains.iter().map(String::as_str).collect();
    let job = create(&store, &refs).await;

    let engine = JobProcessor::new(store.clone(), resolver, sink.clone(), config(4));
    let summary = finished(engine.process(job.id).await.unwrap());

    let seen = sink.snapshots();
    assert!(!seen.is_empty());
    for pair in seen.windows(2) {
        assert!(pair[1].completed >= pair[0].completed);
        assert!(pair[1].failed >= pair[0].failed);
        assert!(pair[1].progress >= pair[0].progress);
    }
    let last = seen.last().unwrap();
    assert_eq!((last.completed, last.failed), (9, 3));
    assert_eq!((summary.completed, summary.failed), (9, 3));
    assert_eq!(last.progress, 75);
}

// ---------------------------------------------------------------------------
// Re-check under the lock
// ---------------------------------------------------------------------------

/// Read `domain` while it is still PENDING, then settle the stored row as
/// another delivery would have.
fn stale_snapshot(
    store: &MemoryStore,
    job: JobId,
    domain: &str,
    status: ResultStatus,
) -> DomainResult {
    let snapshot = store.find_result(job, domain).unwrap();
    settle_row(store, job, domain, status);
    snapshot
}

fn executor(store: &Arc<MemoryStore>, resolver: Arc<dyn Resolver>) -> TaskExecutor {
    TaskExecutor::new(store.clone(), resolver, Duration::from_millis(2000))
}

#[tokio::test(start_paused = true)]
async fn row_settled_as_success_is_not_resolved_again() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(10));
    let job = create(&store, &["a.com"]).await;
    let snapshot = stale_snapshot(&store, job.id, "a.com", ResultStatus::Success);
    assert_eq!(snapshot.status, ResultStatus::Pending);

    let outcome = executor(&store, resolver.clone())
        .execute(job.id, &snapshot)
        .await
        .unwrap();

    assert_eq!(outcome, TaskOutcome::AlreadySucceeded);
    assert_eq!(resolver.calls(), 0);
    let stored = store.find_result(job.id, "a.com").unwrap();
    assert_eq!(stored.status, ResultStatus::Success);
    assert_eq!(stored.tries, 1);
    assert_eq!(stored.favicon_url.as_deref(), Some("https://a.com/favicon.ico"));
}

#[tokio::test(start_paused = true)]
async fn row_settled_as_error_is_resolved_again() {
    let store = Arc::new(MemoryStore::new());
    let resolver = ScriptedResolver::with_delay(Duration::from_millis(10));
    let job = create(&store, &["a.com"]).await;
    let snapshot = stale_snapshot(&store, job.id, "a.com", ResultStatus::Error);

    let outcome = executor(&store, resolver.clone())
        .execute(job.id, &snapshot)
        .await
        .unwrap();

    assert_eq!(
        outcome,
        TaskOutcome::Succeeded {
            favicon_url: "https://a.com/favicon.ico".into()
        }
    );
    assert_eq!(resolver.calls(), 1);
    let stored = store.find_result(job.id, "a.com").unwrap();
    assert_eq!(stored.status, ResultStatus::Success);
    assert_eq!(stored.tries, 2);
    assert_eq!(stored.error, None);
}

// ---------------------------------------------------------------------------
// Store faults
// ---------------------------------------------------------------------------

/// Delegates to a memory store but refuses to persist counts.
struct CountsUnavailable(MemoryStore);

#[async_trait]
impl JobStore for CountsUnavailable {
    async fn create_job(&self, new: &NewJob) -> Result<Job> {
        self.0.create_job(new).await
    }
    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.0.get_job(id).await
    }
    async fn list_results(&self, id: JobId) -> Result<Vec<DomainResult>> {
        self.0.list_results(id).await
    }
    async fn page_results(&self, id: JobId, page: PageRequest) -> Result<Page<DomainResult>> {
        self.0.page_results(id, page).await
    }
    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        self.0.set_job_status(id, status).await
    }
    async fn record_counts(&self, _id: JobId, _completed: u32, _failed: u32) -> Result<()> {
        Err(Error::Other("connection reset".into()))
    }
    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        completed: u32,
        failed: u32,
    ) -> Result<Job> {
        self.0.finish_job(id, status, completed, failed).await
    }
    async fn lock_result(&self, key: LockKey, result: ResultId) -> Result<Box<dyn LockedResult>> {
        self.0.lock_result(key, result).await
    }
}

#[tokio::test(start_paused = true)]
async fn store_fault_aborts_invocation_and_leaves_job_processing() {
    let inner = MemoryStore::new();
    let store = Arc::new(CountsUnavailable(inner.clone()));
    let job = store.create_job(&NewJob::new("acme", vec!["a.com".into()]).unwrap()).await.unwrap();

    let engine = JobProcessor::new(
        store,
        ScriptedResolver::with_delay(Duration::from_millis(10)),
        Arc::new(RecordingSink::default()),
        config(10),
    );
    let err = engine.process(job.id).await.unwrap_err();
    assert!(matches!(err, Error::Other(_)));

    let stored = inner.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Processing);
}
