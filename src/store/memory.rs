//! In-memory store and queue.
//!
//! Same semantics as the Postgres implementation, minus durability. Used by
//! tests and by `favq demo`.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use super::{JobStore, LockedResult};
use crate::error::{Error, Result};
use crate::lock::{KeyedGuard, KeyedLocks, LockKey};
use crate::model::{
    Client, ClientId, DomainResult, Job, JobId, JobStatus, NewJob, Page, PageRequest, ResultId,
    ResultMutation, ResultStatus,
};
use crate::queue::JobQueue;

#[derive(Debug, Default)]
struct Tables {
    clients: HashMap<String, Client>,
    jobs: HashMap<JobId, Job>,
    results: HashMap<ResultId, DomainResult>,
    /// Result ids per job, in creation order.
    job_results: HashMap<JobId, Vec<ResultId>>,
}

/// Store backed by process memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    locks: KeyedLocks,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace a stored result row wholesale, bypassing locks and
    /// transition checks. For seeding fixtures.
    pub fn put_result(&self, result: DomainResult) {
        self.tables().results.insert(result.id, result);
    }

    /// Insert or replace a job row without touching its results. For
    /// seeding fixtures.
    pub fn put_job(&self, job: Job) {
        let mut tables = self.tables();
        tables.job_results.entry(job.id).or_default();
        tables.jobs.insert(job.id, job);
    }

    /// Look up a result by job and domain.
    pub fn find_result(&self, job: JobId, domain: &str) -> Option<DomainResult> {
        let tables = self.tables();
        tables
            .job_results
            .get(&job)?
            .iter()
            .filter_map(|id| tables.results.get(id))
            .find(|r| r.domain == domain)
            .cloned()
    }

    pub fn client(&self, client_key: &str) -> Option<Client> {
        self.tables().clients.get(client_key).cloned()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn create_job(&self, new: &NewJob) -> Result<Job> {
        let now = Utc::now();
        let mut tables = self.tables();

        let client_id = tables
            .clients
            .entry(new.client_key().to_string())
            .or_insert_with(|| Client {
                id: ClientId(Uuid::new_v4()),
                client_key: new.client_key().to_string(),
                created_at: now,
            })
            .id;

        let job = Job {
            id: JobId::new(),
            client_id,
            status: JobStatus::Processing,
            total: new.total(),
            completed: 0,
            failed: 0,
            created_at: now,
            updated_at: now,
        };

        let mut ids = Vec::with_capacity(new.domains().len());
        for domain in new.domains() {
            let result = DomainResult {
                id: ResultId(Uuid::new_v4()),
                job_id: job.id,
                domain: domain.clone(),
                favicon_url: None,
                status: ResultStatus::Pending,
                error: None,
                tries: 0,
                created_at: now,
                updated_at: now,
            };
            ids.push(result.id);
            tables.results.insert(result.id, result);
        }
        tables.job_results.insert(job.id, ids);
        tables.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        Ok(self.tables().jobs.get(&id).cloned())
    }

    async fn list_results(&self, id: JobId) -> Result<Vec<DomainResult>> {
        let tables = self.tables();
        let Some(ids) = tables.job_results.get(&id) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|rid| tables.results.get(rid).cloned())
            .collect())
    }

    async fn page_results(&self, id: JobId, page: PageRequest) -> Result<Page<DomainResult>> {
        let all = self.list_results(id).await?;
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(page.offset() as usize)
            .take(page.per_page as usize)
            .collect();
        Ok(Page {
            items,
            page: page.page,
            per_page: page.per_page,
            total,
        })
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let mut tables = self.tables();
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        job.status = status;
        job.updated_at = Utc::now();
        Ok(())
    }

    async fn record_counts(&self, id: JobId, completed: u32, failed: u32) -> Result<()> {
        let mut tables = self.tables();
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        if (completed + failed, completed) >= (job.completed + job.failed, job.completed) {
            job.completed = completed;
            job.failed = failed;
            job.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        completed: u32,
        failed: u32,
    ) -> Result<Job> {
        let mut tables = self.tables();
        let job = tables
            .jobs
            .get_mut(&id)
            .ok_or_else(|| Error::NotFound(format!("job {id}")))?;
        job.status = status;
        job.completed = completed;
        job.failed = failed;
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn lock_result(&self, key: LockKey, result: ResultId) -> Result<Box<dyn LockedResult>> {
        let guard = self.locks.acquire(key).await;
        let current = self
            .tables()
            .results
            .get(&result)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("result {}", result.0)))?;
        Ok(Box::new(MemoryLockedResult {
            tables: Arc::clone(&self.tables),
            current,
            guard,
        }))
    }
}

struct MemoryLockedResult {
    tables: Arc<Mutex<Tables>>,
    current: DomainResult,
    guard: KeyedGuard,
}

#[async_trait]
impl LockedResult for MemoryLockedResult {
    fn key(&self) -> LockKey {
        self.guard.key()
    }

    fn current(&self) -> &DomainResult {
        &self.current
    }

    async fn commit(self: Box<Self>, mutation: &ResultMutation) -> Result<DomainResult> {
        let Self {
            tables,
            mut current,
            guard,
        } = *self;
        current.apply(mutation, Utc::now())?;
        tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .results
            .insert(current.id, current.clone());
        drop(guard);
        Ok(current)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// Queue that records enqueued job ids in order.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    messages: Arc<Mutex<VecDeque<JobId>>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pop(&self) -> Option<JobId> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    pub fn len(&self) -> usize {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn enqueue(&self, job: JobId) -> Result<()> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(job);
        Ok(())
    }
}
