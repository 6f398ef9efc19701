//! Persistence seam for jobs and results.
//!
//! The store is the single source of truth for job and result state. Any
//! read-then-write on a result row happens inside a [`LockedResult`]: a unit
//! of work that holds the row's lock key from acquisition until it commits
//! or is dropped. Dropping without committing rolls back and releases, so
//! a cancelled task never leaves a key held.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::lock::LockKey;
use crate::model::{
    DomainResult, Job, JobId, JobStatus, NewJob, Page, PageRequest, ResultId, ResultMutation,
};

pub use memory::{MemoryQueue, MemoryStore};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Create the client if new, the job, and one pending result per domain.
    async fn create_job(&self, new: &NewJob) -> Result<Job>;

    async fn get_job(&self, id: JobId) -> Result<Option<Job>>;

    /// All results of a job in creation order.
    async fn list_results(&self, id: JobId) -> Result<Vec<DomainResult>>;

    /// One page of a job's results in creation order.
    async fn page_results(&self, id: JobId, page: PageRequest) -> Result<Page<DomainResult>>;

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()>;

    /// Persist running counts. A write that settles fewer results than the
    /// stored counts (or as many, with fewer successes) is ignored, so
    /// writes arriving out of order never move the job backwards.
    async fn record_counts(&self, id: JobId, completed: u32, failed: u32) -> Result<()>;

    /// Write the terminal status together with the final counts.
    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        completed: u32,
        failed: u32,
    ) -> Result<Job>;

    /// Block until `key` is held, then re-read the result row under it.
    async fn lock_result(&self, key: LockKey, result: ResultId) -> Result<Box<dyn LockedResult>>;
}

/// A result row read under its lock. The lock is held until
/// [`commit`](LockedResult::commit), [`release`](LockedResult::release),
/// or drop.
#[async_trait]
pub trait LockedResult: Send {
    fn key(&self) -> LockKey;

    /// The row as it stood once the lock was held.
    fn current(&self) -> &DomainResult;

    /// Apply the mutation, persist it, and release the lock.
    async fn commit(self: Box<Self>, mutation: &ResultMutation) -> Result<DomainResult>;

    /// Release the lock without writing.
    async fn release(self: Box<Self>) -> Result<()>;
}
