//! Job and result persistence on Postgres, with per-result advisory locks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::lock::LockKey;
use crate::model::{
    ClientId, DomainResult, Job, JobId, JobStatus, NewJob, Page, PageRequest, ResultId,
    ResultMutation,
};
use crate::store::{JobStore, LockedResult};

const JOB_COLUMNS: &str = "id, client_id, status, total, completed, failed, created_at, updated_at";
const RESULT_COLUMNS: &str =
    "id, job_id, domain, favicon_url, status, error, tries, created_at, updated_at";

#[async_trait]
impl JobStore for super::Db {
    async fn create_job(&self, new: &NewJob) -> Result<Job> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        // DO UPDATE (not DO NOTHING) so RETURNING yields the existing row.
        let client: (Uuid,) = sqlx::query_as(
            "INSERT INTO clients (id, client_key, created_at) VALUES ($1, $2, $3)
             ON CONFLICT (client_key) DO UPDATE SET client_key = EXCLUDED.client_key
             RETURNING id",
        )
        .bind(Uuid::new_v4())
        .bind(new.client_key())
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let job_id = JobId::new();
        let row: JobRow = sqlx::query_as(&format!(
            "INSERT INTO jobs (id, client_id, status, total, completed, failed, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 0, 0, $5, $5)
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(job_id.0)
        .bind(client.0)
        .bind(JobStatus::Processing.to_string())
        .bind(new.total() as i32)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = new.domains().iter().map(|_| Uuid::new_v4()).collect();
        sqlx::query(
            "INSERT INTO results (id, job_id, domain, status, tries, created_at, updated_at)
             SELECT u.id, $2, u.domain, 'PENDING', 0, $3, $3
             FROM UNNEST($1::uuid[], $4::text[]) WITH ORDINALITY AS u(id, domain, ord)
             ORDER BY u.ord",
        )
        .bind(&ids)
        .bind(job_id.0)
        .bind(now)
        .bind(new.domains())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        row.try_into_job()
    }

    async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
                .bind(id.0)
                .fetch_optional(&self.pool)
                .await?;
        row.map(JobRow::try_into_job).transpose()
    }

    async fn list_results(&self, id: JobId) -> Result<Vec<DomainResult>> {
        let rows: Vec<ResultRow> = sqlx::query_as(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE job_id = $1 ORDER BY created_at ASC, seq ASC"
        ))
        .bind(id.0)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ResultRow::try_into_result).collect()
    }

    async fn page_results(&self, id: JobId, page: PageRequest) -> Result<Page<DomainResult>> {
        let total: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM results WHERE job_id = $1")
            .bind(id.0)
            .fetch_one(&self.pool)
            .await?;

        let rows: Vec<ResultRow> = sqlx::query_as(&format!(
            "SELECT {RESULT_COLUMNS} FROM results WHERE job_id = $1
             ORDER BY created_at ASC, seq ASC
             LIMIT $2 OFFSET $3"
        ))
        .bind(id.0)
        .bind(i64::from(page.per_page))
        .bind(page.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(Page {
            items: rows
                .into_iter()
                .map(ResultRow::try_into_result)
                .collect::<Result<_>>()?,
            page: page.page,
            per_page: page.per_page,
            total: total.0 as u64,
        })
    }

    async fn set_job_status(&self, id: JobId, status: JobStatus) -> Result<()> {
        let rows_affected =
            sqlx::query("UPDATE jobs SET status = $2, updated_at = now() WHERE id = $1")
                .bind(id.0)
                .bind(status.to_string())
                .execute(&self.pool)
                .await?
                .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("job {id}")));
        }
        Ok(())
    }

    async fn record_counts(&self, id: JobId, completed: u32, failed: u32) -> Result<()> {
        // Row comparison: only move forward in (settled, completed) order.
        sqlx::query(
            "UPDATE jobs SET completed = $2, failed = $3, updated_at = now()
             WHERE id = $1 AND (completed + failed, completed) <= ($2 + $3, $2)",
        )
        .bind(id.0)
        .bind(completed as i32)
        .bind(failed as i32)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finish_job(
        &self,
        id: JobId,
        status: JobStatus,
        completed: u32,
        failed: u32,
    ) -> Result<Job> {
        let row: Option<JobRow> = sqlx::query_as(&format!(
            "UPDATE jobs SET status = $2, completed = $3, failed = $4, updated_at = now()
             WHERE id = $1
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(id.0)
        .bind(status.to_string())
        .bind(completed as i32)
        .bind(failed as i32)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("job {id}")))?
            .try_into_job()
    }

    async fn lock_result(&self, key: LockKey, result: ResultId) -> Result<Box<dyn LockedResult>> {
        let mut tx = self.pool.begin().await?;

        // Held until this transaction commits or rolls back.
        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(key.value())
            .execute(&mut *tx)
            .await?;

        let row: Option<ResultRow> =
            sqlx::query_as(&format!("SELECT {RESULT_COLUMNS} FROM results WHERE id = $1"))
                .bind(result.0)
                .fetch_optional(&mut *tx)
                .await?;
        let current = row
            .ok_or_else(|| Error::NotFound(format!("result {}", result.0)))?
            .try_into_result()?;

        Ok(Box::new(PgLockedResult { tx, key, current }))
    }
}

/// A result row read inside a transaction holding its advisory lock.
struct PgLockedResult {
    tx: Transaction<'static, Postgres>,
    key: LockKey,
    current: DomainResult,
}

#[async_trait]
impl LockedResult for PgLockedResult {
    fn key(&self) -> LockKey {
        self.key
    }

    fn current(&self) -> &DomainResult {
        &self.current
    }

    async fn commit(self: Box<Self>, mutation: &ResultMutation) -> Result<DomainResult> {
        let PgLockedResult {
            mut tx,
            mut current,
            ..
        } = *self;
        current.apply(mutation, Utc::now())?;

        sqlx::query(
            "UPDATE results SET status = $2, favicon_url = $3, error = $4, tries = $5, updated_at = $6
             WHERE id = $1",
        )
        .bind(current.id.0)
        .bind(current.status.to_string())
        .bind(&current.favicon_url)
        .bind(&current.error)
        .bind(current.tries as i32)
        .bind(current.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(current)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    client_id: Uuid,
    status: String,
    total: i32,
    completed: i32,
    failed: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl JobRow {
    fn try_into_job(self) -> Result<Job> {
        Ok(Job {
            id: JobId(self.id),
            client_id: ClientId(self.client_id),
            status: self.status.parse()?,
            total: self.total as u32,
            completed: self.completed as u32,
            failed: self.failed as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ResultRow {
    id: Uuid,
    job_id: Uuid,
    domain: String,
    favicon_url: Option<String>,
    status: String,
    error: Option<String>,
    tries: i32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ResultRow {
    fn try_into_result(self) -> Result<DomainResult> {
        Ok(DomainResult {
            id: ResultId(self.id),
            job_id: JobId(self.job_id),
            domain: self.domain,
            favicon_url: self.favicon_url,
            status: self.status.parse()?,
            error: self.error,
            tries: self.tries as u32,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
