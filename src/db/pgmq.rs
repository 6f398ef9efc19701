//! pgmq queue operations via direct SQLx.
//!
//! Calls pgmq's SQL functions: pgmq.create, pgmq.send, pgmq.read,
//! pgmq.set_vt, pgmq.archive, pgmq.delete.

use async_trait::async_trait;
use opentelemetry::KeyValue;

use crate::error::Result;
use crate::model::JobId;
use crate::queue::{JOB_QUEUE, JOB_READY_CHANNEL, JobMessage, JobQueue};
use crate::telemetry::metrics;

/// A message read from a pgmq queue.
#[derive(Debug, Clone)]
pub struct PgmqMessage {
    pub msg_id: i64,
    /// Number of times this message has been read, including this read.
    pub read_ct: i32,
    pub enqueued_at: chrono::DateTime<chrono::Utc>,
    pub vt: chrono::DateTime<chrono::Utc>,
    pub message: serde_json::Value,
}

fn count(queue_name: &str, operation: &'static str) {
    metrics::queue_operations().add(
        1,
        &[
            KeyValue::new("queue", queue_name.to_string()),
            KeyValue::new("operation", operation),
        ],
    );
}

impl super::Db {
    /// Create a pgmq queue (idempotent).
    pub async fn create_queue(&self, queue_name: &str) -> Result<()> {
        sqlx::query("SELECT pgmq.create($1)")
            .bind(queue_name)
            .execute(&self.pool)
            .await?;
        count(queue_name, "create");
        Ok(())
    }

    /// Send a message to a pgmq queue. Returns the message ID.
    /// delay_seconds: 0 for immediate, >0 for delayed delivery.
    pub async fn send_to_queue(
        &self,
        queue_name: &str,
        payload: &serde_json::Value,
        delay_seconds: i32,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as("SELECT pgmq.send($1, $2, $3)")
            .bind(queue_name)
            .bind(payload)
            .bind(delay_seconds)
            .fetch_one(&self.pool)
            .await?;
        count(queue_name, "send");
        Ok(row.0)
    }

    /// Read the next message from a queue (visibility timeout in seconds).
    /// Returns None if queue is empty.
    pub async fn read_from_queue(
        &self,
        queue_name: &str,
        vt_seconds: i32,
    ) -> Result<Option<PgmqMessage>> {
        let row = sqlx::query_as::<
            _,
            (
                i64,
                i32,
                chrono::DateTime<chrono::Utc>,
                chrono::DateTime<chrono::Utc>,
                serde_json::Value,
            ),
        >(
            "SELECT msg_id, read_ct, enqueued_at, vt, message FROM pgmq.read($1, $2, 1)"
        )
        .bind(queue_name)
        .bind(vt_seconds)
        .fetch_optional(&self.pool)
        .await?;

        let msg = row.map(|(msg_id, read_ct, enqueued_at, vt, message)| PgmqMessage {
            msg_id,
            read_ct,
            enqueued_at,
            vt,
            message,
        });
        count(
            queue_name,
            if msg.is_some() { "read" } else { "read_empty" },
        );
        Ok(msg)
    }

    /// Hide a message for `delay_seconds` from now. Used to schedule a
    /// redelivery after a failed attempt.
    pub async fn set_visibility(
        &self,
        queue_name: &str,
        msg_id: i64,
        delay_seconds: i32,
    ) -> Result<()> {
        self.set_vt(queue_name, msg_id, delay_seconds).await?;
        count(queue_name, "retry");
        Ok(())
    }

    /// Push a claimed message's visibility `seconds` past now while its
    /// invocation is still running.
    pub async fn extend_lease(&self, queue_name: &str, msg_id: i64, seconds: i32) -> Result<()> {
        self.set_vt(queue_name, msg_id, seconds).await?;
        count(queue_name, "extend");
        Ok(())
    }

    async fn set_vt(&self, queue_name: &str, msg_id: i64, seconds: i32) -> Result<()> {
        sqlx::query("SELECT msg_id FROM pgmq.set_vt($1, $2, $3)")
            .bind(queue_name)
            .bind(msg_id)
            .bind(seconds)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Archive a message (moves to archive table, preserves for audit).
    pub async fn archive_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.archive($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        count(queue_name, "archive");
        Ok(())
    }

    /// Delete a message permanently.
    pub async fn delete_message(&self, queue_name: &str, msg_id: i64) -> Result<()> {
        sqlx::query("SELECT pgmq.delete($1, $2)")
            .bind(queue_name)
            .bind(msg_id)
            .execute(&self.pool)
            .await?;
        count(queue_name, "delete");
        Ok(())
    }
}

#[async_trait]
impl JobQueue for super::Db {
    async fn enqueue(&self, job: JobId) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pgmq.send($1, $2, 0)")
            .bind(JOB_QUEUE)
            .bind(JobMessage::new(job).to_json())
            .execute(&mut *tx)
            .await?;

        // NOTIFY is transactional, so it only fires once the message is visible.
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(JOB_READY_CHANNEL)
            .bind(job.to_string())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        count(JOB_QUEUE, "send");
        Ok(())
    }
}
