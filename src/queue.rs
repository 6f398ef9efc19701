//! The outer delivery queue: job messages and the enqueue seam.
//!
//! Delivery is at-least-once. A message may be redelivered while an earlier
//! delivery of the same job is still running, so consumers rely on the
//! per-result locks rather than on the queue for exclusivity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::JobId;

/// Name of the pgmq queue carrying job messages.
pub const JOB_QUEUE: &str = "favicon_jobs";

/// NOTIFY channel pinged when a job message is sent.
pub const JOB_READY_CHANNEL: &str = "job_ready";

/// Payload of a job message: `{"jobId": "<uuid>"}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobMessage {
    #[serde(rename = "jobId")]
    pub job_id: JobId,
}

impl JobMessage {
    pub fn new(job_id: JobId) -> Self {
        Self { job_id }
    }

    pub fn to_json(self) -> serde_json::Value {
        serde_json::json!({ "jobId": self.job_id })
    }

    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::Validation(format!("bad job message {value}: {e}")))
    }
}

/// Hands a job to the processing side.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: JobId) -> Result<()>;
}
