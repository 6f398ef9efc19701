//! Clients, jobs, and job submission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::engine::progress::progress_percent;
use crate::error::{Error, Result};

/// Newtype for client IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub Uuid);

/// Newtype for job IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for JobId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(JobId)
            .map_err(|_| Error::Validation(format!("invalid job id: {s}")))
    }
}

/// The submitter of jobs, identified by an externally supplied key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Client {
    pub id: ClientId,
    pub client_key: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Entered at the start of every invocation, including resumes.
    Processing,
    /// Every result settled and none failed.
    Completed,
    /// Every result settled and at least one failed.
    Failed,
}

impl JobStatus {
    /// Terminal status for a job whose results have all settled.
    pub fn settled(failed: u32) -> Self {
        if failed > 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Processing => "PROCESSING",
            JobStatus::Completed => "COMPLETED",
            JobStatus::Failed => "FAILED",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PROCESSING" => Ok(JobStatus::Processing),
            "COMPLETED" => Ok(JobStatus::Completed),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(Error::Other(format!("unknown job status: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One batch submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub client_id: ClientId,
    pub status: JobStatus,
    /// Number of unique domains at creation. Never recomputed.
    pub total: u32,
    pub completed: u32,
    pub failed: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Share of results that succeeded, as a whole percentage.
    pub fn progress(&self) -> u8 {
        progress_percent(self.completed, self.total)
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// A validated job submission. Domains are unique, in first-seen order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    client_key: String,
    domains: Vec<String>,
}

impl NewJob {
    /// Validate a submission and drop duplicate domains.
    pub fn new(client_key: impl Into<String>, domains: Vec<String>) -> Result<Self> {
        let client_key = client_key.into();
        if client_key.trim().is_empty() {
            return Err(Error::Validation("client_id must not be empty".to_string()));
        }
        if domains.is_empty() {
            return Err(Error::Validation("domains must not be empty".to_string()));
        }
        if let Some(pos) = domains.iter().position(|d| d.trim().is_empty()) {
            return Err(Error::Validation(format!(
                "domains[{pos}] must be a non-empty string"
            )));
        }

        let mut seen = HashSet::with_capacity(domains.len());
        let domains = domains
            .into_iter()
            .filter(|d| seen.insert(d.clone()))
            .collect();

        Ok(Self {
            client_key,
            domains,
        })
    }

    pub fn client_key(&self) -> &str {
        &self.client_key
    }

    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    pub fn total(&self) -> u32 {
        self.domains.len() as u32
    }
}
