//! Per-domain results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::job::JobId;
use crate::error::{Error, Result};

/// Newtype for result IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResultId(pub Uuid);

/// Resolution status of one domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultStatus {
    Pending,
    Success,
    Error,
}

impl ResultStatus {
    /// Can a result move from self to `to`?
    ///
    /// A success is final. An error may be overwritten only when an
    /// in-flight attempt that started before the error was written settles.
    pub fn can_transition_to(self, to: ResultStatus) -> bool {
        use ResultStatus::*;
        matches!(
            (self, to),
            (Pending, Success) | (Pending, Error) | (Error, Success) | (Error, Error)
        )
    }
}

impl std::fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ResultStatus::Pending => "PENDING",
            ResultStatus::Success => "SUCCESS",
            ResultStatus::Error => "ERROR",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ResultStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "PENDING" => Ok(ResultStatus::Pending),
            "SUCCESS" => Ok(ResultStatus::Success),
            "ERROR" => Ok(ResultStatus::Error),
            other => Err(Error::Other(format!("unknown result status: {other}"))),
        }
    }
}

/// One domain's resolution outcome within a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainResult {
    pub id: ResultId,
    pub job_id: JobId,
    pub domain: String,
    pub favicon_url: Option<String>,
    pub status: ResultStatus,
    pub error: Option<String>,
    /// Attempts so far, whatever their outcome.
    pub tries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// The write a finished attempt makes to its result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultMutation {
    Succeeded { favicon_url: String },
    Failed { error: String },
}

impl ResultMutation {
    pub fn status(&self) -> ResultStatus {
        match self {
            ResultMutation::Succeeded { .. } => ResultStatus::Success,
            ResultMutation::Failed { .. } => ResultStatus::Error,
        }
    }
}

impl DomainResult {
    /// Apply an attempt's outcome: set status and payload, count the try.
    pub fn apply(&mut self, mutation: &ResultMutation, now: DateTime<Utc>) -> Result<()> {
        let to = mutation.status();
        if !self.status.can_transition_to(to) {
            return Err(Error::InvalidTransition {
                from: self.status.to_string(),
                to: to.to_string(),
            });
        }
        match mutation {
            ResultMutation::Succeeded { favicon_url } => {
                self.favicon_url = Some(favicon_url.clone());
                self.error = None;
            }
            ResultMutation::Failed { error } => {
                self.error = Some(error.clone());
            }
        }
        self.status = to;
        self.tries += 1;
        self.updated_at = now;
        Ok(())
    }
}
