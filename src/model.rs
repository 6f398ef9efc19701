//! Core data model.
//!
//! A client submits a job; a job owns one result per unique domain. Results
//! move from pending to a settled status exactly once per attempt, and the
//! job's status is derived from its results once every attempt has settled.

pub mod job;
pub mod result;

pub use job::{Client, ClientId, Job, JobId, JobStatus, NewJob};
pub use result::{DomainResult, ResultId, ResultMutation, ResultStatus};

use serde::{Deserialize, Serialize};

/// Largest page size the results listing will return.
pub const MAX_PER_PAGE: u32 = 100;

/// A 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> crate::error::Result<Self> {
        if page == 0 {
            return Err(crate::error::Error::Validation(
                "page must be at least 1".to_string(),
            ));
        }
        if per_page == 0 || per_page > MAX_PER_PAGE {
            return Err(crate::error::Error::Validation(format!(
                "per_page must be between 1 and {MAX_PER_PAGE}"
            )));
        }
        Ok(Self { page, per_page })
    }

    /// Number of rows to skip.
    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.per_page)
    }
}

/// One page of rows plus the unpaged row count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    pub total: u64,
}
