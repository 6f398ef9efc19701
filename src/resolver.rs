//! Pluggable per-domain favicon resolution.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;

/// Why a resolution attempt produced no URL.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Timeout exceeded")]
    Timeout,

    #[error("{0}")]
    Failed(String),
}

impl ResolveError {
    /// Message stored on the result row.
    pub fn message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            "Unknown error".to_string()
        } else {
            message
        }
    }
}

/// Produces a favicon URL for a domain.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, domain: &str) -> Result<String, ResolveError>;
}

/// Stand-in resolver: waits a random delay, then answers
/// `https://{domain}/favicon.ico`.
#[derive(Debug, Clone)]
pub struct SimulatedResolver {
    min_delay: Duration,
    max_delay: Duration,
}

impl Default for SimulatedResolver {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(2000),
        }
    }
}

impl SimulatedResolver {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay: max_delay.max(min_delay),
        }
    }

    fn delay(&self) -> Duration {
        if self.max_delay == self.min_delay {
            return self.min_delay;
        }
        rand::rng().random_range(self.min_delay..self.max_delay)
    }
}

#[async_trait]
impl Resolver for SimulatedResolver {
    async fn resolve(&self, domain: &str) -> Result<String, ResolveError> {
        tokio::time::sleep(self.delay()).await;
        Ok(format!("https://{domain}/favicon.ico"))
    }
}
