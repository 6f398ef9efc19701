//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if required vars are missing or a
//! numeric value does not parse. The database URL is wrapped in
//! secrecy::SecretString so it never lands in a log line.

pub mod secrets;

use crate::error::{Error, Result};
use secrets::SecretString;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug)]
pub struct Config {
    pub database_url: SecretString,
    pub database_max_connections: u32,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub bind_addr: String,
    pub engine: EngineConfig,
    pub delivery: DeliveryPolicy,
    pub queue_visibility_timeout: i32,
    pub max_concurrent_jobs: usize,
}

/// Knobs for a single job invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Parallelism ceiling for resolver calls within one job.
    pub max_concurrency: usize,
    /// Deadline for a single domain's resolution.
    pub task_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            task_timeout: Duration::from_millis(2000),
        }
    }
}

/// Redelivery policy of the outer queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryPolicy {
    pub max_attempts: u32,
    /// Base delay; attempt `n` (1-based) waits `backoff * 2^(n-1)`.
    pub backoff: Duration,
}

impl Default for DeliveryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl DeliveryPolicy {
    /// Delay before redelivering a message that failed on attempt `attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff.saturating_mul(1u32 << exp)
    }

    /// Whether another delivery is allowed after `attempt` failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let defaults = EngineConfig::default();
        let delivery = DeliveryPolicy::default();
        Ok(Self {
            database_url: SecretString::from(required_var("DATABASE_URL")?),
            database_max_connections: parsed_var("DATABASE_MAX_CONNECTIONS", 50)?,
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            bind_addr: std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            engine: EngineConfig {
                max_concurrency: parsed_var("MAX_CONCURRENCY", defaults.max_concurrency)?,
                task_timeout: Duration::from_millis(parsed_var(
                    "TASK_TIMEOUT_MS",
                    defaults.task_timeout.as_millis() as u64,
                )?),
            },
            delivery: DeliveryPolicy {
                max_attempts: parsed_var("QUEUE_MAX_ATTEMPTS", delivery.max_attempts)?,
                backoff: Duration::from_millis(parsed_var(
                    "QUEUE_BACKOFF_MS",
                    delivery.backoff.as_millis() as u64,
                )?),
            },
            queue_visibility_timeout: parsed_var("QUEUE_VISIBILITY_TIMEOUT_SECS", 60)?,
            max_concurrent_jobs: parsed_var("MAX_CONCURRENT_JOBS", 4)?,
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("{name}={raw:?} is invalid: {e}"))),
        Err(_) => Ok(default),
    }
}
