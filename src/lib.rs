//! # favq
//!
//! Batch favicon resolution over a Postgres-backed job queue.
//!
//! A client submits a list of domains as a job; workers consume job
//! messages from pgmq and resolve every domain under a bounded concurrency
//! ceiling, a per-domain deadline, and a per-domain advisory lock. Progress
//! is persisted after every settled domain so a redelivered job resumes
//! where it stopped.

pub mod api;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod lock;
pub mod model;
pub mod queue;
pub mod resolver;
pub mod store;
pub mod telemetry;
