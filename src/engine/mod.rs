//! Job processing: per-domain tasks, the bounded scheduler, progress
//! aggregation, the per-job engine, and the queue-consuming worker.

pub mod executor;
pub mod processor;
pub mod progress;
pub mod scheduler;
pub mod worker;

pub use executor::{TaskExecutor, TaskOutcome};
pub use processor::{JobProcessor, JobSummary, ProcessOutcome};
pub use progress::{ProgressSink, ProgressSnapshot, ProgressTracker, TracingProgress};
pub use scheduler::{Partition, Scheduler};
pub use worker::{Disposition, Worker, WorkerConfig};
