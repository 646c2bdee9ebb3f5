//! Job queue for the sync pipeline.
//!
//! Pipeline stages run as named [`Task`]s driven by this queue:
//!
//! - [`JobQueue::create_job_if_not_exists`] submits a job under a caller
//!   supplied dedup key. While a job with the same `(task, key)` is pending
//!   or running, further submissions are dropped, so at most one job per key
//!   is ever in flight.
//! - Jobs are persisted in the [`MetaStore`](drift_meta::MetaStore) until
//!   they reach a terminal outcome and are redelivered when the runner
//!   restarts (at-least-once delivery).
//! - Failed runs are retried up to a configured number of attempts; tasks
//!   must therefore be safe to re-run from scratch.
//! - [`JobRunner::schedule_daily`] submits a task every day at a fixed UTC
//!   time.

mod error;
mod queue;
mod runner;
pub mod schedule;


pub use error::JobError;
pub use queue::JobQueue;
pub use runner::{JobConfig, JobRunner, JobRunnerHandle, channel};

/// A named unit of work the runner can execute.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    /// Registered name; jobs refer to the task by this name.
    fn name(&self) -> &str;

    /// Execute one job with its serialized arguments.
    async fn run(&self, args: &[u8]) -> Result<(), JobError>;
}

/// Decode postcard-serialized task arguments.
pub fn decode_args<T: serde::de::DeserializeOwned>(args: &[u8]) -> Result<T, JobError> {
    postcard::from_bytes(args).map_err(|e| JobError::InvalidArgs(e.to_string()))
}
