//! Error types for the job queue.

/// Errors produced by the job queue and by tasks.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// No task is registered under this name.
    #[error("unknown task: {0}")]
    UnknownTask(String),

    /// Job arguments could not be decoded. Never retried.
    #[error("invalid job arguments: {0}")]
    InvalidArgs(String),

    /// The task ran and failed.
    #[error("task failed: {0}")]
    Failed(String),

    /// Serialization failure while submitting a job.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),

    /// An error from the metadata store.
    #[error("meta store error: {0}")]
    Meta(#[from] drift_meta::MetaError),
}

impl JobError {
    /// Wrap any displayable error as a task failure.
    pub fn failed(e: impl std::fmt::Display) -> Self {
        Self::Failed(e.to_string())
    }

    /// Whether a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_) | Self::Meta(_))
    }
}
