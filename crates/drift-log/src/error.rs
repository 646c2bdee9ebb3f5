//! Error types for log operations.

/// Errors returned by [`SyncLog`](crate::SyncLog) implementations.
#[derive(Debug, thiserror::Error)]
pub enum LogError {
    /// An operation other than `initialize` ran before initialization.
    #[error("log not initialized")]
    NotInitialized,

    /// `initialize` was called twice with a different root key.
    #[error("log already initialized with a different root key")]
    RootKeyConflict,

    /// The log service rejected or failed the call.
    #[error("log service error: {0}")]
    Service(String),
}
