//! Error types for the cluster crate.

use std::time::Duration;

use crate::coordinator::LeaseId;

/// Errors produced by bootstrap, membership and key derivation.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The coordination store failed or is unreachable.
    #[error("coordination store error: {0}")]
    Coordination(String),

    /// The lease does not exist (expired or revoked).
    #[error("lease not found: {0}")]
    LeaseNotFound(LeaseId),

    /// HKDF expansion failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Another node holds the election but never wrote the bootstrap record.
    #[error("bootstrap record did not appear within {0:?}")]
    BootstrapRecordMissing(Duration),

    /// The bootstrap record does not hold a valid node ID.
    #[error("invalid bootstrap record: {0}")]
    InvalidBootstrapRecord(String),

    /// An error from the log service.
    #[error("log error: {0}")]
    Log(#[from] drift_log::LogError),
}
