//! Error types for the sync pipeline.

/// Errors that can occur in the sync pipeline.
///
/// The first three variants are the validation class returned to import
/// callers; everything else is an internal stage failure.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// No registered protocol accepts the identifier, or its hash is invalid.
    #[error("invalid object")]
    InvalidObject,

    /// The log has no fully available metadata for the identifier.
    #[error("object not found")]
    ObjectNotFound,

    /// A completed upload for this hash already exists locally.
    #[error("object already exists")]
    AlreadyExists,

    /// No registered protocol with this name.
    #[error("unknown protocol: {0}")]
    UnknownProtocol(String),

    /// The object failed proof verification.
    #[error("verification failed: {0}")]
    Verification(String),

    /// Object storage error.
    #[error("store error: {0}")]
    Store(#[from] drift_store::StoreError),

    /// Log service error.
    #[error("log error: {0}")]
    Log(#[from] drift_log::LogError),

    /// Metadata store error.
    #[error("metadata error: {0}")]
    Meta(#[from] drift_meta::MetaError),

    /// Job queue error.
    #[error("job error: {0}")]
    Job(#[from] drift_jobs::JobError),

    /// Cluster bootstrap or membership error.
    #[error("cluster error: {0}")]
    Cluster(#[from] drift_cluster::ClusterError),

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Whether this is a rejected request rather than a failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidObject | Self::ObjectNotFound | Self::AlreadyExists
        )
    }
}
