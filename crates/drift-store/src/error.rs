//! Error types for object storage operations.

use drift_types::{ContentHash, ObjectKey};

/// Errors that can occur during object storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The bucket does not exist.
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    /// No object with this name exists in the bucket.
    #[error("object not found: {bucket}/{name}")]
    ObjectNotFound {
        /// Bucket that was searched.
        bucket: String,
        /// Object name within the bucket.
        name: String,
    },

    /// Object bytes are missing from the storage network.
    #[error("object data missing: {0}")]
    DataMissing(ObjectKey),

    /// At least one slab of the object has no shard left.
    #[error("object unavailable: slab {slab} of {key} has no shards")]
    Unavailable {
        /// Key of the affected object.
        key: ObjectKey,
        /// Index of the first empty slab.
        slab: usize,
    },

    /// No proof is stored for this object.
    #[error("proof not found for {protocol}:{hash}")]
    ProofNotFound {
        /// Storage protocol of the object.
        protocol: String,
        /// Content hash of the object.
        hash: ContentHash,
    },

    /// The uploaded stream length differs from the declared size.
    #[error("size mismatch: declared {expected} bytes, stream has {actual}")]
    SizeMismatch {
        /// Declared size.
        expected: u64,
        /// Size reported or read from the stream.
        actual: u64,
    },

    /// An I/O error occurred.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serde(#[from] postcard::Error),
}
