//! Core traits and types for object storage.

use std::pin::Pin;

use drift_types::{ContentHash, ObjectLayout, UploadRecord};
use tokio::io::{AsyncRead, AsyncSeek};

use crate::error::StoreError;

/// Boxed, non-seekable download stream.
pub type ObjectReader = Pin<Box<dyn AsyncRead + Send>>;

/// A readable source an uploader may rewind to retry from byte zero.
pub trait ObjectSource: AsyncRead + AsyncSeek + Send + Unpin {}

impl<T: AsyncRead + AsyncSeek + Send + Unpin> ObjectSource for T {}

/// An open download of a stored object.
pub struct ObjectDownload {
    /// Object bytes.
    pub reader: ObjectReader,
    /// Total size in bytes.
    pub size: u64,
}

impl std::fmt::Debug for ObjectDownload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectDownload")
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// A destination storage protocol.
pub trait StorageProtocol: Send + Sync {
    /// Protocol name; also the bucket objects of this protocol are stored in.
    fn name(&self) -> &str;

    /// Object name under which content with `hash` is stored.
    fn encode_file_name(&self, hash: &ContentHash) -> String;
}

/// Bucket/object view of the storage network.
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait::async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create a bucket unless it already exists.
    async fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<(), StoreError>;

    /// Record an object's storage pointers under `bucket/name` without
    /// transferring any bytes.
    async fn import_object(
        &self,
        bucket: &str,
        name: &str,
        layout: &ObjectLayout,
    ) -> Result<(), StoreError>;

    /// Current slab/shard layout of `bucket/name`.
    async fn object_layout(&self, bucket: &str, name: &str) -> Result<ObjectLayout, StoreError>;

    /// Open a download of `bucket/name`.
    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectDownload, StoreError>;

    /// Remove `bucket/name`. Removing a missing object is not an error.
    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StoreError>;
}

/// Durable upload and proof service.
#[async_trait::async_trait]
pub trait StorageService: Send + Sync {
    /// Upload `size` bytes from `source` under `protocol`.
    ///
    /// The source may be rewound to its start if the transfer is
    /// interrupted. The returned record has no owner (`user_id == 0`) and is
    /// not yet persisted locally.
    async fn upload_object(
        &self,
        protocol: &dyn StorageProtocol,
        source: Box<dyn ObjectSource>,
        size: u64,
    ) -> Result<UploadRecord, StoreError>;

    /// Bao outboard proof of a stored object.
    async fn download_proof(
        &self,
        protocol: &dyn StorageProtocol,
        hash: &ContentHash,
    ) -> Result<Vec<u8>, StoreError>;
}
