//! File-based object storage backend.
//!
//! Object bytes are stored one file per object with a 2-level fan-out
//! directory structure: `{base_dir}/data/{hex[0..2]}/{hex[2..4]}/{hex}`.
//! Bucket entries and proofs are small postcard/raw sidecar files under
//! `{base_dir}/buckets/{bucket}/{name}` and `{base_dir}/proofs/{protocol}/{hash}`.

use std::io::SeekFrom;
use std::path::{Path, PathBuf};

use drift_types::{ContentHash, ObjectKey, ObjectLayout, UploadRecord, unix_now};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::error::StoreError;
use crate::layout::{DEFAULT_SHARDS_PER_SLAB, DEFAULT_SLAB_SIZE, object_key, place_slabs};
use crate::proof::ProofBuilder;
use crate::traits::{ObjectDownload, ObjectSource, ObjectStore, StorageProtocol, StorageService};

const COPY_BUF: usize = 64 * 1024;

/// File-based object store.
///
/// Writes are atomic: data is written to a temporary file first, then
/// renamed into place, so a crash never leaves a half-written object.
pub struct FileStore {
    base_dir: PathBuf,
    slab_size: u64,
    shards_per_slab: usize,
}

impl FileStore {
    /// Create a new file store rooted at the given directory.
    ///
    /// The directory is created if it does not exist.
    pub fn new(base_dir: impl AsRef<Path>) -> Result<Self, StoreError> {
        let base_dir = base_dir.as_ref().to_path_buf();
        for sub in ["data", "buckets", "proofs", "tmp"] {
            std::fs::create_dir_all(base_dir.join(sub))?;
        }
        Ok(Self {
            base_dir,
            slab_size: DEFAULT_SLAB_SIZE,
            shards_per_slab: DEFAULT_SHARDS_PER_SLAB,
        })
    }

    /// Compute the full file path for an object's bytes.
    fn data_path(&self, key: &ObjectKey) -> PathBuf {
        let hex = key.to_hex();
        self.base_dir
            .join("data")
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(&hex)
    }

    fn bucket_dir(&self, bucket: &str) -> Result<PathBuf, StoreError> {
        Ok(self.base_dir.join("buckets").join(checked_component(bucket)?))
    }

    fn entry_path(&self, bucket: &str, name: &str) -> Result<PathBuf, StoreError> {
        Ok(self.bucket_dir(bucket)?.join(checked_component(name)?))
    }

    fn proof_path(&self, protocol: &str, hash: &ContentHash) -> Result<PathBuf, StoreError> {
        Ok(self
            .base_dir
            .join("proofs")
            .join(checked_component(protocol)?)
            .join(hash.to_hex()))
    }

    async fn read_entry(&self, bucket: &str, name: &str) -> Result<ObjectLayout, StoreError> {
        let dir = self.bucket_dir(bucket)?;
        if !tokio::fs::try_exists(&dir).await? {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        match tokio::fs::read(self.entry_path(bucket, name)?).await {
            Ok(bytes) => Ok(postcard::from_bytes(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn write_entry(
        &self,
        bucket: &str,
        name: &str,
        layout: &ObjectLayout,
    ) -> Result<(), StoreError> {
        let bytes = postcard::to_allocvec(layout)?;
        atomic_write(&self.entry_path(bucket, name)?, &bytes).await
    }
}

#[async_trait::async_trait]
impl ObjectStore for FileStore {
    async fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(self.bucket_dir(bucket)?).await?;
        Ok(())
    }

    async fn import_object(
        &self,
        bucket: &str,
        name: &str,
        layout: &ObjectLayout,
    ) -> Result<(), StoreError> {
        if !tokio::fs::try_exists(self.bucket_dir(bucket)?).await? {
            return Err(StoreError::BucketNotFound(bucket.to_string()));
        }
        self.write_entry(bucket, name, layout).await?;
        debug!(bucket, name, key = %layout.key, "imported object pointers");
        Ok(())
    }

    async fn object_layout(&self, bucket: &str, name: &str) -> Result<ObjectLayout, StoreError> {
        self.read_entry(bucket, name).await
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectDownload, StoreError> {
        let layout = self.read_entry(bucket, name).await?;
        if let Some(slab) = layout.slabs.iter().position(|s| s.shards.is_empty()) {
            return Err(StoreError::Unavailable {
                key: layout.key,
                slab,
            });
        }
        let file = match tokio::fs::File::open(self.data_path(&layout.key)).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::DataMissing(layout.key));
            }
            Err(e) => return Err(StoreError::Io(e)),
        };
        let size = file.metadata().await?.len();
        Ok(ObjectDownload {
            reader: Box::pin(file),
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.entry_path(bucket, name)?).await {
            Ok(()) => {
                debug!(bucket, name, "deleted object");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

#[async_trait::async_trait]
impl StorageService for FileStore {
    async fn upload_object(
        &self,
        protocol: &dyn StorageProtocol,
        mut source: Box<dyn ObjectSource>,
        size: u64,
    ) -> Result<UploadRecord, StoreError> {
        let reported = source.seek(SeekFrom::End(0)).await?;
        if reported != size {
            return Err(StoreError::SizeMismatch {
                expected: size,
                actual: reported,
            });
        }
        source.seek(SeekFrom::Start(0)).await?;

        // Stream into a temp file while building the proof; the final path
        // depends on the hash, which is only known at the end.
        let tmp_path = TempPath::new(
            self.base_dir
                .join("tmp")
                .join(format!("upload-{:016x}", rand::random::<u64>())),
        );
        let mut tmp = tokio::fs::File::create(tmp_path.path()).await?;
        let mut proof = ProofBuilder::new();
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = source.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            proof.update(&buf[..n])?;
            tmp.write_all(&buf[..n]).await?;
        }
        tmp.flush().await?;
        drop(tmp);

        if proof.len() != size {
            return Err(StoreError::SizeMismatch {
                expected: size,
                actual: proof.len(),
            });
        }
        let (hash, outboard) = proof.finish()?;

        let key = object_key(protocol.name(), &hash);
        let data_path = self.data_path(&key);
        if let Some(parent) = data_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tmp_path.persist(&data_path).await?;

        let layout = ObjectLayout {
            key,
            size,
            slabs: place_slabs(&key, size, self.slab_size, self.shards_per_slab),
        };
        self.create_bucket_if_not_exists(protocol.name()).await?;
        self.write_entry(protocol.name(), &protocol.encode_file_name(&hash), &layout)
            .await?;
        atomic_write(&self.proof_path(protocol.name(), &hash)?, &outboard).await?;

        debug!(%hash, protocol = protocol.name(), path = %data_path.display(), size, "uploaded object to file");
        Ok(UploadRecord {
            hash,
            protocol: protocol.name().to_string(),
            size,
            user_id: 0,
            created_at: unix_now(),
            confirmed: false,
        })
    }

    async fn download_proof(
        &self,
        protocol: &dyn StorageProtocol,
        hash: &ContentHash,
    ) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.proof_path(protocol.name(), hash)?).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StoreError::ProofNotFound {
                protocol: protocol.name().to_string(),
                hash: *hash,
            }),
            Err(e) => Err(StoreError::Io(e)),
        }
    }
}

/// Temporary file removed on drop unless persisted.
struct TempPath {
    path: PathBuf,
    persisted: bool,
}

impl TempPath {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    /// Rename the file to `dest` and stop tracking it.
    async fn persist(mut self, dest: &Path) -> Result<(), StoreError> {
        tokio::fs::rename(&self.path, dest).await?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for TempPath {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove temp file");
        }
    }
}

/// Write to a uniquely named temp file in the same directory, then rename
/// into place.
async fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(format!(".{:016x}.tmp", rand::random::<u64>()));
    let tmp_path = TempPath::new(path.with_file_name(tmp_name));
    tokio::fs::write(tmp_path.path(), data).await?;
    tmp_path.persist(path).await
}

/// Reject names that would escape their directory.
fn checked_component(name: &str) -> Result<&str, StoreError> {
    if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
        return Err(StoreError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("invalid path component: {name:?}"),
        )));
    }
    Ok(name)
}
