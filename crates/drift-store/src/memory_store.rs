//! In-memory object storage backend.

use std::collections::HashMap;
use std::io::{Cursor, SeekFrom};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use drift_types::{ContentHash, FileMeta, ObjectKey, ObjectLayout, UploadRecord, unix_now};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::debug;

use crate::error::StoreError;
use crate::layout::{DEFAULT_SHARDS_PER_SLAB, DEFAULT_SLAB_SIZE, object_key, place_slabs};
use crate::proof::outboard;
use crate::traits::{ObjectDownload, ObjectSource, ObjectStore, StorageProtocol, StorageService};

struct NetworkObject {
    data: Bytes,
    layout: ObjectLayout,
}

/// Shared in-memory storage network.
///
/// Holds object bytes and their current slab layout by [`ObjectKey`]. Every
/// [`MemoryStore`] built on the same network sees the same objects, the way
/// nodes of a cluster share one storage network.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    objects: Arc<RwLock<HashMap<ObjectKey, NetworkObject>>>,
}

impl MemoryNetwork {
    /// Create an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    fn put(&self, layout: ObjectLayout, data: Bytes) {
        let mut objects = self.objects.write().expect("lock poisoned");
        objects.insert(layout.key, NetworkObject { data, layout });
    }

    fn fetch(&self, key: &ObjectKey) -> Option<(Bytes, ObjectLayout)> {
        let objects = self.objects.read().expect("lock poisoned");
        objects
            .get(key)
            .map(|obj| (obj.data.clone(), obj.layout.clone()))
    }

    /// Whether the network holds bytes for `key`.
    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.read().expect("lock poisoned").contains_key(key)
    }

    /// Remove every shard of slab `slab`, making the object unavailable.
    pub fn drop_shards(&self, key: &ObjectKey, slab: usize) -> bool {
        let mut objects = self.objects.write().expect("lock poisoned");
        match objects.get_mut(key).and_then(|o| o.layout.slabs.get_mut(slab)) {
            Some(s) => {
                s.shards.clear();
                true
            }
            None => false,
        }
    }

    /// Flip the byte at `offset` of the stored object.
    pub fn corrupt(&self, key: &ObjectKey, offset: usize) -> bool {
        let mut objects = self.objects.write().expect("lock poisoned");
        let Some(obj) = objects.get_mut(key) else {
            return false;
        };
        if offset >= obj.data.len() {
            return false;
        }
        let mut data = obj.data.to_vec();
        data[offset] ^= 0xff;
        obj.data = Bytes::from(data);
        true
    }
}

/// One node's view of a [`MemoryNetwork`].
///
/// Buckets hold object pointers (layouts); bytes live in the network. Useful
/// for testing and for nodes configured to run in memory-only mode.
pub struct MemoryStore {
    network: MemoryNetwork,
    buckets: RwLock<HashMap<String, HashMap<String, ObjectLayout>>>,
    proofs: RwLock<HashMap<(String, ContentHash), Vec<u8>>>,
    slab_size: u64,
    shards_per_slab: usize,
    interruptions: AtomicU32,
    downloads: AtomicU64,
}

impl MemoryStore {
    /// Create a store attached to `network` with default slab placement.
    pub fn new(network: MemoryNetwork) -> Self {
        Self::with_slabs(network, DEFAULT_SLAB_SIZE, DEFAULT_SHARDS_PER_SLAB)
    }

    /// Create a store with a custom slab size and shard count.
    pub fn with_slabs(network: MemoryNetwork, slab_size: u64, shards_per_slab: usize) -> Self {
        Self {
            network,
            buckets: RwLock::new(HashMap::new()),
            proofs: RwLock::new(HashMap::new()),
            slab_size,
            shards_per_slab,
            interruptions: AtomicU32::new(0),
            downloads: AtomicU64::new(0),
        }
    }

    /// The network this store is attached to.
    pub fn network(&self) -> &MemoryNetwork {
        &self.network
    }

    /// Make the next `n` uploads drop their connection after a partial read,
    /// forcing the uploader to rewind the source and start over.
    pub fn interrupt_next_uploads(&self, n: u32) {
        self.interruptions.store(n, Ordering::SeqCst);
    }

    /// Number of downloads opened so far.
    pub fn download_count(&self) -> u64 {
        self.downloads.load(Ordering::SeqCst)
    }

    /// Whether `bucket/name` exists.
    pub fn has_object(&self, bucket: &str, name: &str) -> bool {
        let buckets = self.buckets.read().expect("lock poisoned");
        buckets.get(bucket).is_some_and(|b| b.contains_key(name))
    }

    /// Publish `data` to the network as if another node had uploaded it
    /// under `protocol`, returning the metadata a log would carry for it.
    pub fn seed_object(&self, protocol: &str, data: &[u8]) -> FileMeta {
        let (hash, proof) = outboard(data);
        let layout = self.layout_for(protocol, &hash, data.len() as u64);
        self.network.put(layout.clone(), Bytes::copy_from_slice(data));
        FileMeta::from_layout(hash, protocol, proof, layout)
    }

    fn layout_for(&self, protocol: &str, hash: &ContentHash, size: u64) -> ObjectLayout {
        let key = object_key(protocol, hash);
        ObjectLayout {
            key,
            size,
            slabs: place_slabs(&key, size, self.slab_size, self.shards_per_slab),
        }
    }

    fn lookup(&self, bucket: &str, name: &str) -> Result<ObjectLayout, StoreError> {
        let buckets = self.buckets.read().expect("lock poisoned");
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            })
    }

    fn take_interruption(&self) -> bool {
        self.interruptions
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl ObjectStore for MemoryStore {
    async fn create_bucket_if_not_exists(&self, bucket: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        buckets.entry(bucket.to_string()).or_default();
        Ok(())
    }

    async fn import_object(
        &self,
        bucket: &str,
        name: &str,
        layout: &ObjectLayout,
    ) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::BucketNotFound(bucket.to_string()))?;
        objects.insert(name.to_string(), layout.clone());
        debug!(bucket, name, key = %layout.key, "imported object pointers");
        Ok(())
    }

    async fn object_layout(&self, bucket: &str, name: &str) -> Result<ObjectLayout, StoreError> {
        let stored = self.lookup(bucket, name)?;
        Ok(self
            .network
            .fetch(&stored.key)
            .map(|(_, layout)| layout)
            .unwrap_or(stored))
    }

    async fn get_object(&self, bucket: &str, name: &str) -> Result<ObjectDownload, StoreError> {
        let stored = self.lookup(bucket, name)?;
        let (data, layout) = self
            .network
            .fetch(&stored.key)
            .ok_or(StoreError::DataMissing(stored.key))?;
        if let Some(slab) = layout.slabs.iter().position(|s| s.shards.is_empty()) {
            return Err(StoreError::Unavailable {
                key: layout.key,
                slab,
            });
        }
        self.downloads.fetch_add(1, Ordering::SeqCst);
        let size = data.len() as u64;
        Ok(ObjectDownload {
            reader: Box::pin(Cursor::new(data)),
            size,
        })
    }

    async fn delete_object(&self, bucket: &str, name: &str) -> Result<(), StoreError> {
        let mut buckets = self.buckets.write().expect("lock poisoned");
        if let Some(objects) = buckets.get_mut(bucket)
            && objects.remove(name).is_some()
        {
            debug!(bucket, name, "deleted object");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageService for MemoryStore {
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

        let data = loop {
            if self.take_interruption() {
                let mut partial = vec![0u8; size.min(64 * 1024) as usize];
                let n = source.read(&mut partial).await?;
                debug!(read = n, "upload interrupted, rewinding source");
                source.seek(SeekFrom::Start(0)).await?;
                continue;
            }
            let mut buf = Vec::with_capacity(size as usize);
            source.read_to_end(&mut buf).await?;
            break buf;
        };
        if data.len() as u64 != size {
            return Err(StoreError::SizeMismatch {
                expected: size,
                actual: data.len() as u64,
            });
        }

        let (hash, proof) = outboard(&data);
        let name = protocol.encode_file_name(&hash);
        let layout = self.layout_for(protocol.name(), &hash, size);
        self.network.put(layout.clone(), Bytes::from(data));
        {
            let mut buckets = self.buckets.write().expect("lock poisoned");
            buckets
                .entry(protocol.name().to_string())
                .or_default()
                .insert(name.clone(), layout);
        }
        self.proofs
            .write()
            .expect("lock poisoned")
            .insert((protocol.name().to_string(), hash), proof);

        debug!(%hash, protocol = protocol.name(), name, size, "uploaded object");
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
        let proofs = self.proofs.read().expect("lock poisoned");
        proofs
            .get(&(protocol.name().to_string(), *hash))
            .cloned()
            .ok_or_else(|| StoreError::ProofNotFound {
                protocol: protocol.name().to_string(),
                hash: *hash,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestProtocol;

    impl StorageProtocol for TestProtocol {
        fn name(&self) -> &str {
            "proto1"
        }

        fn encode_file_name(&self, hash: &ContentHash) -> String {
            hash.to_hex()
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    async fn read_all(store: &MemoryStore, bucket: &str, name: &str) -> Vec<u8> {
        let mut download = store.get_object(bucket, name).await.unwrap();
        let mut buf = Vec::new();
        download.reader.read_to_end(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_upload_then_download() {
        let store = MemoryStore::with_slabs(MemoryNetwork::new(), 1024, 2);
        let bytes = data(5000);

        let record = store
            .upload_object(&TestProtocol, Box::new(Cursor::new(bytes.clone())), 5000)
            .await
            .unwrap();
        assert_eq!(record.hash, ContentHash::from_data(&bytes));
        assert_eq!(record.protocol, "proto1");
        assert_eq!(record.user_id, 0);

        let name = record.hash.to_hex();
        assert_eq!(read_all(&store, "proto1", &name).await, bytes);

        let layout = store.object_layout("proto1", &name).await.unwrap();
        assert_eq!(layout.size, 5000);
        assert_eq!(layout.slabs.len(), 5);
        assert!(layout.is_available());

        let proof = store
            .download_proof(&TestProtocol, &record.hash)
            .await
            .unwrap();
        assert_eq!(proof, outboard(&bytes).1);
    }

    #[tokio::test]
    async fn test_upload_size_mismatch() {
        let store = MemoryStore::new(MemoryNetwork::new());
        let err = store
            .upload_object(&TestProtocol, Box::new(Cursor::new(data(10))), 11)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::SizeMismatch {
                expected: 11,
                actual: 10
            }
        ));
    }

    #[tokio::test]
    async fn test_interrupted_upload_rewinds() {
        let store = MemoryStore::new(MemoryNetwork::new());
        store.interrupt_next_uploads(2);
        let bytes = data(100_000);

        let record = store
            .upload_object(&TestProtocol, Box::new(Cursor::new(bytes.clone())), 100_000)
            .await
            .unwrap();
        assert_eq!(record.hash, ContentHash::from_data(&bytes));
        assert_eq!(read_all(&store, "proto1", &record.hash.to_hex()).await, bytes);
    }

    #[tokio::test]
    async fn test_import_requires_bucket() {
        let store = MemoryStore::new(MemoryNetwork::new());
        let meta = store.seed_object("proto1", b"seeded");

        let err = store
            .import_object("sync", "x", &meta.layout())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::BucketNotFound(_)));

        store.create_bucket_if_not_exists("sync").await.unwrap();
        store.create_bucket_if_not_exists("sync").await.unwrap();
        store.import_object("sync", "x", &meta.layout()).await.unwrap();
        assert_eq!(read_all(&store, "sync", "x").await, b"seeded");
        assert_eq!(store.download_count(), 1);
    }

    #[tokio::test]
    async fn test_shared_network_between_stores() {
        let network = MemoryNetwork::new();
        let a = MemoryStore::new(network.clone());
        let b = MemoryStore::new(network.clone());

        let meta = a.seed_object("proto1", b"shared bytes");
        assert!(network.contains(&meta.key));

        b.create_bucket_if_not_exists("sync").await.unwrap();
        b.import_object("sync", "obj", &meta.layout()).await.unwrap();
        assert_eq!(read_all(&b, "sync", "obj").await, b"shared bytes");
    }

    #[tokio::test]
    async fn test_dropped_shards_make_object_unavailable() {
        let store = MemoryStore::with_slabs(MemoryNetwork::new(), 4, 1);
        let meta = store.seed_object("proto1", b"0123456789");
        store.create_bucket_if_not_exists("sync").await.unwrap();
        store.import_object("sync", "obj", &meta.layout()).await.unwrap();

        assert!(store.network().drop_shards(&meta.key, 1));
        let layout = store.object_layout("sync", "obj").await.unwrap();
        assert!(!layout.is_available());

        let err = store.get_object("sync", "obj").await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { slab: 1, .. }));
    }

    #[tokio::test]
    async fn test_corrupt_flips_byte() {
        let store = MemoryStore::new(MemoryNetwork::new());
        let meta = store.seed_object("proto1", b"abc");
        assert!(store.network().corrupt(&meta.key, 0));
        assert!(!store.network().corrupt(&meta.key, 3));

        store.create_bucket_if_not_exists("sync").await.unwrap();
        store.import_object("sync", "obj", &meta.layout()).await.unwrap();
        assert_eq!(read_all(&store, "sync", "obj").await, [b'a' ^ 0xff, b'b', b'c']);
    }

    #[tokio::test]
    async fn test_delete_object_is_idempotent() {
        let store = MemoryStore::new(MemoryNetwork::new());
        let meta = store.seed_object("proto1", b"temp");
        store.create_bucket_if_not_exists("sync").await.unwrap();
        store.import_object("sync", "obj", &meta.layout()).await.unwrap();

        store.delete_object("sync", "obj").await.unwrap();
        store.delete_object("sync", "obj").await.unwrap();
        assert!(!store.has_object("sync", "obj"));
        assert!(store.network().contains(&meta.key));
    }

    #[tokio::test]
    async fn test_missing_proof() {
        let store = MemoryStore::new(MemoryNetwork::new());
        let err = store
            .download_proof(&TestProtocol, &ContentHash::from_data(b"none"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ProofNotFound { .. }));
    }
}
