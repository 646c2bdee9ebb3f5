//! Slab placement shared by the storage backends.

use drift_types::{ContentHash, HostKey, ObjectKey, Shard, Slab};

/// Default slab size: 4 MiB.
pub const DEFAULT_SLAB_SIZE: u64 = 4 * 1024 * 1024;

/// Default number of hosts holding each slab.
pub const DEFAULT_SHARDS_PER_SLAB: usize = 3;

/// Key of an object in the storage network. Identical content uploaded
/// under the same protocol always maps to the same key.
pub(crate) fn object_key(protocol: &str, hash: &ContentHash) -> ObjectKey {
    ObjectKey::from_data(format!("{protocol}:{hash}").as_bytes())
}

/// Split `size` bytes into slabs of at most `slab_size`, each placed on
/// `shards_per_slab` hosts.
pub(crate) fn place_slabs(
    key: &ObjectKey,
    size: u64,
    slab_size: u64,
    shards_per_slab: usize,
) -> Vec<Slab> {
    let slab_size = slab_size.max(1);
    let mut slabs = Vec::new();
    let mut offset = 0;
    while offset < size {
        let length = slab_size.min(size - offset);
        let index = slabs.len() as u64;
        let shards = (0..shards_per_slab as u64)
            .map(|n| {
                let mut seed = Vec::with_capacity(48);
                seed.extend_from_slice(key.as_bytes());
                seed.extend_from_slice(&index.to_be_bytes());
                seed.extend_from_slice(&n.to_be_bytes());
                Shard {
                    host: HostKey::from_data(&seed),
                    root: blake3::hash(&seed).into(),
                }
            })
            .collect();
        slabs.push(Slab {
            offset,
            length,
            shards,
        });
        offset += length;
    }
    slabs
}
