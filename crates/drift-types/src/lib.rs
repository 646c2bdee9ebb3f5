//! Shared types and identifiers for drift.
//!
//! This crate defines the core types used across the drift workspace:
//! identifiers ([`ContentHash`], [`NodeId`], [`ObjectKey`], [`HostKey`]),
//! object metadata exchanged with the log ([`FileMeta`], [`Slab`], [`Shard`]),
//! local upload records ([`UploadRecord`]) and the payloads carried by the
//! pipeline jobs ([`VerifyObjectArgs`], [`UploadObjectArgs`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub mod events;

pub use events::{ListenerError, UploadListener, UploadNotifier};

// ---------------------------------------------------------------------------
// ID types
// ---------------------------------------------------------------------------

/// Error returned when parsing an identifier from its hex form.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseIdError {
    /// The input was not valid hex.
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The input decoded to the wrong number of bytes.
    #[error("expected 32 bytes, got {0}")]
    Length(usize),
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
        pub struct $name([u8; 32]);

        impl $name {
            /// Create an ID by hashing arbitrary data with BLAKE3.
            pub fn from_data(data: &[u8]) -> Self {
                Self(blake3::hash(data).into())
            }

            /// Return the raw 32-byte representation.
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Build an ID from a byte slice, failing unless it is exactly 32 bytes.
            pub fn from_slice(bytes: &[u8]) -> Result<Self, ParseIdError> {
                let arr: [u8; 32] = bytes
                    .try_into()
                    .map_err(|_| ParseIdError::Length(bytes.len()))?;
                Ok(Self(arr))
            }

            /// Lowercase hex encoding of the ID.
            pub fn to_hex(&self) -> String {
                hex::encode(self.0)
            }
        }

        impl From<[u8; 32]> for $name {
            fn from(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::from_slice(&hex::decode(s)?)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for byte in &self.0 {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

define_id!(
    /// Content hash of an object: the BLAKE3/bao root of its bytes.
    ContentHash
);

define_id!(
    /// Identifier for a cluster node.
    NodeId
);

define_id!(
    /// Protocol-side key of a stored object in the durable storage network.
    ObjectKey
);

define_id!(
    /// Public key of a storage host holding a shard.
    HostKey
);

// ---------------------------------------------------------------------------
// Object metadata
// ---------------------------------------------------------------------------

/// A single shard of a slab, held by one storage host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shard {
    /// Host storing this shard.
    pub host: HostKey,
    /// Merkle root of the shard data on that host.
    pub root: [u8; 32],
}

/// A storage-layer fragment of an object's content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slab {
    /// Byte offset of this slab within the object.
    pub offset: u64,
    /// Length of this slab in bytes.
    pub length: u64,
    /// Shards currently holding this slab.
    pub shards: Vec<Shard>,
}

impl Slab {
    /// Whether at least one shard holds this slab.
    pub fn is_available(&self) -> bool {
        !self.shards.is_empty()
    }
}

/// Storage layout of one object: its key, size and slab list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLayout {
    /// Protocol-side key of the object.
    pub key: ObjectKey,
    /// Total object size in bytes.
    pub size: u64,
    /// Slabs making up the object.
    pub slabs: Vec<Slab>,
}

impl ObjectLayout {
    /// An object is available only if every slab has at least one shard.
    pub fn is_available(&self) -> bool {
        self.slabs.iter().all(Slab::is_available)
    }
}

/// Object metadata as published to and returned by the shared log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Content hash of the object.
    pub hash: ContentHash,
    /// Bao outboard proof for incremental verification against `hash`.
    pub proof: Vec<u8>,
    /// Name of the sync protocol the object belongs to.
    pub protocol: String,
    /// Protocol-side key of the object.
    pub key: ObjectKey,
    /// Object size in bytes.
    pub size: u64,
    /// Current slab/shard layout.
    pub slabs: Vec<Slab>,
}

impl FileMeta {
    /// Combine a layout with a proof into publishable metadata.
    pub fn from_layout(
        hash: ContentHash,
        protocol: impl Into<String>,
        proof: Vec<u8>,
        layout: ObjectLayout,
    ) -> Self {
        Self {
            hash,
            proof,
            protocol: protocol.into(),
            key: layout.key,
            size: layout.size,
            slabs: layout.slabs,
        }
    }

    /// The storage layout carried by this metadata.
    pub fn layout(&self) -> ObjectLayout {
        ObjectLayout {
            key: self.key,
            size: self.size,
            slabs: self.slabs.clone(),
        }
    }

    /// Whether every slab has at least one shard.
    ///
    /// Metadata that is not available is never considered for import.
    pub fn is_available(&self) -> bool {
        self.slabs.iter().all(Slab::is_available)
    }

    /// The identifier under which this object is indexed in the log:
    /// `<protocol>:<hex hash>`.
    pub fn identifier(&self) -> String {
        format!("{}:{}", self.protocol, self.hash)
    }
}

// ---------------------------------------------------------------------------
// Local records
// ---------------------------------------------------------------------------

/// A completed upload held in local durable storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    /// Content hash of the uploaded object.
    pub hash: ContentHash,
    /// Storage protocol the object was uploaded under.
    pub protocol: String,
    /// Object size in bytes.
    pub size: u64,
    /// Owner of the upload.
    pub user_id: u64,
    /// Unix timestamp (seconds) when the upload completed.
    pub created_at: u64,
    /// Whether the storage layer's own verification was bypassed.
    pub confirmed: bool,
}

// ---------------------------------------------------------------------------
// Job payloads
// ---------------------------------------------------------------------------

/// Arguments of a verify job, created by an import request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyObjectArgs {
    /// Hash the importer asked for.
    pub hash: ContentHash,
    /// Available candidate metadata returned by the log.
    pub objects: Vec<FileMeta>,
    /// User that requested the import.
    pub requester: u64,
}

/// Arguments of an upload job, created by a successful verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadObjectArgs {
    /// Hash of the verified object.
    pub hash: ContentHash,
    /// Sync protocol of the winning candidate.
    pub protocol: String,
    /// Object size in bytes.
    pub size: u64,
    /// User that requested the import; becomes the upload owner.
    pub requester: u64,
}

/// Current Unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
