//! Durable object storage for drift.
//!
//! This crate defines the storage collaborators the sync pipeline consumes:
//!
//! - [`StorageProtocol`]: names a destination protocol and how it encodes
//!   object file names.
//! - [`ObjectStore`]: bucket/object view of the storage network: staging
//!   object pointers, downloading bytes and reading current slab layouts.
//! - [`StorageService`]: uploads bytes into durable storage under a
//!   protocol and serves the bao proof of stored objects.
//!
//! Two backends implement both store traits:
//!
//! - [`MemoryStore`]: per-node view over a shared in-memory
//!   [`MemoryNetwork`], with fault injection for tests.
//! - [`FileStore`]: on-disk storage with a 2-level fan-out directory layout.

mod error;
mod file_store;
mod layout;
mod memory_store;
mod proof;
mod traits;

pub use error::StoreError;
pub use file_store::FileStore;
pub use memory_store::{MemoryNetwork, MemoryStore};
pub use layout::{DEFAULT_SHARDS_PER_SLAB, DEFAULT_SLAB_SIZE};
pub use proof::{ProofBuilder, outboard};
pub use traits::{
    ObjectDownload, ObjectReader, ObjectSource, ObjectStore, StorageProtocol, StorageService,
};
