//! Shared log service for drift.
//!
//! The log is the cluster-wide system of record mapping object identifiers
//! to [`FileMeta`](drift_types::FileMeta). Nodes reach it through the
//! [`SyncLog`] trait's five operations; the log's internal structure is not
//! part of this interface.
//!
//! [`MemoryLog`] is an in-process implementation: handles created with
//! [`MemoryLog::join`] share one replicated entry set while keeping their own
//! per-node state (initialization keys, node set, removals).

mod error;
mod memory;

pub use error::LogError;
pub use memory::{LogInit, MemoryLog};

use std::path::Path;

use drift_types::FileMeta;
use ed25519_dalek::{SigningKey, VerifyingKey};

/// Operations a node performs against the shared log.
#[async_trait::async_trait]
pub trait SyncLog: Send + Sync {
    /// Open the log with `log_key` as its root identity, signing as
    /// `node_key`, and keeping local state under `data_dir`.
    async fn initialize(
        &self,
        log_key: VerifyingKey,
        node_key: &SigningKey,
        data_dir: &Path,
    ) -> Result<(), LogError>;

    /// Publish (or refresh) metadata for one object.
    async fn publish_update(&self, meta: FileMeta) -> Result<(), LogError>;

    /// All metadata indexed under any of `keys`.
    async fn query(&self, keys: &[String]) -> Result<Vec<FileMeta>, LogError>;

    /// Replace the log's view of cluster members.
    async fn update_nodes(&self, nodes: Vec<VerifyingKey>) -> Result<(), LogError>;

    /// Remove one member.
    async fn remove_node(&self, node: VerifyingKey) -> Result<(), LogError>;
}
