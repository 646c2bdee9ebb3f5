//! Cluster identity, bootstrap and membership for drift.
//!
//! This crate provides:
//!
//! - [`identity`]: deterministic per-node and per-bootstrapper key
//!   derivation from the cluster's long-term [`IdentityKey`].
//! - [`coordinator`]: the [`CoordinationStore`] and [`Election`] traits the
//!   node consumes, plus the in-process [`MemoryCoordinator`].
//! - [`bootstrap`]: one-time election of the node whose key seeds the
//!   shared log, and log initialization from the outcome.
//! - [`membership`]: leased presence key, peer-expiry watch and
//!   self-eviction from the log.

pub mod bootstrap;
pub mod coordinator;
mod error;
pub mod identity;
pub mod membership;


pub use bootstrap::{BootstrapConfig, BootstrapOutcome, Role};
pub use coordinator::{CoordinationStore, Election, LeaseId, MemoryCoordinator, WatchEvent};
pub use error::ClusterError;
pub use identity::{IdentityKey, NodeIdentity};
pub use membership::{MembershipConfig, MembershipEvent, MembershipHandle};
