//! Object sync pipeline for drift.
//!
//! A node imports objects other nodes announced to the shared log, verifies
//! them against their proofs while streaming, uploads them into durable
//! storage and announces its own uploads back to the log:
//!
//! ```text
//! import ──► verify job ──► upload job ──► upload listener ──► log update
//!                                                ▲
//!                         daily scan ────────────┘
//! ```
//!
//! [`SyncService`] wires the [`SyncNode`] stages to the job queue, bootstraps
//! the log and joins the cluster.

pub mod error;
pub mod node;
pub mod protocol;
pub mod service;
pub mod stream;
pub mod tasks;
pub mod verify;


pub use error::SyncError;
pub use node::{STAGING_BUCKET, SyncDeps, SyncNode};
pub use protocol::{HashProtocol, HashStorage, ProtocolRegistry, SyncProtocol};
pub use service::{SyncConfig, SyncService};
pub use stream::RetryableStream;
pub use verify::{ProofVerifier, verify_download};
