//! One-time cluster bootstrap.
//!
//! The first node to start in an empty cluster becomes the bootstrapper: its
//! derived public key becomes the root identity of the shared log, and its
//! node ID is written once to [`BOOTSTRAP_KEY`]. Every other node reads that
//! record and recomputes the same root key from the bootstrapper's ID.
//!
//! ```text
//! CheckBootstrap ──record present──────────────────────────────▶ Follower
//!       │ absent
//!       ▼
//!     Elect ──leader exists──▶ wait for record ────────────────▶ Follower
//!       │ no leader
//!       ▼
//!    Campaign ──timeout──────▶ wait for record ────────────────▶ Follower
//!       │ won                                   other error ──▶ fatal
//!       ▼
//!  re-check record ──present───────────────────────────────────▶ Follower
//!       │ absent
//!       ▼
//!  write record, resign ───────────────────────────────────────▶ Leader
//! ```
//!
//! The re-check under leadership means only an elected node that still sees
//! no record writes it, so the record is written at most once.

use std::path::Path;
use std::time::Duration;

use drift_log::SyncLog;
use drift_types::NodeId;
use ed25519_dalek::VerifyingKey;
use tracing::{debug, info, warn};

use crate::coordinator::{CoordinationStore, WatchEvent};
use crate::error::ClusterError;
use crate::identity::NodeIdentity;

/// Key holding the bootstrapper's node ID (hex).
pub const BOOTSTRAP_KEY: &str = "/sync/bootstrap";

/// Name of the bootstrap leader election.
pub const ELECTION_NAME: &str = "/sync/leader";

/// Bootstrap settings.
#[derive(Debug, Clone)]
pub struct BootstrapConfig {
    /// Whether the node runs as part of a cluster. A standalone node is its
    /// own bootstrapper and never touches the coordination store.
    pub cluster_enabled: bool,
    /// Upper bound on a leader campaign.
    pub campaign_timeout: Duration,
    /// How long a follower waits for the leader to write the record.
    pub record_wait: Duration,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            cluster_enabled: false,
            campaign_timeout: Duration::from_secs(30),
            record_wait: Duration::from_secs(60),
        }
    }
}

/// How this node came to know the log root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// Clustering disabled; the node's own key is the root.
    Standalone,
    /// This node won the election and wrote the bootstrap record.
    Leader,
    /// Another node (possibly this one, in an earlier run) bootstrapped.
    Follower {
        /// ID recorded in the bootstrap record.
        bootstrapper: NodeId,
    },
}

/// Result of bootstrap: the role taken and the log root key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapOutcome {
    /// Role this node took.
    pub role: Role,
    /// Root identity of the shared log.
    pub log_key: VerifyingKey,
}

/// Decide the log root, then initialize `log` with it and this node's key.
///
/// Any coordination-store error aborts startup. A campaign timeout does not.
pub async fn bootstrap_log(
    identity: &NodeIdentity,
    store: Option<&dyn CoordinationStore>,
    log: &dyn SyncLog,
    data_dir: &Path,
    config: &BootstrapConfig,
) -> Result<BootstrapOutcome, ClusterError> {
    let outcome = match store {
        Some(store) if config.cluster_enabled => elect(identity, store, config).await?,
        _ => BootstrapOutcome {
            role: Role::Standalone,
            log_key: identity.public_key(),
        },
    };

    log.initialize(outcome.log_key, identity.signing_key(), data_dir)
        .await?;
    info!(
        role = ?outcome.role,
        log_key = %hex::encode(outcome.log_key.as_bytes()),
        "log initialized"
    );
    Ok(outcome)
}

/// Run the bootstrap state machine against the coordination store.
pub async fn elect(
    identity: &NodeIdentity,
    store: &dyn CoordinationStore,
    config: &BootstrapConfig,
) -> Result<BootstrapOutcome, ClusterError> {
    if let Some(bootstrapper) = read_record(store).await? {
        debug!(%bootstrapper, "bootstrap record present");
        return follower(identity, bootstrapper);
    }

    let election = store.election(ELECTION_NAME).await?;
    if let Some(leader) = election.leader().await? {
        info!(
            leader = %String::from_utf8_lossy(&leader),
            "another node is bootstrapping"
        );
        let bootstrapper = wait_for_record(store, config.record_wait).await?;
        return follower(identity, bootstrapper);
    }

    let campaign = election.campaign(identity.node_id().to_hex().into_bytes());
    match tokio::time::timeout(config.campaign_timeout, campaign).await {
        Err(_) => {
            info!(timeout = ?config.campaign_timeout, "campaign timed out, following");
            let bootstrapper = wait_for_record(store, config.record_wait).await?;
            follower(identity, bootstrapper)
        }
        Ok(Err(e)) => Err(e),
        Ok(Ok(())) => {
            let outcome = match read_record(store).await {
                Ok(Some(bootstrapper)) => follower(identity, bootstrapper),
                Ok(None) => write_record(identity, store).await,
                Err(e) => Err(e),
            };
            if let Err(e) = election.resign().await {
                warn!(error = %e, "failed to resign bootstrap election");
            }
            outcome
        }
    }
}

async fn write_record(
    identity: &NodeIdentity,
    store: &dyn CoordinationStore,
) -> Result<BootstrapOutcome, ClusterError> {
    store
        .put(BOOTSTRAP_KEY, identity.node_id().to_hex().into_bytes())
        .await?;
    info!(node_id = %identity.node_id(), "bootstrapped cluster");
    Ok(BootstrapOutcome {
        role: Role::Leader,
        log_key: identity.public_key(),
    })
}

fn follower(
    identity: &NodeIdentity,
    bootstrapper: NodeId,
) -> Result<BootstrapOutcome, ClusterError> {
    let log_key = identity.peer_public_key(&bootstrapper)?;
    info!(%bootstrapper, "following bootstrapped cluster");
    Ok(BootstrapOutcome {
        role: Role::Follower { bootstrapper },
        log_key,
    })
}

async fn read_record(store: &dyn CoordinationStore) -> Result<Option<NodeId>, ClusterError> {
    store
        .get(BOOTSTRAP_KEY)
        .await?
        .map(|v| parse_record(&v))
        .transpose()
}

fn parse_record(value: &[u8]) -> Result<NodeId, ClusterError> {
    let text = std::str::from_utf8(value)
        .map_err(|e| ClusterError::InvalidBootstrapRecord(e.to_string()))?;
    text.parse()
        .map_err(|e| ClusterError::InvalidBootstrapRecord(format!("{text:?}: {e}")))
}

async fn wait_for_record(
    store: &dyn CoordinationStore,
    wait: Duration,
) -> Result<NodeId, ClusterError> {
    let mut events = store.watch_prefix(BOOTSTRAP_KEY).await?;
    if let Some(bootstrapper) = read_record(store).await? {
        return Ok(bootstrapper);
    }

    let put = async {
        while let Some(event) = events.recv().await {
            if let WatchEvent::Put { key, value } = event
                && key == BOOTSTRAP_KEY
            {
                return parse_record(&value);
            }
        }
        Err(ClusterError::Coordination("bootstrap watch closed".into()))
    };
    tokio::time::timeout(wait, put)
        .await
        .map_err(|_| ClusterError::BootstrapRecordMissing(wait))?
}
