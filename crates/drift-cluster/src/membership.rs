//! Node presence and liveness tracking.
//!
//! On startup the node writes its derived public key to
//! `/node/{node_id}/sync` under a long lease, pushes the full member list to
//! the log, and then watches the `/node/` prefix:
//!
//! - a peer's key disappearing is reported as [`MembershipEvent::PeerExpired`];
//! - this node's own key disappearing means the node lost its lease, so it
//!   calls `remove_node` with its own key on the log and reports
//!   [`MembershipEvent::SelfEvicted`].
//!
//! The [`MembershipHandle`] is the public API for a running tracker.

use std::sync::Arc;
use std::time::Duration;

use drift_log::SyncLog;
use drift_types::NodeId;
use ed25519_dalek::VerifyingKey;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::coordinator::{CoordinationStore, LeaseId, WatchEvent};
use crate::error::ClusterError;
use crate::identity::NodeIdentity;

/// Prefix under which every node registers.
pub const NODE_PREFIX: &str = "/node/";

const NODE_SUFFIX: &str = "/sync";

/// Registration key of a node.
pub fn node_key(node_id: &NodeId) -> String {
    format!("{NODE_PREFIX}{node_id}{NODE_SUFFIX}")
}

/// Parse the node ID out of a registration key.
pub fn parse_node_key(key: &str) -> Option<NodeId> {
    key.strip_prefix(NODE_PREFIX)?
        .strip_suffix(NODE_SUFFIX)?
        .parse()
        .ok()
}

/// Configuration for the membership tracker.
#[derive(Debug, Clone)]
pub struct MembershipConfig {
    /// TTL of the presence lease.
    pub lease_ttl: Duration,
    /// How often the lease is renewed. `None` disables renewal, so the key
    /// lives exactly one TTL.
    pub renew_interval: Option<Duration>,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        let lease_ttl = Duration::from_secs(24 * 60 * 60);
        Self {
            lease_ttl,
            renew_interval: Some(lease_ttl / 3),
        }
    }
}

/// Membership changes observed by the tracker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MembershipEvent {
    /// A node registered or refreshed its key.
    PeerJoined(NodeId),
    /// A peer's key was deleted.
    PeerExpired(NodeId),
    /// This node's own key was deleted and it left the log.
    SelfEvicted,
}

/// Background task tracking cluster membership.
struct Tracker {
    identity_id: NodeId,
    public_key: VerifyingKey,
    lease: LeaseId,
    store: Arc<dyn CoordinationStore>,
    log: Arc<dyn SyncLog>,
    config: MembershipConfig,
    events: mpsc::UnboundedReceiver<WatchEvent>,
    event_tx: broadcast::Sender<MembershipEvent>,
    shutdown_rx: tokio::sync::watch::Receiver<bool>,
}

impl Tracker {
    /// Run the watch loop until shutdown or until the watch closes.
    async fn run(mut self) {
        info!(node_id = %self.identity_id, "membership tracker started");

        let mut renew = self.config.renew_interval.map(|period| {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            interval
        });
        let mut evicted = false;

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => {
                        if self.handle_event(event).await {
                            evicted = true;
                        }
                    }
                    None => {
                        warn!("membership watch closed");
                        break;
                    }
                },
                _ = tick(&mut renew), if !evicted => {
                    if let Err(e) = self.store.keep_alive(self.lease).await {
                        warn!(lease = self.lease, error = %e, "failed to renew presence lease");
                    }
                }
                _ = self.shutdown_rx.changed() => {
                    info!("membership tracker shutting down");
                    break;
                }
            }
        }

        info!("membership tracker stopped");
    }

    /// Handle one watch event. Returns true if this node was evicted.
    async fn handle_event(&self, event: WatchEvent) -> bool {
        match event {
            WatchEvent::Put { key, .. } => {
                if let Some(node_id) = parse_node_key(&key)
                    && node_id != self.identity_id
                {
                    debug!(%node_id, "peer registered");
                    let _ = self.event_tx.send(MembershipEvent::PeerJoined(node_id));
                }
                false
            }
            WatchEvent::Delete { key } => {
                let Some(node_id) = parse_node_key(&key) else {
                    debug!(key, "ignoring delete of unrecognized key");
                    return false;
                };
                if node_id != self.identity_id {
                    info!(%node_id, "peer membership expired");
                    let _ = self.event_tx.send(MembershipEvent::PeerExpired(node_id));
                    return false;
                }

                warn!(%node_id, "own membership expired, leaving log");
                if let Err(e) = self.log.remove_node(self.public_key).await {
                    error!(error = %e, "failed to remove self from log");
                }
                let _ = self.event_tx.send(MembershipEvent::SelfEvicted);
                true
            }
        }
    }
}

async fn tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handle to a running membership tracker.
pub struct MembershipHandle {
    lease: LeaseId,
    event_tx: broadcast::Sender<MembershipEvent>,
    shutdown_tx: tokio::sync::watch::Sender<bool>,
    task: tokio::task::JoinHandle<()>,
}

impl MembershipHandle {
    /// Lease the presence key is attached to.
    pub fn lease(&self) -> LeaseId {
        self.lease
    }

    /// Subscribe to membership events.
    pub fn subscribe(&self) -> broadcast::Receiver<MembershipEvent> {
        self.event_tx.subscribe()
    }

    /// Stop the tracker.
    pub fn leave(&self) {
        info!("leaving membership");
        let _ = self.shutdown_tx.send(true);
    }

    /// Abort the background task.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Check whether the background task is still running.
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

/// Register this node, seed the log's member list and start the tracker.
///
/// Errors here are startup errors: the node never half-joins.
pub async fn start(
    identity: &NodeIdentity,
    store: Arc<dyn CoordinationStore>,
    log: Arc<dyn SyncLog>,
    config: MembershipConfig,
) -> Result<MembershipHandle, ClusterError> {
    let node_id = identity.node_id();
    let public_key = identity.public_key();

    let lease = store.grant_lease(config.lease_ttl).await?;
    store
        .put_with_lease(&node_key(&node_id), public_key.to_bytes().to_vec(), lease)
        .await?;

    // Watch before scanning so no delete between the two is missed.
    let events = store.watch_prefix(NODE_PREFIX).await?;
    let members = store.get_prefix(NODE_PREFIX).await?;
    let keys: Vec<VerifyingKey> = members
        .iter()
        .filter_map(|(key, value)| {
            let parsed = <[u8; 32]>::try_from(value.as_slice())
                .ok()
                .and_then(|b| VerifyingKey::from_bytes(&b).ok());
            if parsed.is_none() {
                warn!(key, "skipping member with invalid public key");
            }
            parsed
        })
        .collect();
    info!(%node_id, members = keys.len(), "registered membership");
    log.update_nodes(keys).await?;

    let (event_tx, _) = broadcast::channel(64);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let tracker = Tracker {
        identity_id: node_id,
        public_key,
        lease,
        store,
        log,
        config,
        events,
        event_tx: event_tx.clone(),
        shutdown_rx,
    };
    let task = tokio::spawn(tracker.run());

    Ok(MembershipHandle {
        lease,
        event_tx,
        shutdown_tx,
        task,
    })
}
