//! Shared test harness for drift integration tests.
//!
//! Provides [`TestCluster`]: N sync nodes sharing one in-memory storage
//! network, one replicated log and (when clustered) one coordination store,
//! plus a "remote" store standing in for nodes outside the cluster that
//! announce objects to the log.

use std::sync::Arc;
use std::time::Duration;

use drift_cluster::{
    BootstrapConfig, CoordinationStore, IdentityKey, MemoryCoordinator, MembershipConfig,
    NodeIdentity,
};
use drift_log::MemoryLog;
use drift_meta::MetaStore;
use drift_store::{MemoryNetwork, MemoryStore};
use drift_sync::{HashProtocol, ProtocolRegistry, SyncConfig, SyncDeps, SyncService};
use drift_types::{FileMeta, NodeId, UploadNotifier};
use tempfile::TempDir;

/// Sync protocol every test node speaks.
pub const PROTOCOL: &str = "proto1";
/// Storage protocol durable copies are uploaded under.
pub const STORAGE: &str = "store1";

/// Slab size of test stores, small enough for multi-slab objects.
const SLAB_SIZE: u64 = 64 * 1024;

/// Identity key shared by every node of a test cluster.
pub fn cluster_identity() -> IdentityKey {
    IdentityKey::from_bytes([0x42; 32])
}

/// Deterministic, non-repeating test data.
pub fn test_data(size: usize, seed: u32) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut state: u32 = 0xDEAD_BEEF ^ seed;
    for _ in 0..size {
        state = state.wrapping_mul(1103515245).wrapping_add(12345);
        data.push((state >> 16) as u8);
    }
    data
}

/// How a [`TestCluster`] is started.
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    /// Number of nodes.
    pub nodes: usize,
    /// Use the shared coordination store for bootstrap and membership.
    pub clustered: bool,
    /// Membership lease settings.
    pub membership: MembershipConfig,
}

impl ClusterOptions {
    /// `nodes` standalone nodes.
    pub fn standalone(nodes: usize) -> Self {
        Self {
            nodes,
            clustered: false,
            membership: MembershipConfig::default(),
        }
    }

    /// `nodes` clustered nodes.
    pub fn clustered(nodes: usize) -> Self {
        Self {
            nodes,
            clustered: true,
            membership: MembershipConfig::default(),
        }
    }
}

/// One node of a [`TestCluster`].
pub struct TestNode {
    /// Derived identity.
    pub identity: NodeIdentity,
    /// The running service.
    pub service: SyncService,
    /// This node's view of the storage network.
    pub store: Arc<MemoryStore>,
    /// This node's handle onto the shared log.
    pub log: Arc<MemoryLog>,
    /// Local metadata.
    pub meta: Arc<MetaStore>,
    _dir: TempDir,
}

impl TestNode {
    /// Public sync key.
    pub fn public_key(&self) -> ed25519_dalek::VerifyingKey {
        self.identity.public_key()
    }

    /// Wait until this node's job queue has drained.
    pub async fn settle(&self) {
        self.service.node().jobs().wait_idle().await;
    }
}

/// N drift nodes wired to shared in-memory collaborators.
pub struct TestCluster {
    /// Running nodes, in start order.
    pub nodes: Vec<TestNode>,
    /// Shared storage network.
    pub network: MemoryNetwork,
    /// Store outside the cluster used to announce objects.
    pub remote: MemoryStore,
    /// Origin handle of the shared log.
    pub log: MemoryLog,
    /// Shared coordination store.
    pub coordinator: MemoryCoordinator,
    options: ClusterOptions,
}

impl TestCluster {
    /// Start `options.nodes` nodes concurrently. Node `i` has ID `[i + 1; 32]`.
    pub async fn start(options: ClusterOptions) -> Self {
        let network = MemoryNetwork::new();
        let log = MemoryLog::new();
        let coordinator = MemoryCoordinator::new();

        let mut cluster = Self {
            nodes: Vec::with_capacity(options.nodes),
            remote: MemoryStore::with_slabs(network.clone(), SLAB_SIZE, 2),
            network,
            log,
            coordinator,
            options,
        };

        let pending: Vec<_> = (0..cluster.options.nodes)
            .map(|i| tokio::spawn(cluster.node_start(i)))
            .collect();
        for handle in pending {
            cluster.nodes.push(handle.await.expect("node task panicked"));
        }
        cluster
    }

    /// Start one more node on the same collaborators, returning its index.
    pub async fn add_node(&mut self) -> usize {
        let index = self.nodes.len();
        let node = self.node_start(index).await;
        self.nodes.push(node);
        index
    }

    fn node_start(&self, index: usize) -> impl Future<Output = TestNode> + Send + 'static {
        let node_id = NodeId::from([index as u8 + 1; 32]);
        let store = Arc::new(MemoryStore::with_slabs(self.network.clone(), SLAB_SIZE, 2));
        let log = Arc::new(self.log.join());
        let coordinator: Option<Arc<dyn CoordinationStore>> = self
            .options
            .clustered
            .then(|| Arc::new(self.coordinator.clone()) as Arc<dyn CoordinationStore>);
        let clustered = self.options.clustered;
        let membership = self.options.membership.clone();
        start_node(node_id, store, log, coordinator, clustered, membership)
    }

    /// Node `i`.
    pub fn node(&self, i: usize) -> &TestNode {
        &self.nodes[i]
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the cluster has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Store `data` on the network from outside the cluster and announce it
    /// in the log.
    pub fn announce(&self, data: &[u8]) -> FileMeta {
        let meta = self.remote.seed_object(PROTOCOL, data);
        self.log.seed(meta.clone());
        meta
    }

    /// Stop every node.
    pub fn shutdown(&self) {
        for node in &self.nodes {
            node.service.shutdown();
        }
    }
}

async fn start_node(
    node_id: NodeId,
    store: Arc<MemoryStore>,
    log: Arc<MemoryLog>,
    coordinator: Option<Arc<dyn CoordinationStore>>,
    clustered: bool,
    membership: MembershipConfig,
) -> TestNode {
    let dir = tempfile::tempdir().expect("tempdir");
    let meta = Arc::new(MetaStore::open_temporary().expect("meta store"));
    let identity = NodeIdentity::new(node_id, cluster_identity()).expect("identity");

    let deps = SyncDeps {
        log: log.clone(),
        objects: store.clone(),
        storage: store.clone(),
        meta: meta.clone(),
        protocols: ProtocolRegistry::new().with(Arc::new(HashProtocol::new(PROTOCOL, STORAGE))),
        notifier: UploadNotifier::new(),
    };
    let config = SyncConfig {
        data_dir: dir.path().to_path_buf(),
        bootstrap: BootstrapConfig {
            cluster_enabled: clustered,
            campaign_timeout: Duration::from_secs(5),
            record_wait: Duration::from_secs(10),
        },
        membership,
        ..SyncConfig::default()
    };

    let service = SyncService::start(&identity, coordinator, deps, config)
        .await
        .expect("sync service failed to start");
    tracing::debug!(%node_id, "test node started");

    TestNode {
        identity,
        service,
        store,
        log,
        meta,
        _dir: dir,
    }
}
