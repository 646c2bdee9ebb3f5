//! In-memory [`SyncLog`] implementation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use drift_types::FileMeta;
use ed25519_dalek::{SigningKey, VerifyingKey};
use tracing::{debug, info};

use crate::{LogError, SyncLog};

/// Parameters a node initialized its log handle with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogInit {
    /// Root identity of the log.
    pub log_key: VerifyingKey,
    /// Public half of the node's signing key.
    pub node_key: VerifyingKey,
    /// Local state directory.
    pub data_dir: PathBuf,
}

#[derive(Default)]
struct NodeState {
    init: Option<LogInit>,
    nodes: BTreeSet<[u8; 32]>,
    removed: Vec<VerifyingKey>,
    publishes: u64,
}

/// In-memory log handle.
///
/// Entries are shared between every handle joined to the same log; node
/// state is per handle.
pub struct MemoryLog {
    entries: Arc<RwLock<BTreeMap<String, Vec<FileMeta>>>>,
    state: Mutex<NodeState>,
    failing_publishes: AtomicU32,
}

impl MemoryLog {
    /// Create a new, empty log.
    pub fn new() -> Self {
        Self {
            entries: Arc::default(),
            state: Mutex::default(),
            failing_publishes: AtomicU32::new(0),
        }
    }

    /// Create another node's handle onto the same log entries.
    pub fn join(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            state: Mutex::default(),
            failing_publishes: AtomicU32::new(0),
        }
    }

    /// Parameters of the last successful `initialize`.
    pub fn init_params(&self) -> Option<LogInit> {
        self.state.lock().expect("lock poisoned").init.clone()
    }

    /// Current member set, as raw public keys.
    pub fn nodes(&self) -> Vec<[u8; 32]> {
        let state = self.state.lock().expect("lock poisoned");
        state.nodes.iter().copied().collect()
    }

    /// Every `remove_node` call received, in order.
    pub fn removed(&self) -> Vec<VerifyingKey> {
        self.state.lock().expect("lock poisoned").removed.clone()
    }

    /// Number of successful publishes through this handle.
    pub fn publish_count(&self) -> u64 {
        self.state.lock().expect("lock poisoned").publishes
    }

    /// Number of distinct identifiers in the log.
    pub fn len(&self) -> usize {
        self.entries.read().expect("lock poisoned").len()
    }

    /// Whether the log holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert metadata directly, bypassing initialization. For tests that
    /// need log content without a publishing node.
    pub fn seed(&self, meta: FileMeta) {
        Self::upsert(&self.entries, meta);
    }

    /// Make the next `n` publishes fail.
    pub fn fail_next_publishes(&self, n: u32) {
        self.failing_publishes.store(n, Ordering::SeqCst);
    }

    fn upsert(entries: &RwLock<BTreeMap<String, Vec<FileMeta>>>, meta: FileMeta) {
        let mut entries = entries.write().expect("lock poisoned");
        let metas = entries.entry(meta.identifier()).or_default();
        match metas.iter_mut().find(|m| m.key == meta.key) {
            Some(existing) => *existing = meta,
            None => metas.push(meta),
        }
    }

    fn require_init(&self) -> Result<(), LogError> {
        match self.state.lock().expect("lock poisoned").init {
            Some(_) => Ok(()),
            None => Err(LogError::NotInitialized),
        }
    }
}

impl Default for MemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SyncLog for MemoryLog {
    async fn initialize(
        &self,
        log_key: VerifyingKey,
        node_key: &SigningKey,
        data_dir: &Path,
    ) -> Result<(), LogError> {
        let mut state = self.state.lock().expect("lock poisoned");
        if let Some(init) = &state.init
            && init.log_key != log_key
        {
            return Err(LogError::RootKeyConflict);
        }
        state.init = Some(LogInit {
            log_key,
            node_key: node_key.verifying_key(),
            data_dir: data_dir.to_path_buf(),
        });
        info!(data_dir = %data_dir.display(), "log initialized");
        Ok(())
    }

    async fn publish_update(&self, meta: FileMeta) -> Result<(), LogError> {
        self.require_init()?;
        if self
            .failing_publishes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(LogError::Service("injected publish failure".into()));
        }
        debug!(hash = %meta.hash, protocol = %meta.protocol, "published update");
        Self::upsert(&self.entries, meta);
        self.state.lock().expect("lock poisoned").publishes += 1;
        Ok(())
    }

    async fn query(&self, keys: &[String]) -> Result<Vec<FileMeta>, LogError> {
        let entries = self.entries.read().expect("lock poisoned");
        Ok(keys
            .iter()
            .filter_map(|k| entries.get(k))
            .flatten()
            .cloned()
            .collect())
    }

    async fn update_nodes(&self, nodes: Vec<VerifyingKey>) -> Result<(), LogError> {
        self.require_init()?;
        let mut state = self.state.lock().expect("lock poisoned");
        state.nodes = nodes.iter().map(|k| k.to_bytes()).collect();
        debug!(count = state.nodes.len(), "updated node set");
        Ok(())
    }

    async fn remove_node(&self, node: VerifyingKey) -> Result<(), LogError> {
        self.require_init()?;
        let mut state = self.state.lock().expect("lock poisoned");
        state.nodes.remove(&node.to_bytes());
        state.removed.push(node);
        info!(node = ?node, "removed node from log");
        Ok(())
    }
}
