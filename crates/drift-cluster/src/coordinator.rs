//! Distributed coordination store interface and an in-process implementation.
//!
//! The node consumes an etcd-like store: key get/put, prefix scans, leases
//! with a TTL, prefix watches and a session-scoped leader election. The
//! store is always passed explicitly as an `Arc<dyn CoordinationStore>`.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::{Notify, mpsc};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::ClusterError;

/// Identifier of a granted lease.
pub type LeaseId = u64;

/// A change observed by a prefix watch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// A key was created or overwritten.
    Put {
        /// Full key.
        key: String,
        /// New value.
        value: Vec<u8>,
    },
    /// A key was deleted, explicitly or by lease expiry.
    Delete {
        /// Full key.
        key: String,
    },
}

/// Key-value coordination store.
#[async_trait::async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Read one key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ClusterError>;

    /// Write one key without a lease.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ClusterError>;

    /// All keys starting with `prefix`, in key order.
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ClusterError>;

    /// Grant a lease that expires `ttl` after its last renewal.
    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, ClusterError>;

    /// Renew a lease for another full TTL.
    async fn keep_alive(&self, lease: LeaseId) -> Result<(), ClusterError>;

    /// Write a key that is deleted when `lease` expires.
    async fn put_with_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), ClusterError>;

    /// Stream changes to keys under `prefix` from now on.
    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, ClusterError>;

    /// Open a session-scoped election. Leadership held by the session is
    /// released when the returned handle is dropped.
    async fn election(&self, name: &str) -> Result<Box<dyn Election>, ClusterError>;
}

/// A leader election bound to one session.
#[async_trait::async_trait]
pub trait Election: Send + Sync {
    /// Value proclaimed by the current leader, if any.
    async fn leader(&self) -> Result<Option<Vec<u8>>, ClusterError>;

    /// Wait until this session becomes leader. Callers bound the wait with a
    /// timeout; cancelling the future abandons the campaign.
    async fn campaign(&self, value: Vec<u8>) -> Result<(), ClusterError>;

    /// Give up leadership if held.
    async fn resign(&self) -> Result<(), ClusterError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

struct Entry {
    value: Vec<u8>,
    lease: Option<LeaseId>,
}

struct Lease {
    ttl: Duration,
    deadline: Instant,
    keys: BTreeSet<String>,
}

#[derive(Default)]
struct KvState {
    kv: BTreeMap<String, Entry>,
    leases: HashMap<LeaseId, Lease>,
    watchers: Vec<(String, mpsc::UnboundedSender<WatchEvent>)>,
}

impl KvState {
    fn emit(&mut self, event: WatchEvent) {
        let key = match &event {
            WatchEvent::Put { key, .. } | WatchEvent::Delete { key } => key.clone(),
        };
        self.watchers.retain(|(prefix, tx)| {
            if key.starts_with(prefix.as_str()) {
                tx.send(event.clone()).is_ok()
            } else {
                !tx.is_closed()
            }
        });
    }

    fn insert(&mut self, key: &str, value: Vec<u8>, lease: Option<LeaseId>) {
        let previous = self.kv.insert(
            key.to_string(),
            Entry {
                value: value.clone(),
                lease,
            },
        );
        if let Some(old) = previous.and_then(|e| e.lease)
            && Some(old) != lease
            && let Some(l) = self.leases.get_mut(&old)
        {
            l.keys.remove(key);
        }
        self.emit(WatchEvent::Put {
            key: key.to_string(),
            value,
        });
    }

    fn revoke(&mut self, id: LeaseId) -> bool {
        let Some(lease) = self.leases.remove(&id) else {
            return false;
        };
        for key in lease.keys {
            if self.kv.remove(&key).is_some() {
                self.emit(WatchEvent::Delete { key });
            }
        }
        true
    }
}

#[derive(Default)]
struct ElectionState {
    leader: Mutex<Option<(u64, Vec<u8>)>>,
    changed: Notify,
}

impl ElectionState {
    fn release(&self, session: u64) -> bool {
        let mut leader = self.leader.lock().expect("lock poisoned");
        if leader.as_ref().is_some_and(|(s, _)| *s == session) {
            *leader = None;
            drop(leader);
            self.changed.notify_waiters();
            return true;
        }
        false
    }
}

#[derive(Default)]
struct Inner {
    state: Mutex<KvState>,
    elections: Mutex<HashMap<String, Arc<ElectionState>>>,
    next_lease: AtomicU64,
    next_session: AtomicU64,
    unreachable: AtomicBool,
}

/// In-process coordination store.
///
/// Cloning yields another handle onto the same store, so several nodes in
/// one process share keys, leases and elections. Leases expire on the tokio
/// clock, which makes expiry testable with paused time.
#[derive(Clone, Default)]
pub struct MemoryCoordinator {
    inner: Arc<Inner>,
}

impl MemoryCoordinator {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail as if the store were unreachable.
    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Expire a lease immediately, deleting its keys.
    pub fn expire_lease(&self, lease: LeaseId) -> bool {
        let revoked = self.inner.state.lock().expect("lock poisoned").revoke(lease);
        if revoked {
            info!(lease, "lease expired");
        }
        revoked
    }

    /// Lease a key is attached to, if any.
    pub fn lease_of(&self, key: &str) -> Option<LeaseId> {
        let state = self.inner.state.lock().expect("lock poisoned");
        state.kv.get(key).and_then(|e| e.lease)
    }

    fn check(&self) -> Result<(), ClusterError> {
        if self.inner.unreachable.load(Ordering::SeqCst) {
            return Err(ClusterError::Coordination("store unreachable".into()));
        }
        Ok(())
    }

    fn spawn_reaper(inner: Weak<Inner>, id: LeaseId, first_deadline: Instant) {
        tokio::spawn(async move {
            let mut deadline = first_deadline;
            loop {
                tokio::time::sleep_until(deadline).await;
                let Some(inner) = inner.upgrade() else {
                    return;
                };
                let mut state = inner.state.lock().expect("lock poisoned");
                match state.leases.get(&id) {
                    None => return,
                    Some(lease) if lease.deadline > deadline => deadline = lease.deadline,
                    Some(_) => {
                        state.revoke(id);
                        debug!(lease = id, "lease reached ttl");
                        return;
                    }
                }
            }
        });
    }
}

#[async_trait::async_trait]
impl CoordinationStore for MemoryCoordinator {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ClusterError> {
        self.check()?;
        let state = self.inner.state.lock().expect("lock poisoned");
        Ok(state.kv.get(key).map(|e| e.value.clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<(), ClusterError> {
        self.check()?;
        self.inner
            .state
            .lock()
            .expect("lock poisoned")
            .insert(key, value, None);
        Ok(())
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>, ClusterError> {
        self.check()?;
        let state = self.inner.state.lock().expect("lock poisoned");
        Ok(state
            .kv
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| (k.clone(), e.value.clone()))
            .collect())
    }

    async fn grant_lease(&self, ttl: Duration) -> Result<LeaseId, ClusterError> {
        self.check()?;
        let id = self.inner.next_lease.fetch_add(1, Ordering::SeqCst) + 1;
        let deadline = Instant::now() + ttl;
        self.inner.state.lock().expect("lock poisoned").leases.insert(
            id,
            Lease {
                ttl,
                deadline,
                keys: BTreeSet::new(),
            },
        );
        Self::spawn_reaper(Arc::downgrade(&self.inner), id, deadline);
        debug!(lease = id, ?ttl, "granted lease");
        Ok(id)
    }

    async fn keep_alive(&self, lease: LeaseId) -> Result<(), ClusterError> {
        self.check()?;
        let mut state = self.inner.state.lock().expect("lock poisoned");
        let l = state
            .leases
            .get_mut(&lease)
            .ok_or(ClusterError::LeaseNotFound(lease))?;
        l.deadline = Instant::now() + l.ttl;
        Ok(())
    }

    async fn put_with_lease(
        &self,
        key: &str,
        value: Vec<u8>,
        lease: LeaseId,
    ) -> Result<(), ClusterError> {
        self.check()?;
        let mut state = self.inner.state.lock().expect("lock poisoned");
        let l = state
            .leases
            .get_mut(&lease)
            .ok_or(ClusterError::LeaseNotFound(lease))?;
        l.keys.insert(key.to_string());
        state.insert(key, value, Some(lease));
        Ok(())
    }

    async fn watch_prefix(
        &self,
        prefix: &str,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>, ClusterError> {
        self.check()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .state
            .lock()
            .expect("lock poisoned")
            .watchers
            .push((prefix.to_string(), tx));
        Ok(rx)
    }

    async fn election(&self, name: &str) -> Result<Box<dyn Election>, ClusterError> {
        self.check()?;
        let state = {
            let mut elections = self.inner.elections.lock().expect("lock poisoned");
            elections.entry(name.to_string()).or_default().clone()
        };
        let session = self.inner.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Box::new(MemoryElection {
            store: self.clone(),
            state,
            session,
        }))
    }
}

struct MemoryElection {
    store: MemoryCoordinator,
    state: Arc<ElectionState>,
    session: u64,
}

#[async_trait::async_trait]
impl Election for MemoryElection {
    async fn leader(&self) -> Result<Option<Vec<u8>>, ClusterError> {
        self.store.check()?;
        let leader = self.state.leader.lock().expect("lock poisoned");
        Ok(leader.as_ref().map(|(_, v)| v.clone()))
    }

    async fn campaign(&self, value: Vec<u8>) -> Result<(), ClusterError> {
        loop {
            self.store.check()?;
            let changed = self.state.changed.notified();
            tokio::pin!(changed);
            changed.as_mut().enable();
            {
                let mut leader = self.state.leader.lock().expect("lock poisoned");
                match leader.as_ref() {
                    None => {
                        *leader = Some((self.session, value));
                        return Ok(());
                    }
                    Some((s, _)) if *s == self.session => return Ok(()),
                    Some(_) => {}
                }
            }
            changed.await;
        }
    }

    async fn resign(&self) -> Result<(), ClusterError> {
        self.store.check()?;
        self.state.release(self.session);
        Ok(())
    }
}

impl Drop for MemoryElection {
    fn drop(&mut self) {
        self.state.release(self.session);
    }
}
