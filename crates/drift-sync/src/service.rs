//! Startup orchestration of the sync pipeline.

use std::path::PathBuf;
use std::sync::Arc;

use drift_cluster::bootstrap::{self, BootstrapConfig, BootstrapOutcome};
use drift_cluster::membership::{self, MembershipConfig, MembershipHandle};
use drift_cluster::{CoordinationStore, NodeIdentity};
use drift_jobs::schedule::TimeOfDay;
use drift_jobs::{JobConfig, JobRunnerHandle};
use tracing::info;

use crate::error::SyncError;
use crate::node::{SCAN_TASK, SyncDeps, SyncNode};
use crate::tasks::{ScanTask, UpdateListener, UploadTask, VerifyTask};

/// Directory under the node's data dir holding the log's local state.
pub const LOG_DATA_DIR: &str = "sync_data";

/// Sync service settings.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Whether syncing is enabled. When disabled the log is never
    /// initialized and updates are no-ops.
    pub enabled: bool,
    /// Node data directory.
    pub data_dir: PathBuf,
    /// Bootstrap election settings, including whether clustering is on.
    pub bootstrap: BootstrapConfig,
    /// Presence lease settings.
    pub membership: MembershipConfig,
    /// Job runner settings.
    pub jobs: JobConfig,
    /// UTC time of the daily reconciliation scan.
    pub scan_at: TimeOfDay,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            data_dir: PathBuf::from("./data"),
            bootstrap: BootstrapConfig::default(),
            membership: MembershipConfig::default(),
            jobs: JobConfig::default(),
            scan_at: TimeOfDay::MIDNIGHT,
        }
    }
}

/// A running sync service.
pub struct SyncService {
    node: Arc<SyncNode>,
    bootstrap: Option<BootstrapOutcome>,
    membership: Option<MembershipHandle>,
    jobs: JobRunnerHandle,
}

impl SyncService {
    /// Bootstrap the log, join the cluster and start the pipeline.
    ///
    /// Any bootstrap or registration failure aborts startup.
    pub async fn start(
        identity: &NodeIdentity,
        coordinator: Option<Arc<dyn CoordinationStore>>,
        deps: SyncDeps,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        let mut bootstrap_outcome = None;
        let mut membership_handle = None;

        if config.enabled {
            let log_dir = config.data_dir.join(LOG_DATA_DIR);
            tokio::fs::create_dir_all(&log_dir).await?;
            let outcome = bootstrap::bootstrap_log(
                identity,
                coordinator.as_deref(),
                deps.log.as_ref(),
                &log_dir,
                &config.bootstrap,
            )
            .await?;

            if config.bootstrap.cluster_enabled
                && let Some(store) = coordinator.clone()
            {
                let handle = membership::start(
                    identity,
                    store,
                    deps.log.clone(),
                    config.membership.clone(),
                )
                .await?;
                membership_handle = Some(handle);
            }
            bootstrap_outcome = Some(outcome);
        }

        let (queue, mut runner) = drift_jobs::channel(deps.meta.clone(), config.jobs.clone());
        let node = Arc::new(SyncNode::new(
            config.enabled,
            identity.public_key(),
            deps,
            queue,
        ));

        runner.register(Arc::new(VerifyTask(node.clone())));
        runner.register(Arc::new(UploadTask(node.clone())));
        runner.register(Arc::new(ScanTask(node.clone())));
        if config.enabled {
            runner.schedule_daily(SCAN_TASK, config.scan_at);
        }
        node.notifier()
            .subscribe(Arc::new(UpdateListener(Arc::downgrade(&node))));
        let jobs = runner.start()?;

        info!(
            enabled = config.enabled,
            protocols = ?node.protocols().names(),
            clustered = membership_handle.is_some(),
            "sync service started"
        );

        Ok(Self {
            node,
            bootstrap: bootstrap_outcome,
            membership: membership_handle,
            jobs,
        })
    }

    /// The pipeline.
    pub fn node(&self) -> &Arc<SyncNode> {
        &self.node
    }

    /// Bootstrap outcome, if syncing is enabled.
    pub fn bootstrap(&self) -> Option<&BootstrapOutcome> {
        self.bootstrap.as_ref()
    }

    /// Membership tracker, if clustering is enabled.
    pub fn membership(&self) -> Option<&MembershipHandle> {
        self.membership.as_ref()
    }

    /// Job runner.
    pub fn jobs(&self) -> &JobRunnerHandle {
        &self.jobs
    }

    /// Stop the job runner and the membership tracker.
    pub fn shutdown(&self) {
        info!("sync service shutting down");
        self.jobs.shutdown();
        if let Some(membership) = &self.membership {
            membership.leave();
        }
    }
}
