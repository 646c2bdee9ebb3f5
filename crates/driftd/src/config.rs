//! TOML configuration for the drift daemon.
//!
//! Every section is optional; a missing file yields the defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use drift_cluster::{BootstrapConfig, MembershipConfig};
use drift_jobs::JobConfig;
use drift_jobs::schedule::TimeOfDay;
use drift_sync::SyncConfig;
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Node identity and addresses.
    pub node: NodeSection,
    /// Cluster coordination.
    pub cluster: ClusterSection,
    /// Sync pipeline.
    pub sync: SyncSection,
    /// Job runner tuning.
    pub jobs: JobsSection,
    /// HTTP API settings.
    pub api: ApiSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[node]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct NodeSection {
    /// Directory for persistent data (metadata DB, objects, log state).
    pub data_dir: PathBuf,
    /// Hex node ID. Generated and persisted in `data_dir` if unset.
    pub node_id: Option<String>,
    /// Address for the HTTP API.
    pub api_listen_addr: String,
}

impl Default for NodeSection {
    fn default() -> Self {
        let data_dir = dirs::home_dir()
            .map(|h| h.join(".drift"))
            .unwrap_or_else(|| PathBuf::from(".drift"));
        Self {
            data_dir,
            node_id: None,
            api_listen_addr: "0.0.0.0:4830".to_string(),
        }
    }
}

/// `[cluster]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ClusterSection {
    /// Join a cluster through the coordination store. A standalone node
    /// bootstraps its own log.
    pub enabled: bool,
    /// Hex long-term identity key shared by all nodes. Generated and
    /// persisted in `data_dir` if unset.
    pub identity_key: Option<String>,
    /// Upper bound on the bootstrap leader campaign.
    pub campaign_timeout_secs: u64,
    /// How long a follower waits for the bootstrap record.
    pub record_wait_secs: u64,
    /// TTL of this node's presence lease.
    pub membership_ttl_secs: u64,
}

impl Default for ClusterSection {
    fn default() -> Self {
        Self {
            enabled: false,
            identity_key: None,
            campaign_timeout_secs: 30,
            record_wait_secs: 60,
            membership_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// `[sync]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    /// Whether the node takes part in syncing at all.
    pub enabled: bool,
    /// UTC time of the daily reconciliation scan, `"HH:MM"`.
    pub scan_time: String,
    /// Known sync protocols, tried in order on import.
    pub protocols: Vec<ProtocolEntry>,
}

impl Default for SyncSection {
    fn default() -> Self {
        Self {
            enabled: true,
            scan_time: "00:00".to_string(),
            protocols: vec![ProtocolEntry {
                name: "drift1".to_string(),
                storage: "store1".to_string(),
            }],
        }
    }
}

/// One `[[sync.protocols]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProtocolEntry {
    /// Identifier prefix, e.g. `drift1` for `drift1:<hash>`.
    pub name: String,
    /// Durable storage protocol objects are uploaded under.
    pub storage: String,
}

/// `[jobs]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct JobsSection {
    /// Runs per job before it is dropped.
    pub max_attempts: u32,
    /// Base delay between attempts, multiplied by the attempt number.
    pub retry_backoff_secs: u64,
    /// Jobs running at once.
    pub concurrency: usize,
}

impl Default for JobsSection {
    fn default() -> Self {
        let defaults = JobConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            retry_backoff_secs: defaults.retry_backoff.as_secs(),
            concurrency: defaults.concurrency,
        }
    }
}

/// `[api]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    /// Bearer token → user ID.
    pub tokens: HashMap<String, u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Parsed scan time.
    pub fn scan_time(&self) -> anyhow::Result<TimeOfDay> {
        parse_time_of_day(&self.sync.scan_time)
    }

    /// Settings for the sync service.
    pub fn sync_config(&self) -> anyhow::Result<SyncConfig> {
        let lease_ttl = Duration::from_secs(self.cluster.membership_ttl_secs.max(1));
        Ok(SyncConfig {
            enabled: self.sync.enabled,
            data_dir: self.node.data_dir.clone(),
            bootstrap: BootstrapConfig {
                cluster_enabled: self.cluster.enabled,
                campaign_timeout: Duration::from_secs(self.cluster.campaign_timeout_secs),
                record_wait: Duration::from_secs(self.cluster.record_wait_secs),
            },
            membership: MembershipConfig {
                lease_ttl,
                renew_interval: Some(lease_ttl / 3),
            },
            jobs: JobConfig {
                concurrency: self.jobs.concurrency,
                max_attempts: self.jobs.max_attempts,
                retry_backoff: Duration::from_secs(self.jobs.retry_backoff_secs),
            },
            scan_at: self.scan_time()?,
        })
    }
}

/// Parse `"HH:MM"` into a UTC time of day.
fn parse_time_of_day(s: &str) -> anyhow::Result<TimeOfDay> {
    let Some((hour, minute)) = s.trim().split_once(':') else {
        bail!("scan_time must be HH:MM, got {s:?}");
    };
    let hour: u8 = hour.parse().context("invalid scan_time hour")?;
    let minute: u8 = minute.parse().context("invalid scan_time minute")?;
    TimeOfDay::new(hour, minute).with_context(|| format!("scan_time out of range: {s:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[node]
data_dir = "/tmp/drift-test"
node_id = "0101010101010101010101010101010101010101010101010101010101010101"
api_listen_addr = "127.0.0.1:5830"

[cluster]
enabled = true
identity_key = "0202020202020202020202020202020202020202020202020202020202020202"
campaign_timeout_secs = 5
record_wait_secs = 10
membership_ttl_secs = 300

[sync]
enabled = true
scan_time = "03:30"

[[sync.protocols]]
name = "proto1"
storage = "store1"

[[sync.protocols]]
name = "proto2"
storage = "store2"

[jobs]
max_attempts = 5
retry_backoff_secs = 2
concurrency = 8

[api.tokens]
alice-token = 1
bob-token = 2

[log]
level = "debug"
"#;

        let config = CliConfig::from_toml(toml).unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/drift-test"));
        assert_eq!(config.node.api_listen_addr, "127.0.0.1:5830");
        assert!(config.node.node_id.is_some());
        assert!(config.cluster.enabled);
        assert_eq!(config.cluster.campaign_timeout_secs, 5);
        assert_eq!(config.cluster.record_wait_secs, 10);
        assert_eq!(config.cluster.membership_ttl_secs, 300);
        assert_eq!(config.sync.protocols.len(), 2);
        assert_eq!(config.sync.protocols[1].storage, "store2");
        assert_eq!(config.jobs.max_attempts, 5);
        assert_eq!(config.api.tokens.get("bob-token"), Some(&2));
        assert_eq!(config.log.level, "debug");

        let sync = config.sync_config().unwrap();
        assert!(sync.bootstrap.cluster_enabled);
        assert_eq!(sync.bootstrap.record_wait, Duration::from_secs(10));
        assert_eq!(sync.membership.lease_ttl, Duration::from_secs(300));
        assert_eq!(sync.membership.renew_interval, Some(Duration::from_secs(100)));
        assert_eq!(sync.jobs.concurrency, 8);
        assert_eq!(sync.scan_at, TimeOfDay::new(3, 30).unwrap());
    }

    #[test]
    fn test_parse_minimal_config() {
        let config = CliConfig::from_toml("").unwrap();
        let expected_default = dirs::home_dir()
            .map(|h| h.join(".drift"))
            .unwrap_or_else(|| PathBuf::from(".drift"));
        assert_eq!(config.node.data_dir, expected_default);
        assert_eq!(config.node.api_listen_addr, "0.0.0.0:4830");
        assert!(!config.cluster.enabled);
        assert!(config.sync.enabled);
        assert_eq!(config.sync.protocols.len(), 1);
        assert!(config.api.tokens.is_empty());

        let sync = config.sync_config().unwrap();
        assert_eq!(sync.scan_at, TimeOfDay::MIDNIGHT);
        assert_eq!(sync.jobs.max_attempts, JobConfig::default().max_attempts);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml = r#"
[sync]
enabled = false

[jobs]
concurrency = 1
"#;
        let config = CliConfig::from_toml(toml).unwrap();
        assert!(!config.sync.enabled);
        assert_eq!(config.jobs.concurrency, 1);
        // Unspecified fields get defaults.
        assert_eq!(config.sync.scan_time, "00:00");
        assert_eq!(config.jobs.retry_backoff_secs, 5);
        assert_eq!(config.node.api_listen_addr, "0.0.0.0:4830");
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drift.toml");
        std::fs::write(
            &path,
            r#"
[node]
data_dir = "/tmp/test-drift"
api_listen_addr = "127.0.0.1:9999"
"#,
        )
        .unwrap();

        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.node.data_dir, PathBuf::from("/tmp/test-drift"));
        assert_eq!(config.node.api_listen_addr, "127.0.0.1:9999");
    }

    #[test]
    fn test_load_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CliConfig::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_parse_time_of_day() {
        assert_eq!(parse_time_of_day("00:00").unwrap(), TimeOfDay::MIDNIGHT);
        assert_eq!(parse_time_of_day(" 23:59 ").unwrap(), TimeOfDay::new(23, 59).unwrap());
        assert!(parse_time_of_day("24:00").is_err());
        assert!(parse_time_of_day("12:60").is_err());
        assert!(parse_time_of_day("noon").is_err());
    }
}
