//! `driftd`: the drift daemon.
//!
//! Binary entrypoint that ties the drift components together into a running
//! sync node with its HTTP API.
//!
//! # Usage
//!
//! ```text
//! driftd start                               # start the node
//! driftd start -c drift.toml                 # start with a config file
//! driftd start -d ./node2 -l 127.0.0.1:4831  # second instance
//! driftd log-key                             # print this node's log key
//! driftd uploads                             # list completed uploads
//! ```

mod config;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drift_api::{ApiServer, ApiServerConfig};
use drift_cluster::{CoordinationStore, IdentityKey, MemoryCoordinator, NodeIdentity};
use drift_log::MemoryLog;
use drift_meta::MetaStore;
use drift_store::FileStore;
use drift_sync::{HashProtocol, ProtocolRegistry, SyncDeps, SyncService};
use drift_types::{NodeId, UploadNotifier};
use tracing::{error, info, warn};

use config::CliConfig;

// -----------------------------------------------------------------------
// CLI definition
// -----------------------------------------------------------------------

#[derive(Parser)]
#[command(name = "driftd", version, about = "drift object sync daemon")]
struct Cli {
    /// Path to TOML config file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory (useful for running multiple instances).
    #[arg(short, long, global = true, env = "DRIFT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the drift node.
    Start {
        /// Override API listen address (e.g. "127.0.0.1:4831").
        #[arg(short = 'l', long)]
        api_listen_addr: Option<String>,

        /// Override log level (e.g. "debug").
        #[arg(long)]
        log_level: Option<String>,
    },
    /// Print this node's public log key.
    LogKey,
    /// List completed uploads recorded on this node.
    Uploads,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = CliConfig::load(cli.config.as_deref())?;
    if let Some(dir) = cli.data_dir {
        config.node.data_dir = dir;
    }

    match cli.command {
        Commands::Start {
            api_listen_addr,
            log_level,
        } => {
            if let Some(addr) = api_listen_addr {
                config.node.api_listen_addr = addr;
            }
            if let Some(level) = log_level {
                config.log.level = level;
            }
            setup_tracing(&config.log.level);
            cmd_start(config).await
        }
        Commands::LogKey => cmd_log_key(&config),
        Commands::Uploads => cmd_uploads(&config),
    }
}

fn setup_tracing(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

// -----------------------------------------------------------------------
// driftd start
// -----------------------------------------------------------------------

async fn cmd_start(config: CliConfig) -> Result<()> {
    let data_dir = &config.node.data_dir;
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data dir {}", data_dir.display()))?;

    let identity = load_identity(&config)?;
    info!(
        node_id = %identity.node_id(),
        public_key = %hex::encode(identity.public_key().as_bytes()),
        data_dir = %data_dir.display(),
        "starting drift node"
    );

    let meta = Arc::new(
        MetaStore::open(data_dir.join("meta")).context("failed to open metadata store")?,
    );
    let store = Arc::new(FileStore::new(data_dir.join("store")).context("failed to open store")?);

    let mut protocols = ProtocolRegistry::new();
    for entry in &config.sync.protocols {
        protocols.register(Arc::new(HashProtocol::new(&entry.name, &entry.storage)));
    }
    if protocols.is_empty() {
        warn!("no sync protocols configured, every import will be rejected");
    }

    // Process-local coordination: a clustered daemon runs the election and
    // the presence lease against its own in-memory store.
    let coordinator: Option<Arc<dyn CoordinationStore>> = if config.cluster.enabled {
        Some(Arc::new(MemoryCoordinator::new()))
    } else {
        None
    };

    let deps = SyncDeps {
        log: Arc::new(MemoryLog::new()),
        objects: store.clone(),
        storage: store,
        meta,
        protocols,
        notifier: UploadNotifier::new(),
    };

    let service = SyncService::start(&identity, coordinator, deps, config.sync_config()?)
        .await
        .context("failed to start sync service")?;
    if let Some(outcome) = service.bootstrap() {
        info!(
            role = ?outcome.role,
            log_key = %hex::encode(outcome.log_key.as_bytes()),
            "sync log ready"
        );
    }

    let server = ApiServer::new(ApiServerConfig {
        node: service.node().clone(),
        tokens: config.api.tokens.clone(),
    });

    info!(addr = %config.node.api_listen_addr, "API ready");
    let result = server
        .serve_with_shutdown(&config.node.api_listen_addr, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(%e, "failed to listen for shutdown signal");
            }
        })
        .await
        .context("API server failed");

    service.shutdown();
    info!("drift node stopped");
    result
}

// -----------------------------------------------------------------------
// Identity management
// -----------------------------------------------------------------------

/// Resolve the node ID and long-term identity key, preferring config values
/// and falling back to files persisted in the data directory.
fn load_identity(config: &CliConfig) -> Result<NodeIdentity> {
    let data_dir = &config.node.data_dir;

    let node_id: NodeId = match &config.node.node_id {
        Some(hex_id) => hex_id.parse().context("invalid node.node_id")?,
        None => load_or_create_hex(data_dir, "node.id", || {
            hex::encode(rand::random::<[u8; 32]>())
        })?
        .parse()
        .context("failed to parse node.id")?,
    };

    let identity: IdentityKey = match &config.cluster.identity_key {
        Some(key) => key.parse().context("invalid cluster.identity_key")?,
        None => load_or_create_hex(data_dir, "identity.key", || {
            IdentityKey::generate().to_hex()
        })?
        .parse()
        .context("failed to parse identity.key")?,
    };

    NodeIdentity::new(node_id, identity).context("failed to derive sync key")
}

/// Read a hex value from `data_dir/file`, creating it with `generate` on
/// first run.
fn load_or_create_hex(
    data_dir: &Path,
    file: &str,
    generate: impl FnOnce() -> String,
) -> Result<String> {
    let path = data_dir.join(file);
    if path.exists() {
        let value =
            std::fs::read_to_string(&path).with_context(|| format!("failed to read {file}"))?;
        info!(path = %path.display(), "loaded existing {file}");
        Ok(value.trim().to_string())
    } else {
        std::fs::create_dir_all(data_dir).context("failed to create data dir")?;
        let value = generate();
        std::fs::write(&path, &value).with_context(|| format!("failed to write {file}"))?;
        info!(path = %path.display(), "generated new {file}");
        Ok(value)
    }
}

// -----------------------------------------------------------------------
// driftd log-key
// -----------------------------------------------------------------------

fn cmd_log_key(config: &CliConfig) -> Result<()> {
    let identity = load_identity(config)?;
    println!("{}", hex::encode(identity.public_key().as_bytes()));
    Ok(())
}

// -----------------------------------------------------------------------
// driftd uploads
// -----------------------------------------------------------------------

fn cmd_uploads(config: &CliConfig) -> Result<()> {
    let meta_path = config.node.data_dir.join("meta");

    let meta = MetaStore::open(&meta_path).map_err(|e| {
        anyhow::anyhow!(
            "cannot open metadata at {}. Is the node running? ({e})",
            meta_path.display(),
        )
    })?;

    let uploads = meta.all_uploads()?;
    println!("Completed uploads: {}", uploads.len());
    for upload in &uploads {
        println!(
            "  {} protocol={} size={} user={} created_at={}",
            upload.hash, upload.protocol, upload.size, upload.user_id, upload.created_at,
        );
    }

    Ok(())
}
