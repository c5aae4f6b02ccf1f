//! privd - privilege broker daemon.
//!
//! Bootstrap: parse arguments, initialize logging, take the single-instance
//! lock, open the privilege store, register the privilege-manager service,
//! and run the socket main loop until SIGTERM/SIGINT.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use fs2::FileExt;
use privd_core::config::PrivdConfig;
use privd_daemon::protocol::SocketManager;
use privd_daemon::service::PrivilegeService;
use privd_daemon::store::PrivilegeDb;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// privd - per-application privilege broker
#[derive(Parser, Debug)]
#[command(name = "privd")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long, default_value = "/etc/privd/privd.toml")]
    config: PathBuf,

    /// Directory for the daemon's Unix sockets (overrides config)
    #[arg(long)]
    runtime_dir: Option<PathBuf>,

    /// Path to the privilege database file (overrides config)
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Path to the PID file (overrides config)
    #[arg(long)]
    pid_file: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Resolved daemon paths, CLI arguments taking precedence over the config
/// file.
struct DaemonPaths {
    runtime_dir: PathBuf,
    db_path: PathBuf,
    pid_file: PathBuf,
}

impl DaemonPaths {
    fn new(args: &Args) -> Result<Self> {
        let config = if args.config.exists() {
            PrivdConfig::from_file(&args.config).context("failed to load configuration")?
        } else {
            PrivdConfig::default()
        };

        Ok(Self {
            runtime_dir: args
                .runtime_dir
                .clone()
                .unwrap_or(config.daemon.runtime_dir),
            db_path: args.db_path.clone().unwrap_or(config.daemon.db_path),
            pid_file: args.pid_file.clone().unwrap_or(config.daemon.pid_file),
        })
    }
}

/// Take the single-instance lock and record our PID.
///
/// The returned file keeps the lock for the daemon's lifetime.
fn acquire_instance_lock(pid_path: &PathBuf) -> Result<File> {
    if let Some(parent) = pid_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let mut file = File::create(pid_path)
        .with_context(|| format!("failed to create PID file {}", pid_path.display()))?;
    file.try_lock_exclusive()
        .with_context(|| "another privd instance is already running")?;
    file.write_all(std::process::id().to_string().as_bytes())
        .context("failed to write PID file")?;
    Ok(file)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))
        .context("invalid log level")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let paths = DaemonPaths::new(&args)?;
    let _instance_lock = acquire_instance_lock(&paths.pid_file)?;

    if let Some(parent) = paths.db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let store = PrivilegeDb::open(&paths.db_path)
        .with_context(|| format!("failed to open store at {}", paths.db_path.display()))?;
    let store = Arc::new(Mutex::new(store));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let result = runtime.block_on(async {
        let mut manager = SocketManager::new();
        manager
            .register_service(Box::new(PrivilegeService::new(
                Arc::clone(&store),
                &paths.runtime_dir,
            )))
            .context("failed to register privilege-manager service")?;

        info!(
            runtime_dir = %paths.runtime_dir.display(),
            db = %paths.db_path.display(),
            "privd started"
        );
        manager.main_loop().await.context("main loop failed")
    });

    if let Err(e) = std::fs::remove_file(&paths.pid_file) {
        warn!("failed to remove PID file: {e}");
    }
    info!("privd stopped");
    result
}
