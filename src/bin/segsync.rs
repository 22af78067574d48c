//! Segsync CLI Binary
//!
//! Runs a publishing session: watches a segment directory and synchronizes
//! it into a replicated state tree through a replication peer.

use anyhow::Context;
use clap::{Parser, Subcommand};
use segsync::config::SyncConfig;
use segsync::identity::Identity;
use segsync::logging::init_logging;
use segsync::peer::HttpPeer;
use segsync::session::{Session, SledSessionStore};
use segsync::types::StateUri;
use segsync::watch::SegmentWatcher;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "segsync", version, about = "Causal state synchronization for live media segments")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Watch a segment directory and publish it to the replication peer.
    Watch {
        /// Path to the configuration file.
        #[arg(long, default_value = "segsync.toml")]
        config: PathBuf,

        /// Override the watched directory from the config file.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Write a starter configuration file.
    Init {
        /// Where to write the configuration.
        #[arg(long, default_value = "segsync.toml")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Watch { config, dir } => run_watch(config, dir).await,
        Command::Init { config } => run_init(config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn run_watch(config_path: PathBuf, dir_override: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = SyncConfig::load(&config_path)
        .with_context(|| format!("loading config from {:?}", config_path))?;
    if let Some(dir) = dir_override {
        config.watch_dir = dir;
    }

    init_logging(Some(&config.logging)).context("initializing logging")?;
    info!(config = ?config_path, "Segsync starting");

    let seed_hex = config.identity.resolve_seed_hex()?;
    let identity = Arc::new(Identity::from_seed_hex(&seed_hex)?);
    info!(address = %identity.address(), "Loaded identity");

    let network_timeout = config
        .watch_config()
        .network_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(30));
    let peer = Arc::new(HttpPeer::new(
        &config.peer.endpoint,
        Arc::clone(&identity),
        network_timeout,
    )?);

    let data_dir = config.storage.resolve_data_dir()?;
    let store = Arc::new(
        SledSessionStore::open(data_dir.join("sessions"))
            .with_context(|| format!("opening session store under {:?}", data_dir))?,
    );
    let session = Session::load_or_create(store, StateUri::new(config.state_uri.clone()))?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received ctrl-c, shutting down");
            let _ = shutdown_tx.send(true);
        }
    });

    let mut watcher = SegmentWatcher::new(config.watch_config(), peer, identity, session);
    watcher.run(shutdown_rx).await?;
    Ok(())
}

fn run_init(config_path: PathBuf) -> anyhow::Result<()> {
    SyncConfig::write_starter(&config_path)
        .with_context(|| format!("writing starter config to {:?}", config_path))?;
    println!("Wrote starter configuration to {}", config_path.display());
    println!("Fill in identity.seed_hex (or identity.seed_file) before running `segsync watch`.");
    Ok(())
}
