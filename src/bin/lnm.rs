//! lnm - supervise and query a local Lightning daemon
//!
//! Connects to (or launches) `lightningd`, keeps its sub-resources in sync
//! and reports what it sees.
//!
//! # Usage
//!
//! ```bash
//! # Follow connection, node info and wallet changes until Ctrl-C
//! lnm watch
//!
//! # Print the node info snapshot as JSON
//! lnm info --timeout 60
//!
//! # Issue a raw RPC call
//! lnm call listfunds
//! lnm call invoice '{"amount_msat": 1000, "label": "x", "description": "y"}'
//!
//! # Use a specific socket, never launching a daemon
//! LNM_SOCKET=/run/lightning/lightning-rpc lnm --no-spawn info
//!
//! # Enable debug logging
//! RUST_LOG=lnm_link=debug lnm watch
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use lnm_core::{ConnectionConfig, Network, NodeInfo};
use lnm_link::{
    CopyStaging, LinkBuilder, LinkConfig, LinkEvent, LinkHandle, Models, Settings,
};

/// Environment override for the RPC socket path.
const SOCKET_ENV: &str = "LNM_SOCKET";

// ============================================================================
// CLI Arguments
// ============================================================================

/// lnm - supervisor and sync client for a local Lightning daemon
#[derive(Parser, Debug)]
#[command(name = "lnm", version, about)]
struct Args {
    /// Daemon RPC socket [env: LNM_SOCKET]
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    /// Network to run the daemon on
    #[arg(long, global = true)]
    network: Option<Network>,

    /// Daemon data directory
    #[arg(long, global = true)]
    lightning_dir: Option<PathBuf>,

    /// Daemon executable (overrides LNM_LIGHTNINGD)
    #[arg(long, global = true)]
    lightningd: Option<PathBuf>,

    /// Settings file (default: <config dir>/lnm/settings.toml)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Never launch a daemon; only connect to a running one
    #[arg(long, global = true)]
    no_spawn: bool,

    /// First launch after installation: stage daemon binaries before starting
    #[arg(long, global = true)]
    first_start: bool,

    /// Directory holding the daemon binaries to stage on first start
    #[arg(long, global = true, requires = "first_start")]
    stage_from: Option<PathBuf>,

    /// Seconds to wait for the daemon before giving up
    #[arg(long, global = true, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Follow the link and log every change until interrupted
    Watch,
    /// Print the node info snapshot as JSON
    Info,
    /// Issue one RPC call and print its result as JSON
    Call {
        /// RPC method name
        method: String,
        /// Parameters as a JSON object or array
        params: Option<String>,
    },
}

// ============================================================================
// Entry Point
// ============================================================================

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so `info`/`call` output stays pipeable.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("lnm=info".parse()?)
                .add_directive("lnm_link=info".parse()?),
        )
        .init();

    run(args)
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let config = connection_config(&args)?;
    let link_config = LinkConfig {
        spawn_daemon: !args.no_spawn,
        ..LinkConfig::default()
    };
    let limit = Duration::from_secs(args.timeout);

    let mut builder = LinkBuilder::new(config.clone()).link_config(link_config);
    if let Some(source) = &args.stage_from {
        builder = builder.stager(CopyStaging::new(
            source,
            config.effective_lightning_dir().join("bin"),
        ));
    }
    let models = Models::new(&builder.rpc());
    let link = builder.collaborators(models.collaborators()).spawn();

    let result = match args.command {
        Command::Watch => watch(&link, &models).await,
        Command::Info => print_info(&link, limit).await,
        Command::Call { method, params } => call(&link, method, params, limit).await,
    };

    link.shutdown();
    result
}

/// Builds the connection config from flags, environment and settings.
fn connection_config(args: &Args) -> Result<ConnectionConfig> {
    let mut config = ConnectionConfig::default().with_first_start(args.first_start);

    let socket = args
        .socket
        .clone()
        .or_else(|| env::var_os(SOCKET_ENV).map(PathBuf::from));
    if let Some(socket) = socket {
        config = config.with_socket_path(socket);
    }
    if let Some(network) = args.network {
        config = config.with_network(network);
    }
    if let Some(dir) = &args.lightning_dir {
        config = config.with_lightning_dir(dir);
    }
    if let Some(lightningd) = &args.lightningd {
        config = config.with_lightningd_path(lightningd);
    }

    let settings = load_settings(args.settings.as_deref())?;
    Ok(settings.apply(config))
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    match path {
        Some(path) => Settings::load(path).context("Failed to load settings"),
        None => match Settings::default_path() {
            Some(path) => Settings::load_or_default(&path).context("Failed to load settings"),
            None => Ok(Settings::default()),
        },
    }
}

// ============================================================================
// Commands
// ============================================================================

async fn watch(link: &LinkHandle, models: &Models) -> Result<()> {
    let mut events = link.subscribe();
    let mut wallet = models.wallet.subscribe();
    let mut peers = models.peers.subscribe();
    let mut payments = models.payments.subscribe();
    let mut invoices = models.invoices.subscribe();

    let shutdown = wait_for_shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event stream lagged"),
                Err(RecvError::Closed) => break,
            },
            Ok(()) = wallet.changed() => {
                let funds = *wallet.borrow_and_update();
                info!(
                    onchain_msat = funds.onchain_msat(),
                    channel_msat = funds.channel_msat,
                    outputs = funds.output_count,
                    "Wallet updated"
                );
            }
            Ok(()) = peers.changed() => {
                let snapshot = peers.borrow_and_update();
                let connected = snapshot.iter().filter(|p| p.connected).count();
                info!(peers = snapshot.len(), connected, "Peers updated");
            }
            Ok(()) = payments.changed() => {
                info!(payments = payments.borrow_and_update().len(), "Payments updated");
            }
            Ok(()) = invoices.changed() => {
                info!(invoices = invoices.borrow_and_update().len(), "Invoices updated");
            }
        }
    }

    Ok(())
}

fn log_event(event: &LinkEvent) {
    match event {
        LinkEvent::ConnectionChanged { connected } => info!(connected, "Connection changed"),
        LinkEvent::ErrorChanged(Some(failure)) if failure.is_terminal() => {
            error!(error = failure.message(), "Link halted");
        }
        LinkEvent::ErrorChanged(Some(failure)) => warn!(error = failure.message(), "Link error"),
        LinkEvent::ErrorChanged(None) => info!("Link error cleared"),
        LinkEvent::InfoChanged(info) => info!(
            node_id = %info.id,
            address = ?info.primary_address().map(ToString::to_string),
            blockheight = info.blockheight,
            network = %info.network,
            version = %info.version,
            "Node info"
        ),
        LinkEvent::Notification { method, params } => {
            info!(method = %method, params = %params, "Notification");
        }
    }
}

async fn print_info(link: &LinkHandle, limit: Duration) -> Result<()> {
    // Subscribe before connecting so the first snapshot is not missed.
    let mut events = link.subscribe();
    link.wait_connected(limit)
        .await
        .context("Daemon not reachable")?;

    let status = link.status().await?;
    let info = if status.node_info.is_unknown() {
        timeout(limit, next_info(&mut events))
            .await
            .context("Timed out waiting for getinfo")??
    } else {
        status.node_info
    };

    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

async fn next_info(events: &mut tokio::sync::broadcast::Receiver<LinkEvent>) -> Result<NodeInfo> {
    loop {
        match events.recv().await {
            Ok(LinkEvent::InfoChanged(info)) => return Ok(info),
            Ok(_) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => anyhow::bail!("Link shut down before reporting node info"),
        }
    }
}

async fn call(link: &LinkHandle, method: String, params: Option<String>, limit: Duration) -> Result<()> {
    let params = match params {
        Some(text) => serde_json::from_str(&text).context("Parameters must be valid JSON")?,
        None => Value::Null,
    };

    link.wait_connected(limit)
        .await
        .context("Daemon not reachable")?;

    let result = link
        .rpc()
        .call(method.as_str(), params)
        .await
        .with_context(|| format!("{method} failed"))?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
