//! scrapegate daemon
//!
//! Binds the loopback port, publishes it, and serves until idle or signalled.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use scrapegate::{Daemon, DaemonConfig, DaemonHandle};

/// Loopback fetch daemon for metadata scrapers
#[derive(Parser)]
#[command(name = "scrapegate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory holding the port file, hosts file and character table
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Preferred loopback port
    #[arg(short, long)]
    port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level);

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::load(path)
            .with_context(|| format!("Failed to load configuration from {:?}", path))?,
        None => DaemonConfig::default(),
    };
    if let Some(dir) = cli.data_dir {
        config.data_dir = dir;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let daemon = Daemon::bind(config, cli.config.clone())
        .await
        .context("Failed to start daemon")?;
    info!(addr = %daemon.local_addr(), "scrapegate started");

    spawn_reload_listener(daemon.handle())?;

    daemon
        .run_until(wait_for_shutdown())
        .await
        .context("Daemon stopped with an error")?;

    Ok(())
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Reloads settings on SIGHUP.
#[cfg(unix)]
fn spawn_reload_listener(handle: DaemonHandle) -> Result<()> {
    let mut sighup = signal::unix::signal(signal::unix::SignalKind::hangup())
        .context("Failed to register SIGHUP handler")?;
    tokio::spawn(async move {
        while sighup.recv().await.is_some() {
            info!("Received SIGHUP");
            if let Err(e) = handle.reload() {
                warn!(error = %e, "reload failed, keeping current settings");
            }
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn spawn_reload_listener(_handle: DaemonHandle) -> Result<()> {
    Ok(())
}

async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        let sigterm = signal::unix::signal(signal::unix::SignalKind::terminate());
        let sigint = signal::unix::signal(signal::unix::SignalKind::interrupt());
        match (sigterm, sigint) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                    _ = sigint.recv() => info!("Received SIGINT"),
                }
            }
            (Err(e), _) | (_, Err(e)) => {
                warn!(error = %e, "signal handlers unavailable, waiting for Ctrl+C");
                if signal::ctrl_c().await.is_ok() {
                    info!("Received Ctrl+C");
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C");
        }
    }
}
