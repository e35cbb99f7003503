//! dmareg - Nyx Buffer Range Registry Daemon
//!
//! Tracks which exported buffer backs which virtual address range, per
//! process:
//! - Producers register and unregister buffer ranges
//! - Consumers resolve address ranges to buffer handles
//! - One session per connection, scoped to the peer's address space

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use nyx_dmareg::config::DmaregConfig;
use nyx_dmareg::ipc::DmaregServer;
use nyx_dmareg::state::DaemonState;

#[derive(Parser)]
#[command(name = "dmaregd", version)]
#[command(about = "Nyx Buffer Range Registry Daemon")]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = "/grimoire/system/dmareg.yaml")]
    config: PathBuf,

    /// Socket path (overrides the configuration)
    #[arg(short, long)]
    socket: Option<String>,

    /// Debug mode
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = DmaregConfig::load(&args.config)?;
    if let Some(socket) = args.socket {
        config.daemon.socket_path = socket;
    }

    // Initialize logging
    let log_level = if args.debug { "debug" } else { config.daemon.log_level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(filter)
        .init();

    info!("dmareg v{} starting", env!("CARGO_PKG_VERSION"));

    let socket_path = config.daemon.socket_path.clone();
    let state = Arc::new(DaemonState::new(config));
    let server = DmaregServer::new(&socket_path, Arc::clone(&state));

    tokio::select! {
        result = server.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    let leftover = state.registry.drain();
    if leftover > 0 {
        warn!("{} address spaces were still registered at shutdown", leftover);
    }
    let _ = std::fs::remove_file(&socket_path);

    Ok(())
}
