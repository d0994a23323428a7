//! Grid node binary
//!
//! Starts a node, reports connected clients periodically and evicts expired
//! TEMP entries until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use grid_config::GridConfig;
use grid_node::GridNode;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "grid-node")]
#[command(about = "Standalone grid execution node")]
#[command(version)]
struct Args {
    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on
    #[arg(short, long)]
    address: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Node name
    #[arg(short, long)]
    name: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args.log_level);

    let mut config = GridConfig::load(args.config.as_deref())
        .context("Failed to load grid node configuration")?;
    if let Some(address) = args.address {
        config.node.address = address;
    }
    if let Some(port) = args.port {
        config.node.port = port;
    }
    if let Some(name) = args.name {
        config.node.name = name;
    }

    let status_interval = Duration::from_secs(config.node.status_interval_secs.max(1));
    let eviction_interval = Duration::from_secs(config.node.eviction_interval_secs.max(1));

    let node = Arc::new(GridNode::start(config).await?);
    println!("Grid node '{}' listening on {}", node.name(), node.address());

    let status = tokio::spawn(report_clients(node.clone(), status_interval));
    let eviction = tokio::spawn(evict_temp(node.clone(), eviction_interval));

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Received shutdown signal, stopping grid node");

    status.abort();
    eviction.abort();
    node.stop().await;

    Ok(())
}

fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with(fmt::layer())
        .init();
}

async fn report_clients(node: Arc<GridNode>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        println!("Connected clients: {}", node.connected_clients());
    }
}

async fn evict_temp(node: Arc<GridNode>, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let evicted = node.evict_temp();
        if evicted > 0 {
            debug!(evicted, "Evicted expired TEMP entries");
        }
    }
}
