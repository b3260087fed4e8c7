use anyhow::{Context, Result};
use clap::Parser;
use relay_server::{CliOverrides, RelayConfig, RelayServer};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "relay-server")]
#[command(about = "WebSocket rendezvous relay for peer-to-peer signaling")]
struct Cli {
    /// Address to bind (overrides [server] host)
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on, 0 for an ephemeral port (overrides [server] port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Config file (defaults to ./relay.toml when present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Setup logging
    let default_directive = if args.debug {
        "relay_server=debug,tower_http=debug,info"
    } else {
        "relay_server=info,tower_http=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(env_filter)
        .init();

    let cli = CliOverrides {
        host: args.host,
        port: args.port,
    };
    let config = RelayConfig::load(args.config.as_deref(), &cli)?;

    info!(
        "Starting relay (ids: {} chars, outlet capacity {})",
        config.ids.length(),
        config.outlet_capacity
    );

    let server = RelayServer::start(config).await?;

    // Machine-readable line for scripts that start us on port 0
    println!("RELAY_ADDR={}", server.local_addr());
    info!("WebSocket endpoint: {}", server.ws_url());
    info!("Health: http://{}/health", server.local_addr());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to install Ctrl+C handler")?;
    info!("Received shutdown signal, cleaning up...");

    server.shutdown().await?;
    info!("Shutdown complete");
    Ok(())
}
