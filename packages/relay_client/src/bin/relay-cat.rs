//! Pipe stdin to a peer through the relay and print what comes back.

use anyhow::{Context, Result, bail};
use clap::Parser;
use relay_client::{ClientEvent, CloseOrigin, ConnectionEvent, RelayClient, RelayConnection};
use relay_protocol::PeerId;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "relay-cat")]
#[command(about = "Exchange lines with a peer through a rendezvous relay")]
struct Cli {
    /// Relay WebSocket URL
    #[arg(long, default_value = "ws://127.0.0.1:3000/")]
    url: String,

    /// Register under this id instead of a generated one
    #[arg(long)]
    id: Option<PeerId>,

    /// Connect to this peer; without it, wait for a peer to connect to us
    #[arg(long)]
    peer: Option<PeerId>,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let default_directive = if args.debug {
        "relay_client=debug,relay_cat=debug,info"
    } else {
        "relay_client=info,relay_cat=info,warn"
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_directive));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();

    let mut client = RelayClient::connect(&args.url, args.id)
        .await
        .with_context(|| format!("Failed to register with {}", args.url))?;
    eprintln!("registered as {}", client.id());

    let conn = match args.peer {
        Some(peer) => client.connect_to(peer).await?,
        None => wait_for_peer(&mut client).await?,
    };
    eprintln!("connected to {}", conn.peer_id());

    pump(client, conn).await
}

async fn wait_for_peer(client: &mut RelayClient) -> Result<RelayConnection> {
    loop {
        match client.next_event().await {
            Some(ClientEvent::Connection(conn)) => return Ok(conn),
            Some(ClientEvent::SendFailed { peer, message }) => {
                warn!(peer = %peer, "Send failed: {}", message)
            }
            Some(ClientEvent::Closed) | None => bail!("Relay closed before any peer connected"),
        }
    }
}

async fn pump(mut client: RelayClient, mut conn: RelayConnection) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line.context("Failed to read stdin")? {
                Some(line) => conn.send(Value::String(line)).await?,
                None => {
                    stdin_open = false;
                    conn.close().await;
                }
            },
            event = conn.recv() => match event {
                Some(ConnectionEvent::Data(Value::String(text))) => println!("{text}"),
                Some(ConnectionEvent::Data(other)) => println!("{other}"),
                Some(ConnectionEvent::Closed(CloseOrigin::Remote)) => {
                    info!("Peer closed the connection");
                    break;
                }
                Some(ConnectionEvent::Closed(CloseOrigin::Local)) | None => break,
            },
            event = client.next_event() => match event {
                Some(ClientEvent::SendFailed { peer, message }) => {
                    eprintln!("send to {peer} failed: {message}");
                }
                Some(ClientEvent::Connection(mut extra)) => {
                    info!(peer = %extra.peer_id(), "Closing additional peer");
                    extra.close().await;
                }
                Some(ClientEvent::Closed) | None => break,
            },
        }
    }

    client.close().await;
    Ok(())
}
