//! WebSocket rendezvous relay.
//!
//! Clients register under a peer id, open edges to other registered peers and
//! exchange opaque JSON payloads over those edges. The relay never looks
//! inside a payload.
//!
//! ```no_run
//! # async fn demo() -> anyhow::Result<()> {
//! use relay_server::{RelayConfig, RelayServer};
//!
//! let server = RelayServer::start(RelayConfig::local_ephemeral()).await?;
//! println!("clients connect to {}", server.ws_url());
//! server.shutdown().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use axum::{Router, routing::get};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::{MakeSpan, TraceLayer};
use tracing::info;
use uuid::Uuid;

pub mod actor;
pub mod config;
mod error;
pub mod handlers;
pub mod metrics;
pub mod registry;
pub mod ws;

pub use actor::{RelayActor, RelayHandle};
pub use config::{CliOverrides, FileConfig, RelayConfig};
pub use error::RelayError;
pub use metrics::ServerMetrics;
pub use registry::{Registry, RegistryStats, SocketId};

/// Shared state for every route
#[derive(Clone)]
pub struct AppState {
    pub relay: RelayHandle,
    pub metrics: Arc<ServerMetrics>,
    /// Per-socket outbound queue size
    pub outlet_capacity: usize,
    /// Cancelled when the server stops; ends every open WebSocket
    pub shutdown: CancellationToken,
}

/// Custom span maker that adds a unique request ID to each incoming request
#[derive(Clone)]
struct RequestIdMakeSpan;

impl<B> MakeSpan<B> for RequestIdMakeSpan {
    fn make_span(&mut self, request: &axum::http::Request<B>) -> tracing::Span {
        let request_id = Uuid::new_v4().to_string();
        tracing::info_span!(
            "request",
            method = %request.method(),
            uri = %request.uri(),
            request_id = %request_id,
        )
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::relay_websocket_handler))
        .route("/ws", get(handlers::relay_websocket_handler))
        .route("/health", get(handlers::health_handler))
        .route("/health/live", get(handlers::health_live_handler))
        .route("/metrics", get(handlers::metrics_handler))
        .layer(TraceLayer::new_for_http().make_span_with(RequestIdMakeSpan))
        .with_state(state)
}

/// A running relay bound to a local address.
pub struct RelayServer {
    local_addr: SocketAddr,
    relay: RelayHandle,
    metrics: Arc<ServerMetrics>,
    shutdown: CancellationToken,
    task: JoinHandle<std::io::Result<()>>,
}

impl RelayServer {
    /// Spawn the relay actor, bind the listener and start serving.
    pub async fn start(config: RelayConfig) -> Result<Self> {
        let metrics = Arc::new(ServerMetrics::new());
        let relay = RelayActor::spawn(config.ids.clone(), config.command_capacity, metrics.clone());
        let shutdown = CancellationToken::new();

        let app = router(AppState {
            relay: relay.clone(),
            metrics: metrics.clone(),
            outlet_capacity: config.outlet_capacity,
            shutdown: shutdown.clone(),
        });

        let listener = tokio::net::TcpListener::bind(config.bind_addr)
            .await
            .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
        let local_addr = listener.local_addr()?;

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        info!("Relay listening on ws://{}", local_addr);

        Ok(Self {
            local_addr,
            relay,
            metrics,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL clients connect to
    pub fn ws_url(&self) -> String {
        format!("ws://{}/", self.local_addr)
    }

    pub fn relay(&self) -> &RelayHandle {
        &self.relay
    }

    pub fn metrics(&self) -> &Arc<ServerMetrics> {
        &self.metrics
    }

    /// Stop accepting, close every open WebSocket and wait for the server
    /// task to finish.
    pub async fn shutdown(self) -> Result<()> {
        info!("Shutting down relay");
        self.shutdown.cancel();
        self.task
            .await
            .context("Relay server task panicked")?
            .context("Relay server error")
    }
}
