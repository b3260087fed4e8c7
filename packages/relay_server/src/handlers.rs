use axum::{
    Json,
    extract::{State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::AppState;
use crate::metrics::{self, PeerHealth};
use crate::ws;

/// Relay WebSocket endpoint
pub async fn relay_websocket_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let relay = state.relay.clone();
    let metrics = state.metrics.clone();
    let outlet_capacity = state.outlet_capacity;
    let shutdown = state.shutdown.child_token();

    ws.on_upgrade(move |socket| {
        ws::handle_relay_ws(socket, relay, metrics, outlet_capacity, shutdown)
    })
}

/// Health check endpoint - returns relay status and live table sizes
pub async fn health_handler(State(state): State<AppState>) -> Response {
    let snapshot = state.metrics.snapshot();

    match state.relay.stats().await {
        Ok(stats) => Json(metrics::HealthStatus {
            status: "healthy".to_string(),
            peers: PeerHealth::from(stats),
            connections: snapshot.connections.active,
            uptime_secs: snapshot.uptime_secs,
        })
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": e.error_code(),
                "uptime_secs": snapshot.uptime_secs,
            })),
        )
            .into_response(),
    }
}

/// Metrics endpoint - returns detailed server metrics
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

/// Liveness probe - returns 200 if the server is running
pub async fn health_live_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "alive" }))
}
