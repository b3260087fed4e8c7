//! WebSocket Handler
//!
//! One task per connection: frames in are decoded and handed to the relay
//! actor, frames out are drained from the socket's outlet.

use axum::extract::ws::{Message, WebSocket};
use futures::{sink::SinkExt, stream::StreamExt};
use relay_protocol::{ClientMessage, ServerMessage};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::actor::RelayHandle;
use crate::metrics::ServerMetrics;

/// Drive one relay connection until the client leaves, the socket errors or
/// `shutdown` fires. The relay is told about the departure exactly once.
pub async fn handle_relay_ws(
    socket: WebSocket,
    relay: RelayHandle,
    metrics: Arc<ServerMetrics>,
    outlet_capacity: usize,
    shutdown: CancellationToken,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Channel for frames addressed to this socket
    let (tx, mut rx) = mpsc::channel::<ServerMessage>(outlet_capacity.max(1));

    let socket_id = match relay.open(tx).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Refusing WebSocket connection: {}", e);
            let _ = ws_sender.send(Message::Close(None)).await;
            return;
        }
    };

    metrics.connection_opened();
    info!(socket = %socket_id, "New relay connection");

    // Task to send messages to WebSocket. Borrows the sink so the close
    // handshake can still be answered once the select below is done.
    let sender_metrics = metrics.clone();
    let sender_task = async {
        while let Some(msg) = rx.recv().await {
            let json = match msg.encode() {
                Ok(j) => j,
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                    continue;
                }
            };
            if let Err(e) = ws_sender.send(Message::Text(json.into())).await {
                debug!(socket = %socket_id, "WebSocket write failed: {}", e);
                sender_metrics.websocket_error();
                return;
            }
        }
        // Outlet released by the relay (evicted or closed)
        let _ = ws_sender.close().await;
    };

    // Task to handle incoming messages
    let input_relay = relay.clone();
    let input_metrics = metrics.clone();
    let input_task = async move {
        while let Some(msg) = ws_receiver.next().await {
            match msg {
                Ok(Message::Text(text)) => match ClientMessage::decode(&text) {
                    Ok(client_msg) => {
                        input_metrics.message_received();
                        if input_relay.inbound(socket_id, client_msg).await.is_err() {
                            warn!(socket = %socket_id, "Relay actor is gone");
                            break;
                        }
                    }
                    Err(e) => {
                        debug!(socket = %socket_id, code = e.error_code(), "Ignoring frame: {}", e);
                        input_metrics.frame_rejected();
                    }
                },
                Ok(Message::Binary(data)) => {
                    debug!(socket = %socket_id, len = data.len(), "Ignoring binary frame");
                    input_metrics.frame_rejected();
                }
                Ok(Message::Close(_)) => break,
                // Ping/pong are answered by axum
                Ok(_) => {}
                Err(e) => {
                    debug!(socket = %socket_id, "WebSocket read failed: {}", e);
                    input_metrics.websocket_error();
                    break;
                }
            }
        }
    };

    let sink_done = tokio::select! {
        _ = sender_task => {
            debug!(socket = %socket_id, "Sender task ended");
            true
        }
        _ = input_task => {
            debug!(socket = %socket_id, "Input task ended");
            false
        }
        _ = shutdown.cancelled() => {
            debug!(socket = %socket_id, "Server shutting down");
            false
        }
    };

    if let Err(e) = relay.close(socket_id).await {
        debug!(socket = %socket_id, "Close after relay stopped: {}", e);
    }

    // Answer the client's Close, or send ours on shutdown. Frames still in
    // the outlet cannot follow a Close the client already sent.
    if !sink_done {
        if let Err(e) = ws_sender.close().await {
            debug!(socket = %socket_id, "Close handshake failed: {}", e);
        }
    }
    metrics.connection_closed();
    info!(socket = %socket_id, "Relay connection closed");
}
