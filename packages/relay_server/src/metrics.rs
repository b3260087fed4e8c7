//! Server metrics for observability
//!
//! Provides runtime counters for monitoring relay health and traffic.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use crate::registry::RegistryStats;

/// Server-wide metrics
#[derive(Debug, Default)]
pub struct ServerMetrics {
    // Connection metrics
    /// Currently open WebSocket connections
    pub active_connections: AtomicU64,
    /// Total connections since server start
    pub total_connections: AtomicU64,

    // Relay metrics
    /// Successful registrations since server start
    pub registrations: AtomicU64,
    /// connect-success notifications issued. A reconnect over an existing
    /// edge counts again.
    pub edges_opened: AtomicU64,
    /// peer-disconnected notifications issued, one per peer told
    pub edges_closed: AtomicU64,
    /// Sockets disconnected because their outlet was full
    pub sockets_evicted: AtomicU64,

    // Message metrics
    /// Frames decoded and handed to the relay
    pub messages_received: AtomicU64,
    /// Frames queued for delivery to a socket
    pub messages_sent: AtomicU64,
    /// Frames dropped because the target outlet was full or gone
    pub messages_dropped: AtomicU64,
    /// Inbound frames that were not a valid client message
    pub frames_rejected: AtomicU64,

    // Error metrics
    /// WebSocket read/write errors
    pub websocket_errors: AtomicU64,

    /// Server start time (for uptime calculation)
    start_time: Option<Instant>,
}

impl ServerMetrics {
    pub fn new() -> Self {
        Self {
            start_time: Some(Instant::now()),
            ..Default::default()
        }
    }

    // Connection tracking
    pub fn connection_opened(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    // Relay tracking
    pub fn registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn edge_opened(&self) {
        self.edges_opened.fetch_add(1, Ordering::Relaxed);
    }

    pub fn edge_closed(&self) {
        self.edges_closed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn socket_evicted(&self) {
        self.sockets_evicted.fetch_add(1, Ordering::Relaxed);
    }

    // Message tracking
    pub fn message_received(&self) {
        self.messages_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    // Error tracking
    pub fn websocket_error(&self) {
        self.websocket_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time.map(|t| t.elapsed().as_secs()).unwrap_or(0)
    }

    /// Create a snapshot of all metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            uptime_secs: self.uptime_secs(),
            connections: ConnectionMetrics {
                active: self.active_connections.load(Ordering::Relaxed),
                total: self.total_connections.load(Ordering::Relaxed),
            },
            relay: RelayMetrics {
                registrations: self.registrations.load(Ordering::Relaxed),
                edges_opened: self.edges_opened.load(Ordering::Relaxed),
                edges_closed: self.edges_closed.load(Ordering::Relaxed),
                evicted: self.sockets_evicted.load(Ordering::Relaxed),
            },
            messages: MessageMetrics {
                received: self.messages_received.load(Ordering::Relaxed),
                sent: self.messages_sent.load(Ordering::Relaxed),
                dropped: self.messages_dropped.load(Ordering::Relaxed),
                rejected: self.frames_rejected.load(Ordering::Relaxed),
            },
            errors: ErrorMetrics {
                websocket: self.websocket_errors.load(Ordering::Relaxed),
            },
        }
    }
}

/// Serializable snapshot of metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub connections: ConnectionMetrics,
    pub relay: RelayMetrics,
    pub messages: MessageMetrics,
    pub errors: ErrorMetrics,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionMetrics {
    pub active: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayMetrics {
    pub registrations: u64,
    /// connect-success frames issued
    pub edges_opened: u64,
    /// peer-disconnected frames issued
    pub edges_closed: u64,
    pub evicted: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub received: u64,
    pub sent: u64,
    pub dropped: u64,
    pub rejected: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMetrics {
    pub websocket: u64,
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub peers: PeerHealth,
    pub connections: u64,
    pub uptime_secs: u64,
}

/// Live table sizes as seen by the relay actor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerHealth {
    pub sockets: u64,
    pub registered: u64,
    pub edges: u64,
}

impl From<RegistryStats> for PeerHealth {
    fn from(stats: RegistryStats) -> Self {
        Self {
            sockets: stats.sockets as u64,
            registered: stats.registered as u64,
            // Each edge is stored once per side
            edges: (stats.edge_entries as u64).div_ceil(2),
        }
    }
}
