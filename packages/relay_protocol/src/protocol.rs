//! Relay Protocol Types
//!
//! Message types for client-server communication over the relay WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::error::ProtocolError;

/// The identifier a socket registers under. Never empty.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeerId(pub(crate) String);

impl PeerId {
    pub fn new(id: impl Into<String>) -> Result<Self, ProtocolError> {
        let id = id.into();
        if id.is_empty() {
            return Err(ProtocolError::EmptyPeerId);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PeerId {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl FromStr for PeerId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl From<PeerId> for String {
    fn from(id: PeerId) -> Self {
        id.0
    }
}

impl AsRef<str> for PeerId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for PeerId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Messages sent FROM the client TO the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// Claim an identifier, or let the server pick one when `id` is absent
    Register {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<PeerId>,
    },
    /// Open an edge to another registered peer
    Connect {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
    },
    /// Relay an opaque payload over an open edge
    Send {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
        #[serde(default)]
        data: Value,
    },
    /// Tear down one edge
    Close {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
    },
}

impl ClientMessage {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Wire name of this message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Register { .. } => "register",
            Self::Connect { .. } => "connect",
            Self::Send { .. } => "send",
            Self::Close { .. } => "close",
        }
    }
}

/// Messages sent FROM the server TO the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum ServerMessage {
    RegistrationSuccess {
        id: PeerId,
    },
    RegistrationFailure {
        message: String,
    },
    ConnectSuccess {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
    },
    ConnectFailure {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
        message: String,
    },
    /// Another peer opened an edge to us
    PeerConnected {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
    },
    /// The peer at the other end of an edge closed it or went away
    PeerDisconnected {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
    },
    /// Payload relayed from `peer_id`, unmodified
    PeerData {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
        #[serde(default)]
        data: Value,
    },
    SendFailure {
        #[serde(rename = "peerID")]
        peer_id: PeerId,
        message: String,
    },
}

impl ServerMessage {
    pub fn decode(frame: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(frame)?)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// The peer this message concerns, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            Self::RegistrationSuccess { .. } | Self::RegistrationFailure { .. } => None,
            Self::ConnectSuccess { peer_id }
            | Self::ConnectFailure { peer_id, .. }
            | Self::PeerConnected { peer_id }
            | Self::PeerDisconnected { peer_id }
            | Self::PeerData { peer_id, .. }
            | Self::SendFailure { peer_id, .. } => Some(peer_id),
        }
    }

    /// Wire name of this message kind, for logging
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegistrationSuccess { .. } => "registration-success",
            Self::RegistrationFailure { .. } => "registration-failure",
            Self::ConnectSuccess { .. } => "connect-success",
            Self::ConnectFailure { .. } => "connect-failure",
            Self::PeerConnected { .. } => "peer-connected",
            Self::PeerDisconnected { .. } => "peer-disconnected",
            Self::PeerData { .. } => "peer-data",
            Self::SendFailure { .. } => "send-failure",
        }
    }
}
