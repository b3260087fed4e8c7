//! Relay failure taxonomy. The Display strings double as the human-readable
//! `message` carried in failure frames.

use relay_protocol::PeerId;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    #[error("Trying to register a socket that is already registered.")]
    AlreadyRegistered,

    #[error("ID {0} is already registered.")]
    IdTaken(PeerId),

    #[error("This client is not registered.")]
    NotRegistered,

    #[error("Could not find peer ID {0}.")]
    PeerNotFound(PeerId),

    #[error("This client is not connected to peer {0}.")]
    NotConnected(PeerId),

    /// The relay actor task has stopped; only seen by in-process callers
    #[error("relay actor is gone")]
    ActorGone,
}

impl RelayError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::AlreadyRegistered => "already_registered",
            Self::IdTaken(_) => "id_taken",
            Self::NotRegistered => "not_registered",
            Self::PeerNotFound(_) => "peer_not_found",
            Self::NotConnected(_) => "not_connected",
            Self::ActorGone => "actor_gone",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        let id = PeerId::new("TEST").unwrap();
        assert_eq!(RelayError::AlreadyRegistered.error_code(), "already_registered");
        assert_eq!(RelayError::IdTaken(id.clone()).error_code(), "id_taken");
        assert_eq!(RelayError::NotConnected(id).error_code(), "not_connected");
    }

    #[test]
    fn messages_name_the_peer() {
        let id = PeerId::new("abc").unwrap();
        assert_eq!(
            RelayError::IdTaken(id.clone()).to_string(),
            "ID abc is already registered."
        );
        assert_eq!(
            RelayError::PeerNotFound(id.clone()).to_string(),
            "Could not find peer ID abc."
        );
        assert_eq!(
            RelayError::NotConnected(id).to_string(),
            "This client is not connected to peer abc."
        );
    }
}
