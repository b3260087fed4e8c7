use relay_protocol::{PeerId, ProtocolError};
use tokio_tungstenite::tungstenite;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("relay server is unavailable")]
    Unavailable,

    /// The server refused our `register`
    #[error("registration failed: {0}")]
    Registration(String),

    #[error("could not connect to {peer}: {message}")]
    ConnectFailed { peer: PeerId, message: String },

    /// The relay connection is closed
    #[error("disconnected from relay")]
    Disconnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    WebSocket(#[from] tungstenite::Error),
}

impl ClientError {
    /// Connection refused or reset means nobody is listening; everything
    /// else is a real WebSocket failure.
    pub fn from_tungstenite(err: tungstenite::Error) -> Self {
        let is_connect = match &err {
            tungstenite::Error::Io(io_err) => matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
            ),
            tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
                return Self::Disconnected;
            }
            _ => false,
        };
        if is_connect {
            Self::Unavailable
        } else {
            Self::WebSocket(err)
        }
    }
}
