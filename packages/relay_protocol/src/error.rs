/// Errors produced while building or decoding protocol values
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON or does not match any message kind
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("peer id must not be empty")]
    EmptyPeerId,

    #[error("invalid id generator: {0}")]
    InvalidGenerator(&'static str),
}

impl ProtocolError {
    pub fn error_code(&self) -> &str {
        match self {
            Self::Malformed(_) => "malformed",
            Self::EmptyPeerId => "empty_peer_id",
            Self::InvalidGenerator(_) => "invalid_generator",
        }
    }
}
