//! Random string identifiers for peers that register without choosing one.

use rand::Rng;

use crate::error::ProtocolError;
use crate::protocol::PeerId;

/// A reasonable set of valid identifier characters.
pub const ID_CHARACTERS: &str = "abcdefghijklmnopqrstuvwxyz0123456789";

/// Characters that are hard to misread or mistype (no 0/o, 1/l/i, etc).
pub const UNAMBIGUOUS_CHARACTERS: &str = "abcdefhjkmnprtwxy2345689";

pub const DEFAULT_ID_LENGTH: usize = 10;

/// Generate a string of `length` characters drawn uniformly from `alphabet`.
///
/// Returns an empty string when the alphabet is empty.
pub fn generate_id(alphabet: &str, length: usize) -> String {
    let chars: Vec<char> = alphabet.chars().collect();
    if chars.is_empty() {
        return String::new();
    }

    let mut rng = rand::rng();
    (0..length)
        .map(|_| chars[rng.random_range(0..chars.len())])
        .collect()
}

/// Validated alphabet/length pair used by the server to mint identifiers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdGenerator {
    alphabet: String,
    length: usize,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self {
            alphabet: ID_CHARACTERS.to_string(),
            length: DEFAULT_ID_LENGTH,
        }
    }
}

impl IdGenerator {
    pub fn new(alphabet: impl Into<String>, length: usize) -> Result<Self, ProtocolError> {
        let alphabet = alphabet.into();
        if alphabet.is_empty() {
            return Err(ProtocolError::InvalidGenerator("alphabet is empty"));
        }
        if length == 0 {
            return Err(ProtocolError::InvalidGenerator("length is zero"));
        }
        Ok(Self { alphabet, length })
    }

    pub fn alphabet(&self) -> &str {
        &self.alphabet
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn generate(&self) -> String {
        generate_id(&self.alphabet, self.length)
    }

    /// Generate a fresh identifier. Never empty: both the alphabet and the
    /// length are checked on construction.
    pub fn generate_peer_id(&self) -> PeerId {
        PeerId(self.generate())
    }
}
