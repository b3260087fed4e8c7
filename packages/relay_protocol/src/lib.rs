//! Relay Protocol - wire types shared by the relay server and its clients
//!
//! Every WebSocket text frame carries exactly one JSON object with a `kind`
//! discriminator. Clients send [`ClientMessage`]s, the server answers and
//! notifies with [`ServerMessage`]s. Payloads carried by `send`/`peer-data`
//! are opaque JSON values and are never inspected.
//!
//! # Example
//!
//! ```
//! use relay_protocol::{ClientMessage, PeerId};
//!
//! let msg = ClientMessage::decode(r#"{"kind":"connect","peerID":"abc"}"#).unwrap();
//! assert_eq!(
//!     msg,
//!     ClientMessage::Connect {
//!         peer_id: PeerId::new("abc").unwrap()
//!     }
//! );
//! ```

mod error;
pub mod id;
pub mod protocol;

pub use error::ProtocolError;
pub use id::{DEFAULT_ID_LENGTH, ID_CHARACTERS, IdGenerator, UNAMBIGUOUS_CHARACTERS, generate_id};
pub use protocol::{ClientMessage, PeerId, ServerMessage};
