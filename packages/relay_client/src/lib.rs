//! Client for the WebSocket rendezvous relay.
//!
//! `RelayClient` registers with the relay and hands out one `RelayConnection`
//! per peer edge, whether we opened it (`connect_to`) or the peer did
//! (`ClientEvent::Connection`).
//!
//! ```no_run
//! # async fn demo() -> Result<(), relay_client::ClientError> {
//! use relay_client::{ConnectionEvent, RelayClient};
//! use relay_protocol::PeerId;
//!
//! let client = RelayClient::connect("ws://127.0.0.1:3000/", None).await?;
//! let bob = PeerId::new("bob")?;
//! let mut conn = client.connect_to(bob).await?;
//! conn.send(serde_json::json!({"type": "offer"})).await?;
//! if let Some(ConnectionEvent::Data(answer)) = conn.recv().await {
//!     println!("{answer}");
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod connection;
mod error;

pub use client::{ClientEvent, RelayClient};
pub use connection::{CloseOrigin, ConnectionEvent, RelayConnection};
pub use error::ClientError;
