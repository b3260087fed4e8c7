//! Per-peer connection proxy.
//!
//! A `RelayConnection` stands for one edge on the relay. Payloads sent on it
//! go to exactly one peer, and payloads from that peer arrive on it. The
//! client's `PeerTable` mirrors the server's edge table for this socket.

use relay_protocol::{ClientMessage, PeerId};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tracing::debug;

use crate::client::DriverCommand;
use crate::error::ClientError;

/// Who ended an edge
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseOrigin {
    /// `RelayConnection::close` was called on this side
    Local,
    /// The peer closed it, went away, or the relay connection dropped
    Remote,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ConnectionEvent {
    /// Payload from the peer, exactly as it was sent
    Data(Value),
    Closed(CloseOrigin),
}

#[derive(Debug)]
struct PeerSlot {
    token: u64,
    tx: mpsc::UnboundedSender<ConnectionEvent>,
}

#[derive(Debug, Default)]
struct PeerTableInner {
    next_token: u64,
    slots: HashMap<PeerId, PeerSlot>,
}

/// Live edges, keyed by peer. Shared by the driver and every handle.
#[derive(Clone, Debug, Default)]
pub(crate) struct PeerTable {
    inner: Arc<Mutex<PeerTableInner>>,
}

impl PeerTable {
    /// Create the handle for a freshly opened edge. A handle already open
    /// for the same peer is superseded and its event stream ends.
    pub(crate) async fn open(
        &self,
        peer: PeerId,
        commands: mpsc::Sender<DriverCommand>,
    ) -> RelayConnection {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().await;
        inner.next_token += 1;
        let token = inner.next_token;
        if inner
            .slots
            .insert(peer.clone(), PeerSlot { token, tx })
            .is_some()
        {
            debug!(peer = %peer, "Superseding existing connection handle");
        }
        drop(inner);

        RelayConnection {
            peer_id: peer,
            commands,
            events: rx,
            table: self.clone(),
            token,
            state: HandleState::Open,
        }
    }

    /// Route an event to the handle for `peer`. Returns false if there is none.
    pub(crate) async fn deliver(&self, peer: &PeerId, event: ConnectionEvent) -> bool {
        let inner = self.inner.lock().await;
        match inner.slots.get(peer) {
            Some(slot) => slot.tx.send(event).is_ok(),
            None => false,
        }
    }

    /// The peer ended the edge
    pub(crate) async fn close_remote(&self, peer: &PeerId) -> bool {
        let slot = self.inner.lock().await.slots.remove(peer);
        match slot {
            Some(slot) => {
                let _ = slot.tx.send(ConnectionEvent::Closed(CloseOrigin::Remote));
                true
            }
            None => false,
        }
    }

    /// The relay connection is gone; every edge with it
    pub(crate) async fn close_all(&self) {
        let slots = std::mem::take(&mut self.inner.lock().await.slots);
        for (_, slot) in slots {
            let _ = slot.tx.send(ConnectionEvent::Closed(CloseOrigin::Remote));
        }
    }

    /// Drop the slot for `peer` only if it still belongs to handle `token`
    pub(crate) async fn release(&self, peer: &PeerId, token: u64) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.slots.get(peer).is_some_and(|slot| slot.token == token) {
            inner.slots.remove(peer);
            true
        } else {
            false
        }
    }

    pub(crate) async fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.inner.lock().await.slots.keys().cloned().collect();
        peers.sort();
        peers
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum HandleState {
    Open,
    /// Closed locally; `Closed(Local)` is reported after buffered events
    ClosingLocally,
    Done,
}

/// One edge to a peer through the relay
pub struct RelayConnection {
    peer_id: PeerId,
    commands: mpsc::Sender<DriverCommand>,
    events: mpsc::UnboundedReceiver<ConnectionEvent>,
    table: PeerTable,
    token: u64,
    state: HandleState,
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("peer_id", &self.peer_id)
            .field("state", &self.state)
            .finish()
    }
}

impl RelayConnection {
    pub fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    pub fn is_open(&self) -> bool {
        self.state == HandleState::Open
    }

    /// Relay `data` to the peer. Failures reported by the relay arrive as
    /// `ClientEvent::SendFailed` on the client.
    pub async fn send(&self, data: Value) -> Result<(), ClientError> {
        if !self.is_open() {
            return Err(ClientError::Disconnected);
        }
        self.commands
            .send(DriverCommand::Frame(ClientMessage::Send {
                peer_id: self.peer_id.clone(),
                data,
            }))
            .await
            .map_err(|_| ClientError::Disconnected)
    }

    /// Close this edge. The peer is told; this handle reports
    /// `Closed(Local)` once already-buffered events are read.
    pub async fn close(&mut self) {
        if !self.is_open() {
            return;
        }
        self.state = HandleState::ClosingLocally;
        // A superseded handle must not tear down the edge its successor uses
        if self.table.release(&self.peer_id, self.token).await {
            let _ = self
                .commands
                .send(DriverCommand::Frame(ClientMessage::Close {
                    peer_id: self.peer_id.clone(),
                }))
                .await;
        }
        // The table no longer routes to us; end the stream once drained
        self.events.close();
    }

    /// Next event for this edge. `None` once the edge has been reported
    /// closed, or when a newer handle for the same peer replaced this one.
    pub async fn recv(&mut self) -> Option<ConnectionEvent> {
        if self.state == HandleState::Done {
            return None;
        }
        match self.events.recv().await {
            Some(ConnectionEvent::Closed(origin)) => {
                self.state = HandleState::Done;
                Some(ConnectionEvent::Closed(origin))
            }
            Some(event) => Some(event),
            None if self.state == HandleState::ClosingLocally => {
                self.state = HandleState::Done;
                Some(ConnectionEvent::Closed(CloseOrigin::Local))
            }
            None => {
                self.state = HandleState::Done;
                None
            }
        }
    }
}

impl Drop for RelayConnection {
    fn drop(&mut self) {
        if self.state != HandleState::Open {
            return;
        }
        // The table lock is async, so the driver does the release
        let release = DriverCommand::Release {
            peer: self.peer_id.clone(),
            token: self.token,
        };
        match self.commands.try_send(release) {
            Ok(()) | Err(mpsc::error::TrySendError::Closed(_)) => {}
            Err(mpsc::error::TrySendError::Full(release)) => {
                match tokio::runtime::Handle::try_current() {
                    Ok(runtime) => {
                        let commands = self.commands.clone();
                        runtime.spawn(async move {
                            let _ = commands.send(release).await;
                        });
                    }
                    Err(_) => debug!(peer = %self.peer_id, "No runtime to release dropped connection"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pid(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    #[tokio::test]
    async fn delivers_to_open_handle() {
        let table = PeerTable::default();
        let (commands, _rx) = mpsc::channel(8);
        let mut conn = table.open(pid("bob"), commands).await;

        assert!(table.deliver(&pid("bob"), ConnectionEvent::Data(json!(1))).await);
        assert!(!table.deliver(&pid("eve"), ConnectionEvent::Data(json!(2))).await);
        assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(json!(1))));
        assert_eq!(table.peers().await, vec![pid("bob")]);
    }

    #[tokio::test]
    async fn local_close_sends_frame_and_reports_after_buffered_data() {
        let table = PeerTable::default();
        let (commands, mut rx) = mpsc::channel(8);
        let mut conn = table.open(pid("bob"), commands).await;
        table.deliver(&pid("bob"), ConnectionEvent::Data(json!("early"))).await;

        conn.close().await;
        assert!(table.peers().await.is_empty());
        match rx.recv().await {
            Some(DriverCommand::Frame(ClientMessage::Close { peer_id })) => {
                assert_eq!(peer_id, pid("bob"))
            }
            other => panic!("Expected close frame, got {:?}", other),
        }

        assert_eq!(conn.recv().await, Some(ConnectionEvent::Data(json!("early"))));
        assert_eq!(
            conn.recv().await,
            Some(ConnectionEvent::Closed(CloseOrigin::Local))
        );
        assert_eq!(conn.recv().await, None);
        assert!(matches!(
            conn.send(json!("late")).await,
            Err(ClientError::Disconnected)
        ));
    }

    #[tokio::test]
    async fn remote_close_reports_once() {
        let table = PeerTable::default();
        let (commands, _rx) = mpsc::channel(8);
        let mut conn = table.open(pid("bob"), commands).await;

        assert!(table.close_remote(&pid("bob")).await);
        assert!(!table.close_remote(&pid("bob")).await);
        assert_eq!(
            conn.recv().await,
            Some(ConnectionEvent::Closed(CloseOrigin::Remote))
        );
        assert_eq!(conn.recv().await, None);
        assert!(!conn.is_open());
    }

    #[tokio::test]
    async fn superseded_handle_cannot_release_newer_slot() {
        let table = PeerTable::default();
        let (commands, mut rx) = mpsc::channel(8);
        let mut old = table.open(pid("bob"), commands.clone()).await;
        let mut new = table.open(pid("bob"), commands).await;

        old.close().await;
        assert_eq!(table.peers().await, vec![pid("bob")]);
        assert!(rx.try_recv().is_err(), "superseded handle sent a close frame");
        assert_eq!(
            old.recv().await,
            Some(ConnectionEvent::Closed(CloseOrigin::Local))
        );

        table.deliver(&pid("bob"), ConnectionEvent::Data(json!("hi"))).await;
        assert_eq!(new.recv().await, Some(ConnectionEvent::Data(json!("hi"))));
    }

    #[tokio::test]
    async fn dropped_handle_leaves_peers() {
        let table = PeerTable::default();
        let (commands, mut rx) = mpsc::channel(8);
        let conn = table.open(pid("bob"), commands).await;
        drop(conn);

        match rx.try_recv() {
            Ok(DriverCommand::Release { peer, token }) => {
                assert_eq!(peer, pid("bob"));
                assert!(table.release(&peer, token).await);
            }
            other => panic!("Expected release, got {:?}", other),
        }
        assert!(table.peers().await.is_empty());
    }

    #[tokio::test]
    async fn dropped_handle_never_releases_a_newer_slot() {
        let table = PeerTable::default();
        let (commands, mut rx) = mpsc::channel(8);
        let old = table.open(pid("bob"), commands.clone()).await;
        let _new = table.open(pid("bob"), commands).await;
        drop(old);

        match rx.try_recv() {
            Ok(DriverCommand::Release { peer, token }) => {
                assert!(!table.release(&peer, token).await)
            }
            other => panic!("Expected release, got {:?}", other),
        }
        assert_eq!(table.peers().await, vec![pid("bob")]);
    }

    #[tokio::test]
    async fn closed_handle_sends_nothing_on_drop() {
        let table = PeerTable::default();
        let (commands, mut rx) = mpsc::channel(8);
        let mut conn = table.open(pid("bob"), commands).await;
        conn.close().await;
        assert!(matches!(
            rx.try_recv(),
            Ok(DriverCommand::Frame(ClientMessage::Close { .. }))
        ));

        drop(conn);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn close_all_ends_every_handle() {
        let table = PeerTable::default();
        let (commands, _rx) = mpsc::channel(8);
        let mut a = table.open(pid("a"), commands.clone()).await;
        let mut b = table.open(pid("b"), commands).await;

        table.close_all().await;
        assert!(table.peers().await.is_empty());
        for conn in [&mut a, &mut b] {
            assert_eq!(
                conn.recv().await,
                Some(ConnectionEvent::Closed(CloseOrigin::Remote))
            );
        }
    }
}
