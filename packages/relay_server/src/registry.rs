//! Registration and edge bookkeeping for the relay.
//!
//! `Registry` is the whole relay state machine with no I/O: every operation
//! mutates the two tables and returns an [`Outbox`] of frames to deliver. The
//! actor in `crate::actor` is the only owner at runtime, which serializes all
//! mutation.
//!
//! Tables:
//! - `registrations`: PeerId -> SocketId, at most one socket per id
//! - `sockets`: SocketId -> identity + edges (peer id -> peer socket)
//!
//! Invariant: if socket S has an edge to peer P at socket T, then T has an
//! edge to S's id at S. Every operation below restores it before returning.

use relay_protocol::{ClientMessage, IdGenerator, PeerId, ServerMessage};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

use crate::error::RelayError;

/// Handle to one live transport session
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct SocketId(pub u64);

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "socket-{}", self.0)
    }
}

/// Who a socket is. Set at most once per socket lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Identity {
    Unidentified,
    Identified(PeerId),
}

#[derive(Debug)]
struct SocketEntry {
    identity: Identity,
    edges: HashMap<PeerId, SocketId>,
}

/// A frame addressed to one socket
#[derive(Clone, Debug, PartialEq)]
pub struct Delivery {
    pub to: SocketId,
    pub message: ServerMessage,
}

/// Ordered frames produced by one state transition
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Outbox(Vec<Delivery>);

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn single(to: SocketId, message: ServerMessage) -> Self {
        Self(vec![Delivery { to, message }])
    }

    fn push(&mut self, to: SocketId, message: ServerMessage) {
        self.0.push(Delivery { to, message });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Delivery> {
        self.0.iter()
    }

    /// Frames addressed to `socket`, in order
    pub fn to(&self, socket: SocketId) -> Vec<&ServerMessage> {
        self.0
            .iter()
            .filter(|d| d.to == socket)
            .map(|d| &d.message)
            .collect()
    }
}

impl IntoIterator for Outbox {
    type Item = Delivery;
    type IntoIter = std::vec::IntoIter<Delivery>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

/// Table sizes, for health reporting
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RegistryStats {
    /// Attached sockets, registered or not
    pub sockets: usize,
    pub registered: usize,
    /// Directed edge entries across all sockets
    pub edge_entries: usize,
}

pub struct Registry {
    ids: IdGenerator,
    registrations: HashMap<PeerId, SocketId>,
    sockets: HashMap<SocketId, SocketEntry>,
}

impl Registry {
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            ids,
            registrations: HashMap::new(),
            sockets: HashMap::new(),
        }
    }

    /// Track a freshly accepted socket. Calling it twice is harmless.
    pub fn attach(&mut self, socket: SocketId) {
        self.sockets.entry(socket).or_insert_with(|| SocketEntry {
            identity: Identity::Unidentified,
            edges: HashMap::new(),
        });
        debug!(socket = %socket, "Socket attached");
    }

    /// Dispatch one inbound message, turning failures into failure frames
    /// for the sender.
    pub fn handle(&mut self, socket: SocketId, msg: ClientMessage) -> Outbox {
        let result = match msg {
            ClientMessage::Register { id } => self.register(socket, id).map_err(|err| {
                let message = err.to_string();
                (err, ServerMessage::RegistrationFailure { message })
            }),
            ClientMessage::Connect { peer_id } => {
                self.connect_to(socket, &peer_id).map_err(|err| {
                    let message = err.to_string();
                    (err, ServerMessage::ConnectFailure { peer_id, message })
                })
            }
            ClientMessage::Send { peer_id, data } => {
                self.relay(socket, &peer_id, data).map_err(|err| {
                    let message = err.to_string();
                    (err, ServerMessage::SendFailure { peer_id, message })
                })
            }
            ClientMessage::Close { peer_id } => Ok(self.close_edge(socket, &peer_id)),
        };

        match result {
            Ok(outbox) => outbox,
            Err((RelayError::ActorGone, _)) => Outbox::new(),
            Err((err, frame)) if self.sockets.contains_key(&socket) => {
                debug!(socket = %socket, code = err.error_code(), "Rejected: {}", err);
                Outbox::single(socket, frame)
            }
            Err((err, _)) => {
                debug!(socket = %socket, "Dropping reply to detached socket: {}", err);
                Outbox::new()
            }
        }
    }

    /// Bind `requested` (or a generated id) to `socket`.
    pub fn register(
        &mut self,
        socket: SocketId,
        requested: Option<PeerId>,
    ) -> Result<Outbox, RelayError> {
        let entry = self
            .sockets
            .get_mut(&socket)
            .ok_or(RelayError::NotRegistered)?;
        if let Identity::Identified(_) = entry.identity {
            return Err(RelayError::AlreadyRegistered);
        }

        let id = requested.unwrap_or_else(|| self.ids.generate_peer_id());
        if self.registrations.contains_key(&id) {
            return Err(RelayError::IdTaken(id));
        }

        self.registrations.insert(id.clone(), socket);
        entry.identity = Identity::Identified(id.clone());
        info!(socket = %socket, peer = %id, "Client registered");

        Ok(Outbox::single(socket, ServerMessage::RegistrationSuccess { id }))
    }

    /// Open a symmetric edge between `socket` and the socket registered as
    /// `peer`. The peer is told first, then the caller.
    pub fn connect_to(&mut self, socket: SocketId, peer: &PeerId) -> Result<Outbox, RelayError> {
        let caller = self.identified(socket)?;
        let peer_socket = *self
            .registrations
            .get(peer)
            .ok_or_else(|| RelayError::PeerNotFound(peer.clone()))?;

        match self.sockets.get_mut(&peer_socket) {
            Some(peer_entry) => {
                peer_entry.edges.insert(caller.clone(), socket);
            }
            None => {
                warn!(peer = %peer, socket = %peer_socket, "Registration points at a detached socket");
                self.registrations.remove(peer);
                return Err(RelayError::PeerNotFound(peer.clone()));
            }
        }

        let mut outbox = Outbox::new();
        outbox.push(
            peer_socket,
            ServerMessage::PeerConnected {
                peer_id: caller.clone(),
            },
        );

        if let Some(entry) = self.sockets.get_mut(&socket) {
            entry.edges.insert(peer.clone(), peer_socket);
        }
        outbox.push(
            socket,
            ServerMessage::ConnectSuccess {
                peer_id: peer.clone(),
            },
        );

        info!("Connection established between {} and {}.", caller, peer);
        Ok(outbox)
    }

    /// Forward `data` untouched over the edge `socket -> peer`.
    pub fn relay(
        &mut self,
        socket: SocketId,
        peer: &PeerId,
        data: Value,
    ) -> Result<Outbox, RelayError> {
        let caller = self.identified(socket)?;
        let peer_socket = self
            .sockets
            .get(&socket)
            .and_then(|entry| entry.edges.get(peer))
            .copied()
            .ok_or_else(|| RelayError::NotConnected(peer.clone()))?;

        debug!(from = %caller, to = %peer, "Relaying payload");
        Ok(Outbox::single(
            peer_socket,
            ServerMessage::PeerData {
                peer_id: caller,
                data,
            },
        ))
    }

    /// Tear down one edge on both sides. Unknown edges are a benign race and
    /// produce nothing.
    pub fn close_edge(&mut self, socket: SocketId, peer: &PeerId) -> Outbox {
        let Ok(caller) = self.identified(socket) else {
            debug!(socket = %socket, "Tried to close connection before registration.");
            return Outbox::new();
        };

        let Some(peer_socket) = self
            .sockets
            .get_mut(&socket)
            .and_then(|entry| entry.edges.remove(peer))
        else {
            debug!(socket = %socket, peer = %peer, "Tried to close connection that doesn't exist.");
            return Outbox::new();
        };

        if let Some(peer_entry) = self.sockets.get_mut(&peer_socket) {
            if peer_entry.edges.get(&caller) == Some(&socket) {
                peer_entry.edges.remove(&caller);
            }
        }

        info!("Connection terminated between {} and {}.", caller, peer);
        Outbox::single(peer_socket, ServerMessage::PeerDisconnected { peer_id: caller })
    }

    /// Forget `socket` entirely, notifying every peer it had an edge to.
    /// Safe to call for unregistered or already-removed sockets.
    pub fn disconnect(&mut self, socket: SocketId) -> Outbox {
        let mut outbox = Outbox::new();
        let Some(entry) = self.sockets.remove(&socket) else {
            return outbox;
        };

        let Identity::Identified(id) = entry.identity else {
            debug!(socket = %socket, "Unregistered socket detached");
            return outbox;
        };

        info!(socket = %socket, "Client {} disconnected.", id);

        let mut edges: Vec<_> = entry.edges.into_iter().collect();
        edges.sort();
        for (peer_id, peer_socket) in edges {
            if peer_socket == socket {
                continue;
            }
            let Some(peer_entry) = self.sockets.get_mut(&peer_socket) else {
                debug!(peer = %peer_id, "Peer already gone during disconnect");
                continue;
            };
            if peer_entry.edges.get(&id) == Some(&socket) {
                peer_entry.edges.remove(&id);
            }
            outbox.push(
                peer_socket,
                ServerMessage::PeerDisconnected {
                    peer_id: id.clone(),
                },
            );
        }

        if self.registrations.get(&id) == Some(&socket) {
            self.registrations.remove(&id);
        }

        outbox
    }

    fn identified(&self, socket: SocketId) -> Result<PeerId, RelayError> {
        match self.sockets.get(&socket).map(|entry| &entry.identity) {
            Some(Identity::Identified(id)) => Ok(id.clone()),
            _ => Err(RelayError::NotRegistered),
        }
    }

    pub fn identity_of(&self, socket: SocketId) -> Option<&Identity> {
        self.sockets.get(&socket).map(|entry| &entry.identity)
    }

    pub fn socket_of(&self, peer: &PeerId) -> Option<SocketId> {
        self.registrations.get(peer).copied()
    }

    /// Peer ids that `peer` currently has edges to, sorted
    pub fn edges_of(&self, peer: &PeerId) -> Option<Vec<PeerId>> {
        let socket = self.registrations.get(peer)?;
        let entry = self.sockets.get(socket)?;
        let mut peers: Vec<PeerId> = entry.edges.keys().cloned().collect();
        peers.sort();
        Some(peers)
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            sockets: self.sockets.len(),
            registered: self.registrations.len(),
            edge_entries: self.sockets.values().map(|e| e.edges.len()).sum(),
        }
    }

    /// Check both tables against each other. Returns the first violation.
    pub fn check_consistency(&self) -> Result<(), String> {
        for (id, socket) in &self.registrations {
            match self.sockets.get(socket).map(|e| &e.identity) {
                Some(Identity::Identified(bound)) if bound == id => {}
                other => return Err(format!("{id} -> {socket} but socket identity is {other:?}")),
            }
        }
        for (socket, entry) in &self.sockets {
            let own_id = match &entry.identity {
                Identity::Identified(id) => id,
                Identity::Unidentified if entry.edges.is_empty() => continue,
                Identity::Unidentified => return Err(format!("{socket} has edges but no identity")),
            };
            for (peer_id, peer_socket) in &entry.edges {
                let back = self
                    .sockets
                    .get(peer_socket)
                    .and_then(|p| p.edges.get(own_id));
                if back != Some(socket) {
                    return Err(format!("edge {own_id} -> {peer_id} has no reciprocal"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_protocol::ID_CHARACTERS;
    use serde_json::json;

    fn pid(s: &str) -> PeerId {
        PeerId::new(s).unwrap()
    }

    fn registry_with(ids: &[(u64, &str)]) -> Registry {
        let mut reg = Registry::new(IdGenerator::default());
        for (n, id) in ids {
            reg.attach(SocketId(*n));
            reg.register(SocketId(*n), Some(pid(id))).unwrap();
        }
        reg
    }

    fn connect(reg: &mut Registry, from: u64, to: &str) -> Outbox {
        reg.connect_to(SocketId(from), &pid(to)).unwrap()
    }

    // ── register ────────────────────────────────────────────────────────

    #[test]
    fn attach_tracks_unregistered_socket() {
        let mut reg = Registry::new(IdGenerator::default());
        reg.attach(SocketId(1));
        assert_eq!(
            reg.stats(),
            RegistryStats {
                sockets: 1,
                registered: 0,
                edge_entries: 0
            }
        );
        assert_eq!(reg.identity_of(SocketId(1)), Some(&Identity::Unidentified));
    }

    #[test]
    fn register_generates_id_when_none_requested() {
        let mut reg = Registry::new(IdGenerator::default());
        reg.attach(SocketId(1));
        let outbox = reg.register(SocketId(1), None).unwrap();

        let msgs = outbox.to(SocketId(1));
        let ServerMessage::RegistrationSuccess { id } = msgs[0] else {
            panic!("Expected RegistrationSuccess, got {:?}", msgs[0]);
        };
        assert_eq!(id.as_str().len(), 10);
        assert!(id.as_str().chars().all(|c| ID_CHARACTERS.contains(c)));
        assert_eq!(reg.socket_of(id), Some(SocketId(1)));
        assert_eq!(reg.edges_of(id), Some(vec![]));
    }

    #[test]
    fn second_register_fails_and_keeps_identity() {
        let mut reg = registry_with(&[(1, "first")]);
        let err = reg.register(SocketId(1), Some(pid("second"))).unwrap_err();
        assert_eq!(err, RelayError::AlreadyRegistered);
        assert_eq!(
            reg.identity_of(SocketId(1)),
            Some(&Identity::Identified(pid("first")))
        );
        assert!(reg.socket_of(&pid("second")).is_none());
        assert_eq!(reg.stats().registered, 1);
    }

    #[test]
    fn taken_id_fails_and_socket_may_retry() {
        let mut reg = registry_with(&[(1, "TEST")]);
        reg.attach(SocketId(2));

        let err = reg.register(SocketId(2), Some(pid("TEST"))).unwrap_err();
        assert_eq!(err, RelayError::IdTaken(pid("TEST")));
        assert_eq!(reg.identity_of(SocketId(2)), Some(&Identity::Unidentified));
        assert_eq!(reg.socket_of(&pid("TEST")), Some(SocketId(1)));

        reg.register(SocketId(2), Some(pid("OTHER"))).unwrap();
        assert_eq!(reg.socket_of(&pid("OTHER")), Some(SocketId(2)));
    }

    #[test]
    fn generated_id_collision_is_reported() {
        let mut reg = Registry::new(IdGenerator::new("a", 1).unwrap());
        reg.attach(SocketId(1));
        reg.attach(SocketId(2));
        reg.register(SocketId(1), None).unwrap();
        assert_eq!(
            reg.register(SocketId(2), None).unwrap_err(),
            RelayError::IdTaken(pid("a"))
        );
    }

    // ── connect_to ──────────────────────────────────────────────────────

    #[test]
    fn connect_requires_registration() {
        let mut reg = registry_with(&[(1, "a")]);
        reg.attach(SocketId(2));
        assert_eq!(
            reg.connect_to(SocketId(2), &pid("a")).unwrap_err(),
            RelayError::NotRegistered
        );
        assert_eq!(reg.edges_of(&pid("a")), Some(vec![]));
    }

    #[test]
    fn connect_to_unknown_peer_fails() {
        let mut reg = registry_with(&[(1, "a")]);
        assert_eq!(
            reg.connect_to(SocketId(1), &pid("ghost")).unwrap_err(),
            RelayError::PeerNotFound(pid("ghost"))
        );
    }

    #[test]
    fn connect_creates_symmetric_edge_and_notifies_peer_first() {
        let mut reg = registry_with(&[(1, "a"), (2, "b")]);
        let outbox = connect(&mut reg, 2, "a");

        let deliveries: Vec<_> = outbox.into_iter().collect();
        assert_eq!(
            deliveries,
            vec![
                Delivery {
                    to: SocketId(1),
                    message: ServerMessage::PeerConnected { peer_id: pid("b") }
                },
                Delivery {
                    to: SocketId(2),
                    message: ServerMessage::ConnectSuccess { peer_id: pid("a") }
                },
            ]
        );
        assert_eq!(reg.edges_of(&pid("a")), Some(vec![pid("b")]));
        assert_eq!(reg.edges_of(&pid("b")), Some(vec![pid("a")]));
        reg.check_consistency().unwrap();
    }

    #[test]
    fn reconnect_overwrites_edge_and_renotifies() {
        let mut reg = registry_with(&[(1, "a"), (2, "b")]);
        connect(&mut reg, 2, "a");
        let outbox = connect(&mut reg, 1, "b");
        assert_eq!(outbox.len(), 2);
        assert_eq!(reg.stats().edge_entries, 2);
        reg.check_consistency().unwrap();
    }

    #[test]
    fn self_connect_is_a_single_loop_edge() {
        let mut reg = registry_with(&[(1, "a")]);
        let outbox = connect(&mut reg, 1, "a");
        assert_eq!(outbox.to(SocketId(1)).len(), 2);
        assert_eq!(reg.edges_of(&pid("a")), Some(vec![pid("a")]));
        reg.check_consistency().unwrap();

        let outbox = reg.disconnect(SocketId(1));
        assert!(outbox.is_empty());
        assert_eq!(reg.stats(), RegistryStats::default());
    }

    // ── relay ───────────────────────────────────────────────────────────

    #[test]
    fn relay_requires_edge() {
        let mut reg = registry_with(&[(1, "a"), (2, "b")]);
        assert_eq!(
            reg.relay(SocketId(2), &pid("a"), json!("ping")).unwrap_err(),
            RelayError::NotConnected(pid("a"))
        );
    }

    #[test]
    fn relay_requires_registration() {
        let mut reg = registry_with(&[(1, "a")]);
        reg.attach(SocketId(2));
        assert_eq!(
            reg.relay(SocketId(2), &pid("a"), json!(1)).unwrap_err(),
            RelayError::NotRegistered
        );
    }

    #[test]
    fn relay_forwards_payload_in_both_directions() {
        let mut reg = registry_with(&[(1, "a"), (2, "b")]);
        connect(&mut reg, 2, "a");

        let payload = json!({"candidate": "udp 1 2", "n": [1, 2, 3]});
        let outbox = reg.relay(SocketId(2), &pid("a"), payload.clone()).unwrap();
        assert_eq!(
            outbox.to(SocketId(1)),
            vec![&ServerMessage::PeerData {
                peer_id: pid("b"),
                data: payload
            }]
        );

        let outbox = reg.relay(SocketId(1), &pid("b"), json!("pong")).unwrap();
        assert_eq!(
            outbox.to(SocketId(2)),
            vec![&ServerMessage::PeerData {
                peer_id: pid("a"),
                data: json!("pong")
            }]
        );
    }

    // ── close_edge ──────────────────────────────────────────────────────

    #[test]
    fn close_edge_removes_both_sides_keeps_registrations() {
        let mut reg = registry_with(&[(1, "a"), (2, "b"), (3, "c")]);
        connect(&mut reg, 2, "a");
        connect(&mut reg, 2, "c");

        let outbox = reg.close_edge(SocketId(2), &pid("a"));
        assert_eq!(
            outbox.to(SocketId(1)),
            vec![&ServerMessage::PeerDisconnected { peer_id: pid("b") }]
        );
        assert!(outbox.to(SocketId(2)).is_empty());

        assert_eq!(reg.edges_of(&pid("a")), Some(vec![]));
        assert_eq!(reg.edges_of(&pid("b")), Some(vec![pid("c")]));
        assert_eq!(reg.stats().registered, 3);
        reg.check_consistency().unwrap();

        assert_eq!(
            reg.relay(SocketId(1), &pid("b"), json!(null)).unwrap_err(),
            RelayError::NotConnected(pid("b"))
        );
    }

    #[test]
    fn close_edge_no_ops() {
        let mut reg = registry_with(&[(1, "a")]);
        reg.attach(SocketId(2));
        assert!(reg.close_edge(SocketId(2), &pid("a")).is_empty());
        assert!(reg.close_edge(SocketId(1), &pid("nobody")).is_empty());
        assert!(reg.close_edge(SocketId(99), &pid("a")).is_empty());
        reg.check_consistency().unwrap();
    }

    // ── disconnect ──────────────────────────────────────────────────────

    #[test]
    fn disconnect_notifies_each_peer_once_and_cleans_up() {
        let mut reg = registry_with(&[(1, "hub"), (2, "p1"), (3, "p2"), (4, "p3"), (5, "idle")]);
        connect(&mut reg, 2, "hub");
        connect(&mut reg, 3, "hub");
        connect(&mut reg, 1, "p3");
        connect(&mut reg, 2, "p2");

        let outbox = reg.disconnect(SocketId(1));
        for peer in [2, 3, 4] {
            assert_eq!(
                outbox.to(SocketId(peer)),
                vec![&ServerMessage::PeerDisconnected {
                    peer_id: pid("hub")
                }]
            );
        }
        assert!(outbox.to(SocketId(5)).is_empty());
        assert_eq!(outbox.len(), 3);

        assert!(reg.socket_of(&pid("hub")).is_none());
        assert!(reg.identity_of(SocketId(1)).is_none());
        assert_eq!(reg.edges_of(&pid("p1")), Some(vec![pid("p2")]));
        assert_eq!(reg.edges_of(&pid("p3")), Some(vec![]));
        assert_eq!(
            reg.stats(),
            RegistryStats {
                sockets: 4,
                registered: 4,
                edge_entries: 2
            }
        );
        reg.check_consistency().unwrap();
    }

    #[test]
    fn disconnect_unregistered_only_drops_entry() {
        let mut reg = registry_with(&[(1, "a")]);
        reg.attach(SocketId(2));
        assert!(reg.disconnect(SocketId(2)).is_empty());
        assert_eq!(reg.stats().sockets, 1);
        assert_eq!(reg.stats().registered, 1);
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut reg = registry_with(&[(1, "a"), (2, "b")]);
        connect(&mut reg, 1, "b");
        assert_eq!(reg.disconnect(SocketId(1)).len(), 1);
        assert!(reg.disconnect(SocketId(1)).is_empty());
        assert_eq!(reg.edges_of(&pid("b")), Some(vec![]));
    }

    #[test]
    fn freed_id_can_be_registered_again() {
        let mut reg = registry_with(&[(1, "TEST")]);
        reg.disconnect(SocketId(1));
        reg.attach(SocketId(2));
        reg.register(SocketId(2), Some(pid("TEST"))).unwrap();
        assert_eq!(reg.socket_of(&pid("TEST")), Some(SocketId(2)));
    }

    // ── handle ──────────────────────────────────────────────────────────

    #[test]
    fn handle_reports_failures_to_sender() {
        let mut reg = registry_with(&[(1, "TEST")]);
        reg.attach(SocketId(2));

        let outbox = reg.handle(
            SocketId(2),
            ClientMessage::Register {
                id: Some(pid("TEST")),
            },
        );
        assert_eq!(
            outbox.to(SocketId(2)),
            vec![&ServerMessage::RegistrationFailure {
                message: "ID TEST is already registered.".into()
            }]
        );

        let outbox = reg.handle(SocketId(2), ClientMessage::Connect { peer_id: pid("TEST") });
        assert_eq!(
            outbox.to(SocketId(2)),
            vec![&ServerMessage::ConnectFailure {
                peer_id: pid("TEST"),
                message: "This client is not registered.".into()
            }]
        );

        let outbox = reg.handle(
            SocketId(1),
            ClientMessage::Send {
                peer_id: pid("x"),
                data: json!("hi"),
            },
        );
        assert_eq!(
            outbox.to(SocketId(1)),
            vec![&ServerMessage::SendFailure {
                peer_id: pid("x"),
                message: "This client is not connected to peer x.".into()
            }]
        );

        let outbox = reg.handle(SocketId(1), ClientMessage::Close { peer_id: pid("x") });
        assert!(outbox.is_empty());
    }

    #[test]
    fn handle_ignores_detached_sockets() {
        let mut reg = Registry::new(IdGenerator::default());
        let outbox = reg.handle(SocketId(7), ClientMessage::Register { id: None });
        assert!(outbox.is_empty());
        assert_eq!(reg.stats(), RegistryStats::default());
    }

    #[test]
    fn pairing_scenario() {
        let mut reg = Registry::new(IdGenerator::default());
        for n in 1..=3 {
            reg.attach(SocketId(n));
        }

        let outbox = reg.handle(SocketId(1), ClientMessage::Register { id: None });
        let client1 = match outbox.to(SocketId(1))[0] {
            ServerMessage::RegistrationSuccess { id } => id.clone(),
            other => panic!("Expected RegistrationSuccess, got {:?}", other),
        };

        let outbox = reg.handle(
            SocketId(2),
            ClientMessage::Register {
                id: Some(pid("TEST")),
            },
        );
        assert_eq!(
            outbox.to(SocketId(2)),
            vec![&ServerMessage::RegistrationSuccess { id: pid("TEST") }]
        );

        let outbox = reg.handle(
            SocketId(3),
            ClientMessage::Register {
                id: Some(pid("TEST")),
            },
        );
        assert!(matches!(
            outbox.to(SocketId(3))[0],
            ServerMessage::RegistrationFailure { .. }
        ));

        reg.handle(
            SocketId(2),
            ClientMessage::Connect {
                peer_id: client1.clone(),
            },
        );
        assert_eq!(reg.edges_of(&client1), Some(vec![pid("TEST")]));
        assert_eq!(reg.edges_of(&pid("TEST")), Some(vec![client1.clone()]));

        let outbox = reg.handle(
            SocketId(2),
            ClientMessage::Send {
                peer_id: client1.clone(),
                data: json!("ping"),
            },
        );
        assert_eq!(
            outbox.to(SocketId(1)),
            vec![&ServerMessage::PeerData {
                peer_id: pid("TEST"),
                data: json!("ping")
            }]
        );

        let outbox = reg.disconnect(SocketId(2));
        assert_eq!(
            outbox.to(SocketId(1)),
            vec![&ServerMessage::PeerDisconnected { peer_id: pid("TEST") }]
        );
        assert_eq!(reg.edges_of(&client1), Some(vec![]));
        reg.check_consistency().unwrap();
    }
}
