use futures::{SinkExt, StreamExt};
use relay_protocol::{ClientMessage, PeerId, ServerMessage};
use std::collections::{HashMap, VecDeque};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::connection::{ConnectionEvent, PeerTable, RelayConnection};
use crate::error::ClientError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Work handed to the driver task by the client and its connections
#[derive(Debug)]
pub(crate) enum DriverCommand {
    /// Encode and write one frame
    Frame(ClientMessage),
    /// Ask the relay for an edge; resolved by connect-success/-failure
    Connect {
        peer: PeerId,
        respond_to: oneshot::Sender<Result<RelayConnection, ClientError>>,
    },
    /// A handle was dropped while open; close the edge if it still owns it
    Release { peer: PeerId, token: u64 },
    /// Close the WebSocket
    Shutdown,
}

/// Things that happen to the client as a whole
#[derive(Debug)]
pub enum ClientEvent {
    /// A peer opened an edge to us
    Connection(RelayConnection),
    /// The relay refused to forward a payload
    SendFailed { peer: PeerId, message: String },
    /// The relay connection is gone. No further events follow.
    Closed,
}

/// A registered session with the relay
#[derive(Debug)]
pub struct RelayClient {
    id: PeerId,
    commands: mpsc::Sender<DriverCommand>,
    events: mpsc::UnboundedReceiver<ClientEvent>,
    peers: PeerTable,
}

impl RelayClient {
    /// Open the WebSocket at `url` and register, with `requested` as the id
    /// or a server-generated one. Resolves once the relay confirms.
    pub async fn connect(url: &str, requested: Option<PeerId>) -> Result<Self, ClientError> {
        let (mut ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(ClientError::from_tungstenite)?;

        let register = ClientMessage::Register { id: requested }.encode()?;
        ws.send(Message::Text(register.into()))
            .await
            .map_err(ClientError::from_tungstenite)?;

        let id = loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => match ServerMessage::decode(&text) {
                    Ok(ServerMessage::RegistrationSuccess { id }) => break id,
                    Ok(ServerMessage::RegistrationFailure { message }) => {
                        let _ = ws.close(None).await;
                        return Err(ClientError::Registration(message));
                    }
                    Ok(other) => debug!(kind = other.kind(), "Ignoring frame before registration"),
                    Err(e) => debug!("Ignoring undecodable frame: {}", e),
                },
                Some(Ok(Message::Close(_))) | None => return Err(ClientError::Disconnected),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(ClientError::from_tungstenite(e)),
            }
        };

        info!(peer = %id, "Registered with relay at {}", url);

        let (commands, command_rx) = mpsc::channel(64);
        let (event_tx, events) = mpsc::unbounded_channel();
        let peers = PeerTable::default();

        let driver = Driver {
            ws,
            commands: command_rx,
            command_tx: commands.downgrade(),
            events: event_tx,
            peers: peers.clone(),
            pending: HashMap::new(),
        };
        tokio::spawn(driver.run());

        Ok(Self {
            id,
            commands,
            events,
            peers,
        })
    }

    /// The id the relay registered us under
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Open an edge to `peer`. Resolves when the relay confirms or refuses.
    pub async fn connect_to(&self, peer: PeerId) -> Result<RelayConnection, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(DriverCommand::Connect {
                peer,
                respond_to: tx,
            })
            .await
            .map_err(|_| ClientError::Disconnected)?;
        rx.await.map_err(|_| ClientError::Disconnected)?
    }

    /// Next client-level event, or `None` after `Closed` has been returned.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.events.recv().await
    }

    /// Peers we currently hold an open edge with, sorted
    pub async fn peers(&self) -> Vec<PeerId> {
        self.peers.peers().await
    }

    /// Close the WebSocket. Every open connection reports `Closed(Remote)`
    /// and the client reports `Closed`.
    pub async fn close(&self) {
        let _ = self.commands.send(DriverCommand::Shutdown).await;
    }
}

/// Owns the WebSocket. Runs until the socket ends or every handle is gone.
struct Driver {
    ws: WsStream,
    commands: mpsc::Receiver<DriverCommand>,
    /// Upgraded into every connection handle. Weak, so the driver stops
    /// once the client and all its connections are dropped.
    command_tx: mpsc::WeakSender<DriverCommand>,
    events: mpsc::UnboundedSender<ClientEvent>,
    peers: PeerTable,
    /// Outstanding connect requests, oldest first per peer
    pending: HashMap<PeerId, VecDeque<oneshot::Sender<Result<RelayConnection, ClientError>>>>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                msg = self.ws.next() => match msg {
                    Some(Ok(Message::Text(text))) => match ServerMessage::decode(&text) {
                        Ok(server_msg) => self.handle_server(server_msg).await,
                        Err(e) => debug!("Ignoring undecodable frame: {}", e),
                    },
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Relay closed the connection");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("WebSocket read failed: {}", e);
                        break;
                    }
                },
                cmd = self.commands.recv() => match cmd {
                    Some(DriverCommand::Frame(frame)) => {
                        if let Err(e) = self.write(&frame).await {
                            debug!("WebSocket write failed: {}", e);
                            break;
                        }
                    }
                    Some(DriverCommand::Connect { peer, respond_to }) => {
                        let frame = ClientMessage::Connect { peer_id: peer.clone() };
                        if let Err(e) = self.write(&frame).await {
                            let _ = respond_to.send(Err(e));
                            break;
                        }
                        self.pending.entry(peer).or_default().push_back(respond_to);
                    }
                    Some(DriverCommand::Release { peer, token }) => {
                        if self.peers.release(&peer, token).await {
                            debug!(peer = %peer, "Connection handle dropped, closing edge");
                            if let Err(e) = self.write(&ClientMessage::Close { peer_id: peer }).await {
                                debug!("WebSocket write failed: {}", e);
                                break;
                            }
                        }
                    }
                    Some(DriverCommand::Shutdown) => {
                        debug!("Closing relay connection");
                        let _ = self.ws.close(None).await;
                        break;
                    }
                    None => {
                        debug!("All handles dropped, closing relay connection");
                        let _ = self.ws.close(None).await;
                        break;
                    }
                },
            }
        }

        self.finish().await;
    }

    async fn write(&mut self, frame: &ClientMessage) -> Result<(), ClientError> {
        let text = frame.encode()?;
        self.ws
            .send(Message::Text(text.into()))
            .await
            .map_err(ClientError::from_tungstenite)
    }

    async fn handle_server(&mut self, msg: ServerMessage) {
        match msg {
            ServerMessage::ConnectSuccess { peer_id } => {
                let Some(respond_to) = self.take_pending(&peer_id) else {
                    debug!(peer = %peer_id, "connect-success with no pending request");
                    return;
                };
                let Some(commands) = self.command_tx.upgrade() else {
                    return;
                };
                let conn = self.peers.open(peer_id.clone(), commands).await;
                if respond_to.send(Ok(conn)).is_err() {
                    // Caller gave up waiting; the dropped handle releases the edge
                    debug!(peer = %peer_id, "Dropping unwanted connection");
                }
            }

            ServerMessage::ConnectFailure { peer_id, message } => {
                match self.take_pending(&peer_id) {
                    Some(respond_to) => {
                        let _ = respond_to.send(Err(ClientError::ConnectFailed {
                            peer: peer_id,
                            message,
                        }));
                    }
                    None => debug!(peer = %peer_id, "connect-failure with no pending request: {}", message),
                }
            }

            ServerMessage::PeerConnected { peer_id } => {
                info!(peer = %peer_id, "Peer connected");
                let Some(commands) = self.command_tx.upgrade() else {
                    return;
                };
                let conn = self.peers.open(peer_id, commands).await;
                if self.events.send(ClientEvent::Connection(conn)).is_err() {
                    debug!("Client dropped, refusing incoming connection");
                }
            }

            ServerMessage::PeerDisconnected { peer_id } => {
                if self.peers.close_remote(&peer_id).await {
                    info!(peer = %peer_id, "Peer disconnected");
                } else {
                    debug!(peer = %peer_id, "peer-disconnected for unknown peer");
                }
            }

            ServerMessage::PeerData { peer_id, data } => {
                if !self.peers.deliver(&peer_id, ConnectionEvent::Data(data)).await {
                    debug!(peer = %peer_id, "Dropping data for unknown peer");
                }
            }

            ServerMessage::SendFailure { peer_id, message } => {
                warn!(peer = %peer_id, "Send failed: {}", message);
                let _ = self.events.send(ClientEvent::SendFailed {
                    peer: peer_id,
                    message,
                });
            }

            ServerMessage::RegistrationSuccess { .. } | ServerMessage::RegistrationFailure { .. } => {
                debug!(kind = msg.kind(), "Ignoring registration reply after registration");
            }
        }
    }

    fn take_pending(
        &mut self,
        peer: &PeerId,
    ) -> Option<oneshot::Sender<Result<RelayConnection, ClientError>>> {
        let queue = self.pending.get_mut(peer)?;
        let respond_to = queue.pop_front();
        if queue.is_empty() {
            self.pending.remove(peer);
        }
        respond_to
    }

    async fn finish(mut self) {
        for (_, queue) in self.pending.drain() {
            for respond_to in queue {
                let _ = respond_to.send(Err(ClientError::Disconnected));
            }
        }
        self.peers.close_all().await;
        let _ = self.events.send(ClientEvent::Closed);
        info!("Relay connection closed");
    }
}
