use relay_protocol::{ClientMessage, IdGenerator, PeerId, ServerMessage};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::metrics::ServerMetrics;
use crate::registry::{Outbox, Registry, RegistryStats, SocketId};

/// Commands that can be sent to the relay actor
#[derive(Debug)]
pub enum RelayCommand {
    /// Attach a new socket whose outbound frames go to `outlet`
    Open {
        outlet: mpsc::Sender<ServerMessage>,
        respond_to: oneshot::Sender<SocketId>,
    },
    Inbound {
        socket: SocketId,
        message: ClientMessage,
    },
    /// The transport for `socket` is gone
    Close {
        socket: SocketId,
    },
    Stats {
        respond_to: oneshot::Sender<RegistryStats>,
    },
    EdgesOf {
        peer: PeerId,
        respond_to: oneshot::Sender<Option<Vec<PeerId>>>,
    },
}

/// Handle to communicate with the relay actor
#[derive(Clone)]
pub struct RelayHandle {
    sender: mpsc::Sender<RelayCommand>,
}

impl RelayHandle {
    /// Attach a socket and get its id back. Frames addressed to it are
    /// pushed into `outlet` without waiting.
    pub async fn open(&self, outlet: mpsc::Sender<ServerMessage>) -> Result<SocketId, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Open {
                outlet,
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::ActorGone)?;
        rx.await.map_err(|_| RelayError::ActorGone)
    }

    /// Hand one decoded frame to the relay. Replies, if any, arrive on the
    /// socket's outlet.
    pub async fn inbound(&self, socket: SocketId, message: ClientMessage) -> Result<(), RelayError> {
        self.sender
            .send(RelayCommand::Inbound { socket, message })
            .await
            .map_err(|_| RelayError::ActorGone)
    }

    pub async fn close(&self, socket: SocketId) -> Result<(), RelayError> {
        self.sender
            .send(RelayCommand::Close { socket })
            .await
            .map_err(|_| RelayError::ActorGone)
    }

    pub async fn stats(&self) -> Result<RegistryStats, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::Stats { respond_to: tx })
            .await
            .map_err(|_| RelayError::ActorGone)?;
        rx.await.map_err(|_| RelayError::ActorGone)
    }

    /// Peers `peer` has an edge to, or `None` if `peer` is not registered
    pub async fn edges_of(&self, peer: &PeerId) -> Result<Option<Vec<PeerId>>, RelayError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RelayCommand::EdgesOf {
                peer: peer.clone(),
                respond_to: tx,
            })
            .await
            .map_err(|_| RelayError::ActorGone)?;
        rx.await.map_err(|_| RelayError::ActorGone)
    }
}

/// Owns the registry and every socket's outlet. All state changes happen on
/// this task, one command at a time.
pub struct RelayActor {
    registry: Registry,
    outlets: HashMap<SocketId, mpsc::Sender<ServerMessage>>,
    next_socket: u64,
    receiver: mpsc::Receiver<RelayCommand>,
    metrics: Arc<ServerMetrics>,
}

impl RelayActor {
    /// Spawn the relay actor and return its handle. The actor stops once
    /// every handle is dropped.
    pub fn spawn(ids: IdGenerator, command_capacity: usize, metrics: Arc<ServerMetrics>) -> RelayHandle {
        let (sender, receiver) = mpsc::channel(command_capacity.max(1));

        let actor = RelayActor {
            registry: Registry::new(ids),
            outlets: HashMap::new(),
            next_socket: 1,
            receiver,
            metrics,
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        RelayHandle { sender }
    }

    async fn run(mut self) {
        debug!("Relay actor started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                RelayCommand::Open { outlet, respond_to } => {
                    let socket = SocketId(self.next_socket);
                    self.next_socket += 1;
                    self.registry.attach(socket);
                    self.outlets.insert(socket, outlet);
                    let _ = respond_to.send(socket);
                }

                RelayCommand::Inbound { socket, message } => {
                    debug!(socket = %socket, kind = message.kind(), "Inbound frame");
                    let outbox = self.registry.handle(socket, message);
                    self.deliver(outbox);
                }

                RelayCommand::Close { socket } => {
                    let outbox = self.registry.disconnect(socket);
                    self.outlets.remove(&socket);
                    self.deliver(outbox);
                }

                RelayCommand::Stats { respond_to } => {
                    let _ = respond_to.send(self.registry.stats());
                }

                RelayCommand::EdgesOf { peer, respond_to } => {
                    let _ = respond_to.send(self.registry.edges_of(&peer));
                }
            }
        }

        debug!("Relay actor stopped");
    }

    /// Push each frame into its socket's outlet without waiting. A socket
    /// whose outlet is full is evicted once the whole outbox is out, so it
    /// never misses a frame while staying connected.
    fn deliver(&mut self, outbox: Outbox) {
        let mut pending = VecDeque::from([outbox]);

        while let Some(outbox) = pending.pop_front() {
            let mut slow = Vec::new();

            for delivery in outbox {
                match &delivery.message {
                    ServerMessage::RegistrationSuccess { .. } => self.metrics.registered(),
                    ServerMessage::ConnectSuccess { .. } => self.metrics.edge_opened(),
                    ServerMessage::PeerDisconnected { .. } => self.metrics.edge_closed(),
                    _ => {}
                }

                let Some(outlet) = self.outlets.get(&delivery.to) else {
                    debug!(socket = %delivery.to, kind = delivery.message.kind(), "No outlet for socket");
                    self.metrics.message_dropped();
                    continue;
                };

                match outlet.try_send(delivery.message) {
                    Ok(()) => self.metrics.message_sent(),
                    Err(mpsc::error::TrySendError::Full(msg)) => {
                        warn!(socket = %delivery.to, kind = msg.kind(), "Outlet full, evicting socket");
                        self.metrics.message_dropped();
                        // Nothing more may reach it out of order
                        self.outlets.remove(&delivery.to);
                        slow.push(delivery.to);
                    }
                    Err(mpsc::error::TrySendError::Closed(msg)) => {
                        debug!(socket = %delivery.to, kind = msg.kind(), "Outlet closed, dropping frame");
                        self.metrics.message_dropped();
                    }
                }
            }

            for socket in slow {
                self.metrics.socket_evicted();
                pending.push_back(self.registry.disconnect(socket));
            }
        }
    }
}
