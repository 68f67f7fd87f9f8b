use signal_core::{ClientMessage, ConnectionId, Effect, RouterStats, ServerMessage, SignalRouter};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::metrics::ServerMetrics;

/// Per-connection queue of messages waiting to be written to the socket.
/// Dropping the coordinator's sender closes the connection.
pub type Outbox = mpsc::Sender<ServerMessage>;

#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error("coordinator is gone")]
    Stopped,
    #[error("coordinator didn't respond")]
    NoResponse,
}

/// Commands that can be sent to the coordinator actor
#[derive(Debug)]
pub enum CoordinatorCommand {
    Attach {
        outbox: Outbox,
        respond_to: oneshot::Sender<ConnectionId>,
    },
    Dispatch {
        connection: ConnectionId,
        message: ClientMessage,
        respond_to: oneshot::Sender<()>,
    },
    Detach {
        connection: ConnectionId,
        respond_to: oneshot::Sender<()>,
    },
    GetStats {
        respond_to: oneshot::Sender<RouterStats>,
    },
}

/// Handle to communicate with the coordinator actor
#[derive(Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Spawn the coordinator task and return its handle
    pub fn spawn(command_capacity: usize, metrics: Arc<ServerMetrics>) -> Self {
        let (sender, receiver) = mpsc::channel(command_capacity);
        let coordinator = Coordinator {
            router: SignalRouter::new(),
            outboxes: HashMap::new(),
            next_id: 1,
            receiver,
            metrics,
        };

        tokio::spawn(async move {
            coordinator.run().await;
        });

        Self { sender }
    }

    /// Register a new connection's outbox and get its id
    pub async fn attach(&self, outbox: Outbox) -> Result<ConnectionId, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::Attach {
                outbox,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        rx.await.map_err(|_| CoordinatorError::NoResponse)
    }

    /// Route one inbound message. Resolves once every resulting delivery is queued.
    pub async fn dispatch(
        &self,
        connection: ConnectionId,
        message: ClientMessage,
    ) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::Dispatch {
                connection,
                message,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        rx.await.map_err(|_| CoordinatorError::NoResponse)
    }

    /// Report that a connection has closed
    pub async fn detach(&self, connection: ConnectionId) -> Result<(), CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::Detach {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        rx.await.map_err(|_| CoordinatorError::NoResponse)
    }

    pub async fn stats(&self) -> Result<RouterStats, CoordinatorError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(CoordinatorCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| CoordinatorError::Stopped)?;
        rx.await.map_err(|_| CoordinatorError::NoResponse)
    }
}

/// Single owner of all signaling state; serializes every mutation
struct Coordinator {
    router: SignalRouter,
    outboxes: HashMap<ConnectionId, Outbox>,
    next_id: u64,
    receiver: mpsc::Receiver<CoordinatorCommand>,
    metrics: Arc<ServerMetrics>,
}

impl Coordinator {
    async fn run(mut self) {
        debug!("Coordinator started");

        while let Some(cmd) = self.receiver.recv().await {
            match cmd {
                CoordinatorCommand::Attach { outbox, respond_to } => {
                    let connection = ConnectionId(self.next_id);
                    self.next_id += 1;
                    self.outboxes.insert(connection, outbox);
                    let _ = respond_to.send(connection);
                }

                CoordinatorCommand::Dispatch {
                    connection,
                    message,
                    respond_to,
                } => {
                    let effects = self.router.handle(connection, message);
                    self.deliver(effects);
                    let _ = respond_to.send(());
                }

                CoordinatorCommand::Detach {
                    connection,
                    respond_to,
                } => {
                    self.outboxes.remove(&connection);
                    let effects = self.router.disconnect(connection);
                    self.deliver(effects);
                    let _ = respond_to.send(());
                }

                CoordinatorCommand::GetStats { respond_to } => {
                    let _ = respond_to.send(self.router.stats());
                }
            }
        }

        info!("Coordinator stopped");
    }

    /// Queue effects onto outboxes without waiting on any connection
    fn deliver(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::Send { to, message } => match self.outboxes.get(&to) {
                    Some(outbox) => match outbox.try_send(message) {
                        Ok(()) => self.metrics.message_sent(),
                        Err(e) => {
                            debug!(connection = %to, "Dropping delivery: {}", e);
                            self.metrics.message_dropped();
                        }
                    },
                    None => {
                        debug!(connection = %to, "Dropping delivery to unknown connection");
                        self.metrics.message_dropped();
                    }
                },
                Effect::Close { connection } => {
                    if self.outboxes.remove(&connection).is_some() {
                        info!(%connection, "Closing evicted connection");
                        self.metrics.connection_evicted();
                    }
                }
            }
        }
    }
}
