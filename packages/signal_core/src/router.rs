//! Signal Router
//!
//! Dispatches decoded messages against the connection registry, identity
//! directory and session tracker. Every entry point mutates state first and
//! then returns the outbound [`Effect`]s; nothing here performs I/O.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::DeviceId;
use crate::directory::IdentityDirectory;
use crate::error::SignalError;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::registry::{ConnectionId, ConnectionRegistry};
use crate::sessions::SessionTracker;

/// Outbound work produced by the router
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Deliver `message` to connection `to`; best effort
    Send {
        to: ConnectionId,
        message: ServerMessage,
    },
    /// The connection lost its device binding to a newer login and must be closed
    Close { connection: ConnectionId },
}

impl Effect {
    fn send(to: ConnectionId, message: ServerMessage) -> Self {
        Self::Send { to, message }
    }
}

/// Counts of tracked state (for metrics)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouterStats {
    pub devices: usize,
    pub identities: usize,
    pub sessions: usize,
}

/// A resolved relay: who is sending and which live connection receives it
struct Route {
    sender: DeviceId,
    target: DeviceId,
    connection: ConnectionId,
}

/// Relay payload kinds that share the offer routing guard
enum Relay {
    Offer(Value),
    Answer(Value),
    Candidate(Value),
}

#[derive(Debug, Default)]
pub struct SignalRouter {
    registry: ConnectionRegistry,
    directory: IdentityDirectory,
    sessions: SessionTracker,
}

impl SignalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Direct registry access, bypassing the router's bookkeeping
    #[cfg(test)]
    pub(crate) fn registry_mut(&mut self) -> &mut ConnectionRegistry {
        &mut self.registry
    }

    pub fn directory(&self) -> &IdentityDirectory {
        &self.directory
    }

    pub fn sessions(&self) -> &SessionTracker {
        &self.sessions
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            devices: self.registry.len(),
            identities: self.directory.identity_count(),
            sessions: self.sessions.len(),
        }
    }

    /// Handle one inbound message from `connection`
    pub fn handle(&mut self, connection: ConnectionId, message: ClientMessage) -> Vec<Effect> {
        match message {
            ClientMessage::Login { name, device } => self.login(connection, &name, &device),
            ClientMessage::Transfer { name, device } => self.transfer(connection, &name, &device),
            ClientMessage::Offer {
                name,
                device,
                offer,
            } => self.relay(connection, name, device, Relay::Offer(offer)),
            ClientMessage::Answer {
                name,
                device,
                answer,
            } => self.relay(connection, name, device, Relay::Answer(answer)),
            ClientMessage::Candidate {
                name,
                device,
                candidate,
            } => self.relay(connection, name, device, Relay::Candidate(candidate)),
            ClientMessage::Leave { name, device } => self.leave(connection, name, device),
            ClientMessage::Unrecognized { kind } => {
                let kind = kind.unwrap_or_default();
                debug!(%connection, "Unrecognized message kind '{}'", kind);
                vec![Effect::send(
                    connection,
                    ServerMessage::error(format!("unrecognized kind: {}", kind)),
                )]
            }
            ClientMessage::Malformed { kind, reason } => {
                debug!(%connection, "Malformed {} message: {}", kind, reason);
                vec![Effect::send(
                    connection,
                    ServerMessage::error(format!("malformed {} message: {}", kind, reason)),
                )]
            }
        }
    }

    /// Handle the close of `connection`.
    ///
    /// Unbinds its device, logs it out, and tells every session partner that
    /// is still live to hang up.
    pub fn disconnect(&mut self, connection: ConnectionId) -> Vec<Effect> {
        let Some(device) = self.registry.unregister(connection) else {
            debug!(%connection, "Closed connection had no device bound");
            return Vec::new();
        };

        let owner = self.directory.logout(&device);
        info!(
            %connection,
            "Device '{}' disconnected (identity: {})",
            device,
            owner.as_deref().unwrap_or("none")
        );

        self.teardown_sessions(&device)
    }

    fn login(&mut self, connection: ConnectionId, name: &str, device: &str) -> Vec<Effect> {
        if let Some(bound) = self.registry.resolve_device(connection) {
            let err = SignalError::ConnectionAlreadyBound {
                connection,
                device: bound.to_string(),
            };
            debug!(
                code = err.error_code(),
                "Rejecting login '{}' / '{}': {}", name, device, err
            );
            return vec![Effect::send(connection, ServerMessage::login_rejected())];
        }

        let live = self.registry.resolve(device).is_some();
        if let Err(err) = self.directory.login(name, device, live) {
            info!(%connection, code = err.error_code(), "Rejecting login: {}", err);
            return vec![Effect::send(connection, ServerMessage::login_rejected())];
        }

        let mut effects = Vec::new();
        if let Some(evicted) = self.registry.register(device, connection) {
            warn!(
                "Device '{}' re-bound from {} to {}, closing the old connection",
                device, evicted, connection
            );
            effects.push(Effect::Close {
                connection: evicted,
            });
            effects.extend(self.teardown_sessions(device));
        }

        info!(%connection, "Device '{}' logged in as '{}'", device, name);
        effects.push(Effect::send(
            connection,
            ServerMessage::login_accepted(name, device),
        ));
        effects
    }

    fn transfer(&mut self, connection: ConnectionId, name: &str, device: &str) -> Vec<Effect> {
        let previous = self.directory.transfer(name, device);
        debug!(
            "Identity '{}' active device {:?} -> '{}'",
            name, previous, device
        );

        let mut effects = vec![Effect::send(connection, ServerMessage::transfer_accepted())];
        if let Some(previous) = previous.filter(|previous| previous != device) {
            if let Some(superseded) = self.registry.resolve(&previous) {
                effects.push(Effect::send(
                    superseded,
                    ServerMessage::transfer_superseded(device),
                ));
            }
        }
        effects
    }

    fn relay(
        &mut self,
        connection: ConnectionId,
        name: Option<String>,
        device: Option<String>,
        payload: Relay,
    ) -> Vec<Effect> {
        let Some(route) = self.route(connection, name.as_deref(), device.as_deref()) else {
            debug!(
                %connection,
                "Dropping relay with no live route (name: {:?}, device: {:?})",
                name, device
            );
            return Vec::new();
        };

        let message = match payload {
            Relay::Offer(offer) => {
                self.sessions.record(&route.sender, &route.target);
                ServerMessage::Offer {
                    offer,
                    name: self.directory.owner_of(&route.sender).map(String::from),
                    device: route.sender,
                }
            }
            Relay::Answer(answer) => {
                self.sessions.record(&route.sender, &route.target);
                ServerMessage::Answer {
                    answer,
                    device: route.sender,
                }
            }
            Relay::Candidate(candidate) => ServerMessage::Candidate { candidate },
        };

        vec![Effect::send(route.connection, message)]
    }

    fn leave(
        &mut self,
        connection: ConnectionId,
        name: Option<String>,
        device: Option<String>,
    ) -> Vec<Effect> {
        let sender = self.registry.resolve_device(connection).map(String::from);

        let peer = match (device, name) {
            (Some(device), _) => Some(device),
            (None, Some(name)) => self.directory.active_device(&name).map(String::from),
            (None, None) => sender
                .as_deref()
                .and_then(|sender| self.sessions.peer_of(sender))
                .map(String::from),
        };

        if let Some(sender) = &sender {
            self.sessions.remove(sender);
            if let Some(peer) = &peer {
                self.sessions.remove_if_peer(peer, sender);
            }
        }

        match peer.and_then(|peer| self.registry.resolve(&peer)) {
            Some(target) if target != connection => {
                vec![Effect::send(target, ServerMessage::Leave)]
            }
            _ => {
                debug!(%connection, "Leave has no live peer to notify");
                Vec::new()
            }
        }
    }

    /// Resolve a relay target to a live connection other than the sender's
    fn route(
        &self,
        connection: ConnectionId,
        name: Option<&str>,
        device: Option<&str>,
    ) -> Option<Route> {
        let sender = self.registry.resolve_device(connection)?;
        let target = match device {
            Some(device) => device,
            None => self.directory.active_device(name?)?,
        };
        let target_connection = self.registry.resolve(target)?;
        if target_connection == connection {
            return None;
        }
        Some(Route {
            sender: sender.to_string(),
            target: target.to_string(),
            connection: target_connection,
        })
    }

    /// Drop every session entry touching `device` and notify live partners
    fn teardown_sessions(&mut self, device: &str) -> Vec<Effect> {
        let partners = self.sessions.partners_of(device);
        self.sessions.remove(device);

        let mut effects = Vec::new();
        for partner in partners {
            self.sessions.remove_if_peer(&partner, device);
            if let Some(target) = self.registry.resolve(&partner) {
                debug!("Notifying '{}' that '{}' left", partner, device);
                effects.push(Effect::send(target, ServerMessage::Leave));
            }
        }
        effects
    }
}
