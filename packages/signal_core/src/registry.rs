use std::collections::HashMap;

use crate::DeviceId;

/// Identifier for one live duplex connection, assigned by the transport layer
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Bidirectional device <-> connection binding.
///
/// Both maps are updated together so a device is bound to at most one
/// connection and a connection to at most one device.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    by_device: HashMap<DeviceId, ConnectionId>,
    by_connection: HashMap<ConnectionId, DeviceId>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `device` to `connection`.
    ///
    /// Returns the connection previously bound to `device`, if it was a
    /// different one. The caller owns closing it; its binding is already gone.
    pub fn register(&mut self, device: &str, connection: ConnectionId) -> Option<ConnectionId> {
        if let Some(previous_device) = self.by_connection.remove(&connection) {
            if previous_device != device {
                self.by_device.remove(&previous_device);
            }
        }

        let evicted = match self.by_device.insert(device.to_string(), connection) {
            Some(old) if old != connection => {
                self.by_connection.remove(&old);
                Some(old)
            }
            _ => None,
        };
        self.by_connection.insert(connection, device.to_string());
        evicted
    }

    /// Remove whatever binding `connection` holds and return its device.
    pub fn unregister(&mut self, connection: ConnectionId) -> Option<DeviceId> {
        let device = self.by_connection.remove(&connection)?;
        if self.by_device.get(&device) == Some(&connection) {
            self.by_device.remove(&device);
        }
        Some(device)
    }

    pub fn resolve(&self, device: &str) -> Option<ConnectionId> {
        self.by_device.get(device).copied()
    }

    pub fn resolve_device(&self, connection: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.by_device.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_device.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn is_consistent(&self) -> bool {
        self.by_device.len() == self.by_connection.len()
            && self
                .by_device
                .iter()
                .all(|(device, conn)| self.by_connection.get(conn) == Some(device))
    }
}
