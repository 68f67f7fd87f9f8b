use std::collections::HashMap;

use crate::DeviceId;

/// Last known relay partner per device.
///
/// Entries are directed (`from -> to`) and overwritten freely. They only answer
/// "who should hear that I left"; entries naming devices that are gone are
/// normal and are skipped at delivery time.
#[derive(Debug, Default)]
pub struct SessionTracker {
    peers: HashMap<DeviceId, DeviceId>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, from: &str, to: &str) {
        self.peers.insert(from.to_string(), to.to_string());
    }

    pub fn peer_of(&self, device: &str) -> Option<&str> {
        self.peers.get(device).map(String::as_str)
    }

    pub fn remove(&mut self, device: &str) -> Option<DeviceId> {
        self.peers.remove(device)
    }

    /// Remove `device`'s entry only if it still points at `peer`.
    pub fn remove_if_peer(&mut self, device: &str, peer: &str) -> bool {
        if self.peer_of(device) == Some(peer) {
            self.peers.remove(device);
            true
        } else {
            false
        }
    }

    /// Every device that should be told `device` went away: its own partner
    /// plus any device whose entry points back at it.
    pub fn partners_of(&self, device: &str) -> Vec<DeviceId> {
        let mut partners: Vec<DeviceId> =
            self.peer_of(device).into_iter().map(String::from).collect();
        let mut inbound: Vec<DeviceId> = self
            .peers
            .iter()
            .filter(|(from, to)| to.as_str() == device && from.as_str() != device)
            .map(|(from, _)| from.clone())
            .collect();
        inbound.sort();
        for from in inbound {
            if !partners.contains(&from) {
                partners.push(from);
            }
        }
        partners
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
