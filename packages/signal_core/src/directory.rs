use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::DeviceId;
use crate::error::SignalError;

/// Devices logged in under one identity name
#[derive(Debug, Default)]
struct Identity {
    devices: BTreeSet<DeviceId>,
    active: Option<DeviceId>,
}

/// Identity name -> logged-in devices, plus the reverse owner of each device.
///
/// Identities are created on first login and never removed; an identity whose
/// devices have all gone is kept empty.
#[derive(Debug, Default)]
pub struct IdentityDirectory {
    identities: HashMap<String, Identity>,
    owners: HashMap<DeviceId, String>,
}

impl IdentityDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log `device` in under `name`.
    ///
    /// Only rejected when the device is listed under `name`, owned by `name`,
    /// and `live` (it resolves to a live connection). Any other combination is
    /// stale state left behind by a missed cleanup and is overwritten.
    pub fn login(&mut self, name: &str, device: &str, live: bool) -> Result<(), SignalError> {
        if live && self.is_member(name, device) && self.owner_of(device) == Some(name) {
            return Err(SignalError::AlreadyLoggedIn {
                name: name.to_string(),
                device: device.to_string(),
            });
        }

        if let Some(previous_owner) = self.owners.get(device).cloned() {
            if previous_owner != name {
                self.detach(&previous_owner, device);
            }
        }

        let identity = self.identities.entry(name.to_string()).or_default();
        identity.devices.insert(device.to_string());
        if identity.active.is_none() {
            identity.active = Some(device.to_string());
        }
        self.owners.insert(device.to_string(), name.to_string());
        Ok(())
    }

    /// Make `device` the active device for `name` and return the one it replaced.
    ///
    /// The target does not have to be logged in under `name`; this lets a
    /// device be designated before its own login.
    pub fn transfer(&mut self, name: &str, device: &str) -> Option<DeviceId> {
        let identity = self.identities.entry(name.to_string()).or_default();
        if !identity.devices.contains(device) {
            warn!(
                "Transferring identity '{}' to device '{}' which is not logged in under it",
                name, device
            );
        }
        identity.active.replace(device.to_string())
    }

    /// Remove `device` from its owner. Returns the owner's name.
    pub fn logout(&mut self, device: &str) -> Option<String> {
        let name = self.owners.remove(device)?;
        self.detach(&name, device);
        Some(name)
    }

    pub fn owner_of(&self, device: &str) -> Option<&str> {
        self.owners.get(device).map(String::as_str)
    }

    pub fn devices_of(&self, name: &str) -> BTreeSet<DeviceId> {
        self.identities
            .get(name)
            .map(|identity| identity.devices.clone())
            .unwrap_or_default()
    }

    pub fn active_device(&self, name: &str) -> Option<&str> {
        self.identities
            .get(name)
            .and_then(|identity| identity.active.as_deref())
    }

    pub fn identity_count(&self) -> usize {
        self.identities.len()
    }

    fn is_member(&self, name: &str, device: &str) -> bool {
        self.identities
            .get(name)
            .is_some_and(|identity| identity.devices.contains(device))
    }

    fn detach(&mut self, name: &str, device: &str) {
        if let Some(identity) = self.identities.get_mut(name) {
            identity.devices.remove(device);
            if identity.active.as_deref() == Some(device) {
                identity.active = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_device_becomes_active() {
        let mut directory = IdentityDirectory::new();
        directory.login("bob", "d1", false).unwrap();
        directory.login("bob", "d2", false).unwrap();

        assert_eq!(directory.active_device("bob"), Some("d1"));
        assert_eq!(
            directory.devices_of("bob").into_iter().collect::<Vec<_>>(),
            vec!["d1".to_string(), "d2".to_string()]
        );
        assert_eq!(directory.owner_of("d2"), Some("bob"));
    }

    #[test]
    fn test_duplicate_live_login_rejected() {
        let mut directory = IdentityDirectory::new();
        directory.login("alice", "d1", false).unwrap();

        let err = directory.login("alice", "d1", true).unwrap_err();
        assert!(matches!(err, SignalError::AlreadyLoggedIn { .. }));
    }

    #[test]
    fn test_stale_login_allowed_when_not_live() {
        let mut directory = IdentityDirectory::new();
        directory.login("alice", "d1", false).unwrap();

        assert!(directory.login("alice", "d1", false).is_ok());
        assert_eq!(directory.devices_of("alice").len(), 1);
    }

    #[test]
    fn test_login_under_new_name_moves_device() {
        let mut directory = IdentityDirectory::new();
        directory.login("alice", "d1", false).unwrap();

        // Live, but owned by another identity: not a duplicate
        directory.login("bob", "d1", true).unwrap();

        assert_eq!(directory.owner_of("d1"), Some("bob"));
        assert!(directory.devices_of("alice").is_empty());
        assert_eq!(directory.active_device("alice"), None);
        assert_eq!(directory.active_device("bob"), Some("d1"));
    }

    #[test]
    fn test_transfer_returns_previous_active() {
        let mut directory = IdentityDirectory::new();
        directory.login("bob", "d1", false).unwrap();
        directory.login("bob", "d2", false).unwrap();

        assert_eq!(directory.transfer("bob", "d2"), Some("d1".to_string()));
        assert_eq!(directory.active_device("bob"), Some("d2"));
    }

    #[test]
    fn test_transfer_to_unknown_device_is_permitted() {
        let mut directory = IdentityDirectory::new();
        assert_eq!(directory.transfer("carol", "d9"), None);
        assert_eq!(directory.active_device("carol"), Some("d9"));
        assert!(directory.devices_of("carol").is_empty());
    }

    #[test]
    fn test_logout_clears_active_device() {
        let mut directory = IdentityDirectory::new();
        directory.login("bob", "d1", false).unwrap();
        directory.login("bob", "d2", false).unwrap();

        assert_eq!(directory.logout("d1"), Some("bob".to_string()));
        assert_eq!(directory.active_device("bob"), None);
        assert_eq!(directory.owner_of("d1"), None);
        assert_eq!(directory.logout("d1"), None);

        // Identity stays around, empty or not
        directory.logout("d2");
        assert_eq!(directory.identity_count(), 1);

        directory.login("bob", "d3", false).unwrap();
        assert_eq!(directory.active_device("bob"), Some("d3"));
    }
}
