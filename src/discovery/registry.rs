// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configured devices keyed by identity

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::info;

use crate::config::ConnectionConfig;

/// Shared set of configured devices
///
/// Clones refer to the same entries. The identity is the canonical MAC
/// address, or `host:port` when the MAC is unknown.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    entries: Arc<RwLock<BTreeMap<String, ConnectionConfig>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: BTreeMap<String, ConnectionConfig>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(entries)),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, ConnectionConfig>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, ConnectionConfig>> {
        self.entries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn get(&self, identity: &str) -> Option<ConnectionConfig> {
        self.read().get(identity).cloned()
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.read().contains_key(identity)
    }

    /// Identity of the device configured at `host:port`
    pub fn find_by_address(&self, host: &str, port: u16) -> Option<String> {
        self.read()
            .iter()
            .find(|(_, config)| config.host.eq_ignore_ascii_case(host) && config.port == port)
            .map(|(identity, _)| identity.clone())
    }

    pub fn insert(&self, identity: impl Into<String>, config: ConnectionConfig) {
        self.write().insert(identity.into(), config);
    }

    /// Point an existing entry at a new host; returns whether it changed
    pub fn update_host(&self, identity: &str, host: &str) -> bool {
        let mut entries = self.write();
        match entries.get_mut(identity) {
            Some(config) if config.host != host => {
                info!(
                    "Device {} moved from {} to {}",
                    identity, config.host, host
                );
                config.host = host.to_string();
                true
            }
            _ => false,
        }
    }

    pub fn remove(&self, identity: &str) -> Option<ConnectionConfig> {
        self.write().remove(identity)
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Copy of every entry
    pub fn entries(&self) -> BTreeMap<String, ConnectionConfig> {
        self.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_update_keeps_a_single_entry() {
        let registry = DeviceRegistry::new();
        registry.insert(
            "60:1d:0f:12:34:56",
            ConnectionConfig::new("192.168.1.50", 502, 10, 15),
        );

        assert!(registry.update_host("60:1d:0f:12:34:56", "192.168.1.77"));
        assert!(!registry.update_host("60:1d:0f:12:34:56", "192.168.1.77"));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find_by_address("192.168.1.77", 502).as_deref(),
            Some("60:1d:0f:12:34:56")
        );
        assert_eq!(registry.find_by_address("192.168.1.50", 502), None);
    }

    #[test]
    fn clones_share_entries() {
        let registry = DeviceRegistry::new();
        let clone = registry.clone();
        clone.insert("10.0.0.2:502", ConnectionConfig::new("10.0.0.2", 502, 10, 15));
        assert!(registry.contains("10.0.0.2:502"));
        assert!(registry.remove("10.0.0.2:502").is_some());
        assert!(clone.is_empty());
    }
}
