// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Changes to a device that is already configured
//!
//! A new address goes through the same validation as a first setup and must
//! answer with the identity already on record. The polling period alone is
//! an option and is stored without connecting.

use std::sync::Arc;

use log::{info, warn};
use thiserror::Error;

use super::mac::is_canonical_mac;
use super::probe::Prober;
use super::registry::DeviceRegistry;
use super::ValidationError;
use crate::config::{ConnectionConfig, DiscoveryConfig};
use crate::transport::{Endpoint, TransportFactory};

/// New connection settings for a configured device
///
/// `None` keeps the value on record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconfiguration {
    pub host: String,
    pub port: u16,
    pub slave_id: Option<u8>,
    pub scan_interval_seconds: Option<u64>,
}

impl Reconfiguration {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            slave_id: None,
            scan_interval_seconds: None,
        }
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = Some(slave_id);
        self
    }

    pub fn with_scan_interval(mut self, seconds: u64) -> Self {
        self.scan_interval_seconds = Some(seconds);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReconfigureError {
    #[error("Device {0} is not configured")]
    NotConfigured(String),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("Device at the new address is {got}, expected {expected}")]
    IdentityMismatch { expected: String, got: String },
    #[error("Address {address} already belongs to device {identity}")]
    AddressInUse { address: String, identity: String },
    #[error("Scan interval must be at least one second")]
    InvalidScanInterval,
}

impl ReconfigureError {
    /// Stable reason reported to the user
    pub fn reason(&self) -> &'static str {
        match self {
            ReconfigureError::NotConfigured(_) => "not_configured",
            ReconfigureError::Validation(err) => err.category(),
            ReconfigureError::IdentityMismatch { .. } => "unique_id_mismatch",
            ReconfigureError::AddressInUse { .. } => "already_configured",
            ReconfigureError::InvalidScanInterval => "invalid_scan_interval",
        }
    }
}

/// Applies reconfigurations to the devices of a registry
pub struct Reconfigurer {
    registry: DeviceRegistry,
    prober: Prober,
}

impl Reconfigurer {
    pub fn new(
        config: &DiscoveryConfig,
        registry: DeviceRegistry,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            registry,
            prober: Prober::new(factory, config),
        }
    }

    /// Validate the new address of `identity` and store it
    ///
    /// Nothing is stored unless the device answers at the new address and,
    /// for a MAC identity, reports that same MAC.
    pub async fn reconfigure(
        &self,
        identity: &str,
        change: &Reconfiguration,
    ) -> Result<ConnectionConfig, ReconfigureError> {
        let current = self
            .registry
            .get(identity)
            .ok_or_else(|| ReconfigureError::NotConfigured(identity.to_string()))?;

        let host = change.host.trim();
        if host.is_empty() {
            return Err(ValidationError::MissingHost.into());
        }
        let scan_interval_seconds = change
            .scan_interval_seconds
            .unwrap_or(current.scan_interval_seconds);
        if scan_interval_seconds == 0 {
            return Err(ReconfigureError::InvalidScanInterval);
        }
        if let Some(owner) = self.registry.find_by_address(host, change.port) {
            if owner != identity {
                return Err(ReconfigureError::AddressInUse {
                    address: format!("{}:{}", host, change.port),
                    identity: owner,
                });
            }
        }

        let slave_id = change.slave_id.unwrap_or(current.slave_id);
        let endpoint = Endpoint::new(host, change.port, slave_id);
        let report = self.prober.validate(&endpoint).await?;

        if is_canonical_mac(identity) {
            match report.mac_address {
                Some(mac) if mac != identity => {
                    warn!("Device at {} is {}, not {}", endpoint, mac, identity);
                    return Err(ReconfigureError::IdentityMismatch {
                        expected: identity.to_string(),
                        got: mac,
                    });
                }
                Some(_) => {}
                None => warn!(
                    "MAC address of {} unreadable, keeping {} unverified",
                    endpoint, identity
                ),
            }
        }

        let updated = ConnectionConfig::new(host, change.port, slave_id, scan_interval_seconds);
        self.registry.insert(identity, updated.clone());
        info!("Device {} reconfigured to {}", identity, endpoint);
        Ok(updated)
    }

    /// Change the polling period of `identity`
    pub fn set_scan_interval(
        &self,
        identity: &str,
        seconds: u64,
    ) -> Result<ConnectionConfig, ReconfigureError> {
        if seconds == 0 {
            return Err(ReconfigureError::InvalidScanInterval);
        }
        let mut config = self
            .registry
            .get(identity)
            .ok_or_else(|| ReconfigureError::NotConfigured(identity.to_string()))?;
        config.scan_interval_seconds = seconds;
        self.registry.insert(identity, config.clone());
        info!("Scan interval of {} set to {}s", identity, seconds);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::classic_registers;
    use crate::transport::{MockTransport, MockTransportFactory};

    const MAC: &str = "60:1d:0f:12:34:56";

    fn setup(mock: &MockTransport) -> (DeviceRegistry, Reconfigurer) {
        let registry = DeviceRegistry::new();
        registry.insert(MAC, ConnectionConfig::new("192.168.1.50", 502, 10, 15));
        let reconfigurer = Reconfigurer::new(
            &DiscoveryConfig::default(),
            registry.clone(),
            Arc::new(MockTransportFactory(mock.clone())),
        );
        (registry, reconfigurer)
    }

    #[tokio::test]
    async fn new_address_is_validated_and_stored() {
        let mock = MockTransport::with_registers(classic_registers());
        let (registry, reconfigurer) = setup(&mock);

        let updated = reconfigurer
            .reconfigure(MAC, &Reconfiguration::new("192.168.1.80", 502))
            .await
            .unwrap();
        assert_eq!(updated, ConnectionConfig::new("192.168.1.80", 502, 10, 15));
        assert_eq!(registry.get(MAC), Some(updated));
        assert_eq!(mock.connect_count(), 1);
    }

    #[tokio::test]
    async fn another_device_at_the_new_address_is_refused() {
        let mock = MockTransport::with_registers(classic_registers());
        mock.set_registers(4106, &[0x5566, 0x2233, 0x0011]);
        let (registry, reconfigurer) = setup(&mock);

        let err = reconfigurer
            .reconfigure(MAC, &Reconfiguration::new("192.168.1.80", 502).with_slave_id(1))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ReconfigureError::IdentityMismatch {
                expected: MAC.to_string(),
                got: "00:11:22:33:55:66".to_string(),
            }
        );
        assert_eq!(err.reason(), "unique_id_mismatch");
        assert_eq!(registry.get(MAC).unwrap().host, "192.168.1.50");
    }

    #[tokio::test]
    async fn unreachable_address_keeps_the_old_one() {
        let mock = MockTransport::with_registers(classic_registers());
        mock.set_unreachable(true);
        let (registry, reconfigurer) = setup(&mock);

        let err = reconfigurer
            .reconfigure(MAC, &Reconfiguration::new("192.168.1.80", 502))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "cannot_connect");
        assert_eq!(registry.get(MAC).unwrap().host, "192.168.1.50");
    }

    #[tokio::test]
    async fn refuses_unknown_devices_and_taken_addresses() {
        let mock = MockTransport::with_registers(classic_registers());
        let (registry, reconfigurer) = setup(&mock);
        registry.insert(
            "00:11:22:33:44:55",
            ConnectionConfig::new("192.168.1.60", 502, 10, 15),
        );

        assert_eq!(
            reconfigurer
                .reconfigure("aa:bb:cc:dd:ee:ff", &Reconfiguration::new("192.168.1.80", 502))
                .await,
            Err(ReconfigureError::NotConfigured("aa:bb:cc:dd:ee:ff".to_string()))
        );
        let err = reconfigurer
            .reconfigure(MAC, &Reconfiguration::new("192.168.1.60", 502))
            .await
            .unwrap_err();
        assert_eq!(err.reason(), "already_configured");
        assert_eq!(
            reconfigurer
                .reconfigure(MAC, &Reconfiguration::new(" ", 502))
                .await,
            Err(ReconfigureError::Validation(ValidationError::MissingHost))
        );
        assert_eq!(mock.connect_count(), 0);
    }

    #[test]
    fn scan_interval_is_an_offline_option() {
        let mock = MockTransport::new();
        let (registry, reconfigurer) = setup(&mock);

        let updated = reconfigurer.set_scan_interval(MAC, 60).unwrap();
        assert_eq!(updated.scan_interval_seconds, 60);
        assert_eq!(registry.get(MAC).unwrap().scan_interval_seconds, 60);
        assert_eq!(
            reconfigurer.set_scan_interval(MAC, 0),
            Err(ReconfigureError::InvalidScanInterval)
        );
        assert_eq!(mock.connect_count(), 0);
    }
}
