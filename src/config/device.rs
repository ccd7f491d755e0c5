// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Persisted connection of one configured controller

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::transport::Endpoint;

/// Validated connection to a controller.
///
/// Stored in the `devices` section keyed by the device identity (canonical
/// MAC address, or `host:port` when the MAC is unknown). A connection is
/// only created by the setup flow after a successful probe.
///
/// # Example
///
/// ```
/// use rust_midnite::config::ConnectionConfig;
///
/// let device = ConnectionConfig::new("192.168.1.50", 502, 10, 15);
/// assert_eq!(device.endpoint().address(), "192.168.1.50:502");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Host name or IP address of the controller
    pub host: String,
    /// Modbus TCP port
    pub port: u16,
    /// Modbus unit identifier
    pub slave_id: u8,
    /// Polling period in seconds
    pub scan_interval_seconds: u64,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, slave_id: u8, scan_interval_seconds: u64) -> Self {
        Self {
            host: host.into(),
            port,
            slave_id,
            scan_interval_seconds,
        }
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::new(self.host.clone(), self.port, self.slave_id)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_seconds.max(1))
    }
}
