// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Discovery and connection validation configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings of the setup flow and its connection probe.
///
/// # Fields
///
/// * `probe_timeout_ms` - Bound on the connect and on the probe read (default: 5000)
/// * `probe_retries` - Automatic retries of a failed probe, at most 1 (default: 1)
/// * `probe_register` - Register read to validate a connection (default: 4101, unit id)
/// * `default_port` - Port suggested for discovered devices (default: 502)
/// * `default_slave_id` - Unit id suggested for discovered devices (default: 10)
/// * `default_scan_interval_seconds` - Polling period given to new devices (default: 15)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub probe_timeout_ms: u64,
    pub probe_retries: u8,
    pub probe_register: u16,
    pub default_port: u16,
    pub default_slave_id: u8,
    pub default_scan_interval_seconds: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: 5000,
            probe_retries: 1,
            probe_register: 4101,
            default_port: 502,
            default_slave_id: 10,
            default_scan_interval_seconds: 15,
        }
    }
}

impl DiscoveryConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
}
