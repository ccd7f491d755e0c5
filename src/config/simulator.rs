// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated controller configuration
//!
//! This module defines the settings of the Modbus TCP server that serves a
//! simulated Classic register bank.

use serde::{Deserialize, Serialize};

/// Configuration for the simulated controller.
///
/// # Fields
///
/// * `enabled` - Serve the simulated controller from the daemon
/// * `port` - TCP port the simulator listens on (default: 5020)
/// * `address` - Network address to bind to (default: 127.0.0.1)
/// * `slave_id` - Unit id the simulator answers to (default: 10)
///
/// # Example
///
/// ```
/// use rust_midnite::config::SimulatorConfig;
///
/// let simulator = SimulatorConfig {
///     enabled: true,
///     port: 1502,
///     address: "0.0.0.0".to_string(),
///     slave_id: 10,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Flag to enable or disable the simulated controller.
    pub enabled: bool,

    /// The TCP port the simulator will listen on.
    ///
    /// Defaults to 5020 so that no privilege is needed to bind it.
    pub port: u16,

    /// The network address the simulator will bind to.
    pub address: String,

    /// Unit identifier of the simulated controller.
    pub slave_id: u8,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 5020,
            address: "127.0.0.1".to_string(),
            slave_id: 10,
        }
    }
}
