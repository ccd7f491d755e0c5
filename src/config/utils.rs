// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::{Config, CONFIG_SCHEMA};
use crate::discovery::is_canonical_mac;

/// Highest unit identifier addressable on a Modbus network
const MAX_SLAVE_ID: u8 = 247;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line. It outputs the full JSON schema for the configuration
/// to stdout, formatted for readability.
///
/// # Example
///
/// ```bash
/// ./rust_midnite --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema: serde_json::Value =
        serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Whether `identity` is the `host:port` fallback identity
fn is_address_identity(identity: &str) -> bool {
    match identity.rsplit_once(':') {
        Some((host, port)) => {
            // IPv6 hosts are bracketed
            let host_ok = !host.is_empty()
                && (!host.contains(':') || (host.starts_with('[') && host.ends_with(']')));
            host_ok && port.parse::<u16>().map_or(false, |p| p > 0)
        }
        None => false,
    }
}

/// Validates the configuration against additional rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Ports**: device and simulator ports are within 1-65535
/// - **Unit identifiers**: between 1 and 247
/// - **Scan interval**: at least one second
/// - **Identities**: every `devices` key is a canonical MAC address or a `host:port` pair
/// - **Hosts**: non-empty; addresses that are not IP literals are only reported
/// - **Polling**: the failure threshold is at least 1
/// - **Probe**: at most one automatic retry
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.polling.failure_threshold < 1 {
        anyhow::bail!("Failure threshold must be at least 1");
    }
    if config.discovery.probe_retries > 1 {
        anyhow::bail!(
            "Probe retries must be 0 or 1, got {}",
            config.discovery.probe_retries
        );
    }
    if config.discovery.default_port == 0 {
        anyhow::bail!("Invalid default port number: 0");
    }
    if !(1..=MAX_SLAVE_ID).contains(&config.discovery.default_slave_id) {
        anyhow::bail!(
            "Invalid default slave id: {}",
            config.discovery.default_slave_id
        );
    }

    for (identity, device) in &config.devices {
        if !is_canonical_mac(identity) && !is_address_identity(identity) {
            anyhow::bail!(
                "Device key {:?} is neither a canonical MAC address nor host:port",
                identity
            );
        }
        if device.host.trim().is_empty() {
            anyhow::bail!("Device {} has an empty host", identity);
        }
        if device.port == 0 {
            anyhow::bail!("Invalid port number for device {}: 0", identity);
        }
        if !(1..=MAX_SLAVE_ID).contains(&device.slave_id) {
            anyhow::bail!(
                "Invalid slave id for device {}: {}",
                identity,
                device.slave_id
            );
        }
        if device.scan_interval_seconds < 1 {
            anyhow::bail!("Scan interval of device {} must be at least 1 s", identity);
        }
        if !is_valid_ip_address(&device.host) {
            // Host names are allowed
            debug!("Device {} uses host name {}", identity, device.host);
        }
    }

    if config.simulator.port == 0 {
        anyhow::bail!("Invalid simulator port number: 0");
    }
    if !is_valid_ip_address(&config.simulator.address) {
        debug!(
            "Potentially invalid simulator address format: {}",
            config.simulator.address
        );
    }

    Ok(())
}
