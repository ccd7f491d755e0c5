// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration management for the charge controller link
//!
//! The configuration is backed by a YAML file and validated against an
//! embedded JSON schema before it is deserialised, then checked against
//! rules the schema cannot express.
//!
//! ## Configuration Structure
//!
//! - `polling`: failure threshold and timeouts of the polling coordinator
//! - `discovery`: probe settings and defaults offered to discovered devices
//! - `devices`: validated connections keyed by device identity
//! - `simulator`: the optional simulated controller served by the daemon
//!
//! ## Usage
//!
//! ```no_run
//! use rust_midnite::config::Config;
//! use std::path::Path;
//!
//! // Load config from file, creates a default if not found
//! let mut config = Config::from_file(Path::new("config.yaml")).unwrap();
//!
//! // Apply command line overrides if needed
//! config.apply_args(
//!     Some(5),    // Failure threshold
//!     Some(2000), // Probe timeout in ms
//!     Some(true), // Enable the simulator
//!     None,       // Simulator port
//! );
//!
//! println!("Configured devices: {}", config.devices.len());
//! ```

pub mod device;
pub mod discovery;
pub mod polling;
pub mod simulator;
pub mod utils;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, error};
use serde::{Deserialize, Serialize};

pub use device::ConnectionConfig;
pub use discovery::DiscoveryConfig;
pub use polling::PollingConfig;
pub use simulator::SimulatorConfig;
pub use utils::{is_valid_ip_address, output_config_schema};

/// Root configuration structure.
///
/// Every section falls back to its defaults when missing from the file, so
/// an empty document is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Polling coordinator settings.
    #[serde(default)]
    pub polling: PollingConfig,

    /// Setup flow and connection probe settings.
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Validated connections, keyed by canonical MAC address or by
    /// `host:port` when the device did not report its MAC.
    #[serde(default)]
    pub devices: BTreeMap<String, ConnectionConfig>,

    /// Simulated controller served by the daemon.
    #[serde(default)]
    pub simulator: SimulatorConfig,
}

/// Embedded JSON schema of the configuration file
pub(crate) const CONFIG_SCHEMA: &str = include_str!("../../resources/config.schema.json");

impl Config {
    /// Helper method to create a sample config file when validation fails
    fn create_sample_config<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        let sample_path = path.with_extension("sample.yaml");
        debug!("Original path: {:?}, Sample path: {:?}", path, sample_path);

        if let Some(parent) = sample_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                debug!("Creating parent directory: {:?}", parent);
                fs::create_dir_all(parent).with_context(|| {
                    format!(
                        "Failed to create parent directory for sample config at {:?}",
                        parent
                    )
                })?;
            }
        }

        Self::default()
            .save_to_file(&sample_path)
            .with_context(|| format!("Failed to save sample config to {:?}", sample_path))?;

        error!(
            "Sample configuration file created at {:?}\nPlease edit and rename it",
            sample_path
        );
        Ok(())
    }

    /// Load configuration from a file
    ///
    /// A missing file is created with the default configuration. A file that
    /// fails schema validation, deserialisation or the specific rules leaves a
    /// `<name>.sample.yaml` next to it and returns an error.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(
                "Configuration file not found at {:?}, creating default",
                path
            );
            let default_config = Self::default();
            default_config.save_to_file(path)?;
            return Ok(default_config);
        }

        debug!("Loading configuration from {:?}", path);
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file at {:?}", path))?;
        Self::from_yaml_str(&contents, Some(path))
    }

    /// Parse and validate a YAML document
    ///
    /// `origin` is the file the document came from; a sample configuration
    /// is written next to it when validation fails.
    pub fn from_yaml_str(contents: &str, origin: Option<&Path>) -> Result<Self> {
        let name = origin.map_or_else(|| "<inline>".to_string(), |p| p.display().to_string());
        let on_invalid = || -> Result<()> {
            match origin {
                Some(path) => Self::create_sample_config(path),
                None => Ok(()),
            }
        };

        // An empty document deserialises to null
        let yaml_value: serde_yml::Value = serde_yml::from_str(contents)
            .with_context(|| format!("Failed to parse YAML configuration from {}", name))?;
        let yaml_value = match yaml_value {
            serde_yml::Value::Null => serde_yml::Value::Mapping(Default::default()),
            other => other,
        };

        let json_value = serde_json::to_value(&yaml_value)
            .with_context(|| format!("Failed to convert YAML to JSON for validation: {}", name))?;

        let schema: serde_json::Value =
            serde_json::from_str(CONFIG_SCHEMA).context("Failed to parse JSON schema")?;
        let validator = jsonschema::draft202012::options()
            .should_validate_formats(true)
            .build(&schema)?;

        debug!("Validating {} configuration against schema", name);
        if let Err(error) = validator.validate(&json_value) {
            error!("Configuration validation error before deserialization");
            on_invalid()?;
            anyhow::bail!("Configuration validation failed: {}", error);
        }

        let config: Config = match serde_json::from_value(json_value) {
            Ok(config) => config,
            Err(err) => {
                error!("Configuration deserialization error: {}", err);
                if let Err(e) = on_invalid() {
                    error!("Failed to create sample config: {}", e);
                }
                return Err(anyhow::anyhow!(
                    "Failed to deserialize configuration from {}: {}",
                    name,
                    err
                ));
            }
        };

        if let Err(err) = utils::validate_specific_rules(&config) {
            error!("Configuration specific validation error: {}", err);
            on_invalid()?;
            return Err(err);
        }

        Ok(config)
    }

    /// Save the configuration to a file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let yaml =
            serde_yml::to_string(self).context("Failed to serialize configuration to YAML")?;

        let mut file = File::create(path.as_ref())
            .with_context(|| format!("Failed to create config file at {:?}", path.as_ref()))?;

        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write configuration to {:?}", path.as_ref()))?;

        Ok(())
    }

    /// Apply command line arguments to override configuration values.
    ///
    /// Only values explicitly provided override the loaded configuration.
    ///
    /// # Parameters
    ///
    /// * `failure_threshold` - Consecutive failed reads before a group is unavailable
    /// * `probe_timeout_ms` - Bound on the connect and read of the setup probe
    /// * `simulator_enabled` - Serve the simulated controller from the daemon
    /// * `simulator_port` - TCP port of the simulated controller
    pub fn apply_args(
        &mut self,
        failure_threshold: Option<u32>,
        probe_timeout_ms: Option<u64>,
        simulator_enabled: Option<bool>,
        simulator_port: Option<u16>,
    ) {
        if let Some(threshold) = failure_threshold {
            debug!("Overriding failure threshold from command line: {}", threshold);
            self.polling.failure_threshold = threshold;
        }
        if let Some(timeout) = probe_timeout_ms {
            debug!("Overriding probe timeout from command line: {} ms", timeout);
            self.discovery.probe_timeout_ms = timeout;
        }
        if let Some(enabled) = simulator_enabled {
            debug!("Overriding simulator enabled from command line: {}", enabled);
            self.simulator.enabled = enabled;
        }
        if let Some(port) = simulator_port {
            debug!("Overriding simulator port from command line: {}", port);
            self.simulator.port = port;
        }
    }
}
