// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polling configuration
//!
//! Settings shared by every device's polling coordinator and command executor.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration of the polling coordinator and command executor.
///
/// # Fields
///
/// * `failure_threshold` - Consecutive failed reads before a group is reported unavailable (default: 3)
/// * `request_timeout_ms` - Timeout applied to every Modbus request (default: 3000)
/// * `write_lock_timeout_ms` - Maximum wait for the connection lock before a write is reported busy (default: 3000)
/// * `reconnect_delay_ms` - Pause before a device that could not be reached is polled again (default: 500)
///
/// # Example
///
/// ```
/// use rust_midnite::config::PollingConfig;
///
/// let polling = PollingConfig {
///     failure_threshold: 5,
///     ..Default::default()
/// };
/// assert_eq!(polling.request_timeout().as_millis(), 3000);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Number of consecutive failed reads of a group before its values are
    /// dropped and the group is reported unavailable.
    pub failure_threshold: u32,

    /// Timeout of a single Modbus request, in milliseconds.
    pub request_timeout_ms: u64,

    /// Maximum time a write waits for an in-flight refresh, in milliseconds.
    pub write_lock_timeout_ms: u64,

    /// Delay before polling again a device that refused the connection.
    pub reconnect_delay_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            request_timeout_ms: 3000,
            write_lock_timeout_ms: 3000,
            reconnect_delay_ms: 500,
        }
    }
}

impl PollingConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn write_lock_timeout(&self) -> Duration {
        Duration::from_millis(self.write_lock_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}
