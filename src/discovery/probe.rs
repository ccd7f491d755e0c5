// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Connection probe used to validate a device before it is configured

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;
use tokio::time::timeout;

use super::ValidationError;
use crate::config::DiscoveryConfig;
use crate::coordinator::device_info::{format_mac, split_unit_id};
use crate::registers::catalog::PROBE_REGISTER;
use crate::transport::{Endpoint, RegisterTransport, TransportError, TransportFactory};

/// Registers read for identification: unit id up to the last MAC word
const IDENTITY_SPAN: u16 = 8;

/// What a successful probe learned about the device
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProbeReport {
    /// Value of the probed register
    pub probe_value: u16,
    pub model: Option<String>,
    pub mac_address: Option<String>,
}

/// Connects to an endpoint and reads one known register
#[derive(Clone)]
pub struct Prober {
    factory: Arc<dyn TransportFactory>,
    timeout: Duration,
    retries: u8,
    register: u16,
}

impl Prober {
    pub fn new(factory: Arc<dyn TransportFactory>, config: &DiscoveryConfig) -> Self {
        Self {
            factory,
            timeout: config.probe_timeout(),
            retries: config.probe_retries.min(1),
            register: config.probe_register,
        }
    }

    /// Probe `endpoint`, retrying at most once, and categorise the failure
    pub async fn validate(&self, endpoint: &Endpoint) -> Result<ProbeReport, ValidationError> {
        let attempts = 1 + self.retries as usize;
        let mut last_error = ValidationError::Unknown("probe was not attempted".to_string());
        for attempt in 1..=attempts {
            match self.attempt(endpoint).await {
                Ok(report) => return Ok(report),
                Err(err) => {
                    warn!(
                        "Probe {}/{} of {} failed: {}",
                        attempt, attempts, endpoint, err
                    );
                    last_error = err;
                }
            }
        }
        Err(last_error)
    }

    /// Single best-effort probe, used to enrich a discovery suggestion
    pub async fn identify(&self, endpoint: &Endpoint) -> Option<ProbeReport> {
        match self.attempt(endpoint).await {
            Ok(report) => Some(report),
            Err(err) => {
                debug!("Could not identify {}: {}", endpoint, err);
                None
            }
        }
    }

    async fn attempt(&self, endpoint: &Endpoint) -> Result<ProbeReport, ValidationError> {
        let mut transport = self.factory.create(endpoint, self.timeout);
        let timeout_ms = self.timeout.as_millis() as u64;

        match timeout(self.timeout, transport.connect()).await {
            Err(_) => {
                return Err(ValidationError::CannotConnect(format!(
                    "no connection within {} ms",
                    timeout_ms
                )))
            }
            Ok(Err(err @ (TransportError::Connect(_) | TransportError::Timeout(_)))) => {
                return Err(ValidationError::CannotConnect(err.to_string()))
            }
            Ok(Err(err)) => return Err(ValidationError::Unknown(err.to_string())),
            Ok(Ok(())) => {}
        }

        let result = match timeout(self.timeout, transport.read_registers(self.register, 1)).await {
            Err(_) => Err(ValidationError::CannotRead(format!(
                "register {} not answered within {} ms",
                self.register, timeout_ms
            ))),
            Ok(Err(err)) => Err(ValidationError::CannotRead(err.to_string())),
            Ok(Ok(words)) => match words.as_slice() {
                [value] => {
                    let mut report = ProbeReport {
                        probe_value: *value,
                        ..Default::default()
                    };
                    if self.register == PROBE_REGISTER {
                        report.model = split_unit_id(*value).0.map(str::to_string);
                    }
                    self.read_identity(transport.as_mut(), &mut report).await;
                    Ok(report)
                }
                _ => Err(ValidationError::Unknown(format!(
                    "probe of register {} returned {} words",
                    self.register,
                    words.len()
                ))),
            },
        };

        transport.close().await;
        result
    }

    /// Read model and MAC address; failures leave the report unchanged
    async fn read_identity(&self, transport: &mut dyn RegisterTransport, report: &mut ProbeReport) {
        let read = timeout(
            self.timeout,
            transport.read_registers(PROBE_REGISTER, IDENTITY_SPAN),
        )
        .await;
        match read {
            Ok(Ok(words)) if words.len() == IDENTITY_SPAN as usize => {
                if let Some(model) = split_unit_id(words[0]).0 {
                    report.model = Some(model.to_string());
                }
                let mac = format_mac(words[5], words[6], words[7]);
                if mac != "00:00:00:00:00:00" {
                    report.mac_address = Some(mac);
                }
            }
            Ok(Ok(words)) => debug!("Identity read returned {} words", words.len()),
            Ok(Err(err)) => debug!("Identity read failed: {}", err),
            Err(_) => debug!("Identity read timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::classic_registers;
    use crate::registers::catalog::MAC_ADDRESS_PART_3;
    use crate::registers::RegisterMap;
    use crate::transport::{MockTransport, MockTransportFactory};

    fn prober(mock: &MockTransport) -> Prober {
        Prober::new(
            Arc::new(MockTransportFactory(mock.clone())),
            &DiscoveryConfig::default(),
        )
    }

    #[test]
    fn identity_span_reaches_the_mac_words() {
        let map = RegisterMap::classic().unwrap();
        let last_mac = map.describe(MAC_ADDRESS_PART_3).unwrap();
        assert!(last_mac.address < PROBE_REGISTER + IDENTITY_SPAN);
    }

    #[tokio::test]
    async fn successful_probe_identifies_the_device() {
        let mock = MockTransport::with_registers(classic_registers());
        let report = prober(&mock)
            .validate(&Endpoint::new("10.0.0.5", 502, 10))
            .await
            .unwrap();
        assert_eq!(report.probe_value, 0x03FA);
        assert_eq!(report.model.as_deref(), Some("Classic 250"));
        assert_eq!(report.mac_address.as_deref(), Some("60:1d:0f:12:34:56"));
        assert!(!mock.is_connected());
    }

    #[tokio::test]
    async fn refused_connection_is_cannot_connect() {
        let mock = MockTransport::new();
        mock.set_unreachable(true);
        let err = prober(&mock)
            .validate(&Endpoint::new("10.0.0.5", 502, 10))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cannot_connect");
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn read_error_is_cannot_read() {
        let mock = MockTransport::new();
        mock.fail_reads_from(PROBE_REGISTER);
        let err = prober(&mock)
            .validate(&Endpoint::new("10.0.0.5", 502, 10))
            .await
            .unwrap_err();
        assert_eq!(err.category(), "cannot_read");
        assert_eq!(mock.read_count(), 2);
    }
}
