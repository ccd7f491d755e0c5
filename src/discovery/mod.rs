// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Discovery and connection-validation state machine
//!
//! A [`DiscoveryFlow`] turns passive discovery hints and user submissions
//! into exactly one validated [`ConnectionConfig`], or aborts. The flow is a
//! closed set of [`FlowState`]s driven through a single dispatch function,
//! [`DiscoveryFlow::handle`]:
//!
//! ```text
//! Idle ──discovered──▶ Discovered ──new device──▶ AwaitingConfirmation
//!  │                      │                              │
//!  │ submit               │ already configured           │ submit
//!  ▼                      ▼                              ▼
//! Validating ◀────────── Aborted                     Validating
//!  ├─ probe ok ─▶ Configured
//!  └─ probe failed ─▶ back to Idle / AwaitingConfirmation with the error
//! ```
//!
//! `Configured` and `Aborted` are terminal. An abort request moves any
//! non-terminal state to `Aborted`, including while a probe is in flight.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use rust_midnite::config::DiscoveryConfig;
//! use rust_midnite::discovery::{DeviceRegistry, DiscoveryFlow, FlowEvent, Submission};
//! use rust_midnite::transport::TcpTransportFactory;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = DeviceRegistry::new();
//! let mut flow = DiscoveryFlow::new(
//!     DiscoveryConfig::default(),
//!     registry.clone(),
//!     Arc::new(TcpTransportFactory),
//! );
//! flow.handle(FlowEvent::UserSubmit(Submission::new("192.168.1.50", 502, 10)))
//!     .await?;
//! println!("{:?}", flow.state());
//! # Ok(())
//! # }
//! ```

pub mod mac;
pub mod probe;
pub mod reconfigure;
pub mod registry;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch, Notify};

use crate::config::{ConnectionConfig, DiscoveryConfig};
use crate::transport::{Endpoint, TransportFactory};

pub use mac::{canonical_mac, is_canonical_mac};
pub use probe::{ProbeReport, Prober};
pub use reconfigure::{Reconfiguration, ReconfigureError, Reconfigurer};
pub use registry::DeviceRegistry;

/// Capacity of the transition broadcast channel
const TRANSITION_CHANNEL_CAPACITY: usize = 32;

/// Categorised failure of a connection validation
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "category", content = "detail", rename_all = "snake_case")]
pub enum ValidationError {
    #[error("Cannot connect: {0}")]
    CannotConnect(String),
    #[error("Cannot read: {0}")]
    CannotRead(String),
    #[error("Unknown error: {0}")]
    Unknown(String),
    #[error("No host given")]
    MissingHost,
}

impl ValidationError {
    /// Stable category shown to the user
    pub fn category(&self) -> &'static str {
        match self {
            ValidationError::CannotConnect(_) => "cannot_connect",
            ValidationError::CannotRead(_) => "cannot_read",
            ValidationError::Unknown(_) => "unknown",
            ValidationError::MissingHost => "missing_host",
        }
    }
}

/// Event refused by the state machine
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("Setup flow already finished in state {0}")]
    Finished(StateKind),
    #[error("Event {event} is not accepted in state {state}")]
    UnexpectedEvent { event: &'static str, state: StateKind },
    #[error("Discovery of {got} while confirming {expected}")]
    IdentityMismatch { expected: String, got: String },
    #[error("Invalid MAC address: {0}")]
    InvalidMac(String),
}

/// Passive discovery hint for one device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiscoveryRecord {
    /// Canonical MAC address, the identity of the device
    pub mac_address: String,
    pub ip: String,
    pub hostname: Option<String>,
    pub first_seen_at: DateTime<Utc>,
}

impl DiscoveryRecord {
    /// Record seen now; the MAC address is canonicalised
    pub fn new(
        mac_address: &str,
        ip: impl Into<String>,
        hostname: Option<String>,
    ) -> Result<Self, FlowError> {
        Ok(Self {
            mac_address: canonical_mac(mac_address)?,
            ip: ip.into(),
            hostname,
            first_seen_at: Utc::now(),
        })
    }
}

/// Connection parameters offered to the user for confirmation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Suggestion {
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
    /// Model reported by the device, when it answered the identification
    pub model: Option<String>,
}

/// Connection parameters submitted by the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// Empty when the user accepted the suggested host
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
    pub scan_interval_seconds: Option<u64>,
}

impl Submission {
    pub fn new(host: impl Into<String>, port: u16, slave_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            slave_id,
            scan_interval_seconds: None,
        }
    }

    pub fn with_scan_interval(mut self, seconds: u64) -> Self {
        self.scan_interval_seconds = Some(seconds);
        self
    }
}

/// Why the flow ended without creating a configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum AbortReason {
    /// The device is already configured under `identity`
    AlreadyConfigured { identity: String, host_updated: bool },
    Cancelled,
}

impl AbortReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AbortReason::AlreadyConfigured { .. } => "already_configured",
            AbortReason::Cancelled => "cancelled",
        }
    }
}

/// State of a setup flow
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    Idle {
        error: Option<ValidationError>,
    },
    Discovered {
        record: DiscoveryRecord,
    },
    AwaitingConfirmation {
        record: DiscoveryRecord,
        suggestion: Suggestion,
        error: Option<ValidationError>,
    },
    Validating {
        endpoint: Endpoint,
        record: Option<DiscoveryRecord>,
    },
    Configured {
        identity: String,
        config: ConnectionConfig,
    },
    Aborted {
        reason: AbortReason,
    },
}

impl FlowState {
    pub fn kind(&self) -> StateKind {
        match self {
            FlowState::Idle { .. } => StateKind::Idle,
            FlowState::Discovered { .. } => StateKind::Discovered,
            FlowState::AwaitingConfirmation { .. } => StateKind::AwaitingConfirmation,
            FlowState::Validating { .. } => StateKind::Validating,
            FlowState::Configured { .. } => StateKind::Configured,
            FlowState::Aborted { .. } => StateKind::Aborted,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Validation error attached to a resubmittable state
    pub fn error(&self) -> Option<&ValidationError> {
        match self {
            FlowState::Idle { error } | FlowState::AwaitingConfirmation { error, .. } => {
                error.as_ref()
            }
            _ => None,
        }
    }
}

/// Name of a [`FlowState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StateKind {
    Idle,
    Discovered,
    AwaitingConfirmation,
    Validating,
    Configured,
    Aborted,
}

impl StateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateKind::Idle => "idle",
            StateKind::Discovered => "discovered",
            StateKind::AwaitingConfirmation => "awaiting_confirmation",
            StateKind::Validating => "validating",
            StateKind::Configured => "configured",
            StateKind::Aborted => "aborted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StateKind::Configured | StateKind::Aborted)
    }
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input of the state machine
#[derive(Debug, Clone, PartialEq)]
pub enum FlowEvent {
    Discovered(DiscoveryRecord),
    UserSubmit(Submission),
    AbortRequested,
}

impl FlowEvent {
    fn name(&self) -> &'static str {
        match self {
            FlowEvent::Discovered(_) => "discovered",
            FlowEvent::UserSubmit(_) => "user_submit",
            FlowEvent::AbortRequested => "abort_requested",
        }
    }
}

/// Notification sent on every state change
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlowTransition {
    pub from: StateKind,
    pub to: StateKind,
    /// Category of the validation error attached to the new state
    pub error: Option<&'static str>,
    pub at: DateTime<Utc>,
}

/// State of a flow and the channels announcing its changes
///
/// Shared between the flow and its [`AbortHandle`]s. Once a terminal state
/// is stored no transition is accepted.
#[derive(Debug)]
struct FlowShared {
    state: watch::Sender<FlowState>,
    transitions: broadcast::Sender<FlowTransition>,
    abort_requested: AtomicBool,
    notify: Notify,
}

impl FlowShared {
    fn new() -> Self {
        let (state, _) = watch::channel(FlowState::Idle { error: None });
        let (transitions, _) = broadcast::channel(TRANSITION_CHANNEL_CAPACITY);
        Self {
            state,
            transitions,
            abort_requested: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    fn kind(&self) -> StateKind {
        self.state.borrow().kind()
    }

    fn is_abort_requested(&self) -> bool {
        self.abort_requested.load(Ordering::SeqCst)
    }

    async fn abort_requested(&self) {
        while !self.is_abort_requested() {
            self.notify.notified().await;
        }
    }

    /// Store `next` unless the flow already finished; returns whether it did
    fn transition(&self, next: FlowState) -> bool {
        let to = next.kind();
        let error = next.error().map(ValidationError::category);
        let mut from = None;
        self.state.send_if_modified(|state| {
            if state.is_terminal() {
                return false;
            }
            from = Some(state.kind());
            *state = next;
            true
        });
        let Some(from) = from else {
            debug!("Setup flow already finished, move to {} dropped", to);
            return false;
        };

        match error {
            Some(category) => info!("Setup flow: {} -> {} ({})", from, to, category),
            None => info!("Setup flow: {} -> {}", from, to),
        }
        // No subscribers is fine
        let _ = self.transitions.send(FlowTransition {
            from,
            to,
            error,
            at: Utc::now(),
        });
        true
    }
}

/// Cancels a flow from another task
///
/// Aborting moves the flow to `Aborted` right away and interrupts a probe or
/// an identification in flight.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    shared: Arc<FlowShared>,
}

impl AbortHandle {
    pub fn abort(&self) {
        self.shared.abort_requested.store(true, Ordering::SeqCst);
        self.shared.transition(FlowState::Aborted {
            reason: AbortReason::Cancelled,
        });
        self.shared.notify.notify_one();
    }

    pub fn is_requested(&self) -> bool {
        self.shared.is_abort_requested()
    }
}

/// Where a validation returns to when it fails
enum Origin {
    Manual,
    Discovery {
        record: DiscoveryRecord,
        suggestion: Suggestion,
    },
}

/// Setup flow of one device
pub struct DiscoveryFlow {
    shared: Arc<FlowShared>,
    config: DiscoveryConfig,
    registry: DeviceRegistry,
    prober: Prober,
}

impl DiscoveryFlow {
    pub fn new(
        config: DiscoveryConfig,
        registry: DeviceRegistry,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        Self {
            shared: Arc::new(FlowShared::new()),
            prober: Prober::new(factory, &config),
            config,
            registry,
        }
    }

    /// Copy of the current state
    pub fn state(&self) -> FlowState {
        self.shared.state.borrow().clone()
    }

    pub fn kind(&self) -> StateKind {
        self.shared.kind()
    }

    /// Receive every later transition
    pub fn subscribe(&self) -> broadcast::Receiver<FlowTransition> {
        self.shared.transitions.subscribe()
    }

    /// Follow the state itself, including from other tasks
    pub fn watch_state(&self) -> watch::Receiver<FlowState> {
        self.shared.state.subscribe()
    }

    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Identity and connection once the flow reached `Configured`
    pub fn configured(&self) -> Option<(String, ConnectionConfig)> {
        match &*self.shared.state.borrow() {
            FlowState::Configured { identity, config } => Some((identity.clone(), config.clone())),
            _ => None,
        }
    }

    pub async fn on_discovered(&mut self, record: DiscoveryRecord) -> Result<StateKind, FlowError> {
        self.handle(FlowEvent::Discovered(record)).await
    }

    pub async fn on_user_submit(
        &mut self,
        host: impl Into<String>,
        port: u16,
        slave_id: u8,
    ) -> Result<StateKind, FlowError> {
        self.handle(FlowEvent::UserSubmit(Submission::new(host, port, slave_id)))
            .await
    }

    pub async fn on_abort_requested(&mut self) -> Result<StateKind, FlowError> {
        self.handle(FlowEvent::AbortRequested).await
    }

    /// Dispatch one event and return the state reached
    ///
    /// Validation failures are not errors here: they are attached to the
    /// resubmittable state the flow returns to. `Err` means the event was
    /// refused and the state did not change.
    pub async fn handle(&mut self, event: FlowEvent) -> Result<StateKind, FlowError> {
        let kind = self.kind();
        if kind.is_terminal() {
            return Err(FlowError::Finished(kind));
        }
        if self.shared.is_abort_requested() || event == FlowEvent::AbortRequested {
            self.shared.transition(FlowState::Aborted {
                reason: AbortReason::Cancelled,
            });
            return Ok(self.kind());
        }

        match event {
            FlowEvent::Discovered(record) => self.discovered(record).await?,
            FlowEvent::UserSubmit(submission) => self.submitted(submission).await?,
            FlowEvent::AbortRequested => {}
        }
        Ok(self.kind())
    }

    async fn discovered(&mut self, record: DiscoveryRecord) -> Result<(), FlowError> {
        let record = DiscoveryRecord {
            mac_address: canonical_mac(&record.mac_address)?,
            ..record
        };

        match self.state() {
            FlowState::Idle { .. } => {}
            FlowState::AwaitingConfirmation {
                record: current,
                suggestion,
                error,
            } => {
                if current.mac_address != record.mac_address {
                    return Err(FlowError::IdentityMismatch {
                        expected: current.mac_address,
                        got: record.mac_address,
                    });
                }
                // Same device seen again, possibly at a new address
                self.shared.transition(FlowState::AwaitingConfirmation {
                    suggestion: Suggestion {
                        host: record.ip.clone(),
                        ..suggestion
                    },
                    record: DiscoveryRecord {
                        first_seen_at: current.first_seen_at,
                        ..record
                    },
                    error,
                });
                return Ok(());
            }
            state => {
                return Err(FlowError::UnexpectedEvent {
                    event: "discovered",
                    state: state.kind(),
                })
            }
        }

        if !self.shared.transition(FlowState::Discovered {
            record: record.clone(),
        }) {
            return Ok(());
        }

        if self.registry.contains(&record.mac_address) {
            let host_updated = self.registry.update_host(&record.mac_address, &record.ip);
            self.shared.transition(FlowState::Aborted {
                reason: AbortReason::AlreadyConfigured {
                    identity: record.mac_address,
                    host_updated,
                },
            });
            return Ok(());
        }

        let mut suggestion = Suggestion {
            host: record.ip.clone(),
            port: self.config.default_port,
            slave_id: self.config.default_slave_id,
            model: None,
        };
        let endpoint = Endpoint::new(suggestion.host.clone(), suggestion.port, suggestion.slave_id);
        let report = tokio::select! {
            report = self.prober.identify(&endpoint) => report,
            _ = self.shared.abort_requested() => {
                info!("Identification of {} cancelled", endpoint);
                return Ok(());
            }
        };
        if let Some(report) = report {
            suggestion.model = report.model;
        }

        self.shared.transition(FlowState::AwaitingConfirmation {
            record,
            suggestion,
            error: None,
        });
        Ok(())
    }

    async fn submitted(&mut self, submission: Submission) -> Result<(), FlowError> {
        let origin = match self.state() {
            FlowState::Idle { .. } => Origin::Manual,
            FlowState::AwaitingConfirmation {
                record, suggestion, ..
            } => Origin::Discovery { record, suggestion },
            state => {
                return Err(FlowError::UnexpectedEvent {
                    event: FlowEvent::UserSubmit(submission).name(),
                    state: state.kind(),
                })
            }
        };

        let mut host = submission.host.trim().to_string();
        if host.is_empty() {
            if let Origin::Discovery { suggestion, .. } = &origin {
                host = suggestion.host.clone();
            }
        }
        if host.is_empty() {
            self.fail(origin, ValidationError::MissingHost);
            return Ok(());
        }

        if let Some(identity) = self.registry.find_by_address(&host, submission.port) {
            self.shared.transition(FlowState::Aborted {
                reason: AbortReason::AlreadyConfigured {
                    identity,
                    host_updated: false,
                },
            });
            return Ok(());
        }

        let endpoint = Endpoint::new(host, submission.port, submission.slave_id);
        let record = match &origin {
            Origin::Discovery { record, .. } => Some(record.clone()),
            Origin::Manual => None,
        };
        if !self.shared.transition(FlowState::Validating {
            endpoint: endpoint.clone(),
            record,
        }) {
            return Ok(());
        }

        let outcome = tokio::select! {
            result = self.prober.validate(&endpoint) => Some(result),
            _ = self.shared.abort_requested() => None,
        };

        match outcome {
            None => {
                info!("Validation of {} cancelled", endpoint);
                self.shared.transition(FlowState::Aborted {
                    reason: AbortReason::Cancelled,
                });
            }
            Some(Err(err)) => {
                warn!("Validation of {} failed: {}", endpoint, err);
                self.fail(origin, err);
            }
            Some(Ok(report)) => {
                info!("Validation of {} succeeded", endpoint);
                let identity = match &origin {
                    Origin::Discovery { record, .. } => record.mac_address.clone(),
                    Origin::Manual => report
                        .mac_address
                        .as_deref()
                        .and_then(|mac| canonical_mac(mac).ok())
                        .unwrap_or_else(|| endpoint.address()),
                };

                if self.registry.contains(&identity) {
                    if self.shared.is_abort_requested() {
                        return Ok(());
                    }
                    let host_updated = self.registry.update_host(&identity, &endpoint.host);
                    self.shared.transition(FlowState::Aborted {
                        reason: AbortReason::AlreadyConfigured {
                            identity,
                            host_updated,
                        },
                    });
                    return Ok(());
                }

                let config = ConnectionConfig::new(
                    endpoint.host.clone(),
                    endpoint.port,
                    endpoint.slave_id,
                    submission
                        .scan_interval_seconds
                        .unwrap_or(self.config.default_scan_interval_seconds)
                        .max(1),
                );
                // A flow aborted meanwhile stores nothing
                if self.shared.transition(FlowState::Configured {
                    identity: identity.clone(),
                    config: config.clone(),
                }) {
                    self.registry.insert(identity, config);
                }
            }
        }
        Ok(())
    }

    /// Return to the state the submission came from with `error` attached
    fn fail(&mut self, origin: Origin, error: ValidationError) {
        let next = match origin {
            Origin::Manual => FlowState::Idle { error: Some(error) },
            Origin::Discovery { record, suggestion } => FlowState::AwaitingConfirmation {
                record,
                suggestion,
                error: Some(error),
            },
        };
        self.shared.transition(next);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::modbus::classic_registers;
    use crate::registers::catalog::PROBE_REGISTER;
    use crate::transport::{MockTransport, MockTransportFactory};

    const MAC: &str = "60:1d:0f:12:34:56";

    fn flow(mock: &MockTransport, registry: &DeviceRegistry) -> DiscoveryFlow {
        DiscoveryFlow::new(
            DiscoveryConfig::default(),
            registry.clone(),
            Arc::new(MockTransportFactory(mock.clone())),
        )
    }

    fn classic() -> MockTransport {
        MockTransport::with_registers(classic_registers())
    }

    #[tokio::test]
    async fn manual_setup_uses_the_mac_read_from_the_device() {
        let registry = DeviceRegistry::new();
        let mut flow = flow(&classic(), &registry);

        let kind = flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Configured);
        let (identity, config) = flow.configured().unwrap();
        assert_eq!(identity, MAC);
        assert_eq!(config, ConnectionConfig::new("192.168.1.50", 502, 10, 15));
        assert_eq!(registry.get(MAC), Some(config));
    }

    #[tokio::test]
    async fn discovery_offers_an_enriched_suggestion() {
        let registry = DeviceRegistry::new();
        let mut flow = flow(&classic(), &registry);
        let record = DiscoveryRecord::new("60-1D-0F-12-34-56", "192.168.1.50", None).unwrap();

        let kind = flow.on_discovered(record).await.unwrap();
        assert_eq!(kind, StateKind::AwaitingConfirmation);
        match flow.state() {
            FlowState::AwaitingConfirmation {
                record, suggestion, ..
            } => {
                assert_eq!(record.mac_address, MAC);
                assert_eq!(suggestion.host, "192.168.1.50");
                assert_eq!(suggestion.port, 502);
                assert_eq!(suggestion.slave_id, 10);
                assert_eq!(suggestion.model.as_deref(), Some("Classic 250"));
            }
            other => panic!("unexpected state {:?}", other),
        }

        // Empty host accepts the suggestion
        let kind = flow.on_user_submit("", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Configured);
        assert_eq!(registry.get(MAC).unwrap().host, "192.168.1.50");
    }

    #[tokio::test]
    async fn known_device_at_a_new_address_updates_the_host() {
        let registry = DeviceRegistry::new();
        registry.insert(MAC, ConnectionConfig::new("192.168.1.50", 502, 10, 15));
        let mock = classic();
        let mut flow = flow(&mock, &registry);

        let record = DiscoveryRecord::new(MAC, "192.168.1.77", None).unwrap();
        assert_eq!(flow.on_discovered(record).await.unwrap(), StateKind::Aborted);
        assert_eq!(
            flow.state(),
            FlowState::Aborted {
                reason: AbortReason::AlreadyConfigured {
                    identity: MAC.to_string(),
                    host_updated: true,
                }
            }
        );
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get(MAC).unwrap().host, "192.168.1.77");
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn manual_and_passive_paths_share_the_identity() {
        let registry = DeviceRegistry::new();
        let mock = classic();
        let mut manual = flow(&mock, &registry);
        manual.on_user_submit("192.168.1.50", 502, 10).await.unwrap();

        let mut passive = flow(&mock, &registry);
        let record = DiscoveryRecord::new("601d0f123456", "192.168.1.50", None).unwrap();
        assert_eq!(passive.on_discovered(record).await.unwrap(), StateKind::Aborted);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn configured_address_aborts_a_submission() {
        let registry = DeviceRegistry::new();
        registry.insert(MAC, ConnectionConfig::new("192.168.1.50", 502, 10, 15));
        let mock = classic();
        let mut flow = flow(&mock, &registry);

        assert_eq!(
            flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap(),
            StateKind::Aborted
        );
        assert_eq!(mock.connect_count(), 0);
    }

    #[tokio::test]
    async fn read_failure_keeps_the_flow_resubmittable() {
        let registry = DeviceRegistry::new();
        let mock = classic();
        mock.fail_reads_from(PROBE_REGISTER);
        let mut flow = flow(&mock, &registry);

        let kind = flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Idle);
        assert_eq!(flow.state().error().map(|e| e.category()), Some("cannot_read"));
        assert!(registry.is_empty());

        mock.clear_faults();
        let kind = flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Configured);
    }

    #[tokio::test]
    async fn connect_failure_returns_to_confirmation() {
        let registry = DeviceRegistry::new();
        let mock = classic();
        let mut flow = flow(&mock, &registry);
        let record = DiscoveryRecord::new(MAC, "192.168.1.50", None).unwrap();
        flow.on_discovered(record).await.unwrap();

        mock.set_unreachable(true);
        let kind = flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::AwaitingConfirmation);
        assert_eq!(
            flow.state().error().map(|e| e.category()),
            Some("cannot_connect")
        );
    }

    #[tokio::test]
    async fn missing_host_is_reported_in_idle() {
        let mut flow = flow(&classic(), &DeviceRegistry::new());
        let kind = flow.on_user_submit("  ", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Idle);
        assert_eq!(flow.state().error(), Some(&ValidationError::MissingHost));
    }

    #[tokio::test]
    async fn terminal_states_refuse_events() {
        let mut flow = flow(&classic(), &DeviceRegistry::new());
        assert_eq!(flow.on_abort_requested().await.unwrap(), StateKind::Aborted);
        assert_eq!(
            flow.on_user_submit("192.168.1.50", 502, 10).await,
            Err(FlowError::Finished(StateKind::Aborted))
        );
    }

    #[tokio::test]
    async fn different_device_during_confirmation_is_refused() {
        let mut flow = flow(&classic(), &DeviceRegistry::new());
        let record = DiscoveryRecord::new(MAC, "192.168.1.50", None).unwrap();
        flow.on_discovered(record).await.unwrap();

        let other = DiscoveryRecord::new("00:11:22:33:44:55", "192.168.1.51", None).unwrap();
        assert!(matches!(
            flow.on_discovered(other).await,
            Err(FlowError::IdentityMismatch { .. })
        ));
        assert_eq!(flow.kind(), StateKind::AwaitingConfirmation);
    }

    #[tokio::test]
    async fn abort_interrupts_a_running_probe() {
        let registry = DeviceRegistry::new();
        let mock = classic();
        mock.set_read_delay(Some(Duration::from_secs(2)));
        let mut flow = flow(&mock, &registry);

        let abort = flow.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort.abort();
        });

        let kind = flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();
        assert_eq!(kind, StateKind::Aborted);
        assert_eq!(
            flow.state(),
            FlowState::Aborted {
                reason: AbortReason::Cancelled
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn abort_interrupts_identification() {
        let registry = DeviceRegistry::new();
        let mock = classic();
        mock.set_read_delay(Some(Duration::from_millis(1500)));
        let mut flow = flow(&mock, &registry);

        let abort = flow.abort_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            abort.abort();
        });

        let started = std::time::Instant::now();
        let record = DiscoveryRecord::new(MAC, "192.168.1.50", None).unwrap();
        let kind = flow.on_discovered(record).await.unwrap();
        assert_eq!(kind, StateKind::Aborted);
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn abort_handle_moves_the_flow_and_announces_it() {
        let mut flow = flow(&classic(), &DeviceRegistry::new());
        let record = DiscoveryRecord::new(MAC, "192.168.1.50", None).unwrap();
        flow.on_discovered(record).await.unwrap();
        let mut transitions = flow.subscribe();
        let mut state = flow.watch_state();

        flow.abort_handle().abort();

        assert_eq!(flow.kind(), StateKind::Aborted);
        let last = transitions.recv().await.unwrap();
        assert_eq!(
            (last.from, last.to),
            (StateKind::AwaitingConfirmation, StateKind::Aborted)
        );
        assert!(state.has_changed().unwrap());
        assert!(state.borrow_and_update().is_terminal());
        assert_eq!(
            flow.on_user_submit("192.168.1.50", 502, 10).await,
            Err(FlowError::Finished(StateKind::Aborted))
        );

        // A second abort is not announced again
        flow.abort_handle().abort();
        assert!(transitions.try_recv().is_err());
    }

    #[tokio::test]
    async fn abort_in_idle_is_announced() {
        let flow = flow(&classic(), &DeviceRegistry::new());
        let mut transitions = flow.subscribe();
        flow.abort_handle().abort();

        let only = transitions.recv().await.unwrap();
        assert_eq!((only.from, only.to), (StateKind::Idle, StateKind::Aborted));
        assert_eq!(
            flow.state(),
            FlowState::Aborted {
                reason: AbortReason::Cancelled
            }
        );
    }

    #[tokio::test]
    async fn discovered_mac_is_canonicalised() {
        let registry = DeviceRegistry::new();
        let mut flow = flow(&classic(), &registry);
        let record = DiscoveryRecord {
            mac_address: "60-1D-0F-12-34-56".to_string(),
            ip: "192.168.1.50".to_string(),
            hostname: None,
            first_seen_at: Utc::now(),
        };

        flow.on_discovered(record).await.unwrap();
        flow.on_user_submit("", 502, 10).await.unwrap();
        assert!(registry.contains(MAC));
    }

    #[tokio::test]
    async fn transitions_are_broadcast() {
        let mut flow = flow(&classic(), &DeviceRegistry::new());
        let mut transitions = flow.subscribe();

        flow.on_user_submit("192.168.1.50", 502, 10).await.unwrap();

        let first = transitions.recv().await.unwrap();
        assert_eq!((first.from, first.to), (StateKind::Idle, StateKind::Validating));
        let second = transitions.recv().await.unwrap();
        assert_eq!(
            (second.from, second.to),
            (StateKind::Validating, StateKind::Configured)
        );
    }

    #[test]
    fn malformed_mac_is_refused() {
        assert_eq!(
            DiscoveryRecord::new("not-a-mac", "10.0.0.1", None),
            Err(FlowError::InvalidMac("not-a-mac".to_string()))
        );
    }
}
