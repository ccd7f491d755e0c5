// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Setup flow against real sockets: a simulated controller, a controller
//! answering every read with an exception, and a closed port

mod common;

use std::sync::Arc;

use rust_midnite::config::{ConnectionConfig, DiscoveryConfig};
use rust_midnite::discovery::{
    AbortReason, DeviceRegistry, DiscoveryFlow, DiscoveryRecord, FlowState, StateKind,
};
use rust_midnite::modbus::ClassicSimulator;
use rust_midnite::transport::TcpTransportFactory;

use common::{closed_port, start_simulator};
use tokio_test::{assert_err, assert_ok};

fn flow(registry: &DeviceRegistry) -> DiscoveryFlow {
    let config = DiscoveryConfig {
        probe_timeout_ms: 1000,
        ..Default::default()
    };
    DiscoveryFlow::new(config, registry.clone(), Arc::new(TcpTransportFactory))
}

#[tokio::test]
async fn manual_setup_configures_the_simulator() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server) = start_simulator(ClassicSimulator::new()).await?;
    let registry = DeviceRegistry::new();
    let mut flow = flow(&registry);

    let kind = flow
        .on_user_submit("127.0.0.1", socket_addr.port(), 10)
        .await?;
    assert_eq!(kind, StateKind::Configured);
    assert_eq!(
        registry.get("60:1d:0f:12:34:56"),
        Some(ConnectionConfig::new("127.0.0.1", socket_addr.port(), 10, 15))
    );
    Ok(())
}

#[tokio::test]
async fn closed_port_is_cannot_connect() -> Result<(), Box<dyn std::error::Error>> {
    let port = closed_port().await?;
    let registry = DeviceRegistry::new();
    let mut flow = flow(&registry);

    let kind = assert_ok!(flow.on_user_submit("127.0.0.1", port, 10).await);
    assert_eq!(kind, StateKind::Idle);
    assert_eq!(
        flow.state().error().map(|e| e.category()),
        Some("cannot_connect")
    );
    assert!(!flow.state().is_terminal());
    assert!(registry.is_empty());

    // Another attempt is accepted from Idle
    let (socket_addr, _server) = start_simulator(ClassicSimulator::new()).await?;
    let kind = assert_ok!(flow.on_user_submit("127.0.0.1", socket_addr.port(), 10).await);
    assert_eq!(kind, StateKind::Configured);
    assert_err!(flow.on_abort_requested().await);
    Ok(())
}

#[tokio::test]
async fn exception_on_probe_is_cannot_read() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server) = start_simulator(ClassicSimulator::empty()).await?;
    let registry = DeviceRegistry::new();
    let mut flow = flow(&registry);

    let kind = flow
        .on_user_submit("127.0.0.1", socket_addr.port(), 10)
        .await?;
    assert_eq!(kind, StateKind::Idle);
    assert_eq!(flow.state().error().map(|e| e.category()), Some("cannot_read"));
    Ok(())
}

#[tokio::test]
async fn rediscovery_updates_the_configured_host() -> Result<(), Box<dyn std::error::Error>> {
    let registry = DeviceRegistry::new();
    registry.insert(
        "60:1d:0f:12:34:56",
        ConnectionConfig::new("192.168.1.50", 502, 10, 15),
    );

    let mut first = flow(&registry);
    let record = DiscoveryRecord::new("60:1D:0F:12:34:56", "192.168.1.77", None)?;
    assert_eq!(first.on_discovered(record).await?, StateKind::Aborted);

    let mut second = flow(&registry);
    let record = DiscoveryRecord::new("601d0f123456", "192.168.1.77", Some("classic".into()))?;
    second.on_discovered(record).await?;
    assert_eq!(
        second.state(),
        FlowState::Aborted {
            reason: AbortReason::AlreadyConfigured {
                identity: "60:1d:0f:12:34:56".to_string(),
                host_updated: false,
            }
        }
    );

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.get("60:1d:0f:12:34:56").unwrap().host, "192.168.1.77");
    Ok(())
}
