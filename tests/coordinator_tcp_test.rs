// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polling coordinator and command executor over a real Modbus TCP
//! connection to the simulated controller

mod common;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rust_midnite::command::CommandExecutor;
use rust_midnite::coordinator::{Coordinator, GroupStatus};
use rust_midnite::modbus::{classic_registers, ClassicSimulator};
use rust_midnite::registers::{ControlFlag, Conversion, Group, MpptMode, RegisterMap};
use rust_midnite::transport::{shared, Endpoint, TcpTransport};
use rust_midnite::LinkError;

use common::{closed_port, start_simulator};

fn coordinator(socket_addr: SocketAddr) -> Coordinator {
    let endpoint = Endpoint::new(socket_addr.ip().to_string(), socket_addr.port(), 10);
    let transport = TcpTransport::new(endpoint, Duration::from_secs(2));
    let map = Arc::new(RegisterMap::classic().unwrap());
    Coordinator::new(map, shared(Box::new(transport)), 3)
}

#[tokio::test]
async fn refresh_decodes_the_simulated_controller() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server) = start_simulator(ClassicSimulator::new()).await?;
    let coordinator = coordinator(socket_addr);

    let snapshot = coordinator.refresh().await?;
    assert!(snapshot.groups.values().all(|g| g.status == GroupStatus::Ok));
    assert_eq!(snapshot.value("DISP_AVG_VBATT"), Some(53.2));
    assert_eq!(snapshot.value("ABSORB_SETPOINT_VOLTAGE"), Some(57.6));

    let identity = snapshot.device_identity();
    assert_eq!(identity.model.as_deref(), Some("Classic 250"));
    assert_eq!(identity.pcb_revision, Some(3));
    assert_eq!(identity.firmware_date.as_deref(), Some("2023-10-15"));
    assert_eq!(identity.mac_address.as_deref(), Some("60:1d:0f:12:34:56"));
    assert_eq!(identity.unit_name.as_deref(), Some("CLASSIC"));

    let state = snapshot.charge_state();
    assert_eq!(state.stage.as_deref(), Some("BulkMPPT"));
    assert_eq!(state.mppt_mode, Some(MpptMode::Solar));

    let network = snapshot.network_addresses();
    assert!(network.contains(&("IP_ADDRESS", Ipv4Addr::new(192, 168, 1, 50))));
    assert!(network.contains(&("DNS_2_ADDRESS", Ipv4Addr::new(8, 8, 8, 8))));
    Ok(())
}

#[tokio::test]
async fn missing_registers_only_degrade_their_group() -> Result<(), Box<dyn std::error::Error>> {
    let registers = classic_registers()
        .into_iter()
        .filter(|(register, _)| *register < 20481);
    let (socket_addr, _server) = start_simulator(ClassicSimulator::from_registers(registers)).await?;
    let coordinator = coordinator(socket_addr);

    let snapshot = coordinator.refresh().await?;
    assert_eq!(
        snapshot.group(Group::Network).map(|g| g.status),
        Some(GroupStatus::Stale {
            consecutive_failures: 1
        })
    );
    assert_eq!(snapshot.degraded_groups(), vec![Group::Network]);
    assert_eq!(snapshot.value("DISP_AVG_VBATT"), Some(53.2));
    Ok(())
}

#[tokio::test]
async fn closed_port_is_unreachable() -> Result<(), Box<dyn std::error::Error>> {
    let port = closed_port().await?;
    let coordinator = coordinator(SocketAddr::from(([127, 0, 0, 1], port)));

    let err = coordinator.refresh().await.unwrap_err();
    assert!(matches!(err, LinkError::TransportUnreachable(_)));
    assert!(err.is_retryable());
    Ok(())
}

#[tokio::test]
async fn writes_reach_the_controller() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = ClassicSimulator::new();
    let (socket_addr, _server) = start_simulator(simulator.clone()).await?;
    let coordinator = coordinator(socket_addr);
    let executor = CommandExecutor::new(&coordinator, Duration::from_secs(1));
    coordinator.refresh().await?;

    executor
        .set_value("ABSORB_SETPOINT_VOLTAGE", 56.4, Conversion::Identity)
        .await?;
    assert_eq!(simulator.register(4149), Some(564));

    executor
        .set_value("ABSORB_TIME_EEPROM", 45.0, Conversion::SecondsToMinutes)
        .await?;
    assert_eq!(simulator.register(4154), Some(2700));

    let acks = executor.set_mppt_mode(MpptMode::Hydro).await?;
    assert_eq!(acks.len(), 2);
    assert_eq!(simulator.register(4164), Some(0x000D));

    let snapshot = coordinator.refresh().await?;
    assert_eq!(snapshot.value("ABSORB_SETPOINT_VOLTAGE"), Some(56.4));
    assert_eq!(snapshot.charge_state().mppt_mode, Some(MpptMode::Hydro));
    Ok(())
}

#[tokio::test]
async fn forcing_float_is_visible_after_refresh() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server) = start_simulator(ClassicSimulator::new()).await?;
    let coordinator = coordinator(socket_addr);
    let executor = CommandExecutor::new(&coordinator, Duration::from_secs(1));
    coordinator.refresh().await?;

    let ack = executor.set_control_flag(ControlFlag::Float).await?;
    assert_eq!(ack.words, vec![0x0020, 0]);

    let snapshot = coordinator.refresh().await?;
    assert_eq!(snapshot.charge_state().stage.as_deref(), Some("Float"));
    assert_eq!(snapshot.raw("FORCE_FLAG_BITS"), Some(0));
    Ok(())
}

#[tokio::test]
async fn unit_name_is_written_and_read_back() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = ClassicSimulator::new();
    let (socket_addr, _server) = start_simulator(simulator.clone()).await?;
    let coordinator = coordinator(socket_addr);
    let executor = CommandExecutor::new(&coordinator, Duration::from_secs(1));
    coordinator.refresh().await?;

    let acks = executor.set_unit_name("BARN").await?;
    assert_eq!(acks.len(), 2);
    assert_eq!(simulator.register(4210), Some(0x4142));

    let snapshot = coordinator.refresh().await?;
    assert_eq!(snapshot.device_identity().unit_name.as_deref(), Some("BARN"));
    Ok(())
}
