// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Tests for the simulated Classic served over Modbus TCP
//!
//! A plain `tokio-modbus` client talks to the simulator with 0-based
//! protocol addresses, so documented register `n` is read at `n - 1`.

mod common;

use rust_midnite::modbus::ClassicSimulator;
use tokio_modbus::prelude::*;

use common::start_simulator;

#[tokio::test]
async fn test_read_device_info() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server_handle) = start_simulator(ClassicSimulator::new()).await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(10)).await?;

    // Unit id, firmware year and month/day
    let data = ctx.read_holding_registers(4100, 3).await??;
    assert_eq!(data, vec![0x03FA, 2023, 0x0A0F]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_write_single_register() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = ClassicSimulator::new();
    let (socket_addr, _server_handle) = start_simulator(simulator.clone()).await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(10)).await?;

    // Absorb voltage, 56.4 V
    ctx.write_single_register(4148, 564).await??;

    let data = ctx.read_holding_registers(4148, 1).await??;
    assert_eq!(data, vec![564]);
    assert_eq!(simulator.register(4149), Some(564));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_force_float_changes_charge_stage() -> Result<(), Box<dyn std::error::Error>> {
    let simulator = ClassicSimulator::new();
    let (socket_addr, _server_handle) = start_simulator(simulator.clone()).await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(10)).await?;

    // Bit 5 of FORCE_FLAG_BITS, low word first
    ctx.write_multiple_registers(4159, &[0x0020, 0]).await??;

    let stage = ctx.read_holding_registers(4119, 1).await??;
    assert_eq!(stage, vec![0x0505]);
    let flags = ctx.read_holding_registers(4159, 2).await??;
    assert_eq!(flags, vec![0, 0]);

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_read_outside_the_bank() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server_handle) = start_simulator(ClassicSimulator::new()).await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(10)).await?;

    let response = ctx.read_holding_registers(9000, 2).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));

    ctx.disconnect().await?;
    Ok(())
}

#[tokio::test]
async fn test_unsupported_function() -> Result<(), Box<dyn std::error::Error>> {
    let (socket_addr, _server_handle) = start_simulator(ClassicSimulator::new()).await?;
    let mut ctx = tcp::connect_slave(socket_addr, Slave(10)).await?;

    let response = ctx.read_input_registers(4100, 1).await?;
    assert_eq!(response, Err(ExceptionCode::IllegalFunction));

    ctx.disconnect().await?;
    Ok(())
}
