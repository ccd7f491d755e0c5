// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Helpers shared by the integration tests

use std::net::SocketAddr;
use std::time::Duration;

use rust_midnite::modbus::{serve, ClassicSimulator};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio::time;

/// Start a simulated controller on an OS-assigned port
pub async fn start_simulator(
    simulator: ClassicSimulator,
) -> Result<(SocketAddr, JoinHandle<()>), Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let socket_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = serve(listener, simulator).await {
            eprintln!("Simulator error: {}", e);
        }
    });

    // Give the server a moment to start
    time::sleep(Duration::from_millis(50)).await;

    Ok((socket_addr, handle))
}

/// A port nothing listens on
pub async fn closed_port() -> Result<u16, Box<dyn std::error::Error>> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}
