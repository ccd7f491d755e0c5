// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated controller served over Modbus TCP
//!
//! The simulator stands in for a Classic during development and in the
//! integration tests: the real [`TcpTransport`](crate::transport::TcpTransport)
//! talks to it exactly as it would to a device.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_midnite::modbus::{serve, ClassicSimulator};
//! use tokio::net::TcpListener;
//!
//! # async fn run() -> std::io::Result<()> {
//! let listener = TcpListener::bind("127.0.0.1:5020").await?;
//! serve(listener, ClassicSimulator::new()).await
//! # }
//! ```

pub mod simulator;

use log::{debug, error};
use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};

pub use simulator::{classic_registers, ClassicSimulator};

/// Serve `simulator` on `listener` until the task is dropped
///
/// Every connection shares the same register bank.
pub async fn serve(listener: TcpListener, simulator: ClassicSimulator) -> std::io::Result<()> {
    let server = Server::new(listener);

    let on_connected = move |stream, socket_addr| {
        let simulator = simulator.clone();
        debug!("Simulator accepted connection from {}", socket_addr);
        async move {
            accept_tcp_connection(stream, socket_addr, move |_socket_addr| {
                Ok(Some(simulator.clone()))
            })
        }
    };

    let on_process_error = |err| {
        error!("Simulator error: {err}");
    };

    server.serve(&on_connected, on_process_error).await
}
