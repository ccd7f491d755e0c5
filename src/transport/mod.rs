// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register transport abstraction
//!
//! The coordinator, the command executor and the connection probe talk to a
//! device through [`RegisterTransport`]. Two implementations are provided:
//!
//! - [`TcpTransport`]: Modbus TCP through `tokio-modbus`
//! - [`MockTransport`]: in-memory register bank with fault injection, used by
//!   tests and by the simulator
//!
//! Addresses passed to a transport are the documented 1-based register
//! numbers of the register catalogue.

mod mock;
mod tcp;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use mock::{MockTransport, MockTransportFactory};
pub use tcp::TcpTransport;

/// Default Modbus TCP port of the Classic
pub const DEFAULT_PORT: u16 = 502;
/// Default Modbus unit identifier of the Classic
pub const DEFAULT_SLAVE_ID: u8 = 10;

/// Failures raised by a transport
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// The endpoint could not be reached or refused the connection
    #[error("cannot connect: {0}")]
    Connect(String),
    /// An operation was attempted without an open connection
    #[error("not connected")]
    NotConnected,
    /// No answer within the request timeout, in milliseconds
    #[error("no response within {0} ms")]
    Timeout(u64),
    /// The device answered with a Modbus exception
    #[error("modbus exception: {0}")]
    Exception(String),
    /// The connection broke during the exchange
    #[error("i/o error: {0}")]
    Io(String),
}

impl TransportError {
    /// Whether the connection should be reopened before the next request
    pub fn drops_connection(&self) -> bool {
        matches!(
            self,
            TransportError::Connect(_) | TransportError::Io(_) | TransportError::Timeout(_)
        )
    }
}

/// Network location of one controller
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub slave_id: u8,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16, slave_id: u8) -> Self {
        Self {
            host: host.into(),
            port,
            slave_id,
        }
    }

    /// `host:port`, used as a fallback identity and in log lines
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{} (unit {})", self.host, self.port, self.slave_id)
    }
}

/// Register-level access to one device
#[async_trait]
pub trait RegisterTransport: Send {
    /// Open the connection; a no-op when already connected
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Whether a connection is currently open
    fn is_connected(&self) -> bool;

    /// Read `count` holding registers starting at `address`
    async fn read_registers(&mut self, address: u16, count: u16)
        -> Result<Vec<u16>, TransportError>;

    /// Write a single holding register
    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError>;

    /// Write consecutive holding registers in one request
    async fn write_registers(&mut self, address: u16, values: &[u16])
        -> Result<(), TransportError>;

    /// Close the connection, ignoring errors
    async fn close(&mut self);

    /// Location of the device, for logs
    fn describe(&self) -> String;
}

/// Connection shared by the polling loop and the command executor
///
/// Holding the lock gives exclusive use of the connection for a whole group
/// read or a whole write.
pub type SharedTransport = Arc<tokio::sync::Mutex<Box<dyn RegisterTransport>>>;

/// Wrap a transport for shared use
pub fn shared(transport: Box<dyn RegisterTransport>) -> SharedTransport {
    Arc::new(tokio::sync::Mutex::new(transport))
}

/// Builds transports for an endpoint
///
/// The discovery flow uses a factory so that connection probes can run
/// against simulated devices in tests.
pub trait TransportFactory: Send + Sync {
    fn create(&self, endpoint: &Endpoint, timeout: Duration) -> Box<dyn RegisterTransport>;
}

/// Factory producing Modbus TCP transports
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpTransportFactory;

impl TransportFactory for TcpTransportFactory {
    fn create(&self, endpoint: &Endpoint, timeout: Duration) -> Box<dyn RegisterTransport> {
        Box::new(TcpTransport::new(endpoint.clone(), timeout))
    }
}
