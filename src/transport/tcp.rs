// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP transport

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::prelude::*;

use super::{Endpoint, RegisterTransport, TransportError};

/// Offset between documented register numbers and protocol addresses
const REGISTER_OFFSET: u16 = 1;

/// Holding-register access over Modbus TCP
pub struct TcpTransport {
    endpoint: Endpoint,
    timeout: Duration,
    ctx: Option<Context>,
}

impl TcpTransport {
    /// Create an unconnected transport; every request is bounded by `timeout`
    pub fn new(endpoint: Endpoint, timeout: Duration) -> Self {
        Self {
            endpoint,
            timeout,
            ctx: None,
        }
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }

    fn wire_address(address: u16) -> Result<u16, TransportError> {
        address
            .checked_sub(REGISTER_OFFSET)
            .ok_or_else(|| TransportError::Exception("IllegalDataAddress".to_string()))
    }

    async fn resolve(endpoint: &Endpoint) -> Result<SocketAddr, TransportError> {
        let target = endpoint.address();
        let mut addrs = tokio::net::lookup_host(&target)
            .await
            .map_err(|e| TransportError::Connect(format!("{}: {}", target, e)))?;
        addrs
            .next()
            .ok_or_else(|| TransportError::Connect(format!("{}: no address found", target)))
    }

    fn context(&mut self) -> Result<&mut Context, TransportError> {
        self.ctx.as_mut().ok_or(TransportError::NotConnected)
    }

    /// Drop the context after errors that leave the stream unusable
    fn settle<T>(&mut self, result: Result<T, TransportError>) -> Result<T, TransportError> {
        if let Err(err) = &result {
            if err.drops_connection() {
                warn!("{}: dropping connection after {}", self.endpoint, err);
                self.ctx = None;
            }
        }
        result
    }
}

fn flatten<T>(
    outcome: Result<Result<Result<T, ExceptionCode>, tokio_modbus::Error>, tokio::time::error::Elapsed>,
    timeout_ms: u64,
) -> Result<T, TransportError> {
    match outcome {
        Err(_) => Err(TransportError::Timeout(timeout_ms)),
        Ok(Err(err)) => Err(TransportError::Io(err.to_string())),
        Ok(Ok(Err(code))) => Err(TransportError::Exception(format!("{:?}", code))),
        Ok(Ok(Ok(value))) => Ok(value),
    }
}

#[async_trait]
impl RegisterTransport for TcpTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        if self.ctx.is_some() {
            return Ok(());
        }
        let socket_addr = Self::resolve(&self.endpoint).await?;
        debug!("Connecting to {}", self.endpoint);
        let ctx = match timeout(
            self.timeout,
            tcp::connect_slave(socket_addr, Slave(self.endpoint.slave_id)),
        )
        .await
        {
            Err(_) => return Err(TransportError::Connect(format!(
                "{}: connection timed out after {} ms",
                socket_addr,
                self.timeout_ms()
            ))),
            Ok(Err(e)) => return Err(TransportError::Connect(format!("{}: {}", socket_addr, e))),
            Ok(Ok(ctx)) => ctx,
        };
        self.ctx = Some(ctx);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.ctx.is_some()
    }

    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let wire = Self::wire_address(address)?;
        let limit = self.timeout;
        let timeout_ms = self.timeout_ms();
        let ctx = self.context()?;
        let outcome = timeout(limit, ctx.read_holding_registers(wire, count)).await;
        let result = flatten(outcome, timeout_ms).and_then(|words| {
            if words.len() == count as usize {
                Ok(words)
            } else {
                Err(TransportError::Io(format!(
                    "expected {} registers at {}, got {}",
                    count,
                    address,
                    words.len()
                )))
            }
        });
        self.settle(result)
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        let wire = Self::wire_address(address)?;
        let limit = self.timeout;
        let timeout_ms = self.timeout_ms();
        let ctx = self.context()?;
        let outcome = timeout(limit, ctx.write_single_register(wire, value)).await;
        let result = flatten(outcome, timeout_ms);
        self.settle(result)
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        let wire = Self::wire_address(address)?;
        let limit = self.timeout;
        let timeout_ms = self.timeout_ms();
        let ctx = self.context()?;
        let outcome = timeout(limit, ctx.write_multiple_registers(wire, values)).await;
        let result = flatten(outcome, timeout_ms);
        self.settle(result)
    }

    async fn close(&mut self) {
        if let Some(mut ctx) = self.ctx.take() {
            if let Err(err) = ctx.disconnect().await {
                debug!("{}: error while disconnecting: {}", self.endpoint, err);
            }
        }
    }

    fn describe(&self) -> String {
        self.endpoint.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn documented_numbers_map_to_zero_based_addresses() {
        assert_eq!(TcpTransport::wire_address(4101), Ok(4100));
        assert!(TcpTransport::wire_address(0).is_err());
    }

    #[tokio::test]
    async fn reading_without_connection_fails() {
        let mut transport =
            TcpTransport::new(Endpoint::new("127.0.0.1", 502, 10), Duration::from_millis(100));
        assert!(!transport.is_connected());
        assert_eq!(
            transport.read_registers(4101, 1).await,
            Err(TransportError::NotConnected)
        );
    }
}
