// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! In-memory transport with fault injection
//!
//! Clones share the same register bank, so a test can keep one handle to
//! change registers or inject faults while another handle is owned by the
//! coordinator.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{Endpoint, RegisterTransport, TransportError, TransportFactory};

#[derive(Debug, Default)]
struct MockState {
    registers: HashMap<u16, u16>,
    failing_reads: Vec<u16>,
    rejected_writes: Vec<u16>,
    unreachable: bool,
    connected: bool,
    read_delay: Option<Duration>,
    connects: usize,
    reads: usize,
    writes: Vec<(u16, Vec<u16>)>,
}

/// Register bank behind a [`RegisterTransport`]
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bank preloaded with `(register, value)` pairs
    pub fn with_registers(values: impl IntoIterator<Item = (u16, u16)>) -> Self {
        let mock = Self::new();
        mock.state().registers.extend(values);
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn set_register(&self, address: u16, value: u16) {
        self.state().registers.insert(address, value);
    }

    pub fn set_registers(&self, address: u16, values: &[u16]) {
        let mut state = self.state();
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address + offset as u16, *value);
        }
    }

    /// Current value of a register, 0 when never written
    pub fn register(&self, address: u16) -> u16 {
        self.state().registers.get(&address).copied().unwrap_or(0)
    }

    /// Reads starting at `address` answer with an IllegalDataAddress exception
    pub fn fail_reads_from(&self, address: u16) {
        self.state().failing_reads.push(address);
    }

    /// Writes touching `address` answer with an IllegalDataValue exception
    pub fn reject_writes_at(&self, address: u16) {
        self.state().rejected_writes.push(address);
    }

    pub fn clear_faults(&self) {
        let mut state = self.state();
        state.failing_reads.clear();
        state.rejected_writes.clear();
        state.unreachable = false;
    }

    /// Simulate a device that no longer accepts connections
    pub fn set_unreachable(&self, unreachable: bool) {
        let mut state = self.state();
        state.unreachable = unreachable;
        if unreachable {
            state.connected = false;
        }
    }

    /// Delay applied to every read
    pub fn set_read_delay(&self, delay: Option<Duration>) {
        self.state().read_delay = delay;
    }

    pub fn connect_count(&self) -> usize {
        self.state().connects
    }

    pub fn read_count(&self) -> usize {
        self.state().reads
    }

    /// Every successful write, in order
    pub fn writes(&self) -> Vec<(u16, Vec<u16>)> {
        self.state().writes.clone()
    }

    fn check_write(&self, address: u16, count: usize) -> Result<(), TransportError> {
        let state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        let end = address as usize + count;
        if state
            .rejected_writes
            .iter()
            .any(|&a| (address as usize..end).contains(&(a as usize)))
        {
            return Err(TransportError::Exception("IllegalDataValue".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RegisterTransport for MockTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state();
        if state.unreachable {
            return Err(TransportError::Connect("connection refused".to_string()));
        }
        if !state.connected {
            state.connected = true;
            state.connects += 1;
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.state().connected
    }

    async fn read_registers(
        &mut self,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        let delay = self.state().read_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        state.reads += 1;
        if state.failing_reads.contains(&address) {
            return Err(TransportError::Exception("IllegalDataAddress".to_string()));
        }
        Ok((0..count)
            .map(|offset| {
                state
                    .registers
                    .get(&(address + offset))
                    .copied()
                    .unwrap_or(0)
            })
            .collect())
    }

    async fn write_register(&mut self, address: u16, value: u16) -> Result<(), TransportError> {
        self.write_registers(address, &[value]).await
    }

    async fn write_registers(
        &mut self,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        self.check_write(address, values.len())?;
        let mut state = self.state();
        for (offset, value) in values.iter().enumerate() {
            state.registers.insert(address + offset as u16, *value);
        }
        state.writes.push((address, values.to_vec()));
        Ok(())
    }

    async fn close(&mut self) {
        self.state().connected = false;
    }

    fn describe(&self) -> String {
        "mock transport".to_string()
    }
}

/// Factory handing out clones of one mock, whatever the endpoint
#[derive(Debug, Clone, Default)]
pub struct MockTransportFactory(pub MockTransport);

impl TransportFactory for MockTransportFactory {
    fn create(&self, _endpoint: &Endpoint, _timeout: Duration) -> Box<dyn RegisterTransport> {
        Box::new(self.0.clone())
    }
}
