// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Simulated Classic charge controller
//!
//! [`ClassicSimulator`] implements the `tokio-modbus` server [`Service`]
//! over a holding-register bank laid out like a Classic 250. Protocol
//! addresses are 0-based, so documented register `n` is stored at `n - 1`.
//!
//! Writing a charge-stage bit into the control register changes the reported
//! charge stage and the bits are cleared afterwards, as the device does.
//!
//! [`Service`]: tokio_modbus::server::Service

use std::collections::HashMap;
use std::future;
use std::sync::{Arc, Mutex, MutexGuard};

use log::{debug, error};
use rand::Rng;
use tokio_modbus::prelude::*;

use crate::registers::ControlFlag;

/// Documented register ranges answered by the simulator
const SIMULATED_RANGES: [(u16, u16); 3] = [(4101, 4180), (4210, 4326), (20481, 20491)];

const FORCE_FLAG_LOW: u16 = 4160;
const FORCE_FLAG_HIGH: u16 = 4161;
const COMBO_CHARGE_STAGE: u16 = 4120;
const DISP_AVG_VBATT: u16 = 4115;
const WATTS: u16 = 4119;

/// Default register values of the simulated controller, by documented
/// register number
pub fn classic_registers() -> Vec<(u16, u16)> {
    let mut registers: Vec<(u16, u16)> = SIMULATED_RANGES
        .iter()
        .flat_map(|&(start, end)| (start..=end).map(|register| (register, 0)))
        .collect();

    let values: &[(u16, u16)] = &[
        // device info: PCB revision 3, Classic 250, firmware 2023-10-15
        (4101, 0x03FA),
        (4102, 2023),
        (4103, 0x0A0F),
        // MAC 60:1d:0f:12:34:56
        (4106, 0x3456),
        (4107, 0x0F12),
        (4108, 0x601D),
        (4111, 0x1234),
        (4112, 0x0001),
        // status
        (4115, 532),
        (4116, 1024),
        (4117, 125),
        (4118, 36),
        (4119, 665),
        (4120, 0x0404),
        (4121, 78),
        (4122, 1340),
        (4123, 1450),
        // energy: 12345.6 kWh and 98765.4 Ah lifetime
        (4125, 52),
        (4126, 0xE240),
        (4127, 0x0001),
        (4128, 0x1206),
        (4129, 0x000F),
        // temperatures
        (4132, 215),
        (4133, 387),
        (4134, 402),
        // time and settings
        (4136, 60),
        (4137, 502),
        (4139, 1800),
        (4148, 800),
        (4149, 576),
        (4150, 544),
        (4151, 592),
        (4154, 7200),
        (4162, 3600),
        (4163, 28),
        (4164, 0x000B),
        // unit name "CLASSIC "
        (4210, 0x4C43),
        (4211, 0x5341),
        (4212, 0x4953),
        (4213, 0x2043),
        (4326, 10),
        // network: 192.168.1.50/24 via 192.168.1.1, DNS 192.168.1.1 and 8.8.8.8
        (20482, 0xA8C0),
        (20483, 0x3201),
        (20484, 0xA8C0),
        (20485, 0x0101),
        (20486, 0xFFFF),
        (20487, 0x00FF),
        (20488, 0xA8C0),
        (20489, 0x0101),
        (20490, 0x0808),
        (20491, 0x0808),
    ];

    for &(register, value) in values {
        if let Some(slot) = registers.iter_mut().find(|(r, _)| *r == register) {
            slot.1 = value;
        }
    }
    registers
}

/// Modbus service of a simulated Classic
#[derive(Debug, Clone)]
pub struct ClassicSimulator {
    /// Holding registers by 0-based protocol address
    registers: Arc<Mutex<HashMap<u16, u16>>>,
    live: bool,
}

impl Default for ClassicSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassicSimulator {
    /// Simulator with the default register bank
    pub fn new() -> Self {
        Self::from_registers(classic_registers())
    }

    /// Simulator answering every read with IllegalDataAddress
    pub fn empty() -> Self {
        Self::from_registers(Vec::new())
    }

    /// Simulator with the given `(documented register, value)` pairs
    pub fn from_registers(values: impl IntoIterator<Item = (u16, u16)>) -> Self {
        let registers = values
            .into_iter()
            .filter(|(register, _)| *register > 0)
            .map(|(register, value)| (register - 1, value))
            .collect();
        Self {
            registers: Arc::new(Mutex::new(registers)),
            live: false,
        }
    }

    /// Vary battery voltage and output power slightly on every read
    pub fn live(mut self, live: bool) -> Self {
        self.live = live;
        self
    }

    fn bank(&self) -> MutexGuard<'_, HashMap<u16, u16>> {
        self.registers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Value of a documented register
    pub fn register(&self, register: u16) -> Option<u16> {
        self.bank().get(&register.checked_sub(1)?).copied()
    }

    /// Set a documented register
    pub fn set_register(&self, register: u16, value: u16) {
        if let Some(address) = register.checked_sub(1) {
            self.bank().insert(address, value);
        }
    }

    fn jitter(&self) {
        let mut bank = self.bank();
        let mut rng = rand::rng();
        if let Some(vbatt) = bank.get_mut(&(DISP_AVG_VBATT - 1)) {
            *vbatt = 530 + rng.random_range(0..6);
        }
        if let Some(watts) = bank.get_mut(&(WATTS - 1)) {
            *watts = 640 + rng.random_range(0..50);
        }
    }

    /// Act on charge-stage command bits, then clear the control register
    fn apply_force_flags(bank: &mut HashMap<u16, u16>) {
        let low = bank.get(&(FORCE_FLAG_LOW - 1)).copied().unwrap_or(0) as u32;
        let high = bank.get(&(FORCE_FLAG_HIGH - 1)).copied().unwrap_or(0) as u32;
        let flags = (high << 16) | low;
        if flags == 0 {
            return;
        }

        let stage = [
            (ControlFlag::Float, 5u16),
            (ControlFlag::Bulk, 4),
            (ControlFlag::Equalize, 7),
        ]
        .iter()
        .find(|(flag, _)| flags & flag.mask() != 0)
        .map(|(_, stage)| *stage);
        if let Some(stage) = stage {
            debug!("Simulated controller forced into charge stage {}", stage);
            bank.insert(COMBO_CHARGE_STAGE - 1, (stage << 8) | stage);
        }
        bank.insert(FORCE_FLAG_LOW - 1, 0);
        bank.insert(FORCE_FLAG_HIGH - 1, 0);
    }
}

impl tokio_modbus::server::Service for ClassicSimulator {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, req: Self::Request) -> Self::Future {
        debug!("Received Modbus request: {:?}", req);

        if self.live && matches!(req, Request::ReadHoldingRegisters(_, _)) {
            self.jitter();
        }

        let res = match req {
            Request::ReadHoldingRegisters(addr, cnt) => {
                debug!(
                    "Reading {} holding registers starting from address {}",
                    cnt, addr
                );
                register_read(&self.bank(), addr, cnt).map(Response::ReadHoldingRegisters)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Writing {} values to holding registers starting from address {}",
                    values.len(),
                    addr
                );
                let mut bank = self.bank();
                register_write(&mut bank, addr, &values).map(|_| {
                    Self::apply_force_flags(&mut bank);
                    Response::WriteMultipleRegisters(addr, values.len() as u16)
                })
            }
            Request::WriteSingleRegister(addr, value) => {
                debug!("Writing value {} to holding register {}", value, addr);
                let mut bank = self.bank();
                register_write(&mut bank, addr, std::slice::from_ref(&value)).map(|_| {
                    Self::apply_force_flags(&mut bank);
                    Response::WriteSingleRegister(addr, value)
                })
            }
            _ => {
                error!(
                    "Exception::IllegalFunction - Unimplemented function code in request: {req:?}"
                );
                Err(ExceptionCode::IllegalFunction)
            }
        };

        if let Err(e) = &res {
            error!("Modbus request error: {:?}", e);
        }

        future::ready(res)
    }
}

fn register_read(
    registers: &HashMap<u16, u16>,
    addr: u16,
    cnt: u16,
) -> Result<Vec<u16>, ExceptionCode> {
    (0..cnt)
        .map(|offset| {
            let reg_addr = addr.checked_add(offset).ok_or(ExceptionCode::IllegalDataAddress)?;
            registers.get(&reg_addr).copied().ok_or_else(|| {
                error!("Exception::IllegalDataAddress at {}", reg_addr);
                ExceptionCode::IllegalDataAddress
            })
        })
        .collect()
}

fn register_write(
    registers: &mut HashMap<u16, u16>,
    addr: u16,
    values: &[u16],
) -> Result<(), ExceptionCode> {
    for (offset, value) in values.iter().enumerate() {
        let reg_addr = addr
            .checked_add(offset as u16)
            .ok_or(ExceptionCode::IllegalDataAddress)?;
        match registers.get_mut(&reg_addr) {
            Some(slot) => *slot = *value,
            None => {
                error!("Exception::IllegalDataAddress at {}", reg_addr);
                return Err(ExceptionCode::IllegalDataAddress);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_modbus::server::Service;

    #[test]
    fn documented_registers_are_stored_zero_based() {
        let simulator = ClassicSimulator::new();
        assert_eq!(simulator.register(4101), Some(0x03FA));
        assert_eq!(simulator.bank().get(&4100), Some(&0x03FA));
    }

    #[tokio::test]
    async fn forcing_float_changes_stage_and_clears_flags() {
        let simulator = ClassicSimulator::new();
        let response = simulator
            .call(Request::WriteMultipleRegisters(4159, vec![0x0020, 0].into()))
            .await;
        assert!(response.is_ok());
        assert_eq!(simulator.register(COMBO_CHARGE_STAGE), Some(0x0505));
        assert_eq!(simulator.register(FORCE_FLAG_LOW), Some(0));
    }

    #[tokio::test]
    async fn reads_outside_the_bank_are_illegal() {
        let simulator = ClassicSimulator::new();
        let response = simulator.call(Request::ReadHoldingRegisters(9000, 2)).await;
        assert_eq!(response, Err(ExceptionCode::IllegalDataAddress));
    }
}
