// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Values derived from several raw fields of a snapshot

use std::net::Ipv4Addr;

use chrono::NaiveDate;
use serde::Serialize;

use super::Snapshot;
use crate::registers::catalog::{
    COMBO_CHARGE_STAGE, DEVICE_ID, IP_ADDRESS_FIELDS, MAC_ADDRESS_PART_1, MAC_ADDRESS_PART_2,
    MAC_ADDRESS_PART_3, MPPT_MODE, REASON_FOR_RESTING, UNIT_ID, UNIT_NAME_PARTS,
    UNIT_SW_DATE_MONTH_DAY, UNIT_SW_DATE_RO,
};
use crate::registers::enums;
use crate::registers::MpptMode;

/// Hardware identity of a controller
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DeviceIdentity {
    pub model: Option<String>,
    pub pcb_revision: Option<u8>,
    /// Firmware build date as `YYYY-MM-DD`
    pub firmware_date: Option<String>,
    pub mac_address: Option<String>,
    pub device_id: Option<u32>,
    pub unit_name: Option<String>,
}

/// Charging activity of a controller
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChargeState {
    pub stage: Option<String>,
    pub internal_state: Option<String>,
    pub rest_reason: Option<String>,
    pub mppt_mode: Option<MpptMode>,
}

/// Model name and PCB revision from the `UNIT_ID` register
pub fn split_unit_id(raw: u16) -> (Option<&'static str>, u8) {
    let [revision, model] = raw.to_be_bytes();
    (enums::device_model(model), revision)
}

/// MAC from the three MAC words, most significant word at 4108
pub fn format_mac(part1: u16, part2: u16, part3: u16) -> String {
    [part3, part2, part1]
        .iter()
        .flat_map(|word| word.to_be_bytes())
        .map(|byte| format!("{:02x}", byte))
        .collect::<Vec<_>>()
        .join(":")
}

/// IPv4 address stored as a two-word value
pub fn ipv4_from_raw(raw: u32) -> Ipv4Addr {
    let [a, b, c, d] = raw.to_le_bytes();
    Ipv4Addr::new(a, b, c, d)
}

/// Firmware build date from the year register and the month/day register
pub fn firmware_date(year: u16, month_day: u16) -> Option<String> {
    let [month, day] = month_day.to_be_bytes();
    NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .map(|date| date.format("%Y-%m-%d").to_string())
}

/// Unit name packed two ASCII characters per register, low byte first
pub fn unit_name(words: &[u16]) -> String {
    let bytes: Vec<u8> = words
        .iter()
        .flat_map(|word| word.to_le_bytes())
        .filter(|&byte| byte != 0)
        .collect();
    String::from_utf8_lossy(&bytes).trim().to_string()
}

impl Snapshot {
    fn raw_word(&self, name: &str) -> Option<u16> {
        self.raw(name).map(|raw| raw as u16)
    }

    /// MAC address read from the device, lower-case colon form
    pub fn mac_address(&self) -> Option<String> {
        Some(format_mac(
            self.raw_word(MAC_ADDRESS_PART_1)?,
            self.raw_word(MAC_ADDRESS_PART_2)?,
            self.raw_word(MAC_ADDRESS_PART_3)?,
        ))
    }

    pub fn device_identity(&self) -> DeviceIdentity {
        let unit = self.raw_word(UNIT_ID).map(split_unit_id);
        let name_words: Option<Vec<u16>> = UNIT_NAME_PARTS
            .iter()
            .map(|part| self.raw_word(part))
            .collect();
        DeviceIdentity {
            model: unit.and_then(|(model, _)| model.map(str::to_string)),
            pcb_revision: unit.map(|(_, revision)| revision),
            firmware_date: self
                .raw_word(UNIT_SW_DATE_RO)
                .zip(self.raw_word(UNIT_SW_DATE_MONTH_DAY))
                .and_then(|(year, month_day)| firmware_date(year, month_day)),
            mac_address: self.mac_address(),
            device_id: self.raw(DEVICE_ID),
            unit_name: name_words.map(|words| unit_name(&words)),
        }
    }

    pub fn charge_state(&self) -> ChargeState {
        let combo = self.raw_word(COMBO_CHARGE_STAGE).map(u16::to_be_bytes);
        ChargeState {
            stage: combo
                .and_then(|[stage, _]| enums::charge_stage(stage))
                .map(str::to_string),
            internal_state: combo
                .and_then(|[_, state]| enums::internal_state(state))
                .map(str::to_string),
            rest_reason: self
                .raw_word(REASON_FOR_RESTING)
                .and_then(|raw| enums::rest_reason((raw & 0xFF) as u8))
                .map(str::to_string),
            mppt_mode: self.raw_word(MPPT_MODE).and_then(MpptMode::from_raw),
        }
    }

    /// IPv4 settings by field name, skipping unknown values
    pub fn network_addresses(&self) -> Vec<(&'static str, Ipv4Addr)> {
        IP_ADDRESS_FIELDS
            .iter()
            .filter_map(|name| self.raw(name).map(|raw| (*name, ipv4_from_raw(raw))))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_id_splits_revision_and_model() {
        assert_eq!(split_unit_id(0x03FA), (Some("Classic 250"), 3));
        assert_eq!(split_unit_id(0x0100).0, None);
    }

    #[test]
    fn mac_is_built_from_most_significant_word() {
        assert_eq!(format_mac(0x3456, 0x0F12, 0x601D), "60:1d:0f:12:34:56");
    }

    #[test]
    fn ip_uses_little_endian_bytes() {
        // 192.168.1.50 stored as low word 0xA8C0, high word 0x3201
        assert_eq!(ipv4_from_raw(0x3201_A8C0), Ipv4Addr::new(192, 168, 1, 50));
    }

    #[test]
    fn firmware_date_and_unit_name() {
        assert_eq!(firmware_date(2023, 0x0A0F), Some("2023-10-15".to_string()));
        assert_eq!(firmware_date(2023, 0x0D01), None);
        assert_eq!(unit_name(&[0x4C43, 0x5341, 0x4953, 0x0043]), "CLASSIC");
    }
}
