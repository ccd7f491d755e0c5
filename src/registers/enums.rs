// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Enumerated register values
//!
//! Lookup tables for charge stages, internal states, rest reasons and device
//! models, plus the writable enumerations used by the command executor.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Charge stage name, from the high byte of `COMBO_CHARGE_STAGE`
pub fn charge_stage(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("Resting"),
        3 => Some("Absorb"),
        4 => Some("BulkMPPT"),
        5 => Some("Float"),
        6 => Some("FloatMppt"),
        7 => Some("Equalize"),
        10 => Some("HyperVoc"),
        18 => Some("EqMppt"),
        _ => None,
    }
}

/// Internal controller state, from the low byte of `COMBO_CHARGE_STAGE`
pub fn internal_state(code: u8) -> Option<&'static str> {
    match code {
        0 => Some("Resting"),
        1 => Some("Waking/Starting (state 1)"),
        2 => Some("Waking/Starting (state 2)"),
        3 => Some("MPPT / Regulating Voltage (state 3)"),
        4 => Some("MPPT / Regulating Voltage (state 4)"),
        6 => Some("MPPT / Regulating Voltage (state 6)"),
        _ => None,
    }
}

/// Device model from the low byte of `UNIT_ID`
pub fn device_model(code: u8) -> Option<&'static str> {
    match code {
        150 => Some("Classic 150"),
        200 => Some("Classic 200"),
        250 => Some("Classic 250"),
        251 => Some("Classic 250 KS (120V battery capability)"),
        _ => None,
    }
}

/// Why the controller is resting, from the low byte of `REASON_FOR_RESTING`
pub fn rest_reason(code: u8) -> Option<&'static str> {
    let text = match code {
        1 => "Anti-Click. Not enough power available (Wake Up)",
        2 => "Insane Ibatt Measurement (Wake Up)",
        3 => "Negative Current (load on PV input?) (Wake Up)",
        4 => "PV Input Voltage lower than Battery V (Vreg state)",
        5 => "Too low of power out and Vbatt below set point for > 90 seconds",
        6 => "FET temperature too high (Cover is on maximum temperature)",
        7 => "Ground Fault Detected",
        8 => "Arc Fault Detected",
        9 => "Too much negative current while operating (backfeed from battery out of PV input)",
        10 => "Battery is less than 8.0 Volts",
        11 => "PV input is available but V is rising too slowly. Low Light or bad connection (Solar mode)",
        12 => "Voc has gone down from last Voc or low light. Re-check (Solar mode)",
        13 => "Voc has gone up from last Voc enough to be suspicious. Re-check (Solar mode)",
        14 => "PV input is available but V is rising too slowly. Low Light or bad connection (Solar mode)",
        15 => "Voc has gone down from last Voc or low light. Re-check (Solar mode)",
        16 => "Mppt MODE is OFF (Usually because user turned it off)",
        17 => "PV input is higher than operation range (too high for 150V Classic)",
        18 => "PV input is higher than operation range (too high for 200V Classic)",
        19 => "PV input is higher than operation range (too high for 250V or 250KS)",
        22 => "Average Battery Voltage is too high above set point",
        25 => "Battery Voltage too high of Overshoot (small battery or bad cable?)",
        26 => "Mode changed while running OR Vabsorb raised more than 10.0 Volts at once OR Nominal Vbatt changed by modbus command AND MpptMode was ON when changed",
        27 => "bridge center == 1023 (R132 might have been stuffed) This turns MPPT Mode to OFF",
        28 => "NOT Resting but RELAY is not engaged for some reason",
        29 => "ON/OFF stays off because WIND GRAPH is illegal (current step is set for > 100 amps)",
        30 => "PkAmpsOverLimit… Software detected too high of PEAK output current",
        31 => "AD1CH.IbattMinus > 900 Peak negative battery current > 90.0 amps (Classic 250)",
        32 => "Aux 2 input commanded Classic off. for HI or LO (Aux2Function == 15 or 16)",
        33 => "OCP in a mode other than Solar or PV-Uset",
        34 => "AD1CH.IbattMinus > 900 Peak negative battery current > 90.0 amps (Classic 150, 200)",
        35 => "Battery voltage is less than Low Battery Disconnect (LBD) Typically Vbatt is less than 8.5 volts",
        _ => return None,
    };
    Some(text)
}

/// Raw values accepted by the `MPPT_MODE` register
pub static MPPT_MODE_VALUES: &[u32] = &[0x1, 0x3, 0x5, 0x9, 0xB, 0xD];

/// Maximum power point tracking strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MpptMode {
    PvUset,
    Dynamic,
    WindTrack,
    LegacyPandO,
    Solar,
    Hydro,
}

impl MpptMode {
    pub const ALL: [MpptMode; 6] = [
        MpptMode::PvUset,
        MpptMode::Dynamic,
        MpptMode::WindTrack,
        MpptMode::LegacyPandO,
        MpptMode::Solar,
        MpptMode::Hydro,
    ];

    pub fn raw(&self) -> u16 {
        match self {
            MpptMode::PvUset => 0x1,
            MpptMode::Dynamic => 0x3,
            MpptMode::WindTrack => 0x5,
            MpptMode::LegacyPandO => 0x9,
            MpptMode::Solar => 0xB,
            MpptMode::Hydro => 0xD,
        }
    }

    /// Mode from a raw register value; 0x7 and 0xF are reserved
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.raw() == raw)
    }

    pub fn label(&self) -> &'static str {
        match self {
            MpptMode::PvUset => "PV_Uset",
            MpptMode::Dynamic => "DYNAMIC",
            MpptMode::WindTrack => "WIND_TRACK",
            MpptMode::LegacyPandO => "Legacy P&O",
            MpptMode::Solar => "SOLAR",
            MpptMode::Hydro => "HYDRO",
        }
    }
}

impl fmt::Display for MpptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for MpptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        Self::ALL
            .iter()
            .copied()
            .find(|m| {
                m.label().to_ascii_lowercase().replace(' ', "_") == wanted
                    || serde_json::to_value(m)
                        .ok()
                        .and_then(|v| v.as_str().map(|s| s == wanted))
                        .unwrap_or(false)
            })
            .ok_or_else(|| format!("unknown MPPT mode '{}'", s))
    }
}

/// Command bit of the `FORCE_FLAG_BITS` register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlag {
    EepromUpdate,
    EepromInitRead,
    ResetInfoFlags,
    Float,
    Bulk,
    Equalize,
    Nite,
    ResetAeqCounts,
    Sweep,
    ResetFlags,
    ResetFaults,
}

impl ControlFlag {
    pub const ALL: [ControlFlag; 11] = [
        ControlFlag::EepromUpdate,
        ControlFlag::EepromInitRead,
        ControlFlag::ResetInfoFlags,
        ControlFlag::Float,
        ControlFlag::Bulk,
        ControlFlag::Equalize,
        ControlFlag::Nite,
        ControlFlag::ResetAeqCounts,
        ControlFlag::Sweep,
        ControlFlag::ResetFlags,
        ControlFlag::ResetFaults,
    ];

    pub fn bit(&self) -> u32 {
        match self {
            ControlFlag::EepromUpdate => 2,
            ControlFlag::EepromInitRead => 3,
            ControlFlag::ResetInfoFlags => 4,
            ControlFlag::Float => 5,
            ControlFlag::Bulk => 6,
            ControlFlag::Equalize => 7,
            ControlFlag::Nite => 8,
            ControlFlag::ResetAeqCounts => 13,
            ControlFlag::Sweep => 16,
            ControlFlag::ResetFlags => 20,
            ControlFlag::ResetFaults => 29,
        }
    }

    pub fn mask(&self) -> u32 {
        1 << self.bit()
    }
}

impl FromStr for ControlFlag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown control flag '{}'", s))
    }
}

/// Charge stage the operator can force
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ForceChargeMode {
    None,
    Float,
    Bulk,
    Equalize,
}

impl ForceChargeMode {
    /// Control bit that triggers the mode; `None` triggers nothing
    pub fn flag(&self) -> Option<ControlFlag> {
        match self {
            ForceChargeMode::None => None,
            ForceChargeMode::Float => Some(ControlFlag::Float),
            ForceChargeMode::Bulk => Some(ControlFlag::Bulk),
            ForceChargeMode::Equalize => Some(ControlFlag::Equalize),
        }
    }
}

impl FromStr for ForceChargeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.trim().to_ascii_lowercase()))
            .map_err(|_| format!("unknown charge mode '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn charge_stage_lookup() {
        assert_eq!(charge_stage(4), Some("BulkMPPT"));
        assert_eq!(charge_stage(18), Some("EqMppt"));
        assert_eq!(charge_stage(99), None);
    }

    #[test]
    fn internal_state_lookup() {
        let expected = [
            (0, Some("Resting")),
            (1, Some("Waking/Starting (state 1)")),
            (2, Some("Waking/Starting (state 2)")),
            (3, Some("MPPT / Regulating Voltage (state 3)")),
            (4, Some("MPPT / Regulating Voltage (state 4)")),
            (5, None),
            (6, Some("MPPT / Regulating Voltage (state 6)")),
            (7, None),
        ];
        for (code, label) in expected {
            assert_eq!(internal_state(code), label, "state {}", code);
        }
    }

    #[test]
    fn device_model_lookup() {
        assert_eq!(device_model(150), Some("Classic 150"));
        assert_eq!(device_model(200), Some("Classic 200"));
        assert_eq!(device_model(250), Some("Classic 250"));
        assert_eq!(
            device_model(251),
            Some("Classic 250 KS (120V battery capability)")
        );
        assert_eq!(device_model(100), None);
    }

    #[test]
    fn mppt_modes_match_allowed_values() {
        for mode in MpptMode::ALL {
            assert!(MPPT_MODE_VALUES.contains(&(mode.raw() as u32)));
            assert_eq!(MpptMode::from_raw(mode.raw()), Some(mode));
        }
        assert_eq!(MpptMode::from_raw(0x7), None);
        assert_eq!("solar".parse::<MpptMode>(), Ok(MpptMode::Solar));
        assert_eq!("PV_Uset".parse::<MpptMode>(), Ok(MpptMode::PvUset));
    }

    #[test]
    fn control_flags_fit_two_words() {
        for flag in ControlFlag::ALL {
            assert!(flag.bit() < 32);
        }
        assert_eq!(ControlFlag::ResetFaults.mask(), 1 << 29);
        assert_eq!("equalize".parse::<ControlFlag>(), Ok(ControlFlag::Equalize));
        assert!("warp".parse::<ControlFlag>().is_err());
    }

    #[test]
    fn force_none_has_no_flag() {
        assert_eq!(ForceChargeMode::None.flag(), None);
        assert_eq!(ForceChargeMode::Bulk.flag(), Some(ControlFlag::Bulk));
    }
}
