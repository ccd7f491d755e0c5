// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register catalogue of the Classic 150/200/250 family
//!
//! Addresses are the documented 1-based register numbers. Two-word fields
//! hold their low word at the listed address.

use super::enums::MPPT_MODE_VALUES;
use super::{Group, RegisterDescriptor as R, Scale};

pub const UNIT_ID: &str = "UNIT_ID";
pub const UNIT_SW_DATE_RO: &str = "UNIT_SW_DATE_RO";
pub const UNIT_SW_DATE_MONTH_DAY: &str = "UNIT_SW_DATE_MONTH_DAY";
pub const MAC_ADDRESS_PART_1: &str = "MAC_ADDRESS_PART_1";
pub const MAC_ADDRESS_PART_2: &str = "MAC_ADDRESS_PART_2";
pub const MAC_ADDRESS_PART_3: &str = "MAC_ADDRESS_PART_3";
pub const DEVICE_ID: &str = "DEVICE_ID";
pub const COMBO_CHARGE_STAGE: &str = "COMBO_CHARGE_STAGE";
pub const FORCE_FLAG_BITS: &str = "FORCE_FLAG_BITS";
pub const MPPT_MODE: &str = "MPPT_MODE";
pub const REASON_FOR_RESTING: &str = "REASON_FOR_RESTING";
pub const UNIT_NAME_PARTS: [&str; 4] = ["UNIT_NAME_0", "UNIT_NAME_1", "UNIT_NAME_2", "UNIT_NAME_3"];
pub const IP_ADDRESS_FIELDS: [&str; 5] = [
    "IP_ADDRESS",
    "GATEWAY_ADDRESS",
    "SUBNET_MASK",
    "DNS_1_ADDRESS",
    "DNS_2_ADDRESS",
];

/// Register probed to validate a connection (unit id and PCB revision)
pub const PROBE_REGISTER: u16 = 4101;

pub static CLASSIC_REGISTERS: &[R] = &[
    // device_info
    R::single(UNIT_ID, 4101, Group::DeviceInfo),
    R::single(UNIT_SW_DATE_RO, 4102, Group::DeviceInfo),
    R::single(UNIT_SW_DATE_MONTH_DAY, 4103, Group::DeviceInfo),
    R::double("INFO_FLAGS_BITS3", 4104, Group::DeviceInfo),
    R::single(MAC_ADDRESS_PART_1, 4106, Group::DeviceInfo),
    R::single(MAC_ADDRESS_PART_2, 4107, Group::DeviceInfo),
    R::single(MAC_ADDRESS_PART_3, 4108, Group::DeviceInfo),
    R::double(DEVICE_ID, 4111, Group::DeviceInfo),
    // status
    R::single("STATUSROLL", 4113, Group::Status),
    R::single("RESTART_TIME_MS", 4114, Group::Status).unit("ms"),
    R::single("DISP_AVG_VBATT", 4115, Group::Status)
        .scaled(Scale::TENTH)
        .unit("V"),
    R::single("DISP_AVG_VPV", 4116, Group::Status)
        .scaled(Scale::TENTH)
        .unit("V"),
    R::single("IBATT_DISPLAY_S", 4117, Group::Status)
        .scaled(Scale::TENTH)
        .signed()
        .unit("A"),
    R::single("KW_HOURS", 4118, Group::Status)
        .scaled(Scale::TENTH)
        .unit("kWh"),
    R::single("WATTS", 4119, Group::Status).unit("W"),
    R::single(COMBO_CHARGE_STAGE, 4120, Group::Status),
    R::single("PV_INPUT_CURRENT", 4121, Group::Status)
        .scaled(Scale::TENTH)
        .signed()
        .unit("A"),
    R::single("VOC_LAST_MEASURED", 4122, Group::Status)
        .scaled(Scale::TENTH)
        .unit("V"),
    R::single("HIGHEST_VINPUT_LOG", 4123, Group::Status)
        .scaled(Scale::TENTH)
        .unit("V"),
    R::single("REASON_FOR_RESET", 4142, Group::Status),
    // energy
    R::single("AMP_HOURS_DAILY", 4125, Group::Energy).unit("Ah"),
    R::double("LIFETIME_KW_HOURS", 4126, Group::Energy)
        .scaled(Scale::TENTH)
        .unit("kWh"),
    R::double("LIFETIME_AMP_HOURS", 4128, Group::Energy)
        .scaled(Scale::TENTH)
        .unit("Ah"),
    // temperatures
    R::single("BATT_TEMPERATURE", 4132, Group::Temperatures)
        .scaled(Scale::TENTH)
        .signed()
        .unit("°C"),
    R::single("FET_TEMPERATURE", 4133, Group::Temperatures)
        .scaled(Scale::TENTH)
        .signed()
        .unit("°C"),
    R::single("PCB_TEMPERATURE", 4134, Group::Temperatures)
        .scaled(Scale::TENTH)
        .signed()
        .unit("°C"),
    // time
    R::single("NITE_MINUTES_NO_PWR", 4135, Group::Time).unit("min"),
    R::single("FLOAT_TIME_TODAY_SEC", 4138, Group::Time).unit("s"),
    R::single("ABSORB_TIME", 4139, Group::Time).unit("s"),
    R::single("EQUALIZE_TIME", 4143, Group::Time).unit("s"),
    // settings
    R::single("MINUTE_LOG_INTERVAL_SEC", 4136, Group::Settings).unit("s"),
    R::single("MODBUS_PORT_REGISTER", 4137, Group::Settings),
    R::single("BATTERY_OUTPUT_CURRENT_LIMIT", 4148, Group::Settings)
        .scaled(Scale::TENTH)
        .unit("A")
        .writable(1.0, 100.0),
    R::single("ABSORB_SETPOINT_VOLTAGE", 4149, Group::Settings)
        .scaled(Scale::TENTH)
        .unit("V")
        .writable(10.0, 65.0),
    R::single("FLOAT_VOLTAGE_SETPOINT", 4150, Group::Settings)
        .scaled(Scale::TENTH)
        .unit("V")
        .writable(10.0, 65.0),
    R::single("EQUALIZE_VOLTAGE_SETPOINT", 4151, Group::Settings)
        .scaled(Scale::TENTH)
        .unit("V")
        .writable(10.0, 65.0),
    R::single("ABSORB_TIME_EEPROM", 4154, Group::Settings)
        .unit("s")
        .writable(0.0, 7200.0),
    R::double(FORCE_FLAG_BITS, 4160, Group::Settings).shared_bits(),
    R::single("EQUALIZE_TIME_EEPROM", 4162, Group::Settings)
        .unit("s")
        .writable(0.0, 7200.0),
    R::single("EQUALIZE_INTERVAL_DAYS_EEPROM", 4163, Group::Settings)
        .unit("d")
        .writable(0.0, 365.0),
    R::single(MPPT_MODE, 4164, Group::Settings).one_of(MPPT_MODE_VALUES),
    R::single("AUX_1_AND_2_FUNCTION", 4165, Group::Settings),
    R::single("VARIMAX", 4180, Group::Settings),
    // network
    R::single("IP_SETTINGS_FLAGS", 20481, Group::Network),
    R::double("IP_ADDRESS", 20482, Group::Network),
    R::double("GATEWAY_ADDRESS", 20484, Group::Network),
    R::double("SUBNET_MASK", 20486, Group::Network),
    R::double("DNS_1_ADDRESS", 20488, Group::Network),
    R::double("DNS_2_ADDRESS", 20490, Group::Network),
    // diagnostics
    R::single("UNIT_NAME_0", 4210, Group::Diagnostics).text(),
    R::single("UNIT_NAME_1", 4211, Group::Diagnostics).text(),
    R::single("UNIT_NAME_2", 4212, Group::Diagnostics).text(),
    R::single("UNIT_NAME_3", 4213, Group::Diagnostics).text(),
    R::single(REASON_FOR_RESTING, 4275, Group::Diagnostics),
    R::single("CLASSIC_MODBUS_ADDR_EEPROM", 4326, Group::Diagnostics).writable(1.0, 255.0),
];
