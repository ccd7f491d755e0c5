// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Register map of the Midnite Solar Classic charge controller
//!
//! This module is the static catalogue of every field the application reads
//! or writes. Each field is described once by a [`RegisterDescriptor`]: its
//! documented register number, its width in 16-bit words, the scale turning
//! the raw integer into a physical value, its signedness and the semantic
//! [`Group`] it is polled with.
//!
//! ## Addressing
//!
//! Register numbers are the 1-based numbers of the device documentation
//! (e.g. 4115 for the average battery voltage). The Modbus TCP transport
//! converts them to 0-based protocol addresses.
//!
//! ## Word order
//!
//! 32-bit values occupy `address` and `address + 1`. The low word is stored at
//! `address` and the high word at `address + 1` (see [`codec::WORD_ORDER`]).
//!
//! ## Usage
//!
//! ```
//! use rust_midnite::registers::{Group, RegisterMap};
//!
//! let map = RegisterMap::classic().unwrap();
//! let vbatt = map.describe("DISP_AVG_VBATT").unwrap();
//! assert_eq!(vbatt.address, 4115);
//! assert_eq!(vbatt.group, Group::Status);
//! ```

pub mod catalog;
pub mod codec;
pub mod enums;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use codec::{decode, encode, Conversion, DecodedWord, WordOrder, WORD_ORDER};
pub use enums::{ControlFlag, ForceChargeMode, MpptMode};

/// Largest number of registers a single Modbus read may return
pub const MAX_READ_REGISTERS: u16 = 125;

/// Semantic group a field is polled with
///
/// Each group is refreshed with one contiguous read and replaced atomically
/// in the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Group {
    Status,
    Settings,
    Temperatures,
    Energy,
    Time,
    Network,
    DeviceInfo,
    Diagnostics,
}

impl Group {
    /// All groups in polling order
    pub const ALL: [Group; 8] = [
        Group::DeviceInfo,
        Group::Status,
        Group::Settings,
        Group::Temperatures,
        Group::Energy,
        Group::Time,
        Group::Network,
        Group::Diagnostics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Group::Status => "status",
            Group::Settings => "settings",
            Group::Temperatures => "temperatures",
            Group::Energy => "energy",
            Group::Time => "time",
            Group::Network => "network",
            Group::DeviceInfo => "device_info",
            Group::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Group {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Group::ALL
            .iter()
            .copied()
            .find(|group| group.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown register group '{}'", s))
    }
}

/// Number of consecutive 16-bit words a field occupies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Width {
    One,
    Two,
}

impl Width {
    pub const fn count(&self) -> u16 {
        match self {
            Width::One => 1,
            Width::Two => 2,
        }
    }
}

/// Rational multiplier from raw register integer to physical unit
///
/// `physical = raw * numerator / denominator`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scale {
    pub numerator: u32,
    pub denominator: u32,
}

impl Scale {
    pub const ONE: Scale = Scale::new(1, 1);
    /// 0.1 unit resolution (voltages, currents, temperatures, kWh)
    pub const TENTH: Scale = Scale::new(1, 10);

    pub const fn new(numerator: u32, denominator: u32) -> Self {
        Self {
            numerator,
            denominator,
        }
    }

    /// Raw integer to physical value
    pub fn apply(&self, raw: i64) -> f64 {
        raw as f64 * self.numerator as f64 / self.denominator as f64
    }

    /// Physical value to the nearest raw integer
    pub fn invert(&self, physical: f64) -> f64 {
        (physical * self.denominator as f64 / self.numerator as f64).round()
    }
}

/// How a field may be written
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    ReadOnly,
    ReadWrite,
    /// Independent command bits share the register; see [`ControlFlag`]
    SharedBits,
    /// Two ASCII characters per word, written as a whole string
    Text,
}

/// Inclusive physical range accepted for a writable setting
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    pub min: f64,
    pub max: f64,
}

/// Static description of one logical field
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RegisterDescriptor {
    pub name: &'static str,
    /// Documented 1-based register number of the first word
    pub address: u16,
    pub width: Width,
    pub scale: Scale,
    pub signed: bool,
    pub group: Group,
    pub access: Access,
    pub limits: Option<Limits>,
    /// Raw values accepted for enumerated settings
    pub choices: Option<&'static [u32]>,
    pub unit: &'static str,
}

impl RegisterDescriptor {
    /// Unscaled, unsigned, read-only single word
    pub const fn single(name: &'static str, address: u16, group: Group) -> Self {
        Self {
            name,
            address,
            width: Width::One,
            scale: Scale::ONE,
            signed: false,
            group,
            access: Access::ReadOnly,
            limits: None,
            choices: None,
            unit: "",
        }
    }

    /// Unscaled, unsigned, read-only 32-bit value
    pub const fn double(name: &'static str, address: u16, group: Group) -> Self {
        let mut desc = Self::single(name, address, group);
        desc.width = Width::Two;
        desc
    }

    pub const fn scaled(mut self, scale: Scale) -> Self {
        self.scale = scale;
        self
    }

    pub const fn signed(mut self) -> Self {
        self.signed = true;
        self
    }

    pub const fn unit(mut self, unit: &'static str) -> Self {
        self.unit = unit;
        self
    }

    pub const fn writable(mut self, min: f64, max: f64) -> Self {
        self.access = Access::ReadWrite;
        self.limits = Some(Limits { min, max });
        self
    }

    pub const fn one_of(mut self, choices: &'static [u32]) -> Self {
        self.access = Access::ReadWrite;
        self.choices = Some(choices);
        self
    }

    pub const fn shared_bits(mut self) -> Self {
        self.access = Access::SharedBits;
        self
    }

    pub const fn text(mut self) -> Self {
        self.access = Access::Text;
        self
    }

    /// Last register number occupied by this field
    pub fn last_address(&self) -> u16 {
        self.address + self.width.count() - 1
    }
}

/// Contiguous register window covering every field of a group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupSpan {
    pub start: u16,
    pub count: u16,
}

/// Catalogue defects detected when building a [`RegisterMap`]
#[derive(Debug, Error, PartialEq)]
pub enum RegisterMapError {
    #[error("unknown register field '{0}'")]
    UnknownField(String),
    #[error("register field '{0}' is declared twice")]
    DuplicateField(String),
    #[error("register {address} is claimed by both '{first}' and '{second}'")]
    Overlap {
        address: u16,
        first: String,
        second: String,
    },
    #[error("group '{group}' spans {count} registers, more than one read allows")]
    SpanTooLarge { group: Group, count: u16 },
    #[error("register field '{0}' has a zero scale")]
    InvalidScale(String),
}

/// Validated lookup over a set of descriptors
#[derive(Debug, Clone)]
pub struct RegisterMap {
    descriptors: Vec<RegisterDescriptor>,
    by_name: HashMap<&'static str, usize>,
    spans: BTreeMap<Group, GroupSpan>,
}

impl RegisterMap {
    /// Register map of the Classic 150/200/250 family
    pub fn classic() -> Result<Self, RegisterMapError> {
        Self::new(catalog::CLASSIC_REGISTERS)
    }

    /// Build and validate a map from descriptors
    pub fn new(descriptors: &[RegisterDescriptor]) -> Result<Self, RegisterMapError> {
        let mut sorted = descriptors.to_vec();
        sorted.sort_by_key(|d| d.address);

        let mut by_name = HashMap::with_capacity(sorted.len());
        for (index, desc) in sorted.iter().enumerate() {
            if desc.scale.numerator == 0 || desc.scale.denominator == 0 {
                return Err(RegisterMapError::InvalidScale(desc.name.to_string()));
            }
            if by_name.insert(desc.name, index).is_some() {
                return Err(RegisterMapError::DuplicateField(desc.name.to_string()));
            }
        }

        for pair in sorted.windows(2) {
            if pair[1].address <= pair[0].last_address() {
                return Err(RegisterMapError::Overlap {
                    address: pair[1].address,
                    first: pair[0].name.to_string(),
                    second: pair[1].name.to_string(),
                });
            }
        }

        let mut spans: BTreeMap<Group, GroupSpan> = BTreeMap::new();
        for desc in &sorted {
            let span = spans.entry(desc.group).or_insert(GroupSpan {
                start: desc.address,
                count: 0,
            });
            // Descriptors are sorted, so the first one seen is the lowest
            span.count = desc.last_address() - span.start + 1;
        }
        for (group, span) in &spans {
            if span.count > MAX_READ_REGISTERS {
                return Err(RegisterMapError::SpanTooLarge {
                    group: *group,
                    count: span.count,
                });
            }
        }

        Ok(Self {
            descriptors: sorted,
            by_name,
            spans,
        })
    }

    /// Descriptor of a logical field
    pub fn describe(&self, name: &str) -> Result<&RegisterDescriptor, RegisterMapError> {
        self.by_name
            .get(name)
            .map(|&index| &self.descriptors[index])
            .ok_or_else(|| RegisterMapError::UnknownField(name.to_string()))
    }

    /// Descriptors of a group, ordered by address
    pub fn descriptors_in_group(&self, group: Group) -> Vec<&RegisterDescriptor> {
        self.descriptors
            .iter()
            .filter(|d| d.group == group)
            .collect()
    }

    /// Read window of a group, `None` when the group has no field
    pub fn group_span(&self, group: Group) -> Option<GroupSpan> {
        self.spans.get(&group).copied()
    }

    /// Groups that have at least one field, in polling order
    pub fn groups(&self) -> Vec<Group> {
        Group::ALL
            .iter()
            .copied()
            .filter(|g| self.spans.contains_key(g))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisterDescriptor> {
        self.descriptors.iter()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }
}
