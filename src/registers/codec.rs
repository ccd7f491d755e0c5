// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Conversion between raw register words and physical values

use serde::{Deserialize, Serialize};

use super::{RegisterDescriptor, Width};
use crate::error::{LinkError, LinkResult, WriteRejection};

/// Position of the two halves of a 32-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordOrder {
    /// Low word at `address`, high word at `address + 1`
    LowFirst,
    HighFirst,
}

/// Word order used by every two-word field of the Classic
pub const WORD_ORDER: WordOrder = WordOrder::LowFirst;

/// Raw bit pattern together with its physical value
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecodedWord {
    pub raw: u32,
    pub value: f64,
}

/// Join the words of a field into its unsigned bit pattern
pub fn combine(words: &[u16], order: WordOrder) -> Option<u32> {
    match (words, order) {
        ([single], _) => Some(*single as u32),
        ([first, second], WordOrder::LowFirst) => Some(((*second as u32) << 16) | *first as u32),
        ([first, second], WordOrder::HighFirst) => Some(((*first as u32) << 16) | *second as u32),
        _ => None,
    }
}

/// Split a bit pattern into the words of a field of the given width
pub fn split(raw: u32, width: Width, order: WordOrder) -> Vec<u16> {
    let low = (raw & 0xFFFF) as u16;
    let high = (raw >> 16) as u16;
    match (width, order) {
        (Width::One, _) => vec![low],
        (Width::Two, WordOrder::LowFirst) => vec![low, high],
        (Width::Two, WordOrder::HighFirst) => vec![high, low],
    }
}

/// Decode the words of one field
///
/// Signed fields are reinterpreted as two's complement of their width before
/// the scale is applied.
pub fn decode(desc: &RegisterDescriptor, words: &[u16]) -> LinkResult<DecodedWord> {
    if words.len() != desc.width.count() as usize {
        return Err(LinkError::DecodeInconsistent(format!(
            "'{}' expects {} word(s), got {}",
            desc.name,
            desc.width.count(),
            words.len()
        )));
    }
    let raw = combine(words, WORD_ORDER).ok_or_else(|| {
        LinkError::DecodeInconsistent(format!("'{}' has an unsupported width", desc.name))
    })?;

    let integer = match (desc.signed, desc.width) {
        (true, Width::One) => raw as u16 as i16 as i64,
        (true, Width::Two) => raw as i32 as i64,
        (false, _) => raw as i64,
    };

    Ok(DecodedWord {
        raw,
        value: desc.scale.apply(integer),
    })
}

/// Encode a physical value into the words of one field
///
/// Rounds to the nearest raw integer and rejects values that do not fit the
/// register width and signedness. Setting limits are not checked here.
pub fn encode(desc: &RegisterDescriptor, value: f64) -> Result<Vec<u16>, WriteRejection> {
    let invalid = || WriteRejection::InvalidValue {
        field: desc.name.to_string(),
        value,
    };
    if !value.is_finite() {
        return Err(invalid());
    }

    let scaled = desc.scale.invert(value);
    let (min, max) = match (desc.signed, desc.width) {
        (false, Width::One) => (0.0, u16::MAX as f64),
        (true, Width::One) => (i16::MIN as f64, i16::MAX as f64),
        (false, Width::Two) => (0.0, u32::MAX as f64),
        (true, Width::Two) => (i32::MIN as f64, i32::MAX as f64),
    };
    if scaled < min || scaled > max {
        return Err(invalid());
    }

    let raw = match (desc.signed, desc.width) {
        (true, Width::One) => scaled as i16 as u16 as u32,
        (true, Width::Two) => scaled as i32 as u32,
        (false, _) => scaled as u32,
    };
    Ok(split(raw, desc.width, WORD_ORDER))
}

/// Unit conversion between the stored physical unit and the unit a user
/// works in
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Conversion {
    #[default]
    Identity,
    /// Stored in seconds, shown in minutes
    SecondsToMinutes,
    /// Stored in seconds, shown in hours
    SecondsToHours,
    /// Stored in milliseconds, shown in seconds
    MillisecondsToSeconds,
}

impl Conversion {
    fn factor(&self) -> f64 {
        match self {
            Conversion::Identity => 1.0,
            Conversion::SecondsToMinutes => 60.0,
            Conversion::SecondsToHours => 3600.0,
            Conversion::MillisecondsToSeconds => 1000.0,
        }
    }

    /// Stored unit to user unit
    pub fn to_user(&self, stored: f64) -> f64 {
        stored / self.factor()
    }

    /// User unit to stored unit, rounded to a whole stored unit
    pub fn from_user(&self, user: f64) -> f64 {
        match self {
            Conversion::Identity => user,
            _ => (user * self.factor()).round(),
        }
    }
}
