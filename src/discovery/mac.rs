// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! MAC address canonicalisation

use super::FlowError;

/// Canonical lower-case colon-separated form of a MAC address
///
/// Accepts colon, dash or dot separated forms and bare hex strings.
///
/// ```
/// use rust_midnite::discovery::canonical_mac;
///
/// assert_eq!(canonical_mac("60-1D-0F-12-34-56").unwrap(), "60:1d:0f:12:34:56");
/// assert_eq!(canonical_mac("601d.0f12.3456").unwrap(), "60:1d:0f:12:34:56");
/// ```
pub fn canonical_mac(input: &str) -> Result<String, FlowError> {
    let digits: String = input
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.'))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(FlowError::InvalidMac(input.to_string()));
    }
    let lower = digits.to_ascii_lowercase();
    Ok(lower
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":"))
}

/// Whether `identity` is already a canonical MAC
pub fn is_canonical_mac(identity: &str) -> bool {
    canonical_mac(identity).map_or(false, |mac| mac == identity)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_notation_gives_the_same_identity() {
        for input in [
            "60:1D:0F:12:34:56",
            "60:1d:0f:12:34:56",
            "601D0F123456",
            " 60-1d-0f-12-34-56 ",
        ] {
            assert_eq!(canonical_mac(input).unwrap(), "60:1d:0f:12:34:56");
        }
    }

    #[test]
    fn malformed_addresses_are_rejected() {
        assert!(canonical_mac("60:1d:0f:12:34").is_err());
        assert!(canonical_mac("zz:1d:0f:12:34:56").is_err());
        assert!(!is_canonical_mac("60:1D:0F:12:34:56"));
        assert!(is_canonical_mac("60:1d:0f:12:34:56"));
    }
}
