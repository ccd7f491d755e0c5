// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Error types shared by the polling coordinator and the command executor
//!
//! Every runtime failure of the device link is folded into [`LinkError`].
//! Only [`LinkError::DecodeInconsistent`] denotes a defect in the register
//! catalogue rather than a device or network condition.

use thiserror::Error;

use crate::transport::TransportError;

/// Convenience alias used across the device-facing modules
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Reason a write was refused before or after reaching the device
#[derive(Debug, Clone, PartialEq, Error)]
pub enum WriteRejection {
    /// The shared control register has no fresh value to merge bits into
    #[error("current value of '{0}' is stale or unknown")]
    StaleState(String),
    /// The requested value cannot be represented in the register
    #[error("value {value} cannot be encoded for '{field}'")]
    InvalidValue { field: String, value: f64 },
    /// The value is representable but outside the documented setting range
    #[error("value {value} for '{field}' is outside {min}..={max}")]
    OutOfRange {
        field: String,
        value: f64,
        min: f64,
        max: f64,
    },
    /// The text cannot be stored in the field
    #[error("invalid text for '{field}': {reason}")]
    InvalidText { field: String, reason: String },
    /// The field cannot be written at all
    #[error("'{0}' is read-only")]
    ReadOnly(String),
    /// The device answered the write with an error
    #[error("device refused the write: {0}")]
    Device(String),
}

/// Error taxonomy of the device link
#[derive(Debug, Error)]
pub enum LinkError {
    /// The connection to the device could not be opened
    #[error("device unreachable: {0}")]
    TransportUnreachable(String),

    /// A register read errored or timed out
    #[error("register read failed: {0}")]
    ReadFailed(String),

    /// A write was refused
    #[error("write rejected: {0}")]
    WriteRejected(#[from] WriteRejection),

    /// Word count or address mismatch between the catalogue and a response
    #[error("decode inconsistency: {0}")]
    DecodeInconsistent(String),

    /// The connection lock could not be acquired in time; the caller may retry
    #[error("device busy: connection lock not acquired within {0} ms")]
    Busy(u64),

    /// Anything that does not fit the categories above
    #[error("unexpected error: {0}")]
    Unknown(String),
}

impl LinkError {
    /// Whether retrying the same operation later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LinkError::Busy(_) | LinkError::TransportUnreachable(_) | LinkError::ReadFailed(_)
        )
    }

    /// Map a transport failure that happened while reading
    pub fn from_read(err: TransportError) -> Self {
        match err {
            TransportError::Connect(msg) => LinkError::TransportUnreachable(msg),
            other => LinkError::ReadFailed(other.to_string()),
        }
    }

    /// Map a transport failure that happened while writing
    pub fn from_write(err: TransportError) -> Self {
        match err {
            TransportError::Connect(msg) => LinkError::TransportUnreachable(msg),
            TransportError::Exception(code) => {
                LinkError::WriteRejected(WriteRejection::Device(code))
            }
            other => LinkError::WriteRejected(WriteRejection::Device(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn busy_is_retryable_but_rejections_are_not() {
        assert!(LinkError::Busy(3000).is_retryable());
        assert!(!LinkError::WriteRejected(WriteRejection::ReadOnly("WATTS".into())).is_retryable());
        assert!(!LinkError::DecodeInconsistent("span".into()).is_retryable());
    }

    #[test]
    fn transport_errors_map_by_direction() {
        let read = LinkError::from_read(TransportError::Timeout(3000));
        assert!(matches!(read, LinkError::ReadFailed(_)));

        let unreachable = LinkError::from_read(TransportError::Connect("refused".into()));
        assert!(matches!(unreachable, LinkError::TransportUnreachable(_)));

        let write = LinkError::from_write(TransportError::Exception("IllegalDataAddress".into()));
        assert!(matches!(
            write,
            LinkError::WriteRejected(WriteRejection::Device(_))
        ));
    }
}
