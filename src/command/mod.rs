// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Command executor
//!
//! Converts set requests expressed in user units into register writes.
//! Writes share the coordinator's connection lock, so they never interleave
//! with a group read. Waiting for the lock is bounded; a timeout is reported
//! as [`LinkError::Busy`] and can be retried by the caller.
//!
//! Writes are never retried automatically and are not read back. A caller
//! wanting confirmation calls [`Coordinator::refresh`](crate::coordinator::Coordinator::refresh).
//! The one read issued here is the control register, re-read under the lock
//! right before its bits are merged.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, MutexGuard};
use tokio::time::timeout;

use crate::coordinator::{Coordinator, Snapshot};
use crate::error::{LinkError, LinkResult, WriteRejection};
use crate::registers::catalog::{FORCE_FLAG_BITS, MPPT_MODE, UNIT_NAME_PARTS};
use crate::registers::codec::{combine, split};
use crate::registers::{
    encode, Access, ControlFlag, Conversion, ForceChargeMode, MpptMode, RegisterDescriptor,
    RegisterMap, WORD_ORDER,
};
use crate::transport::{RegisterTransport, SharedTransport};

/// Default bound on waiting for the connection lock
pub const DEFAULT_WRITE_LOCK_TIMEOUT: Duration = Duration::from_secs(3);

/// Characters stored in the four unit name registers
pub const UNIT_NAME_LENGTH: usize = 8;

/// Whether `c` may appear in a unit name
fn is_unit_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | ' ')
}

/// Pack a unit name into its registers, space padded, first character in
/// the low byte of each word
pub fn encode_unit_name(name: &str) -> Result<Vec<u16>, WriteRejection> {
    let invalid = |reason: String| WriteRejection::InvalidText {
        field: "UNIT_NAME".to_string(),
        reason,
    };
    if let Some(c) = name.chars().find(|c| !is_unit_name_char(*c)) {
        return Err(invalid(format!("character {:?} is not allowed", c)));
    }
    if name.len() > UNIT_NAME_LENGTH {
        return Err(invalid(format!(
            "{} characters, at most {}",
            name.len(),
            UNIT_NAME_LENGTH
        )));
    }

    let mut bytes = name.as_bytes().to_vec();
    bytes.resize(UNIT_NAME_LENGTH, b' ');
    Ok(bytes
        .chunks(2)
        .map(|pair| pair[0] as u16 | (pair[1] as u16) << 8)
        .collect())
}

/// Request to set one field, in user units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub name: String,
    pub value: f64,
    #[serde(default)]
    pub conversion: Conversion,
}

impl CommandRequest {
    pub fn new(name: impl Into<String>, value: f64, conversion: Conversion) -> Self {
        Self {
            name: name.into(),
            value,
            conversion,
        }
    }
}

/// Acknowledged write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Ack {
    pub name: &'static str,
    pub address: u16,
    pub words: Vec<u16>,
}

/// Issues validated writes against one device
pub struct CommandExecutor {
    map: Arc<RegisterMap>,
    transport: SharedTransport,
    snapshots: watch::Receiver<Arc<Snapshot>>,
    lock_timeout: Duration,
}

impl CommandExecutor {
    /// Executor sharing the connection and snapshot of `coordinator`
    pub fn new(coordinator: &Coordinator, lock_timeout: Duration) -> Self {
        Self {
            map: Arc::clone(coordinator.register_map()),
            transport: coordinator.transport(),
            snapshots: coordinator.subscribe(),
            lock_timeout,
        }
    }

    fn describe(&self, name: &str) -> LinkResult<&RegisterDescriptor> {
        self.map
            .describe(name)
            .map_err(|err| LinkError::Unknown(err.to_string()))
    }

    /// Convert `user_value` and write it to the field `name`
    pub async fn set_value(
        &self,
        name: &str,
        user_value: f64,
        conversion: Conversion,
    ) -> LinkResult<Ack> {
        let desc = *self.describe(name)?;
        match desc.access {
            Access::ReadWrite => {}
            Access::ReadOnly | Access::SharedBits => {
                return Err(WriteRejection::ReadOnly(desc.name.to_string()).into())
            }
            Access::Text => {
                return Err(WriteRejection::InvalidText {
                    field: desc.name.to_string(),
                    reason: "written as a whole unit name".to_string(),
                }
                .into())
            }
        }

        let stored = conversion.from_user(user_value);
        if let Some(limits) = desc.limits {
            if !(limits.min..=limits.max).contains(&stored) {
                return Err(WriteRejection::OutOfRange {
                    field: desc.name.to_string(),
                    value: stored,
                    min: limits.min,
                    max: limits.max,
                }
                .into());
            }
        }

        let words = encode(&desc, stored)?;
        if let Some(choices) = desc.choices {
            let raw = words[0] as u32;
            if !choices.contains(&raw) {
                return Err(WriteRejection::InvalidValue {
                    field: desc.name.to_string(),
                    value: stored,
                }
                .into());
            }
        }

        self.write_words(&desc, words).await
    }

    pub async fn execute(&self, request: &CommandRequest) -> LinkResult<Ack> {
        self.set_value(&request.name, request.value, request.conversion)
            .await
    }

    /// Set one command bit of the shared control register
    ///
    /// The write is rejected when the snapshot holds no fresh value for the
    /// register. The bits merged into are re-read from the device under the
    /// connection lock, so bits set since the last refresh are kept.
    pub async fn set_control_flag(&self, flag: ControlFlag) -> LinkResult<Ack> {
        let desc = *self.describe(FORCE_FLAG_BITS)?;
        let stale = || WriteRejection::StaleState(desc.name.to_string());
        if self.snapshots.borrow().fresh_raw(desc.name).is_none() {
            return Err(stale().into());
        }

        let mut transport = self.acquire().await?;
        let words = match transport
            .read_registers(desc.address, desc.width.count())
            .await
        {
            Ok(words) => words,
            Err(err) => {
                warn!("Cannot read {} before setting {:?}: {}", desc.name, flag, err);
                return Err(stale().into());
            }
        };
        let current = combine(&words, WORD_ORDER).ok_or_else(|| {
            LinkError::DecodeInconsistent(format!(
                "'{}' read back {} word(s)",
                desc.name,
                words.len()
            ))
        })?;
        let next = current | flag.mask();
        debug!(
            "Setting {:?} (bit {}) on {}: {:#010x} -> {:#010x}",
            flag,
            flag.bit(),
            desc.name,
            current,
            next
        );
        Self::write_locked(
            &mut transport,
            desc.name,
            desc.address,
            split(next, desc.width, WORD_ORDER),
        )
        .await
    }

    /// Store the unit name and commit it to EEPROM
    ///
    /// At most eight characters among letters, digits, `_`, `-`, `.` and
    /// space; shorter names are padded with spaces.
    pub async fn set_unit_name(&self, name: &str) -> LinkResult<Vec<Ack>> {
        let words = encode_unit_name(name)?;
        let first = *self.describe(UNIT_NAME_PARTS[0])?;
        info!("Renaming unit to {:?}", name);
        let name_ack = {
            let mut transport = self.acquire().await?;
            Self::write_locked(&mut transport, first.name, first.address, words).await?
        };
        let commit_ack = self.set_control_flag(ControlFlag::EepromUpdate).await?;
        Ok(vec![name_ack, commit_ack])
    }

    /// Select the MPPT mode and commit it to EEPROM
    pub async fn set_mppt_mode(&self, mode: MpptMode) -> LinkResult<Vec<Ack>> {
        info!("Selecting MPPT mode {}", mode);
        let mode_ack = self
            .set_value(MPPT_MODE, mode.raw() as f64, Conversion::Identity)
            .await?;
        let commit_ack = self.set_control_flag(ControlFlag::EepromUpdate).await?;
        Ok(vec![mode_ack, commit_ack])
    }

    /// Force a charge stage; [`ForceChargeMode::None`] writes nothing
    pub async fn force_charge_mode(&self, mode: ForceChargeMode) -> LinkResult<Option<Ack>> {
        match mode.flag() {
            Some(flag) => self.set_control_flag(flag).await.map(Some),
            None => {
                debug!("Force charge mode 'none' requested, nothing to write");
                Ok(None)
            }
        }
    }

    async fn write_words(&self, desc: &RegisterDescriptor, words: Vec<u16>) -> LinkResult<Ack> {
        let mut transport = self.acquire().await?;
        Self::write_locked(&mut transport, desc.name, desc.address, words).await
    }

    /// Lock the connection, waiting at most the lock timeout, and open it
    async fn acquire(&self) -> LinkResult<MutexGuard<'_, Box<dyn RegisterTransport>>> {
        let mut transport = timeout(self.lock_timeout, self.transport.lock())
            .await
            .map_err(|_| LinkError::Busy(self.lock_timeout.as_millis() as u64))?;

        if !transport.is_connected() {
            transport.connect().await.map_err(LinkError::from_write)?;
        }
        Ok(transport)
    }

    async fn write_locked(
        transport: &mut Box<dyn RegisterTransport>,
        name: &'static str,
        address: u16,
        words: Vec<u16>,
    ) -> LinkResult<Ack> {
        let result = if words.len() == 1 {
            transport.write_register(address, words[0]).await
        } else {
            transport.write_registers(address, &words).await
        };
        result.map_err(LinkError::from_write)?;

        info!("Wrote {} at register {}: {:?}", name, address, words);
        Ok(Ack {
            name,
            address,
            words,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{shared, MockTransport};

    fn setup(mock: &MockTransport) -> (Coordinator, CommandExecutor) {
        let map = Arc::new(RegisterMap::classic().unwrap());
        let coordinator = Coordinator::new(map, shared(Box::new(mock.clone())), 3);
        let executor = CommandExecutor::new(&coordinator, Duration::from_millis(200));
        (coordinator, executor)
    }

    #[tokio::test]
    async fn minutes_are_written_as_seconds() {
        let mock = MockTransport::new();
        let (_coordinator, executor) = setup(&mock);

        let ack = executor
            .set_value("ABSORB_TIME_EEPROM", 45.0, Conversion::SecondsToMinutes)
            .await
            .unwrap();
        assert_eq!(ack.words, vec![2700]);
        assert_eq!(mock.register(4154), 2700);
    }

    #[tokio::test]
    async fn scaled_setpoint_is_rounded() {
        let mock = MockTransport::new();
        let (_coordinator, executor) = setup(&mock);
        executor
            .set_value("FLOAT_VOLTAGE_SETPOINT", 54.44, Conversion::Identity)
            .await
            .unwrap();
        assert_eq!(mock.register(4150), 544);
    }

    #[tokio::test]
    async fn limits_and_access_are_enforced() {
        let mock = MockTransport::new();
        let (_coordinator, executor) = setup(&mock);

        let err = executor
            .set_value("ABSORB_SETPOINT_VOLTAGE", 80.0, Conversion::Identity)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::OutOfRange { .. })
        ));

        let err = executor
            .set_value("WATTS", 10.0, Conversion::Identity)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::ReadOnly(_))
        ));

        let err = executor
            .set_value(MPPT_MODE, 7.0, Conversion::Identity)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::InvalidValue { .. })
        ));
        assert!(mock.writes().is_empty());
    }

    #[tokio::test]
    async fn control_flag_needs_fresh_state() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);

        let err = executor
            .set_control_flag(ControlFlag::ResetFaults)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::StaleState(_))
        ));
        assert!(mock.writes().is_empty());

        // Bit 16 (sweep) already set, lives in the high word
        mock.set_registers(4160, &[0x0000, 0x0001]);
        coordinator.refresh().await.unwrap();
        let ack = executor.set_control_flag(ControlFlag::Float).await.unwrap();
        assert_eq!(ack.words, vec![0x0020, 0x0001]);
    }

    #[tokio::test]
    async fn control_flag_rejected_when_settings_group_failing() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        mock.fail_reads_from(4136);
        coordinator.refresh().await.unwrap();
        let err = executor.set_control_flag(ControlFlag::Bulk).await.unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::StaleState(_))
        ));
    }

    #[tokio::test]
    async fn consecutive_flags_keep_each_other() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        executor.set_control_flag(ControlFlag::Float).await.unwrap();
        let ack = executor
            .set_control_flag(ControlFlag::ResetFaults)
            .await
            .unwrap();
        assert_eq!(ack.words, vec![0x0020, 0x2000]);
        assert_eq!(mock.register(4160) & 0x0020, 0x0020);
        assert_eq!(mock.register(4161), 0x2000);
    }

    #[tokio::test]
    async fn flag_merges_bits_changed_since_refresh() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        // Set by the device after the snapshot was taken
        mock.set_registers(4160, &[0x0000, 0x0010]);
        let ack = executor.set_control_flag(ControlFlag::Bulk).await.unwrap();
        assert_eq!(ack.words, vec![0x0040, 0x0010]);
    }

    #[tokio::test]
    async fn unit_name_is_packed_and_committed() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        let acks = executor.set_unit_name("SHED-1").await.unwrap();
        assert_eq!(acks.len(), 2);
        // "SH", "ED", "-1", "  "
        assert_eq!(
            mock.writes(),
            vec![
                (4210, vec![0x4853, 0x4445, 0x312D, 0x2020]),
                (4160, vec![0x0004, 0x0000]),
            ]
        );

        coordinator.refresh().await.unwrap();
        let name = coordinator.current_snapshot().device_identity().unit_name;
        assert_eq!(name.as_deref(), Some("SHED-1"));
    }

    #[tokio::test]
    async fn invalid_unit_names_are_refused() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        for name in ["CLASSIC250", "bad/name", "café"] {
            let err = executor.set_unit_name(name).await.unwrap_err();
            assert!(
                matches!(err, LinkError::WriteRejected(WriteRejection::InvalidText { .. })),
                "{} accepted",
                name
            );
        }
        let err = executor
            .set_value("UNIT_NAME_0", 0x4142 as f64, Conversion::Identity)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::InvalidText { .. })
        ));
        assert!(mock.writes().is_empty());
    }

    #[test]
    fn unit_name_encoding() {
        assert_eq!(
            encode_unit_name("CLASSIC").unwrap(),
            vec![0x4C43, 0x5341, 0x4953, 0x2043]
        );
        assert_eq!(encode_unit_name("").unwrap(), vec![0x2020; 4]);
        assert_eq!(encode_unit_name("a_b.c d9").unwrap().len(), 4);
    }

    #[tokio::test]
    async fn mppt_mode_is_committed_to_eeprom() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        let acks = executor.set_mppt_mode(MpptMode::Solar).await.unwrap();
        assert_eq!(acks.len(), 2);
        assert_eq!(
            mock.writes(),
            vec![(4164, vec![0x000B]), (4160, vec![0x0004, 0x0000])]
        );
    }

    #[tokio::test]
    async fn force_none_writes_nothing() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);
        coordinator.refresh().await.unwrap();

        assert_eq!(executor.force_charge_mode(ForceChargeMode::None).await.unwrap(), None);
        assert!(mock.writes().is_empty());
        let ack = executor
            .force_charge_mode(ForceChargeMode::Equalize)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ack.words, vec![0x0080, 0x0000]);
    }

    #[tokio::test]
    async fn lock_wait_times_out_as_busy() {
        let mock = MockTransport::new();
        let (coordinator, executor) = setup(&mock);

        let transport = coordinator.transport();
        let _held = transport.lock().await;
        let err = executor
            .set_value("FLOAT_VOLTAGE_SETPOINT", 54.0, Conversion::Identity)
            .await
            .unwrap_err();
        assert!(matches!(err, LinkError::Busy(200)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn device_rejection_is_reported() {
        let mock = MockTransport::new();
        let (_coordinator, executor) = setup(&mock);
        mock.reject_writes_at(4162);
        let err = executor
            .set_value("EQUALIZE_TIME_EEPROM", 10.0, Conversion::SecondsToMinutes)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LinkError::WriteRejected(WriteRejection::Device(_))
        ));
    }
}
