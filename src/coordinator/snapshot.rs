// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Immutable snapshot of decoded device state

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::registers::{Group, RegisterDescriptor, RegisterMap};

/// One decoded field
///
/// `value` is `None` when the field was never read or its group is
/// unavailable. It is never replaced by zero.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DecodedValue {
    pub name: &'static str,
    pub value: Option<f64>,
    /// Unsigned bit pattern of the register words
    pub raw: Option<u32>,
    pub unit: &'static str,
    pub valid_as_of: Option<DateTime<Utc>>,
}

impl DecodedValue {
    fn unknown(desc: &RegisterDescriptor) -> Self {
        Self {
            name: desc.name,
            value: None,
            raw: None,
            unit: desc.unit,
            valid_as_of: None,
        }
    }
}

/// Health of a group as seen by subscribers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GroupStatus {
    /// Not read yet
    Pending,
    /// Last read succeeded
    Ok,
    /// Recent reads failed; values are from the last successful read
    Stale { consecutive_failures: u32 },
    /// Reads failed often enough that values were dropped
    Unavailable { consecutive_failures: u32 },
}

impl GroupStatus {
    pub fn consecutive_failures(&self) -> u32 {
        match self {
            GroupStatus::Stale {
                consecutive_failures,
            }
            | GroupStatus::Unavailable {
                consecutive_failures,
            } => *consecutive_failures,
            GroupStatus::Pending | GroupStatus::Ok => 0,
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, GroupStatus::Unavailable { .. })
    }
}

/// Decoded values of one group, replaced as a whole
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub group: Group,
    pub status: GroupStatus,
    pub values: Vec<DecodedValue>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl GroupSnapshot {
    /// Group with every field unknown
    pub fn pending(group: Group, descriptors: &[&RegisterDescriptor]) -> Self {
        Self {
            group,
            status: GroupStatus::Pending,
            values: descriptors.iter().map(|d| DecodedValue::unknown(d)).collect(),
            last_success: None,
            last_error: None,
        }
    }

    /// Copy after one more failed read
    ///
    /// Values are kept until `threshold` consecutive failures, then dropped
    /// while `valid_as_of` is retained.
    pub fn failed(&self, error: String, threshold: u32) -> Self {
        let failures = self.status.consecutive_failures() + 1;
        let mut next = self.clone();
        next.last_error = Some(error);
        if failures >= threshold {
            next.status = GroupStatus::Unavailable {
                consecutive_failures: failures,
            };
            for value in &mut next.values {
                value.value = None;
                value.raw = None;
            }
        } else {
            next.status = GroupStatus::Stale {
                consecutive_failures: failures,
            };
        }
        next
    }

    pub fn get(&self, name: &str) -> Option<&DecodedValue> {
        self.values.iter().find(|v| v.name == name)
    }
}

/// Latest consistent state of a device
///
/// Groups are shared `Arc`s, so publishing a new snapshot only copies the
/// group that changed. Readers holding an older snapshot keep a valid view.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// Number of group replacements since start
    pub generation: u64,
    pub groups: BTreeMap<Group, Arc<GroupSnapshot>>,
}

impl Snapshot {
    /// Snapshot with every group pending
    pub fn empty(map: &RegisterMap) -> Self {
        let groups = map
            .groups()
            .into_iter()
            .map(|group| {
                let descriptors = map.descriptors_in_group(group);
                (group, Arc::new(GroupSnapshot::pending(group, &descriptors)))
            })
            .collect();
        Self {
            generation: 0,
            groups,
        }
    }

    pub fn group(&self, group: Group) -> Option<&GroupSnapshot> {
        self.groups.get(&group).map(|g| g.as_ref())
    }

    /// Decoded field by name, whatever its group
    pub fn field(&self, name: &str) -> Option<&DecodedValue> {
        self.groups.values().find_map(|g| g.get(name))
    }

    /// Physical value of a field, `None` when unknown
    pub fn value(&self, name: &str) -> Option<f64> {
        self.field(name).and_then(|v| v.value)
    }

    /// Raw bit pattern of a field, `None` when unknown
    pub fn raw(&self, name: &str) -> Option<u32> {
        self.field(name).and_then(|v| v.raw)
    }

    /// Raw value of a field whose group's last read succeeded
    pub fn fresh_raw(&self, name: &str) -> Option<u32> {
        self.groups
            .values()
            .filter(|g| g.status == GroupStatus::Ok)
            .find_map(|g| g.get(name))
            .and_then(|v| v.raw)
    }

    /// Groups currently reported unavailable
    pub fn degraded_groups(&self) -> Vec<Group> {
        self.groups
            .iter()
            .filter(|(_, g)| g.status.is_unavailable())
            .map(|(group, _)| *group)
            .collect()
    }

    /// Copy of this snapshot with one group replaced
    pub fn with_group(&self, replacement: GroupSnapshot) -> Self {
        let mut next = self.clone();
        next.groups
            .insert(replacement.group, Arc::new(replacement));
        next.generation += 1;
        next
    }
}
