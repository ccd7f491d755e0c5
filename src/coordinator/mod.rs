// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Polling coordinator
//!
//! The coordinator turns raw register reads into a [`Snapshot`] of decoded
//! values. Each [`Group`] of the register map is read with a single
//! contiguous request covering its span, decoded, and published by replacing
//! that group in a new snapshot. Readers never see a group with values from
//! two different reads.
//!
//! ## Failure handling
//!
//! A failed group read leaves every other group untouched. The failing group
//! keeps its previous values with a [`GroupStatus::Stale`] status until
//! `failure_threshold` consecutive failures, after which its values are
//! dropped and the group is reported [`GroupStatus::Unavailable`]. One
//! successful read restores it.
//!
//! ## Concurrency
//!
//! The connection is a [`SharedTransport`]. The coordinator holds its lock
//! for the duration of one group read, so a write issued by the command
//! executor can only happen between two group reads.

pub mod device_info;
pub mod snapshot;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

pub use device_info::{ChargeState, DeviceIdentity};
pub use snapshot::{DecodedValue, GroupSnapshot, GroupStatus, Snapshot};

use crate::error::{LinkError, LinkResult};
use crate::registers::{self, Group, GroupSpan, RegisterMap};
use crate::transport::SharedTransport;

/// Default number of consecutive failures before a group is unavailable
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Refreshes and publishes the snapshot of one device
pub struct Coordinator {
    map: Arc<RegisterMap>,
    transport: SharedTransport,
    failure_threshold: u32,
    tx: watch::Sender<Arc<Snapshot>>,
    refresh_guard: Mutex<()>,
    missed_cycles: AtomicU64,
    reconnect_delay: Duration,
    last_refused: std::sync::Mutex<Option<Instant>>,
}

impl Coordinator {
    pub fn new(map: Arc<RegisterMap>, transport: SharedTransport, failure_threshold: u32) -> Self {
        let (tx, _) = watch::channel(Arc::new(Snapshot::empty(&map)));
        Self {
            map,
            transport,
            failure_threshold: failure_threshold.max(1),
            tx,
            refresh_guard: Mutex::new(()),
            missed_cycles: AtomicU64::new(0),
            reconnect_delay: Duration::ZERO,
            last_refused: std::sync::Mutex::new(None),
        }
    }

    /// Wait `delay` after a refused connection before connecting again
    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn register_map(&self) -> &Arc<RegisterMap> {
        &self.map
    }

    /// Connection handle to give to a command executor
    pub fn transport(&self) -> SharedTransport {
        Arc::clone(&self.transport)
    }

    /// Latest published snapshot, without waiting on I/O
    pub fn current_snapshot(&self) -> Arc<Snapshot> {
        self.tx.borrow().clone()
    }

    /// Receiver notified each time a group is replaced
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.tx.subscribe()
    }

    /// Polling ticks skipped because a refresh was still running
    pub fn missed_cycles(&self) -> u64 {
        self.missed_cycles.load(Ordering::Relaxed)
    }

    /// Time left before a connection may be attempted again
    fn reconnect_backoff(&self) -> Option<Duration> {
        let last_refused = self
            .last_refused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = last_refused.as_ref()?.elapsed();
        self.reconnect_delay.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    fn set_refused(&self, refused: Option<Instant>) {
        *self
            .last_refused
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = refused;
    }

    fn publish(&self, replacement: GroupSnapshot) {
        self.tx.send_modify(|current| {
            *current = Arc::new(current.with_group(replacement));
        });
    }

    fn previous(&self, group: Group) -> Arc<GroupSnapshot> {
        let snapshot = self.current_snapshot();
        match snapshot.groups.get(&group) {
            Some(previous) => Arc::clone(previous),
            None => Arc::new(GroupSnapshot::pending(
                group,
                &self.map.descriptors_in_group(group),
            )),
        }
    }

    fn record_failure(&self, group: Group, reason: String) {
        let previous = self.previous(group);
        let next = previous.failed(reason, self.failure_threshold);
        if next.status.is_unavailable() && !previous.status.is_unavailable() {
            warn!(
                "Group '{}' unavailable after {} consecutive failures",
                group,
                next.status.consecutive_failures()
            );
        }
        self.publish(next);
    }

    fn record_success(&self, group: Group, span: GroupSpan, words: &[u16]) -> LinkResult<()> {
        let previous = self.previous(group);
        let now = Utc::now();
        let mut values = Vec::with_capacity(previous.values.len());

        for desc in self.map.descriptors_in_group(group) {
            let offset = (desc.address - span.start) as usize;
            let end = offset + desc.width.count() as usize;
            let slice = words.get(offset..end).ok_or_else(|| {
                LinkError::DecodeInconsistent(format!(
                    "'{}' at {} lies outside the {} words read from {}",
                    desc.name,
                    desc.address,
                    words.len(),
                    span.start
                ))
            })?;
            let decoded = registers::decode(desc, slice)?;
            values.push(DecodedValue {
                name: desc.name,
                value: Some(decoded.value),
                raw: Some(decoded.raw),
                unit: desc.unit,
                valid_as_of: Some(now),
            });
        }

        if previous.status.is_unavailable() {
            info!("Group '{}' recovered", group);
        }
        self.publish(GroupSnapshot {
            group,
            status: GroupStatus::Ok,
            values,
            last_success: Some(now),
            last_error: None,
        });
        Ok(())
    }

    /// Read every group once and publish the results
    ///
    /// Per-group read failures are recorded in the snapshot and do not fail
    /// the refresh. An error is returned when the device cannot be reached,
    /// after all groups not yet read have been marked failed, or when a
    /// response does not match the register map.
    pub async fn refresh(&self) -> LinkResult<Arc<Snapshot>> {
        let _running = self.refresh_guard.lock().await;
        self.refresh_locked().await
    }

    /// Like [`Coordinator::refresh`] but returns `None` when a refresh is
    /// already in flight
    pub async fn try_refresh(&self) -> Option<LinkResult<Arc<Snapshot>>> {
        let _running = self.refresh_guard.try_lock().ok()?;
        Some(self.refresh_locked().await)
    }

    async fn refresh_locked(&self) -> LinkResult<Arc<Snapshot>> {
        let groups = self.map.groups();
        for (index, group) in groups.iter().copied().enumerate() {
            let Some(span) = self.map.group_span(group) else {
                continue;
            };

            let outcome = {
                let mut transport = self.transport.lock().await;
                if !transport.is_connected() {
                    if let Some(left) = self.reconnect_backoff() {
                        drop(transport);
                        let reason = format!("waiting {} ms before reconnecting", left.as_millis());
                        debug!("{}", reason);
                        for remaining in &groups[index..] {
                            self.record_failure(*remaining, reason.clone());
                        }
                        return Err(LinkError::TransportUnreachable(reason));
                    }
                    debug!("Opening connection to {}", transport.describe());
                    if let Err(err) = transport.connect().await {
                        drop(transport);
                        self.set_refused(Some(Instant::now()));
                        let reason = err.to_string();
                        warn!("Device unreachable: {}", reason);
                        for remaining in &groups[index..] {
                            self.record_failure(*remaining, reason.clone());
                        }
                        return Err(LinkError::from_read(err));
                    }
                    self.set_refused(None);
                    info!("Connected to {}", transport.describe());
                }
                transport.read_registers(span.start, span.count).await
            };

            match outcome {
                Ok(words) if words.len() == span.count as usize => {
                    if let Err(err) = self.record_success(group, span, &words) {
                        error!("Register map does not match device response: {}", err);
                        return Err(err);
                    }
                }
                Ok(words) => {
                    let err = LinkError::DecodeInconsistent(format!(
                        "group '{}' expected {} words, got {}",
                        group,
                        span.count,
                        words.len()
                    ));
                    error!("{}", err);
                    return Err(err);
                }
                Err(err) => {
                    warn!(
                        "Reading group '{}' ({} registers at {}) failed: {}",
                        group, span.count, span.start, err
                    );
                    self.record_failure(group, err.to_string());
                }
            }
        }
        Ok(self.current_snapshot())
    }

    /// Refresh on a fixed period until `shutdown` turns true
    ///
    /// Ticks never queue: when a refresh is still running at the next tick,
    /// the tick is counted as missed and skipped. Returns an error only on a
    /// register map inconsistency.
    pub async fn run(
        self: Arc<Self>,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> LinkResult<()> {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<JoinHandle<LinkResult<Arc<Snapshot>>>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }

            if let Some(handle) = in_flight.take() {
                if !handle.is_finished() {
                    let missed = self.missed_cycles.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!("Refresh still running, skipping cycle ({} missed so far)", missed);
                    in_flight = Some(handle);
                    continue;
                }
                Self::check_completed(handle).await?;
            }

            let coordinator = Arc::clone(&self);
            in_flight = Some(tokio::spawn(async move { coordinator.refresh().await }));
        }

        if let Some(handle) = in_flight {
            Self::check_completed(handle).await?;
        }
        debug!("Polling loop stopped");
        Ok(())
    }

    async fn check_completed(handle: JoinHandle<LinkResult<Arc<Snapshot>>>) -> LinkResult<()> {
        match handle.await {
            Ok(Err(err @ LinkError::DecodeInconsistent(_))) => Err(err),
            Ok(Err(err)) => {
                debug!("Refresh ended with {}", err);
                Ok(())
            }
            Ok(Ok(_)) => Ok(()),
            Err(join_err) => Err(LinkError::Unknown(format!("refresh task failed: {}", join_err))),
        }
    }
}
