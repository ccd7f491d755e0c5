// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! # Daemon Management Module
//!
//! Runs the background tasks of the link:
//!
//! - one polling task per configured device
//! - the optional simulated controller
//! - a heartbeat logging the health of every device
//!
//! Each device gets its own [`DeviceContext`]: a connection, a coordinator
//! polling it and a command executor sharing that connection. Devices share
//! no mutable state with each other.
//!
//! ## Usage
//!
//! ```no_run
//! use rust_midnite::{config::Config, daemon::launch_daemon::Daemon};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!
//!     let mut daemon = Daemon::new()?;
//!     daemon.launch(&config).await?;
//!
//!     // Later, trigger a graceful shutdown
//!     daemon.shutdown();
//!
//!     // Wait for all tasks to complete
//!     daemon.join().await?;
//!
//!     Ok(())
//! }
//! ```

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, RwLock,
};
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time;

use crate::command::CommandExecutor;
use crate::config::{Config, ConnectionConfig, PollingConfig};
use crate::coordinator::{Coordinator, Snapshot};
use crate::modbus::{self, ClassicSimulator};
use crate::registers::{Group, RegisterMap};
use crate::transport::{shared, TcpTransportFactory, TransportFactory};

/// Time given to a task to finish once asked to stop
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between two heartbeat reports
const HEARTBEAT_PERIOD: Duration = Duration::from_secs(60);

/// Coordinators of the running devices, as seen by the heartbeat
type Monitored = Arc<RwLock<BTreeMap<String, Arc<Coordinator>>>>;

/// Devices with at least one degraded group, with those groups
fn degraded(monitored: &Monitored) -> Vec<(String, Vec<Group>)> {
    monitored
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .iter()
        .filter_map(|(identity, coordinator)| {
            let groups = coordinator.current_snapshot().degraded_groups();
            (!groups.is_empty()).then(|| (identity.clone(), groups))
        })
        .collect()
}

/// Everything running for one configured device
pub struct DeviceContext {
    identity: String,
    connection: ConnectionConfig,
    coordinator: Arc<Coordinator>,
    executor: CommandExecutor,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl DeviceContext {
    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn connection(&self) -> &ConnectionConfig {
        &self.connection
    }

    pub fn coordinator(&self) -> &Arc<Coordinator> {
        &self.coordinator
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.coordinator.current_snapshot()
    }

    /// Stop polling and wait for the polling task
    async fn stop(self) {
        let _ = self.stop.send(true);
        match time::timeout(TASK_STOP_TIMEOUT, self.task).await {
            Ok(Ok(Ok(()))) => debug!("Polling of {} stopped", self.identity),
            Ok(Ok(Err(e))) => error!("Polling of {} ended with an error: {}", self.identity, e),
            Ok(Err(e)) => error!("Polling task of {} panicked: {}", self.identity, e),
            Err(_) => warn!(
                "Polling task of {} did not complete within timeout period, may be hung",
                self.identity
            ),
        }
        self.coordinator.transport().lock().await.close().await;
    }
}

/// Represents a daemon task manager that coordinates the device contexts and
/// the auxiliary services
pub struct Daemon {
    tasks: Vec<JoinHandle<Result<()>>>,
    running: Arc<AtomicBool>,
    devices: BTreeMap<String, DeviceContext>,
    monitored: Monitored,
    map: Arc<RegisterMap>,
    factory: Arc<dyn TransportFactory>,
    polling: PollingConfig,
}

impl Daemon {
    /// Daemon connecting to devices over Modbus TCP
    pub fn new() -> Result<Self> {
        Self::with_factory(Arc::new(TcpTransportFactory))
    }

    /// Daemon building its connections with `factory`
    pub fn with_factory(factory: Arc<dyn TransportFactory>) -> Result<Self> {
        let map = RegisterMap::classic().context("Invalid register catalogue")?;
        Ok(Daemon {
            tasks: Vec::new(),
            running: Arc::new(AtomicBool::new(true)),
            devices: BTreeMap::new(),
            monitored: Arc::default(),
            map: Arc::new(map),
            factory,
            polling: PollingConfig::default(),
        })
    }

    /// Launch all configured tasks based on configuration
    pub async fn launch(&mut self, config: &Config) -> Result<()> {
        self.polling = config.polling.clone();

        if config.simulator.enabled {
            self.start_simulator(config).await?;
        }

        for (identity, connection) in &config.devices {
            self.add_device(identity, connection).await?;
        }

        self.start_heartbeat()?;

        Ok(())
    }

    /// Start polling a device, replacing any context with the same identity
    pub async fn add_device(&mut self, identity: &str, connection: &ConnectionConfig) -> Result<()> {
        if let Some(previous) = self.take_device(identity) {
            info!("Replacing device context of {}", identity);
            previous.stop().await;
        }

        let endpoint = connection.endpoint();
        info!(
            "Starting device {} at {} every {} s",
            identity, endpoint, connection.scan_interval_seconds
        );

        let transport = shared(
            self.factory
                .create(&endpoint, self.polling.request_timeout()),
        );
        let coordinator = Arc::new(
            Coordinator::new(
                Arc::clone(&self.map),
                transport,
                self.polling.failure_threshold,
            )
            .with_reconnect_delay(self.polling.reconnect_delay()),
        );
        let executor = CommandExecutor::new(&coordinator, self.polling.write_lock_timeout());

        let (stop, stop_rx) = watch::channel(false);
        let polling = Arc::clone(&coordinator);
        let period = connection.scan_interval();
        let task = tokio::spawn(async move {
            polling
                .run(period, stop_rx)
                .await
                .context("Polling loop stopped on a register map inconsistency")
        });

        self.monitored
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(identity.to_string(), Arc::clone(&coordinator));
        self.devices.insert(
            identity.to_string(),
            DeviceContext {
                identity: identity.to_string(),
                connection: connection.clone(),
                coordinator,
                executor,
                stop,
                task,
            },
        );
        Ok(())
    }

    /// Stop polling a device removed from the configuration
    pub async fn remove_device(&mut self, identity: &str) -> bool {
        match self.take_device(identity) {
            Some(context) => {
                info!("Removing device {}", identity);
                context.stop().await;
                true
            }
            None => false,
        }
    }

    fn take_device(&mut self, identity: &str) -> Option<DeviceContext> {
        self.monitored
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(identity);
        self.devices.remove(identity)
    }

    /// Devices currently reporting degraded groups
    pub fn degraded_devices(&self) -> Vec<(String, Vec<Group>)> {
        degraded(&self.monitored)
    }

    pub fn device(&self, identity: &str) -> Option<&DeviceContext> {
        self.devices.get(identity)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceContext> {
        self.devices.values()
    }

    /// Serve the simulated controller until shutdown
    async fn start_simulator(&mut self, config: &Config) -> Result<()> {
        info!(
            "Starting simulated controller on {}:{}",
            config.simulator.address, config.simulator.port
        );
        let socket_addr: SocketAddr = format!("{}:{}", config.simulator.address, config.simulator.port)
            .parse()
            .with_context(|| {
                format!(
                    "Invalid simulator address {}:{}",
                    config.simulator.address, config.simulator.port
                )
            })?;
        let listener = TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("Failed to bind simulator to {}", socket_addr))?;

        let running = self.running.clone();
        let simulator = ClassicSimulator::new().live(true);
        let task = tokio::spawn(async move {
            let server_handle = tokio::spawn(async move {
                if let Err(e) = modbus::serve(listener, simulator).await {
                    error!("Simulator server error: {}", e);
                }
            });

            while running.load(Ordering::SeqCst) {
                time::sleep(Duration::from_secs(1)).await;
            }

            info!("Shutting down simulated controller...");
            server_handle.abort();
            match time::timeout(TASK_STOP_TIMEOUT, server_handle).await {
                Ok(_) => info!("Simulated controller shut down successfully"),
                Err(_) => warn!("Simulator shutdown timed out, forcing termination"),
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Start a heartbeat task that logs the health of every device periodically
    fn start_heartbeat(&mut self) -> Result<()> {
        debug!("Starting heartbeat monitor");

        let running = self.running.clone();
        let monitored = Arc::clone(&self.monitored);

        let task = tokio::spawn(async move {
            let mut since_report = Duration::ZERO;
            while running.load(Ordering::SeqCst) {
                if since_report.is_zero() {
                    // Devices added or removed since launch are read on each report
                    let missed: Vec<(String, u64)> = monitored
                        .read()
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .iter()
                        .map(|(identity, coordinator)| (identity.clone(), coordinator.missed_cycles()))
                        .collect();
                    debug!("Daemon heartbeat: {} device(s)", missed.len());
                    for (identity, groups) in degraded(&monitored) {
                        warn!("Device {} has degraded groups: {:?}", identity, groups);
                    }
                    for (identity, count) in missed.into_iter().filter(|(_, count)| *count > 0) {
                        debug!("Device {} missed {} polling cycles", identity, count);
                    }
                }
                time::sleep(Duration::from_secs(1)).await;
                since_report += Duration::from_secs(1);
                if since_report >= HEARTBEAT_PERIOD {
                    since_report = Duration::ZERO;
                }
            }
            Ok(())
        });

        self.tasks.push(task);
        Ok(())
    }

    /// Stop all running tasks
    pub fn shutdown(&self) {
        info!("Shutting down daemon tasks");
        self.running.store(false, Ordering::SeqCst);
        for context in self.devices.values() {
            let _ = context.stop.send(true);
        }
    }

    /// Wait for all tasks to complete
    ///
    /// Should be called after [`Daemon::shutdown`]. A task that does not end
    /// within five seconds is logged and left behind.
    pub async fn join(self) -> Result<()> {
        self.monitored
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
        for (_, context) in self.devices {
            context.stop().await;
        }
        for task in self.tasks {
            match time::timeout(TASK_STOP_TIMEOUT, task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(e))) => error!("Task ended with an error: {}", e),
                Ok(Err(e)) => error!("Task panicked: {}", e),
                Err(_) => warn!("Task did not complete within timeout period, may be hung"),
            }
        }
        Ok(())
    }
}
