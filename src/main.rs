// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point of the Midnite Classic link

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::info;
use tokio::signal;

use rust_midnite::command::CommandExecutor;
use rust_midnite::config::{self, Config, ConnectionConfig};
use rust_midnite::coordinator::Coordinator;
use rust_midnite::daemon::Daemon;
use rust_midnite::discovery::{
    AbortReason, DeviceRegistry, DiscoveryFlow, DiscoveryRecord, FlowEvent, FlowState,
    Reconfiguration, Reconfigurer, Submission,
};
use rust_midnite::registers::{ControlFlag, Conversion, MpptMode, RegisterMap};
use rust_midnite::transport::{shared, TcpTransport, TcpTransportFactory};

/// Modbus TCP link to Midnite Solar Classic charge controllers
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,

    /// Host of a controller to validate and add to the configuration
    #[arg(long)]
    host: Option<String>,

    /// Modbus TCP port of the controller
    #[arg(long)]
    port: Option<u16>,

    /// Modbus unit identifier of the controller
    #[arg(long)]
    slave_id: Option<u8>,

    /// Polling period of the controller, in seconds
    ///
    /// Without --host, updates the period of the --device already configured.
    #[arg(long)]
    scan_interval: Option<u64>,

    /// Move a configured device to --host/--port after validating it
    #[arg(long, value_name = "IDENTITY", requires = "host")]
    reconfigure: Option<String>,

    /// IP address reported by a passive discovery
    #[arg(long, requires = "discovered_mac")]
    discovered_ip: Option<String>,

    /// MAC address reported by a passive discovery
    #[arg(long, requires = "discovered_ip")]
    discovered_mac: Option<String>,

    /// Identity of the configured device to talk to
    #[arg(long)]
    device: Option<String>,

    /// Refresh once and print the snapshot as JSON
    #[arg(long)]
    once: bool,

    /// Write a setting, as NAME=VALUE
    #[arg(long, value_name = "NAME=VALUE")]
    set: Option<String>,

    /// The value given with --set is in minutes, stored in seconds
    #[arg(long, requires = "set")]
    minutes: bool,

    /// Raise a command bit of the control register (float, bulk, equalize, ...)
    #[arg(long, value_name = "FLAG")]
    force: Option<ControlFlag>,

    /// Select the MPPT mode and commit it to EEPROM
    #[arg(long, value_name = "MODE")]
    mppt_mode: Option<MpptMode>,

    /// Write the unit name (up to 8 characters) and commit it to EEPROM
    #[arg(long, value_name = "NAME")]
    unit_name: Option<String>,

    /// Consecutive failed reads before a group is reported unavailable
    #[arg(long)]
    failure_threshold: Option<u32>,

    /// Bound on the connection probe, in milliseconds
    #[arg(long)]
    probe_timeout_ms: Option<u64>,

    /// Serve the simulated controller from the daemon
    #[arg(long)]
    simulator: Option<bool>,

    /// Port of the simulated controller
    #[arg(long)]
    simulator_port: Option<u16>,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.quiet {
        log::LevelFilter::Off
    } else if args.verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    if args.show_config_schema {
        return config::output_config_schema();
    }

    if let Some(validate_path) = &args.validate_config {
        if !validate_path.exists() {
            return Err(anyhow::anyhow!(
                "Configuration file does not exist: {}",
                validate_path.display()
            ));
        }
        Config::from_file(validate_path)
            .map_err(|err| anyhow::anyhow!("Configuration validation failed: {}", err))?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("config.yaml"));
    let mut config = Config::from_file(&config_path)?;
    config.apply_args(
        args.failure_threshold,
        args.probe_timeout_ms,
        args.simulator,
        args.simulator_port,
    );

    if args.reconfigure.is_some() {
        return run_reconfigure(&args, &mut config, &config_path).await;
    }

    if args.host.is_some() || args.discovered_mac.is_some() {
        return run_setup(&args, &mut config, &config_path).await;
    }

    if let Some(seconds) = args.scan_interval {
        return run_options(&args, seconds, &mut config, &config_path);
    }

    if args.once
        || args.set.is_some()
        || args.force.is_some()
        || args.mppt_mode.is_some()
        || args.unit_name.is_some()
    {
        return run_commands(&args, &config).await;
    }

    info!("Starting in daemon mode");
    let mut daemon = Daemon::new()?;
    daemon.launch(&config).await?;

    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Received shutdown signal, terminating daemon");
            daemon.shutdown();
            daemon.join().await?;
        }
        Err(err) => {
            eprintln!("Error waiting for shutdown signal: {}", err);
        }
    }
    Ok(())
}

/// Drive the setup flow from the command line and persist its outcome
async fn run_setup(args: &Args, config: &mut Config, config_path: &Path) -> Result<()> {
    let registry = DeviceRegistry::from_entries(config.devices.clone());
    let mut flow = DiscoveryFlow::new(
        config.discovery.clone(),
        registry.clone(),
        Arc::new(TcpTransportFactory),
    );

    if let (Some(mac), Some(ip)) = (&args.discovered_mac, &args.discovered_ip) {
        let record = DiscoveryRecord::new(mac, ip.clone(), None)?;
        flow.on_discovered(record).await?;
    }

    if !flow.state().is_terminal() {
        let mut submission = Submission::new(
            args.host.clone().unwrap_or_default(),
            args.port.unwrap_or(config.discovery.default_port),
            args.slave_id.unwrap_or(config.discovery.default_slave_id),
        );
        if let Some(seconds) = args.scan_interval {
            submission = submission.with_scan_interval(seconds);
        }
        flow.handle(FlowEvent::UserSubmit(submission)).await?;
    }

    println!("{}", serde_json::to_string_pretty(&flow.state())?);

    match flow.state() {
        FlowState::Configured { identity, .. } => {
            config.devices = registry.entries();
            config.save_to_file(config_path)?;
            info!("Device {} saved to {}", identity, config_path.display());
            Ok(())
        }
        FlowState::Aborted {
            reason: AbortReason::AlreadyConfigured {
                identity,
                host_updated: true,
            },
        } => {
            config.devices = registry.entries();
            config.save_to_file(config_path)?;
            info!("Host of device {} updated in {}", identity, config_path.display());
            Ok(())
        }
        FlowState::Aborted { reason } => {
            info!("Setup aborted: {}", reason.as_str());
            Ok(())
        }
        state => match state.error() {
            Some(err) => Err(anyhow::anyhow!(
                "Validation failed ({}): {}",
                err.category(),
                err
            )),
            None => Ok(()),
        },
    }
}

/// Validate a new address for a configured device and persist it
async fn run_reconfigure(args: &Args, config: &mut Config, config_path: &Path) -> Result<()> {
    let identity = args.reconfigure.clone().unwrap_or_default();
    let registry = DeviceRegistry::from_entries(config.devices.clone());
    let current = registry
        .get(&identity)
        .ok_or_else(|| anyhow::anyhow!("Device {} is not configured", identity))?;

    let mut change = Reconfiguration::new(
        args.host.clone().unwrap_or_default(),
        args.port.unwrap_or(current.port),
    );
    if let Some(slave_id) = args.slave_id {
        change = change.with_slave_id(slave_id);
    }
    if let Some(seconds) = args.scan_interval {
        change = change.with_scan_interval(seconds);
    }

    let reconfigurer = Reconfigurer::new(
        &config.discovery,
        registry.clone(),
        Arc::new(TcpTransportFactory),
    );
    let updated = reconfigurer
        .reconfigure(&identity, &change)
        .await
        .map_err(|err| anyhow::anyhow!("Reconfiguration refused ({}): {}", err.reason(), err))?;
    println!("{}", serde_json::to_string_pretty(&updated)?);

    config.devices = registry.entries();
    config.save_to_file(config_path)?;
    info!("Device {} reconfigured in {}", identity, config_path.display());
    Ok(())
}

/// Store a new polling period for a configured device
fn run_options(args: &Args, seconds: u64, config: &mut Config, config_path: &Path) -> Result<()> {
    let identity = select_device(args, config)?.0.to_string();
    let registry = DeviceRegistry::from_entries(config.devices.clone());
    let reconfigurer = Reconfigurer::new(
        &config.discovery,
        registry.clone(),
        Arc::new(TcpTransportFactory),
    );
    let updated = reconfigurer
        .set_scan_interval(&identity, seconds)
        .map_err(|err| anyhow::anyhow!("Option refused ({}): {}", err.reason(), err))?;
    println!("{}", serde_json::to_string_pretty(&updated)?);

    config.devices = registry.entries();
    config.save_to_file(config_path)?;
    Ok(())
}

/// Device selected with `--device`, or the only configured one
fn select_device<'a>(args: &Args, config: &'a Config) -> Result<(&'a str, &'a ConnectionConfig)> {
    match &args.device {
        Some(identity) => config
            .devices
            .get_key_value(identity.as_str())
            .map(|(identity, connection)| (identity.as_str(), connection))
            .ok_or_else(|| anyhow::anyhow!("Device {} is not configured", identity)),
        None => {
            let mut devices = config.devices.iter();
            match (devices.next(), devices.next()) {
                (Some((identity, connection)), None) => Ok((identity.as_str(), connection)),
                (None, _) => Err(anyhow::anyhow!(
                    "No device configured, add one with --host"
                )),
                _ => Err(anyhow::anyhow!(
                    "Several devices configured, choose one with --device"
                )),
            }
        }
    }
}

/// Split a `NAME=VALUE` assignment
fn parse_assignment(assignment: &str) -> Result<(&str, f64)> {
    let (name, value) = assignment
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("Expected NAME=VALUE, got {}", assignment))?;
    let value = value
        .trim()
        .parse::<f64>()
        .map_err(|err| anyhow::anyhow!("Invalid value for {}: {}", name, err))?;
    Ok((name.trim(), value))
}

/// Refresh once, run the requested writes and print the outcome
async fn run_commands(args: &Args, config: &Config) -> Result<()> {
    let (identity, connection) = select_device(args, config)?;
    let map = Arc::new(RegisterMap::classic()?);
    let transport = shared(Box::new(TcpTransport::new(
        connection.endpoint(),
        config.polling.request_timeout(),
    )));
    let coordinator = Coordinator::new(map, transport, config.polling.failure_threshold);
    let executor = CommandExecutor::new(&coordinator, config.polling.write_lock_timeout());

    // The control register is written from the state just read
    let mut snapshot = coordinator.refresh().await?;
    let mut wrote = false;

    if let Some(assignment) = &args.set {
        let (name, value) = parse_assignment(assignment)?;
        let conversion = if args.minutes {
            Conversion::SecondsToMinutes
        } else {
            Conversion::Identity
        };
        let ack = executor.set_value(name, value, conversion).await?;
        println!("{}", serde_json::to_string(&ack)?);
        wrote = true;
    }
    if let Some(flag) = args.force {
        let ack = executor.set_control_flag(flag).await?;
        println!("{}", serde_json::to_string(&ack)?);
        wrote = true;
    }
    if let Some(mode) = args.mppt_mode {
        let acks = executor.set_mppt_mode(mode).await?;
        println!("{}", serde_json::to_string(&acks)?);
        wrote = true;
    }
    if let Some(name) = &args.unit_name {
        let acks = executor.set_unit_name(name).await?;
        println!("{}", serde_json::to_string(&acks)?);
        wrote = true;
    }

    // Written values are read back before anything is reported
    if wrote {
        snapshot = coordinator.refresh().await?;
    }
    if args.once {
        let report = serde_json::json!({
            "identity": identity,
            "device": snapshot.device_identity(),
            "charge_state": snapshot.charge_state(),
            "snapshot": &*snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    coordinator.transport().lock().await.close().await;
    Ok(())
}
