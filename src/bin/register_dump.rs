// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::error::Error;
use std::time::Duration;

use clap::Parser;
use rust_midnite::registers::{decode, Group, RegisterMap};
use rust_midnite::transport::{Endpoint, RegisterTransport, TcpTransport};

/// Read one register group of a Classic and print the decoded fields
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Controller address
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Modbus TCP port
    #[clap(long, default_value = "502")]
    port: u16,

    /// Modbus unit identifier
    #[clap(long, default_value = "10")]
    slave_id: u8,

    /// Group to read (status, settings, temperatures, energy, time, network,
    /// device_info, diagnostics)
    #[clap(long, default_value = "status")]
    group: Group,

    /// Request timeout in milliseconds
    #[clap(long, default_value = "3000")]
    timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let map = RegisterMap::classic()?;
    let span = map
        .group_span(args.group)
        .ok_or_else(|| format!("group {} has no registers", args.group))?;

    let endpoint = Endpoint::new(args.address, args.port, args.slave_id);
    println!("Connecting to {}", endpoint);
    let mut transport = TcpTransport::new(endpoint, Duration::from_millis(args.timeout_ms));
    transport.connect().await?;

    println!(
        "Reading group {} ({} registers starting at {})",
        args.group, span.count, span.start
    );
    let words = transport.read_registers(span.start, span.count).await?;
    transport.close().await;
    println!("Raw register values: {:?}", words);

    for desc in map.descriptors_in_group(args.group) {
        let offset = (desc.address - span.start) as usize;
        let Some(slice) = words.get(offset..offset + desc.width.count() as usize) else {
            println!("{:>5} {:<32} missing from response", desc.address, desc.name);
            continue;
        };
        let decoded = decode(desc, slice)?;
        println!(
            "{:>5} {:<32} {:>12} {} (raw {:#x})",
            desc.address, desc.name, decoded.value, desc.unit, decoded.raw
        );
    }

    Ok(())
}
