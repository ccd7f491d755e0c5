// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::error::Error;

use clap::Parser;
use log::info;
use rust_midnite::modbus::{serve, ClassicSimulator};
use tokio::net::TcpListener;

/// Serve a simulated Midnite Classic over Modbus TCP
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Address to bind
    #[clap(long, default_value = "127.0.0.1")]
    address: String,

    /// Port to listen on
    #[clap(long, default_value = "5020")]
    port: u16,

    /// Keep battery voltage and power constant
    #[clap(long)]
    frozen: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init_from_env(
        env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"),
    );

    let args = Args::parse();
    let listener = TcpListener::bind((args.address.as_str(), args.port)).await?;
    info!("Simulated Classic listening on {}", listener.local_addr()?);

    let simulator = ClassicSimulator::new().live(!args.frozen);
    tokio::select! {
        result = serve(listener, simulator) => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }
    Ok(())
}
