// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the rust-midnite project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Rust Midnite library
//!
//! Modbus TCP link to Midnite Solar Classic charge controllers: register
//! catalogue and codec, polling coordinator publishing decoded snapshots,
//! validated command writes, and the setup flow that discovers and
//! validates a controller before it is configured.

pub mod command;
pub mod config;
pub mod coordinator;
pub mod daemon;
pub mod discovery;
pub mod error;
pub mod modbus;
pub mod registers;
pub mod transport;

pub use error::{LinkError, LinkResult, WriteRejection};
