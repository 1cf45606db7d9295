// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::process::ExitCode;
use std::time::Duration;

use clap::{ArgAction, Parser};
use log::LevelFilter;

use modbus_pseudo_sensor::client::{self, Job, DEFAULT_RESPONSE_TIMEOUT};
use modbus_pseudo_sensor::config::DEFAULT_MODBUS_PORT;

/// Probe for the Modbus pseudo-sensor: performs one job and disconnects
#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    /// Modbus server host
    host: String,

    /// Modbus server port
    #[clap(short = 'P', long, default_value_t = DEFAULT_MODBUS_PORT)]
    port: u16,

    /// Job: 0|low, 1|high, 2|read-base, 3|read-value
    #[clap(short = 'j', long, default_value = "3")]
    job: Job,

    /// Response timeout in milliseconds
    #[clap(long, default_value_t = DEFAULT_RESPONSE_TIMEOUT.as_millis() as u64)]
    timeout_ms: u64,

    /// Debug output, repeat to include Modbus library traces
    #[clap(short = 'd', long = "debug", action = ArgAction::Count)]
    debug: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let mut builder = env_logger::Builder::from_default_env();
    builder.filter_level(LevelFilter::Warn);
    if args.debug > 0 {
        builder.filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Debug);
        builder.filter_module("modbus_pseudo_sensor", LevelFilter::Debug);
    }
    if args.debug > 2 {
        builder.filter_module("tokio_modbus", LevelFilter::Trace);
    }
    builder.init();

    let outcome = client::execute(
        &args.host,
        args.port,
        args.job,
        Duration::from_millis(args.timeout_ms),
    )
    .await?;

    match outcome {
        Ok(client::JobOutcome::Read { addr, value }) => {
            println!("reg[{}] = {}", addr, value);
            Ok(ExitCode::SUCCESS)
        }
        Ok(client::JobOutcome::Written { .. }) => Ok(ExitCode::SUCCESS),
        Err(err) => {
            eprintln!("ERROR: {}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}
