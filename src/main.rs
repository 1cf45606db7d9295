// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

// Main entry point for the Modbus pseudo-sensor server
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use log::{info, LevelFilter};
use tokio::signal;

use modbus_pseudo_sensor::config::{self, Config};
use modbus_pseudo_sensor::daemon::Daemon;

/// Modbus/TCP server exposing a pseudo sensor
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Host to listen on (default: every interface)
    #[arg(short = 'S', long = "host")]
    host: Option<String>,

    /// TCP port to listen on (default: 50200)
    #[arg(short = 'P', long = "port", value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Operating mode: 1 starts the pseudo sensor, any other value serves static registers
    #[arg(short = 'm', long = "mode")]
    mode: Option<u8>,

    /// Increase debug output, repeat up to three times
    #[arg(short = 'd', long = "debug", action = ArgAction::Count)]
    debug: u8,

    /// Disable all logging output
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Path to configuration file (YAML format)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to a configuration to validate and exit
    #[arg(long)]
    validate_config: Option<PathBuf>,

    /// Output the configuration schema as JSON and exit
    #[arg(long)]
    show_config_schema: bool,
}

/// Build the logger from the verbosity flags
///
/// Each `-d` enables one more level of detail: session events, then byte
/// counts and sensor ticks, then the Modbus library internals.
fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::from_default_env();

    if args.quiet {
        builder.filter_level(LevelFilter::Off);
    } else {
        builder.filter_level(LevelFilter::Info);
        match args.debug {
            0 => {}
            1 => {
                builder.filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Debug);
            }
            2 => {
                builder.filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace);
            }
            _ => {
                builder
                    .filter_module(env!("CARGO_CRATE_NAME"), LevelFilter::Trace)
                    .filter_module("tokio_modbus", LevelFilter::Trace);
            }
        }
    }

    builder.init();
}

/// Whether a `--mode` value starts the pseudo sensor
fn sensor_mode(mode: u8) -> bool {
    mode == 1
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    // Check if --show-config-schema flag is set
    if args.show_config_schema {
        return config::output_config_schema();
    }

    // Validate configuration file if --validate-config is set
    if let Some(validate_path) = &args.validate_config {
        if !validate_path.exists() {
            anyhow::bail!(
                "Configuration file does not exist: {}",
                validate_path.display()
            );
        }

        Config::from_file(validate_path).context("Configuration validation failed")?;
        println!("Configuration file is valid: {}", validate_path.display());
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Apply command line overrides
    config.apply_args(args.host.clone(), args.port, args.mode.map(sensor_mode));

    info!(
        "Starting Modbus pseudo-sensor {}, at most {} concurrent sessions",
        env!("CARGO_PKG_VERSION"),
        config.modbus.max_sessions
    );

    let mut daemon = Daemon::new();
    daemon.launch(&config).await?;

    // Wait for termination signal or for a task to fail
    let outcome = tokio::select! {
        signal = signal::ctrl_c() => {
            signal.context("Error waiting for shutdown signal")?;
            info!("Received shutdown signal, terminating daemon");
            Ok(())
        }
        failure = daemon.run_until_failure() => failure,
    };

    daemon.shutdown();
    daemon.join().await?;

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_flag() {
        let args = Args::try_parse_from(["modbus_pseudo_sensor", "-m", "2", "-dd"]).unwrap();
        assert_eq!(args.mode, Some(2));
        assert_eq!(args.debug, 2);
        assert!(!sensor_mode(2));
        assert!(!sensor_mode(0));
        assert!(sensor_mode(1));

        let args = Args::try_parse_from(["modbus_pseudo_sensor"]).unwrap();
        assert_eq!(args.mode, None);
        assert!(Args::try_parse_from(["modbus_pseudo_sensor", "-P", "0"]).is_err());
    }
}
