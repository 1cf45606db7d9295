// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration utilities
//!
//! This module provides utility functions for working with configuration
//! settings, including validation and schema management.

use anyhow::{Context, Result};
use log::debug;

use super::Config;

/// Output the embedded JSON schema to the console.
///
/// This function is called when the `--show-config-schema` flag is provided
/// on the command line.
///
/// # Example
///
/// ```bash
/// ./modbus_pseudo_sensor --show-config-schema > config_schema.json
/// ```
pub fn output_config_schema() -> Result<()> {
    let schema_str = include_str!("../../resources/config.schema.json");

    let schema: serde_json::Value =
        serde_json::from_str(schema_str).context("Failed to parse JSON schema")?;

    let formatted_schema =
        serde_json::to_string_pretty(&schema).context("Failed to format JSON schema")?;

    println!("{}", formatted_schema);

    Ok(())
}

/// Check if a string is a valid IP address
///
/// Validates that a string represents a valid IPv4 or IPv6 address,
/// or is one of the special values like "localhost" or "0.0.0.0".
pub fn is_valid_ip_address(addr: &str) -> bool {
    if addr.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }

    // Special cases
    matches!(addr, "localhost" | "::" | "::0" | "0.0.0.0")
}

/// Validates the configuration against rules that aren't covered by the JSON schema.
///
/// # Validation Rules
///
/// - **Port**: the Modbus port must not be 0 in a configuration file
/// - **Sessions**: at least one session slot
/// - **Tick**: the pseudo sensor tick must last at least one millisecond
/// - **Address**: an empty host is rejected; a host that is not an IP address is
///   accepted and resolved at startup
pub fn validate_specific_rules(config: &Config) -> Result<()> {
    debug!("Performing additional validation checks");

    if config.modbus.port == 0 {
        anyhow::bail!("Invalid Modbus port number: {}", config.modbus.port);
    }

    if config.modbus.max_sessions == 0 {
        anyhow::bail!("max_sessions must be at least 1");
    }

    if config.simulation.tick_interval_ms == 0 {
        anyhow::bail!("tick_interval_ms must be at least 1");
    }

    if let Some(address) = &config.modbus.address {
        if address.trim().is_empty() {
            anyhow::bail!("Modbus address must not be empty, omit it to listen on every interface");
        }
        if !is_valid_ip_address(address) {
            debug!("Modbus address {} will be resolved as a hostname", address);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_valid_ip_address() {
        assert!(is_valid_ip_address("127.0.0.1"));
        assert!(is_valid_ip_address("::1"));
        assert!(is_valid_ip_address("localhost"));
        assert!(!is_valid_ip_address("modbus.example"));
    }

    #[test]
    fn test_default_config_passes_specific_rules() {
        assert!(validate_specific_rules(&Config::default()).is_ok());
    }

    #[test]
    fn test_specific_rules_reject_degenerate_values() {
        let mut config = Config::default();
        config.modbus.max_sessions = 0;
        assert!(validate_specific_rules(&config).is_err());

        let mut config = Config::default();
        config.simulation.tick_interval_ms = 0;
        assert!(validate_specific_rules(&config).is_err());

        let mut config = Config::default();
        config.modbus.address = Some("  ".to_string());
        assert!(validate_specific_rules(&config).is_err());

        let mut config = Config::default();
        config.modbus.port = 0;
        assert!(validate_specific_rules(&config).is_err());
    }
}
