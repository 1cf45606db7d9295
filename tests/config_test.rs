// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

use std::fs;
use std::sync::Once;

use anyhow::Result;
use modbus_pseudo_sensor::config::{Config, ModbusConfig, OverloadPolicy, SimulationConfig};
use tempfile::tempdir;

static INIT: Once = Once::new();

// Setup logger for tests
fn setup() {
    INIT.call_once(|| {
        env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .init();
    });
}

#[test]
fn test_config_load_and_save() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");

    let config = Config {
        modbus: ModbusConfig {
            address: Some("127.0.0.1".to_string()),
            port: 1502,
            max_sessions: 8,
            rejection_report_interval_secs: 30,
            overload_policy: OverloadPolicy::Drop,
        },
        simulation: SimulationConfig {
            enabled: true,
            tick_interval_ms: 250,
        },
    };
    config.save_to_file(&config_path)?;

    let loaded = Config::from_file(&config_path)?;
    assert_eq!(loaded.modbus.address.as_deref(), Some("127.0.0.1"));
    assert_eq!(loaded.modbus.port, 1502);
    assert_eq!(loaded.modbus.max_sessions, 8);
    assert_eq!(loaded.modbus.rejection_report_interval_secs, 30);
    assert_eq!(loaded.modbus.overload_policy, OverloadPolicy::Drop);
    assert!(loaded.simulation.enabled);
    assert_eq!(loaded.simulation.tick_interval_ms, 250);

    Ok(())
}

#[test]
fn test_missing_config_file_is_created_with_defaults() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("non_existent.yaml");

    let config = Config::from_file(&config_path)?;
    assert!(config_path.exists());
    assert_eq!(config.modbus.address, None);
    assert_eq!(config.modbus.port, 50200);
    assert_eq!(config.modbus.max_sessions, 4);
    assert_eq!(config.modbus.rejection_report_interval_secs, 10);
    assert_eq!(config.modbus.overload_policy, OverloadPolicy::Defer);
    assert!(!config.simulation.enabled);
    assert_eq!(config.simulation.tick_interval_ms, 1000);

    // The created file loads back to the same values
    let reloaded = Config::from_file(&config_path)?;
    assert_eq!(reloaded.modbus.port, 50200);

    Ok(())
}

#[test]
fn test_partial_and_empty_documents_use_defaults() -> Result<()> {
    setup();
    let config = Config::from_yaml_str("")?;
    assert_eq!(config.modbus.port, 50200);

    let config = Config::from_yaml_str("modbus:\n  overload_policy: drop\n")?;
    assert_eq!(config.modbus.overload_policy, OverloadPolicy::Drop);
    assert_eq!(config.modbus.max_sessions, 4);
    assert!(!config.simulation.enabled);

    Ok(())
}

#[test]
fn test_schema_rejects_invalid_documents() {
    setup();
    // Out of range port
    assert!(Config::from_yaml_str("modbus:\n  port: 70000\n").is_err());
    // Unknown policy
    assert!(Config::from_yaml_str("modbus:\n  overload_policy: reject\n").is_err());
    // Unknown key
    assert!(Config::from_yaml_str("modbus:\n  max_thread: 4\n").is_err());
    // No session slot
    assert!(Config::from_yaml_str("modbus:\n  max_sessions: 0\n").is_err());
    // Wrong type
    assert!(Config::from_yaml_str("simulation:\n  enabled: sometimes\n").is_err());
}

#[test]
fn test_invalid_config_creates_sample_file() -> Result<()> {
    setup();
    let temp_dir = tempdir()?;
    let config_path = temp_dir.path().join("config.yaml");
    fs::write(&config_path, "modbus:\n  port: \"not a port\"\n")?;

    let result = Config::from_file(&config_path);
    assert!(result.is_err());

    let sample_path = temp_dir.path().join("config.sample.yaml");
    assert!(sample_path.exists());
    let sample = Config::from_file(&sample_path)?;
    assert_eq!(sample.modbus.port, 50200);

    Ok(())
}

#[test]
fn test_apply_args_overrides_only_given_values() {
    setup();
    let mut config = Config::default();

    config.apply_args(None, None, None);
    assert_eq!(config.modbus.address, None);
    assert_eq!(config.modbus.port, 50200);
    assert!(!config.simulation.enabled);

    config.apply_args(Some("::1".to_string()), Some(1502), Some(true));
    assert_eq!(config.modbus.address.as_deref(), Some("::1"));
    assert_eq!(config.modbus.port, 1502);
    assert!(config.simulation.enabled);

    config.apply_args(None, None, Some(false));
    assert_eq!(config.modbus.port, 1502);
    assert!(!config.simulation.enabled);
}
