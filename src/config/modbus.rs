// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus TCP server configuration
//!
//! This module defines the structures for configuring the listening endpoints
//! and the session limits of the Modbus TCP server.

use serde::{Deserialize, Serialize};

/// Default Modbus TCP port of the pseudo-sensor device
pub const DEFAULT_MODBUS_PORT: u16 = 50200;

/// What to do with a connection arriving while every session slot is taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OverloadPolicy {
    /// Keep the connection pending until a slot frees, then serve it
    #[default]
    Defer,
    /// Close the connection immediately
    Drop,
}

/// Configuration for the Modbus TCP server component.
///
/// # Fields
///
/// * `address` - Host to bind to; `None` binds every interface (IPv6 and IPv4)
/// * `port` - TCP port number for the Modbus server (default: 50200)
/// * `max_sessions` - Number of sessions served concurrently (default: 4)
/// * `rejection_report_interval_secs` - Minimum delay between two overload warnings
/// * `overload_policy` - Handling of connections arriving at full capacity
///
/// # Example
///
/// ```
/// use modbus_pseudo_sensor::config::{ModbusConfig, OverloadPolicy};
///
/// let modbus_config = ModbusConfig {
///     address: Some("127.0.0.1".to_string()),
///     port: 1502,
///     overload_policy: OverloadPolicy::Drop,
///     ..ModbusConfig::default()
/// };
/// assert_eq!(modbus_config.max_sessions, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusConfig {
    /// The network address the Modbus server will bind to.
    ///
    /// Can be an IPv4/IPv6 address or a hostname; a hostname resolving to several
    /// addresses gets one endpoint per address.
    #[serde(default)]
    pub address: Option<String>,

    /// The TCP port the Modbus server will listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Maximum number of concurrent sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    /// Overload warnings are emitted at most once per this many seconds.
    #[serde(default = "default_rejection_report_interval_secs")]
    pub rejection_report_interval_secs: u64,

    #[serde(default)]
    pub overload_policy: OverloadPolicy,
}

fn default_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_max_sessions() -> usize {
    4
}

fn default_rejection_report_interval_secs() -> u64 {
    10
}

impl Default for ModbusConfig {
    fn default() -> Self {
        Self {
            address: None,
            port: default_port(),
            max_sessions: default_max_sessions(),
            rejection_report_interval_secs: default_rejection_report_interval_secs(),
            overload_policy: OverloadPolicy::default(),
        }
    }
}
