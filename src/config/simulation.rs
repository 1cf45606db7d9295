// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Configuration for the pseudo sensor

use serde::{Deserialize, Serialize};

/// Settings of the pseudo sensor feeding the input register
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Start the pseudo sensor. When disabled the input register stays at zero.
    #[serde(default)]
    pub enabled: bool,

    /// Delay between two sensor ticks, in milliseconds (default: 1000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}
