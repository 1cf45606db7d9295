// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Pseudo sensor
//!
//! Produces a synthetic reading once per tick from the tick counter `t` and the base
//! level held in the holding register:
//!
//! ```text
//! k     = sin(2·t·π/180) + 2·sin(t·π/180)·100
//! value = round(k + 100·base)
//! ```
//!
//! The reading is published in the input register. With the two base levels the
//! value oscillates around 1800 (low) or 2700 (high) with an amplitude of about 200.

use std::f64::consts::PI;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;

use log::{info, trace};
use tokio::time::sleep;

use crate::config::SimulationConfig;
use crate::modbus::{RegisterMap, APP_BASE_LOW};

const DEG_TO_RAD: f64 = PI / 180.0;

/// Waveform term `k` of the pseudo sensor for tick `tick`
///
/// Both sines are periodic over 360 ticks, so only `tick mod 360` is used; this
/// keeps the phase exact however long the sensor has been running.
pub fn waveform(tick: u64) -> f64 {
    let t = (tick % 360) as f64;
    (t * DEG_TO_RAD * 2.0).sin() + 2.0 * (t * DEG_TO_RAD).sin() * 100.0
}

/// Sensed value for tick `tick` and base level `base`, saturated into a register
pub fn sensor_value(tick: u64, base: u16) -> u16 {
    let value = waveform(tick) + 100.0 * f64::from(base);
    value.round().clamp(0.0, f64::from(u16::MAX)) as u16
}

/// Background loop refreshing the sensed value
pub struct PseudoSensor {
    registers: Arc<RegisterMap>,
    tick_interval: Duration,
    tick: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl PseudoSensor {
    /// Create a sensor publishing into `registers` every `tick_interval`
    ///
    /// The base level is reset to low here, before the sensor can be spawned,
    /// so that any later write from a client is kept.
    pub fn new(registers: Arc<RegisterMap>, tick_interval: Duration) -> Self {
        registers.set_base_level(APP_BASE_LOW);
        Self {
            registers,
            tick_interval,
            tick: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn from_config(config: &SimulationConfig, registers: Arc<RegisterMap>) -> Self {
        Self::new(registers, Duration::from_millis(config.tick_interval_ms))
    }

    /// Share an existing running flag instead of the sensor's own
    pub fn with_running_flag(mut self, running: Arc<AtomicBool>) -> Self {
        self.running = running;
        self
    }

    /// Flag stopping the loop when cleared
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Shared tick counter (number of values published so far)
    pub fn tick_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.tick)
    }

    /// Compute and publish the value for the current tick, then advance the tick
    pub fn step(&self) -> u16 {
        let t = self.tick.load(Ordering::Relaxed);
        let base = self.registers.base_level();
        let value = sensor_value(t, base);
        self.registers.set_sensed_value(value);
        trace!("base={} k={:.6} val={}", base, waveform(t), value);
        self.tick.store(t.wrapping_add(1), Ordering::Relaxed);
        value
    }

    /// Run the sensor until the running flag is cleared
    ///
    /// The first value is published one tick interval after the start.
    pub async fn run(self) {
        info!(
            "Pseudo sensor started, one reading every {} ms",
            self.tick_interval.as_millis()
        );

        while self.running.load(Ordering::SeqCst) {
            sleep(self.tick_interval).await;
            self.step();
        }

        info!("Pseudo sensor stopped");
    }
}
