// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Data acquisition module
//!
//! The device has no real probe: readings come from the pseudo sensor, which
//! derives them from a time-varying waveform and the base level register.

pub mod pseudo_sensor;

pub use pseudo_sensor::{sensor_value, waveform, PseudoSensor};
