// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus pseudo-sensor library
//!
//! A Modbus/TCP device exposing a base level holding register and a sensed
//! value input register, with a pseudo sensor producing the readings and a
//! client probe to drive it.

pub mod acquisition;
pub mod client;
pub mod config;
pub mod daemon;
pub mod modbus;
