// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus communication module
//!
//! This module provides the Modbus TCP server of the pseudo-sensor device.
//!
//! ## Key Components
//!
//! - [`RegisterMap`]: holding and input registers shared by every session and
//!   by the pseudo sensor.
//! - [`PseudoSensorService`]: per-session dispatch of Modbus requests.
//! - [`SessionStream`]: connection wrapper tracing traffic and releasing the
//!   session slot on teardown.
//! - [`AdmissionController`]: bounds the number of concurrent sessions.
//! - [`ModbusServer`]: binds the listening endpoints and runs their accept loops.
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use modbus_pseudo_sensor::config::ModbusConfig;
//! use modbus_pseudo_sensor::modbus::{ModbusServer, RegisterMap};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registers = Arc::new(RegisterMap::new());
//! let server = ModbusServer::bind(&ModbusConfig::default(), registers).await?;
//! server.run().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Register Map
//!
//! ### Holding Registers (Read/Write)
//!
//! - Register 0: base level, 18 (low) or 27 (high)
//!
//! ### Input Registers (Read-Only)
//!
//! - Register 0: sensed value computed by the pseudo sensor
//!
//! Registers 1 to 7 of both banks exist and read as zero.

pub mod admission;
pub mod listener;
pub mod modbus_server;
pub mod register_map;
pub mod session;

pub use admission::{AdmissionController, RejectionThrottle};
pub use listener::{ModbusServer, ServerError};
pub use modbus_server::PseudoSensorService;
pub use register_map::{
    RegisterError, RegisterKind, RegisterMap, APP_BASE_ADDR, APP_BASE_HIGH, APP_BASE_LOW,
    APP_VAL_ADDR, MAX_READ_COUNT, MAX_WRITE_COUNT, REGISTER_COUNT,
};
pub use session::{SessionEnd, SessionGuard, SessionStream};
