// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Shared register map of the pseudo-sensor device
//!
//! The device exposes two small register banks:
//!
//! | Bank | Address | Description | Values |
//! |------|---------|-------------|--------|
//! | Holding (read/write) | 0 | Base level flag | 18 = low, 27 = high |
//! | Input (read only) | 0 | Sensed value | computed by the pseudo sensor |
//!
//! Both banks hold [`REGISTER_COUNT`] registers; the unused ones stay at zero.
//!
//! ### Thread Safety
//!
//! Each bank sits behind its own `Mutex`, so a single register access can
//! never observe a torn value. There is no multi-register transaction: a
//! range read is consistent within one bank only.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;

/// Number of registers allocated in each bank
pub const REGISTER_COUNT: usize = 8;

/// Holding register carrying the base level flag
pub const APP_BASE_ADDR: u16 = 0;

/// Base level "low"
pub const APP_BASE_LOW: u16 = 18;

/// Base level "high"
pub const APP_BASE_HIGH: u16 = 27;

/// Input register carrying the sensed value
pub const APP_VAL_ADDR: u16 = 0;

/// Largest quantity a single Modbus read may ask for
pub const MAX_READ_COUNT: usize = 125;

/// Largest quantity a single Modbus write may carry
pub const MAX_WRITE_COUNT: usize = 123;

/// The two register banks of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterKind {
    /// Read/write registers, written by clients
    Holding,
    /// Read-only registers from the client point of view, written by the sensor
    Input,
}

impl fmt::Display for RegisterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisterKind::Holding => write!(f, "holding"),
            RegisterKind::Input => write!(f, "input"),
        }
    }
}

/// Errors raised by register accesses
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegisterError {
    #[error("{count} {kind} register(s) at address {addr} exceed the table of {} registers", REGISTER_COUNT)]
    OutOfRange {
        kind: RegisterKind,
        addr: u16,
        count: usize,
    },

    #[error("invalid quantity of {kind} registers: {count} (expected 1 to {max})")]
    InvalidCount {
        kind: RegisterKind,
        count: usize,
        max: usize,
    },
}

/// Register map shared between the pseudo sensor and every client session
#[derive(Debug, Default)]
pub struct RegisterMap {
    holding: Mutex<[u16; REGISTER_COUNT]>,
    input: Mutex<[u16; REGISTER_COUNT]>,
}

impl RegisterMap {
    /// Create a register map with every register set to zero
    pub fn new() -> Self {
        Self::default()
    }

    fn bank(&self, kind: RegisterKind) -> MutexGuard<'_, [u16; REGISTER_COUNT]> {
        let bank = match kind {
            RegisterKind::Holding => &self.holding,
            RegisterKind::Input => &self.input,
        };
        // Plain u16 values cannot be left half-updated by a panicking holder
        bank.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read a single register
    pub fn read(&self, kind: RegisterKind, addr: u16) -> Result<u16, RegisterError> {
        self.read_range(kind, addr, 1).map(|values| values[0])
    }

    /// Write a single register
    pub fn write(&self, kind: RegisterKind, addr: u16, value: u16) -> Result<(), RegisterError> {
        self.write_range(kind, addr, std::slice::from_ref(&value))
    }

    /// Read `count` consecutive registers starting at `addr`
    ///
    /// ### Errors
    ///
    /// Returns [`RegisterError::InvalidCount`] if `count` is zero or above
    /// [`MAX_READ_COUNT`], and [`RegisterError::OutOfRange`] if any requested
    /// register lies outside the allocated table. Nothing is read in that case.
    pub fn read_range(
        &self,
        kind: RegisterKind,
        addr: u16,
        count: u16,
    ) -> Result<Vec<u16>, RegisterError> {
        let range = checked_range(kind, addr, count.into(), MAX_READ_COUNT)?;
        Ok(self.bank(kind)[range].to_vec())
    }

    /// Write `values` to consecutive registers starting at `addr`
    ///
    /// The write is all-or-nothing: an out-of-range request leaves the bank
    /// untouched.
    pub fn write_range(
        &self,
        kind: RegisterKind,
        addr: u16,
        values: &[u16],
    ) -> Result<(), RegisterError> {
        let range = checked_range(kind, addr, values.len(), MAX_WRITE_COUNT)?;
        self.bank(kind)[range].copy_from_slice(values);
        Ok(())
    }

    /// Apply `update` to one register under the bank lock and return the new value
    pub fn update(
        &self,
        kind: RegisterKind,
        addr: u16,
        update: impl FnOnce(u16) -> u16,
    ) -> Result<u16, RegisterError> {
        let range = checked_range(kind, addr, 1, 1)?;
        let mut bank = self.bank(kind);
        let register = &mut bank[range.start];
        *register = update(*register);
        Ok(*register)
    }

    /// Current base level flag (holding register [`APP_BASE_ADDR`])
    pub fn base_level(&self) -> u16 {
        self.bank(RegisterKind::Holding)[APP_BASE_ADDR as usize]
    }

    /// Set the base level flag
    pub fn set_base_level(&self, level: u16) {
        self.bank(RegisterKind::Holding)[APP_BASE_ADDR as usize] = level;
    }

    /// Current sensed value (input register [`APP_VAL_ADDR`])
    pub fn sensed_value(&self) -> u16 {
        self.bank(RegisterKind::Input)[APP_VAL_ADDR as usize]
    }

    /// Publish a new sensed value
    pub fn set_sensed_value(&self, value: u16) {
        self.bank(RegisterKind::Input)[APP_VAL_ADDR as usize] = value;
    }
}

fn checked_range(
    kind: RegisterKind,
    addr: u16,
    count: usize,
    max: usize,
) -> Result<std::ops::Range<usize>, RegisterError> {
    if count == 0 || count > max {
        return Err(RegisterError::InvalidCount { kind, count, max });
    }
    let start = usize::from(addr);
    match start.checked_add(count) {
        Some(end) if end <= REGISTER_COUNT => Ok(start..end),
        _ => Err(RegisterError::OutOfRange { kind, addr, count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_map_is_zeroed() {
        let map = RegisterMap::new();
        assert_eq!(
            map.read_range(RegisterKind::Holding, 0, 8).unwrap(),
            vec![0; 8]
        );
        assert_eq!(map.read_range(RegisterKind::Input, 0, 8).unwrap(), vec![0; 8]);
    }

    #[test]
    fn test_banks_are_independent() {
        let map = RegisterMap::new();
        map.write(RegisterKind::Holding, 0, APP_BASE_HIGH).unwrap();
        assert_eq!(map.read(RegisterKind::Holding, 0).unwrap(), APP_BASE_HIGH);
        assert_eq!(map.read(RegisterKind::Input, 0).unwrap(), 0);

        map.set_sensed_value(1234);
        assert_eq!(map.sensed_value(), 1234);
        assert_eq!(map.base_level(), APP_BASE_HIGH);
    }

    #[test]
    fn test_out_of_range_is_rejected_without_side_effects() {
        let map = RegisterMap::new();
        assert_eq!(
            map.read(RegisterKind::Input, 8),
            Err(RegisterError::OutOfRange {
                kind: RegisterKind::Input,
                addr: 8,
                count: 1
            })
        );

        // Spans the end of the table: nothing may be written
        assert!(map
            .write_range(RegisterKind::Holding, 6, &[1, 2, 3])
            .is_err());
        assert_eq!(
            map.read_range(RegisterKind::Holding, 6, 2).unwrap(),
            vec![0, 0]
        );

        assert!(map.read_range(RegisterKind::Holding, u16::MAX, 2).is_err());
    }

    #[test]
    fn test_quantity_is_checked_before_address() {
        let map = RegisterMap::new();
        assert_eq!(
            map.read_range(RegisterKind::Holding, 0, 0),
            Err(RegisterError::InvalidCount {
                kind: RegisterKind::Holding,
                count: 0,
                max: MAX_READ_COUNT
            })
        );
        assert!(matches!(
            map.read_range(RegisterKind::Input, 0, 126),
            Err(RegisterError::InvalidCount { count: 126, .. })
        ));
        // A valid quantity that does not fit the table is an address error
        assert!(matches!(
            map.read_range(RegisterKind::Input, 0, 125),
            Err(RegisterError::OutOfRange { .. })
        ));
        assert!(matches!(
            map.write_range(RegisterKind::Holding, 0, &[]),
            Err(RegisterError::InvalidCount { max: MAX_WRITE_COUNT, .. })
        ));
        assert!(matches!(
            map.write_range(RegisterKind::Holding, 0, &[0; 124]),
            Err(RegisterError::InvalidCount { count: 124, .. })
        ));
    }

    #[test]
    fn test_update_applies_under_lock() {
        let map = RegisterMap::new();
        map.write(RegisterKind::Holding, 3, 41).unwrap();
        let value = map.update(RegisterKind::Holding, 3, |v| v + 1).unwrap();
        assert_eq!(value, 42);
        assert_eq!(map.read(RegisterKind::Holding, 3).unwrap(), 42);
        assert!(map.update(RegisterKind::Holding, 8, |v| v).is_err());
    }

    #[test]
    fn test_concurrent_access_never_tears() {
        let map = Arc::new(RegisterMap::new());
        map.set_base_level(APP_BASE_LOW);

        let writers: Vec<_> = (0..4)
            .map(|i| {
                let map = Arc::clone(&map);
                thread::spawn(move || {
                    for n in 0..2_000 {
                        let level = if (n + i) % 2 == 0 {
                            APP_BASE_LOW
                        } else {
                            APP_BASE_HIGH
                        };
                        map.write(RegisterKind::Holding, APP_BASE_ADDR, level).unwrap();
                    }
                })
            })
            .collect();

        for _ in 0..2_000 {
            let level = map.base_level();
            assert!(level == APP_BASE_LOW || level == APP_BASE_HIGH);
        }

        for writer in writers {
            writer.join().unwrap();
        }
    }
}
