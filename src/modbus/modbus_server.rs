// Copyright (c) 2025 Ronan LE MEILLAT, SCTG Development
// This file is part of the modbus-pseudo-sensor project and is licensed under the
// SCTG Development Non-Commercial License v1.0 (see LICENSE.md for details).

//! Modbus request dispatch for the pseudo-sensor device
//!
//! For avoiding confusion with the Modbus master/slave terminology, this module uses
//! the terms "server" and "client" instead. The server is the device that provides data,
//! while the client is the device that requests data.
//!
//! Framing and the request/reply loop are handled by `tokio-modbus`. Every admitted
//! connection gets its own [`PseudoSensorService`] instance; all of them share the
//! same [`RegisterMap`].
//!
//! ## Supported Function Codes
//!
//! | Code | Function | Bank |
//! |------|----------|------|
//! | 0x03 | Read Holding Registers | holding |
//! | 0x04 | Read Input Registers | input |
//! | 0x06 | Write Single Register | holding |
//! | 0x10 | Write Multiple Registers | holding |
//! | 0x16 | Mask Write Register | holding |
//! | 0x17 | Read/Write Multiple Registers | holding |
//!
//! The device allocates no coils and no discrete inputs, so bit functions are
//! answered with `IllegalDataAddress`. Any other function code is answered with
//! `IllegalFunction`.
//!
//! A register quantity of zero or above the protocol limit (125 read, 123
//! written) is answered with `IllegalDataValue`; a valid quantity reaching past
//! the table with `IllegalDataAddress`.

use std::{future, sync::Arc};

use log::{debug, trace};

use tokio_modbus::prelude::*;

use super::register_map::{RegisterError, RegisterKind, RegisterMap};

/// Per-connection Modbus service bound to the shared register map
///
/// Instances are cheap: they only carry the session id used in log messages and
/// a handle on the register map.
#[derive(Debug, Clone)]
pub struct PseudoSensorService {
    session_id: u64,
    registers: Arc<RegisterMap>,
}

impl tokio_modbus::server::Service for PseudoSensorService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    /// Process a Modbus request against the register map
    fn call(&self, req: Self::Request) -> Self::Future {
        trace!("Session {}: request {:?}", self.session_id, req);

        let res = self.dispatch(req);

        if let Err(e) = &res {
            debug!("Session {}: replying with exception {:?}", self.session_id, e);
        }

        future::ready(res)
    }
}

impl PseudoSensorService {
    /// Create a service for session `session_id`
    pub fn new(session_id: u64, registers: Arc<RegisterMap>) -> Self {
        Self {
            session_id,
            registers,
        }
    }

    /// Id of the session this service belongs to
    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    /// Apply one request to the register map and build the reply
    pub fn dispatch(&self, req: Request<'static>) -> Result<Response, ExceptionCode> {
        let registers = &self.registers;
        match req {
            Request::ReadHoldingRegisters(addr, cnt) => registers
                .read_range(RegisterKind::Holding, addr, cnt)
                .map(Response::ReadHoldingRegisters)
                .map_err(to_exception),
            Request::ReadInputRegisters(addr, cnt) => registers
                .read_range(RegisterKind::Input, addr, cnt)
                .map(Response::ReadInputRegisters)
                .map_err(to_exception),
            Request::WriteSingleRegister(addr, value) => {
                debug!(
                    "Session {}: writing {} to holding register {}",
                    self.session_id, value, addr
                );
                registers
                    .write(RegisterKind::Holding, addr, value)
                    .map(|_| Response::WriteSingleRegister(addr, value))
                    .map_err(to_exception)
            }
            Request::WriteMultipleRegisters(addr, values) => {
                debug!(
                    "Session {}: writing {:?} to holding registers from {}",
                    self.session_id, values, addr
                );
                registers
                    .write_range(RegisterKind::Holding, addr, &values)
                    .map(|_| Response::WriteMultipleRegisters(addr, values.len() as u16))
                    .map_err(to_exception)
            }
            Request::MaskWriteRegister(addr, and_mask, or_mask) => registers
                .update(RegisterKind::Holding, addr, |current| {
                    (current & and_mask) | (or_mask & !and_mask)
                })
                .map(|_| Response::MaskWriteRegister(addr, and_mask, or_mask))
                .map_err(to_exception),
            Request::ReadWriteMultipleRegisters(read_addr, read_cnt, write_addr, values) => {
                // The write is performed before the read, and only if the read is valid
                registers
                    .read_range(RegisterKind::Holding, read_addr, read_cnt)
                    .and_then(|_| registers.write_range(RegisterKind::Holding, write_addr, &values))
                    .and_then(|_| registers.read_range(RegisterKind::Holding, read_addr, read_cnt))
                    .map(Response::ReadWriteMultipleRegisters)
                    .map_err(to_exception)
            }
            Request::ReadCoils(..)
            | Request::ReadDiscreteInputs(..)
            | Request::WriteSingleCoil(..)
            | Request::WriteMultipleCoils(..) => Err(ExceptionCode::IllegalDataAddress),
            _ => {
                debug!(
                    "Session {}: unimplemented function code in request {:?}",
                    self.session_id, req
                );
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }
}

fn to_exception(err: RegisterError) -> ExceptionCode {
    match err {
        RegisterError::InvalidCount { .. } => {
            debug!("Exception::IllegalDataValue - {}", err);
            ExceptionCode::IllegalDataValue
        }
        RegisterError::OutOfRange { .. } => {
            debug!("Exception::IllegalDataAddress - {}", err);
            ExceptionCode::IllegalDataAddress
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modbus::register_map::{APP_BASE_HIGH, APP_BASE_LOW};
    use std::borrow::Cow;

    fn service() -> (PseudoSensorService, Arc<RegisterMap>) {
        let registers = Arc::new(RegisterMap::new());
        (PseudoSensorService::new(1, Arc::clone(&registers)), registers)
    }

    #[test]
    fn test_write_then_read_base_level() {
        let (service, registers) = service();
        for level in [APP_BASE_LOW, APP_BASE_HIGH] {
            assert_eq!(
                service.dispatch(Request::WriteSingleRegister(0, level)),
                Ok(Response::WriteSingleRegister(0, level))
            );
            assert_eq!(
                service.dispatch(Request::ReadHoldingRegisters(0, 1)),
                Ok(Response::ReadHoldingRegisters(vec![level]))
            );
            assert_eq!(registers.base_level(), level);
        }
    }

    #[test]
    fn test_input_registers_are_read_only_through_dispatch() {
        let (service, registers) = service();
        registers.set_sensed_value(2700);
        service
            .dispatch(Request::WriteMultipleRegisters(0, Cow::Owned(vec![1, 2])))
            .unwrap();
        assert_eq!(
            service.dispatch(Request::ReadInputRegisters(0, 1)),
            Ok(Response::ReadInputRegisters(vec![2700]))
        );
    }

    #[test]
    fn test_out_of_table_address() {
        let (service, _) = service();
        assert_eq!(
            service.dispatch(Request::ReadInputRegisters(100, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            service.dispatch(Request::ReadHoldingRegisters(7, 2)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_bad_quantity_is_illegal_data_value() {
        let (service, registers) = service();
        assert_eq!(
            service.dispatch(Request::ReadHoldingRegisters(0, 0)),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            service.dispatch(Request::ReadInputRegisters(0, 126)),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            service.dispatch(Request::WriteMultipleRegisters(0, Cow::Owned(vec![]))),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_eq!(
            service.dispatch(Request::ReadWriteMultipleRegisters(
                0,
                0,
                0,
                Cow::Owned(vec![APP_BASE_HIGH])
            )),
            Err(ExceptionCode::IllegalDataValue)
        );
        // A rejected request leaves the table untouched
        assert_eq!(registers.base_level(), 0);
    }

    #[test]
    fn test_bit_functions_have_no_table() {
        let (service, _) = service();
        assert_eq!(
            service.dispatch(Request::ReadCoils(0, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(
            service.dispatch(Request::WriteSingleCoil(0, true)),
            Err(ExceptionCode::IllegalDataAddress)
        );
    }

    #[test]
    fn test_mask_write_register() {
        let (service, registers) = service();
        registers.write(RegisterKind::Holding, 4, 0x12).unwrap();
        assert_eq!(
            service.dispatch(Request::MaskWriteRegister(4, 0xF2, 0x25)),
            Ok(Response::MaskWriteRegister(4, 0xF2, 0x25))
        );
        // Example from the Modbus application protocol specification
        assert_eq!(registers.read(RegisterKind::Holding, 4).unwrap(), 0x17);
    }

    #[test]
    fn test_read_write_multiple_registers_writes_first() {
        let (service, _) = service();
        assert_eq!(
            service.dispatch(Request::ReadWriteMultipleRegisters(
                0,
                3,
                1,
                Cow::Owned(vec![5, 6])
            )),
            Ok(Response::ReadWriteMultipleRegisters(vec![0, 5, 6]))
        );
    }
}
