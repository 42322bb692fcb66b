/// Modbus request/response model consumed by the RTU framer
///
/// The engine itself never looks inside a PDU. This module only carries what
/// the framer needs: the function code, the addressing fields that go on the
/// wire, and the size the device's answer is going to have.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// Highest valid slave id on a serial line
pub const MAX_SLAVE_ID: SlaveId = 247;

/// Maximum number of coils that can be read in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Bit set in the function code of an exception response
pub const EXCEPTION_FLAG: u8 = 0x80;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(self,
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

fn saturating_quantity(count: usize) -> u16 {
    u16::try_from(count).unwrap_or(u16::MAX)
}

/// Modbus request structure
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub address: ModbusAddress,
    pub quantity: u16,
    pub data: Vec<u8>,
}

impl ModbusRequest {
    /// Create a new read request
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        Self {
            slave_id,
            function,
            address,
            quantity,
            data: Vec::new(),
        }
    }

    /// Create a new write request
    ///
    /// `data` is the raw payload: one byte (0/1) for a single coil, two
    /// big-endian bytes for a single register, the packed bytes for the
    /// multiple-write functions.
    pub fn new_write(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        data: Vec<u8>,
    ) -> Self {
        let quantity = match function {
            ModbusFunction::WriteSingleCoil | ModbusFunction::WriteSingleRegister => 1,
            // Saturates so oversized payloads fail validation instead of wrapping
            ModbusFunction::WriteMultipleCoils => saturating_quantity(data.len().saturating_mul(8)),
            ModbusFunction::WriteMultipleRegisters => saturating_quantity(data.len() / 2),
            _ => 0,
        };

        Self {
            slave_id,
            function,
            address,
            quantity,
            data,
        }
    }

    /// Size in bytes of the PDU (function code + payload) a well-behaved
    /// device sends back for this request
    pub fn response_pdu_size(&self) -> usize {
        match self.function {
            ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                2 + (self.quantity as usize + 7) / 8
            }
            ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                2 + 2 * self.quantity as usize
            }
            // Echo of address + value, or address + quantity
            ModbusFunction::WriteSingleCoil
            | ModbusFunction::WriteSingleRegister
            | ModbusFunction::WriteMultipleCoils
            | ModbusFunction::WriteMultipleRegisters => 5,
        }
    }

    /// Validate the request
    pub fn validate(&self) -> ModbusResult<()> {
        if self.slave_id == 0 || self.slave_id > MAX_SLAVE_ID {
            return Err(ModbusError::invalid_data(
                format!("Invalid slave ID: {}", self.slave_id)
            ));
        }

        if self.function.is_read_function() {
            if self.quantity == 0 {
                return Err(ModbusError::invalid_data("Quantity cannot be zero"));
            }

            let limit = match self.function {
                ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => MAX_COILS_PER_REQUEST,
                _ => MAX_REGISTERS_PER_REQUEST,
            };
            if self.quantity > limit {
                return Err(ModbusError::invalid_data(
                    format!("Too many items requested for {}: {}", self.function, self.quantity)
                ));
            }
        } else {
            let needed = match self.function {
                ModbusFunction::WriteSingleCoil => 1,
                ModbusFunction::WriteSingleRegister => 2,
                _ => 1,
            };
            if self.data.len() < needed {
                return Err(ModbusError::invalid_data(
                    format!("{} needs at least {} data byte(s)", self.function, needed)
                ));
            }

            let limit = match self.function {
                ModbusFunction::WriteMultipleCoils => MAX_COILS_PER_REQUEST,
                ModbusFunction::WriteMultipleRegisters => MAX_REGISTERS_PER_REQUEST,
                _ => 1,
            };
            if self.quantity > limit {
                return Err(ModbusError::invalid_data(
                    format!("Too many items written for {}: {}", self.function, self.quantity)
                ));
            }
        }

        Ok(())
    }
}

/// Modbus response structure
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusResponse {
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    /// PDU payload after the function code
    pub data: Vec<u8>,
    pub exception: Option<ModbusException>,
    /// Exception code as received, kept even when it is not a known code
    pub exception_code: Option<u8>,
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            slave_id,
            function,
            data,
            exception: None,
            exception_code: None,
        }
    }

    /// Create an exception response
    pub fn new_exception(slave_id: SlaveId, function: ModbusFunction, exception_code: u8) -> Self {
        Self {
            slave_id,
            function,
            data: Vec::new(),
            exception: ModbusException::from_u8(exception_code),
            exception_code: Some(exception_code),
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        self.exception_code.is_some()
    }

    /// The device exception as an error, if this is an exception response
    pub fn exception_error(&self) -> Option<ModbusError> {
        self.exception_code
            .map(|code| ModbusError::exception(self.function.to_u8(), code))
    }
}
