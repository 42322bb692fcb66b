//! # Modbus RTU Error Handling
//!
//! Every failure the transaction engine can report is a [`ModbusError`].
//! The engine never lets a transport or timer fault escape from its event
//! handlers; instead each fault is converted into one of the variants below
//! and delivered through the transaction's [`ResponseHandle`](crate::registry::ResponseHandle).
//!
//! ## Error Categories
//!
//! ### Transaction Outcomes
//! - **Timeout**: no complete frame arrived within the response window.
//!   The link goes back to idle and accepts the next request.
//! - **I/O**: the serial device failed while reading or writing.
//!   The port is closed and the link must be reconnected.
//! - **Frame / CRC**: bytes arrived but did not form a valid RTU frame.
//!   The link goes back to idle.
//!
//! ### Caller Misuse
//! - **Protocol state**: `execute` was called while another transaction
//!   was still in flight. Returned synchronously, never through a handle.
//! - **Configuration**: invalid baud rate, port name or timeout.
//!
//! ## Usage Examples
//!
//! ```rust
//! use voltage_modbus_rtu::{ModbusError, ModbusResult};
//!
//! fn describe(result: ModbusResult<Vec<u8>>) {
//!     match result {
//!         Ok(frame) => println!("{} bytes", frame.len()),
//!         Err(error) if error.is_fatal_to_link() => {
//!             println!("reconnect required: {}", error);
//!         }
//!         Err(error) if error.is_recoverable() => {
//!             println!("retry later: {}", error);
//!         }
//!         Err(error) => println!("giving up: {}", error),
//!     }
//! }
//! ```

use thiserror::Error;

/// Result type alias for Modbus RTU operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Errors produced by the RTU transaction engine and its collaborators
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// Serial read/write failure
    ///
    /// Fatal to the current connection: the engine closes the port and
    /// refuses new requests until it is given a fresh transport.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Serial port could not be opened, or the link is closed
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// No complete response frame within the response window
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Response violated the request/response pairing
    ///
    /// For example a reply that came from a different slave id.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// `execute` called while the link was not idle
    #[error("Invalid link state: {operation} requires {expected}, link is {actual}")]
    ProtocolState {
        operation: String,
        expected: String,
        actual: String,
    },

    /// Function code that the framer does not know how to budget or decode
    #[error("Invalid function code: {code}")]
    InvalidFunction { code: u8 },

    /// Request payload rejected before anything was sent
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Checksum mismatch on a received RTU frame
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}")]
    CrcMismatch { expected: u16, actual: u16 },

    /// Device answered with a Modbus exception response
    #[error("Modbus exception: function={function:02X}, code={code:02X} ({message})")]
    Exception { function: u8, code: u8, message: String },

    /// Received frame is structurally invalid
    #[error("Frame error: {message}")]
    Frame { message: String },

    /// Invalid client configuration
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// Library internal errors (should not occur in normal operation)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms
        }
    }

    /// Create a new protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Create a link state violation error
    pub fn protocol_state<O, E, A>(operation: O, expected: E, actual: A) -> Self
    where
        O: Into<String>,
        E: Into<String>,
        A: Into<String>,
    {
        Self::ProtocolState {
            operation: operation.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a CRC mismatch error
    pub fn crc_mismatch(expected: u16, actual: u16) -> Self {
        Self::CrcMismatch { expected, actual }
    }

    /// Create a Modbus exception error
    ///
    /// Maps the standard exception codes to their names.
    pub fn exception(function: u8, code: u8) -> Self {
        let message = match code {
            0x01 => "Illegal Function",
            0x02 => "Illegal Data Address",
            0x03 => "Illegal Data Value",
            0x04 => "Slave Device Failure",
            0x05 => "Acknowledge",
            0x06 => "Slave Device Busy",
            0x08 => "Memory Parity Error",
            0x0A => "Gateway Path Unavailable",
            0x0B => "Gateway Target Device Failed to Respond",
            _ => "Unknown Exception",
        }.to_string();

        Self::Exception { function, code, message }
    }

    /// Create a frame error
    pub fn frame<S: Into<String>>(message: S) -> Self {
        Self::Frame { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Create an internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Check if the error is recoverable (the same link can retry)
    ///
    /// # Examples
    ///
    /// ```rust
    /// use voltage_modbus_rtu::ModbusError;
    ///
    /// assert!(ModbusError::timeout("read response", 1000).is_recoverable());
    /// assert!(ModbusError::crc_mismatch(0x1234, 0x4321).is_recoverable());
    /// assert!(!ModbusError::io("device unplugged").is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Timeout { .. } => true,
            Self::Frame { .. } => true,
            Self::CrcMismatch { .. } => true,
            Self::Protocol { .. } => true,
            Self::Exception { code, .. } => matches!(code, 0x05 | 0x06),
            _ => false,
        }
    }

    /// Check if the error leaves the link closed
    ///
    /// After an I/O fault the serial port has been closed by the engine and
    /// a new transport must be installed before the next request.
    pub fn is_fatal_to_link(&self) -> bool {
        matches!(self, Self::Io { .. } | Self::Connection { .. })
    }

    /// Check if the error is a serial/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. }
        )
    }

    /// Check if the error is a decode/protocol issue
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::Protocol { .. } |
            Self::InvalidFunction { .. } |
            Self::Exception { .. } |
            Self::Frame { .. } |
            Self::CrcMismatch { .. }
        )
    }
}

impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<tokio_serial::Error> for ModbusError {
    fn from(err: tokio_serial::Error) -> Self {
        Self::connection(err.to_string())
    }
}

/// Converts Tokio's timeout errors; callers that know the configured window
/// should build [`ModbusError::timeout`] themselves.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}
