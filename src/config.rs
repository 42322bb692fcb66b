//! # RTU Client Configuration
//!
//! Serial parameters and transaction timing for one physical link. The
//! configuration is plain data: it can be built in code, or loaded from JSON
//! and validated before a port is opened.
//!
//! ```rust
//! use voltage_modbus_rtu::config::{Parity, RtuClientConfig};
//!
//! let config = RtuClientConfig::from_json_str(r#"{
//!     "port": "/dev/ttyUSB0",
//!     "baud_rate": 9600,
//!     "parity": "none",
//!     "timeout_ms": 500
//! }"#).unwrap();
//!
//! assert_eq!(config.parity, Parity::None);
//! assert_eq!(config.data_bits, 8);
//! assert_eq!(config.silent_interval().unwrap().as_micros(), 4010);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ModbusError, ModbusResult};
use crate::timing;

/// Default serial port path
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";

/// Default baud rate
pub const DEFAULT_BAUD_RATE: u32 = 19_200;

/// Default response timeout (3 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 3_000;

/// Serial parity setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

impl From<Parity> for tokio_serial::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Odd => tokio_serial::Parity::Odd,
            Parity::Even => tokio_serial::Parity::Even,
        }
    }
}

/// Configuration of one Modbus RTU link
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RtuClientConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port: String,
    /// Line speed in bits per second
    pub baud_rate: u32,
    /// Data bits per character (5 to 8)
    pub data_bits: u8,
    /// Stop bits (1 or 2)
    pub stop_bits: u8,
    pub parity: Parity,
    /// Response timeout per transaction, in milliseconds
    pub timeout_ms: u64,
    /// Dump every sent/received frame at info level
    pub packet_logging: bool,
}

impl Default for RtuClientConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            data_bits: 8,
            stop_bits: 1,
            parity: Parity::Even,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            packet_logging: false,
        }
    }
}

impl RtuClientConfig {
    /// Configuration for `port` at `baud_rate` with default framing (8E1)
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            ..Self::default()
        }
    }

    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> ModbusResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    pub fn with_packet_logging(mut self, enabled: bool) -> Self {
        self.packet_logging = enabled;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Minimum silence between frames at the configured baud rate
    pub fn silent_interval(&self) -> ModbusResult<Duration> {
        timing::silent_interval(self.baud_rate)
    }

    pub fn serial_data_bits(&self) -> ModbusResult<tokio_serial::DataBits> {
        match self.data_bits {
            5 => Ok(tokio_serial::DataBits::Five),
            6 => Ok(tokio_serial::DataBits::Six),
            7 => Ok(tokio_serial::DataBits::Seven),
            8 => Ok(tokio_serial::DataBits::Eight),
            other => Err(ModbusError::configuration(format!("Unsupported data bits: {}", other))),
        }
    }

    pub fn serial_stop_bits(&self) -> ModbusResult<tokio_serial::StopBits> {
        match self.stop_bits {
            1 => Ok(tokio_serial::StopBits::One),
            2 => Ok(tokio_serial::StopBits::Two),
            other => Err(ModbusError::configuration(format!("Unsupported stop bits: {}", other))),
        }
    }

    /// Check the configuration before anything is opened
    pub fn validate(&self) -> ModbusResult<()> {
        if self.port.trim().is_empty() {
            return Err(ModbusError::configuration("Serial port must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("Baud rate must be greater than zero"));
        }
        if self.timeout_ms == 0 {
            return Err(ModbusError::configuration("Timeout must be greater than zero"));
        }
        self.serial_data_bits()?;
        self.serial_stop_bits()?;
        Ok(())
    }
}
