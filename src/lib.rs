//! # Voltage Modbus RTU - Client Transaction Engine
//!
//! **Author:** Evan Liu <evan.liu@voltageenergy.com>
//! **License:** MIT
//!
//! Client side of Modbus RTU over a serial line. The engine takes one request
//! at a time through send, wait, receive and decode, and resolves exactly one
//! result per request while honouring the bus timing rules:
//!
//! - **⏱️ Silent interval**: 3.5 character times between frames (1.75 ms above 19200 baud)
//! - **⌛ Response timeout**: armed before the send, raced against pacing, write and reads
//! - **🧹 Buffer cleanup**: stale bytes are discarded before a send and after a timeout
//! - **🔌 Fault handling**: an I/O fault closes the link until it is reconnected
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use voltage_modbus_rtu::{ModbusFunction, ModbusRequest, ModbusResult, RtuClientConfig, RtuTransactionEngine};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let config = RtuClientConfig::new("/dev/ttyUSB0", 9600)
//!         .with_timeout(Duration::from_secs(1));
//!     let mut engine = RtuTransactionEngine::from_config(&config)?;
//!
//!     // Start the transaction, then let the engine run the link
//!     let handle = engine.execute(ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 10))?;
//!     engine.drive().await;
//!
//!     let response = handle.await?;
//!     println!("Read registers: {:02X?}", response.data);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               Application                │
//! └──────────────────────────────────────────┘
//!          │ execute / drive        ▲ ResponseHandle
//! ┌──────────────────────────────────────────┐
//! │   RtuTransactionEngine  (LinkState)      │
//! │   ├─ TransactionRegistry                 │
//! │   ├─ PendingTimer / silent interval      │
//! │   └─ Framer (RTU codec, CRC-16)          │
//! └──────────────────────────────────────────┘
//!          │
//! ┌──────────────────────────────────────────┐
//! │   SerialLink  (tokio-serial)             │
//! └──────────────────────────────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// Modbus request/response model
pub mod protocol;

/// RTU frame codec
pub mod framer;

/// Serial transport
pub mod transport;

/// Inter-frame silent interval
pub mod timing;

/// Transaction ids and result slots
pub mod registry;

/// Transaction state machine
pub mod engine;

/// Link configuration
pub mod config;

/// Callback logging for link traffic
pub mod logging;

/// Formatting helpers
pub mod utils;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusFunction, ModbusRequest, ModbusResponse, ModbusException, SlaveId};
pub use framer::{Framer, RtuFramer};
pub use transport::{SerialLink, SerialPortLink};
pub use registry::{ResponseHandle, TransactionId, TransactionRegistry};
pub use engine::{LinkState, LinkStats, PendingTimer, RtuTransactionEngine};
pub use config::{Parity, RtuClientConfig};
pub use logging::{CallbackLogger, LogCallback, LogLevel};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Voltage Modbus RTU v{} - Modbus RTU client transaction engine by Evan Liu", VERSION)
}
