//! # Serial Transport
//!
//! The transaction engine owns exactly one [`SerialLink`] for the lifetime of
//! a connection; nothing else reads from or writes to the port.
//!
//! The trait is deliberately small. The engine needs to:
//! - write a whole frame,
//! - wait until the port is readable and take whatever bytes are there,
//! - look at and discard bytes already sitting in the input buffer
//!   (cleanup before a send and after a timeout),
//! - close the port after an I/O fault.
//!
//! [`SerialPortLink`] implements it on top of `tokio-serial`; tests use
//! scripted implementations.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use voltage_modbus_rtu::config::RtuClientConfig;
//! use voltage_modbus_rtu::transport::{SerialLink, SerialPortLink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RtuClientConfig::new("/dev/ttyUSB0", 9600);
//! let mut link = SerialPortLink::open(&config)?;
//! link.set_packet_logging(true);
//!
//! link.write_frame(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]).await?;
//! let reply = link.read_available().await?;
//! println!("{} bytes", reply.len());
//! # Ok(())
//! # }
//! ```

use std::io;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_serial::{SerialPort, SerialPortBuilderExt, SerialStream};
use tracing::info;

use crate::config::RtuClientConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::framer::MAX_RTU_FRAME_SIZE;
use crate::utils::format::bytes_to_hex;

/// Log packet with direction and slave id
fn log_packet(direction: &str, data: &[u8], slave_id: Option<u8>) {
    let hex_string = bytes_to_hex(data);
    match slave_id {
        Some(id) => info!("[MODBUS-RTU] {} slave:{} {}", direction, id, hex_string),
        None => info!("[MODBUS-RTU] {} {}", direction, hex_string),
    }
}

fn not_connected(port_name: &str) -> io::Error {
    io::Error::new(
        io::ErrorKind::NotConnected,
        format!("serial port {} is closed", port_name),
    )
}

/// Byte-level access to a serial line
#[async_trait]
pub trait SerialLink: Send {
    /// Write a complete frame and flush it
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()>;

    /// Wait for read-readiness and return the bytes that are available
    ///
    /// An empty vector is a valid answer and means nothing was there.
    async fn read_available(&mut self) -> io::Result<Vec<u8>>;

    /// Number of bytes waiting in the input buffer, without blocking
    fn bytes_waiting(&self) -> io::Result<usize>;

    /// Read up to `count` buffered bytes, without blocking
    fn read_waiting(&mut self, count: usize) -> io::Result<Vec<u8>>;

    /// Reconfigure the line speed of the open port
    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()>;

    /// Port path, used to identify the link in logs
    fn port_name(&self) -> &str;

    /// Close the port; later reads and writes fail
    fn close(&mut self) -> io::Result<()>;

    fn is_open(&self) -> bool;

    /// Read and return everything currently buffered
    fn drain_input(&mut self) -> io::Result<Vec<u8>> {
        match self.bytes_waiting()? {
            0 => Ok(Vec::new()),
            waiting => self.read_waiting(waiting),
        }
    }
}

/// [`SerialLink`] over a `tokio-serial` port
pub struct SerialPortLink {
    port: Option<SerialStream>,
    port_name: String,
    packet_logging: bool,
}

impl SerialPortLink {
    /// Open the serial port described by `config`
    pub fn open(config: &RtuClientConfig) -> ModbusResult<Self> {
        config.validate()?;

        let port = tokio_serial::new(&config.port, config.baud_rate)
            .data_bits(config.serial_data_bits()?)
            .stop_bits(config.serial_stop_bits()?)
            .parity(config.parity.into())
            .timeout(config.timeout())
            .open_native_async()
            .map_err(|e| ModbusError::connection(format!("Failed to open serial port {}: {}", config.port, e)))?;

        Ok(Self::from_stream(port, &config.port, config.packet_logging))
    }

    /// Wrap an already opened port
    pub fn from_stream(port: SerialStream, port_name: &str, packet_logging: bool) -> Self {
        Self {
            port: Some(port),
            port_name: port_name.to_string(),
            packet_logging,
        }
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.packet_logging = enabled;
    }
}

#[async_trait]
impl SerialLink for SerialPortLink {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(|| not_connected(&self.port_name))?;

        port.write_all(frame).await?;
        port.flush().await?;

        if self.packet_logging {
            log_packet("send", frame, frame.first().copied());
        }
        Ok(())
    }

    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or_else(|| not_connected(&self.port_name))?;

        let mut buffer = [0u8; MAX_RTU_FRAME_SIZE];
        let n = port.read(&mut buffer).await?;

        if self.packet_logging && n > 0 {
            log_packet("receive", &buffer[..n], None);
        }
        Ok(buffer[..n].to_vec())
    }

    fn bytes_waiting(&self) -> io::Result<usize> {
        let port = self.port.as_ref().ok_or_else(|| not_connected(&self.port_name))?;
        port.bytes_to_read()
            .map(|n| n as usize)
            .map_err(io::Error::from)
    }

    fn read_waiting(&mut self, count: usize) -> io::Result<Vec<u8>> {
        let port = self.port.as_mut().ok_or_else(|| not_connected(&self.port_name))?;

        let mut buffer = vec![0u8; count];
        // Only what is already buffered; never park the caller
        match port.read(&mut buffer).now_or_never() {
            Some(Ok(n)) => {
                buffer.truncate(n);
                Ok(buffer)
            }
            Some(Err(e)) => Err(e),
            None => Ok(Vec::new()),
        }
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let port = self.port.as_mut().ok_or_else(|| not_connected(&self.port_name))?;
        port.set_baud_rate(baud_rate).map_err(io::Error::from)?;
        tracing::debug!("[MODBUS-RTU] {} baud rate set to {}", self.port_name, baud_rate);
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.port_name
    }

    fn close(&mut self) -> io::Result<()> {
        // SerialStream closes the descriptor on drop
        if self.port.take().is_some() {
            tracing::debug!("[MODBUS-RTU] closed {}", self.port_name);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }
}
