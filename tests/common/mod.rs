//! Shared fixtures for the integration tests
//!
//! `MockSerialLink` replaces the serial port. Reads follow a script, writes
//! are recorded with their timestamp, and bytes can be left sitting in the
//! input buffer to exercise the cleanup paths. Clones share state, so a test
//! keeps one clone for inspection and hands the other to the engine.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{sleep, Instant};

use voltage_modbus_rtu::framer::calculate_crc;
use voltage_modbus_rtu::transport::SerialLink;

/// One scripted read-side event
#[derive(Debug, Clone)]
pub enum ReadStep {
    /// Readiness after `after`, delivering `bytes`
    Bytes { after: Duration, bytes: Vec<u8> },
    /// The next read fails
    Fault,
    /// Bytes land in the input buffer without waking the reader
    Linger(Vec<u8>),
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<ReadStep>,
    waiting: Vec<u8>,
    writes: Vec<(Instant, Vec<u8>)>,
    write_fault: bool,
    write_stall: bool,
    drain_fault: bool,
    baud_fault: bool,
    baud_rate: Option<u32>,
    closed: bool,
}

#[derive(Debug, Clone)]
pub struct MockSerialLink {
    name: String,
    state: Arc<Mutex<MockState>>,
}

impl MockSerialLink {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            state: Arc::new(Mutex::new(MockState::default())),
        }
    }

    /// Deliver `bytes` right after the next read starts
    pub fn reply(&self, bytes: Vec<u8>) -> &Self {
        self.reply_after(Duration::ZERO, bytes)
    }

    pub fn reply_after(&self, after: Duration, bytes: Vec<u8>) -> &Self {
        self.push(ReadStep::Bytes { after, bytes })
    }

    pub fn fail_next_read(&self) -> &Self {
        self.push(ReadStep::Fault)
    }

    pub fn linger(&self, bytes: Vec<u8>) -> &Self {
        self.push(ReadStep::Linger(bytes))
    }

    pub fn push(&self, step: ReadStep) -> &Self {
        self.state.lock().unwrap().script.push_back(step);
        self
    }

    /// Put stale bytes in the input buffer right now
    pub fn preload(&self, bytes: &[u8]) {
        self.state.lock().unwrap().waiting.extend_from_slice(bytes);
    }

    pub fn set_write_fault(&self, enabled: bool) {
        self.state.lock().unwrap().write_fault = enabled;
    }

    /// Writes never complete
    pub fn set_write_stall(&self, enabled: bool) {
        self.state.lock().unwrap().write_stall = enabled;
    }

    pub fn set_baud_fault(&self, enabled: bool) {
        self.state.lock().unwrap().baud_fault = enabled;
    }

    /// Last line speed applied through `set_baud_rate`
    pub fn baud_rate(&self) -> Option<u32> {
        self.state.lock().unwrap().baud_rate
    }

    pub fn set_drain_fault(&self, enabled: bool) {
        self.state.lock().unwrap().drain_fault = enabled;
    }

    pub fn writes(&self) -> Vec<(Instant, Vec<u8>)> {
        self.state.lock().unwrap().writes.clone()
    }

    pub fn waiting(&self) -> Vec<u8> {
        self.state.lock().unwrap().waiting.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "mock link closed")
}

#[async_trait]
impl SerialLink for MockSerialLink {
    async fn write_frame(&mut self, frame: &[u8]) -> io::Result<()> {
        let stall = {
            let mut state = self.state.lock().unwrap();
            if state.closed {
                return Err(closed_error());
            }
            if state.write_fault {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock write fault"));
            }
            if !state.write_stall {
                state.writes.push((Instant::now(), frame.to_vec()));
            }
            state.write_stall
        };

        if stall {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn read_available(&mut self) -> io::Result<Vec<u8>> {
        loop {
            let step = {
                let mut state = self.state.lock().unwrap();
                if state.closed {
                    return Err(closed_error());
                }
                state.script.pop_front()
            };

            match step {
                Some(ReadStep::Bytes { after, bytes }) => {
                    if !after.is_zero() {
                        sleep(after).await;
                    }
                    return Ok(bytes);
                }
                Some(ReadStep::Fault) => {
                    return Err(io::Error::new(io::ErrorKind::Other, "mock read fault"));
                }
                Some(ReadStep::Linger(bytes)) => {
                    self.state.lock().unwrap().waiting.extend_from_slice(&bytes);
                }
                // Nothing scripted: the line stays silent
                None => std::future::pending::<()>().await,
            }
        }
    }

    fn bytes_waiting(&self) -> io::Result<usize> {
        let state = self.state.lock().unwrap();
        if state.drain_fault {
            return Err(io::Error::new(io::ErrorKind::Other, "mock drain fault"));
        }
        Ok(state.waiting.len())
    }

    fn read_waiting(&mut self, count: usize) -> io::Result<Vec<u8>> {
        let mut state = self.state.lock().unwrap();
        let count = count.min(state.waiting.len());
        Ok(state.waiting.drain(..count).collect())
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> io::Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(closed_error());
        }
        if state.baud_fault {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "mock baud rate rejected"));
        }
        state.baud_rate = Some(baud_rate);
        Ok(())
    }

    fn port_name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> io::Result<()> {
        self.state.lock().unwrap().closed = true;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.state.lock().unwrap().closed
    }
}

/// Append the RTU CRC to `body`
pub fn with_crc(body: &[u8]) -> Vec<u8> {
    let mut frame = body.to_vec();
    frame.extend_from_slice(&calculate_crc(body).to_le_bytes());
    frame
}

/// Frame from a hex string such as `"01 03 02 00 2A"`, CRC appended
pub fn frame(hex_body: &str) -> Vec<u8> {
    let compact: String = hex_body.split_whitespace().collect();
    with_crc(&hex::decode(compact).unwrap())
}
