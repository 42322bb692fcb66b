//! # RTU Transaction Engine
//!
//! Drives one physical serial link through the Modbus RTU request cycle:
//!
//! ```text
//!            execute                write done             complete / timeout / decode error
//!   Idle ─────────────► Sending ─────────────► WaitingForReply ─────────────────────────────► Idle
//!                          │                         │
//!                          └──── I/O fault ──────────┴──────────────────────────────────────► Closed
//! ```
//!
//! The engine owns the link, the framer, the link state, the timeout timer
//! and the transaction registry. Everything happens on the task that calls
//! [`RtuTransactionEngine::drive`], so none of it needs locking.
//!
//! ## Timing Rules
//!
//! - **Silent interval**: the next frame is never written earlier than
//!   `last_frame_end + silent_interval`. The engine sleeps for the remainder
//!   instead of sending early.
//! - **Response timeout**: armed in `execute`, before pacing and the write,
//!   and raced against every later suspension point.
//!
//! ## Completion Detection
//!
//! The engine never parses a response. It knows two byte budgets computed
//! from the request, the normal response length and the exception response
//! length, and declares the frame complete when the accumulated length hits
//! the budget that matches the function code's exception bit. Only then does
//! the framer check the CRC and decode.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use voltage_modbus_rtu::{ModbusFunction, ModbusRequest, RtuClientConfig, RtuTransactionEngine};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = RtuClientConfig::new("/dev/ttyUSB0", 19200);
//! let mut engine = RtuTransactionEngine::from_config(&config)?;
//!
//! let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 1);
//! let response = engine.request(request).await?;
//! println!("register bytes: {:02X?}", response.data);
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::time::{sleep, sleep_until, Instant};

use crate::config::RtuClientConfig;
use crate::error::{ModbusError, ModbusResult};
use crate::framer::{Framer, RtuFramer};
use crate::logging::{CallbackLogger, LogLevel};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId, EXCEPTION_FLAG};
use crate::registry::{
    ResponseHandle, Transaction, TransactionId, TransactionIdAllocator, TransactionRegistry,
    TransactionResult,
};
use crate::timing;
use crate::transport::{SerialLink, SerialPortLink};
use crate::utils::format::{bytes_to_hex, format_duration};

/// State of the physical link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// No transaction in flight; `execute` is accepted
    Idle,
    /// Transaction registered, frame not yet on the wire
    Sending,
    /// Frame written, accumulating the response
    WaitingForReply,
    /// Transport closed after an I/O fault; needs [`RtuTransactionEngine::reconnect`]
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LinkState::Idle => "Idle",
            LinkState::Sending => "Sending",
            LinkState::WaitingForReply => "WaitingForReply",
            LinkState::Closed => "Closed",
        };
        f.write_str(name)
    }
}

/// Armed response timeout of one transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingTimer {
    pub transaction_id: TransactionId,
    pub deadline: Instant,
}

/// Link statistics
#[derive(Debug, Clone, Default)]
pub struct LinkStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    /// Stray bytes thrown away before a send or after a timeout
    pub bytes_discarded: u64,
}

/// Per-transaction data the state machine needs after `execute` returns
#[derive(Debug)]
struct InFlight {
    id: TransactionId,
    slave_id: SlaveId,
    function: ModbusFunction,
    packet: Vec<u8>,
    expected_response_length: usize,
    exception_response_length: usize,
}

/// Modbus RTU client transaction engine for one serial link
pub struct RtuTransactionEngine<L: SerialLink, F: Framer = RtuFramer> {
    link: L,
    framer: F,
    state: LinkState,
    baud_rate: u32,
    silent_interval: Duration,
    timeout: Duration,
    last_frame_end: Option<Instant>,
    timer: Option<PendingTimer>,
    read_interest: bool,
    in_flight: Option<InFlight>,
    registry: TransactionRegistry,
    ids: TransactionIdAllocator,
    stats: LinkStats,
    logger: CallbackLogger,
}

impl RtuTransactionEngine<SerialPortLink, RtuFramer> {
    /// Open the configured serial port and build an engine around it
    pub fn from_config(config: &RtuClientConfig) -> ModbusResult<Self> {
        let link = SerialPortLink::open(config)?;
        Self::with_config(link, RtuFramer::new(), config)
    }
}

impl<L: SerialLink, F: Framer> RtuTransactionEngine<L, F> {
    /// Create an engine
    ///
    /// Fails fast on a zero baud rate or a zero timeout.
    pub fn new(link: L, framer: F, baud_rate: u32, timeout: Duration) -> ModbusResult<Self> {
        let silent_interval = timing::silent_interval(baud_rate)?;
        if timeout.is_zero() {
            return Err(ModbusError::configuration("Timeout must be greater than zero"));
        }

        debug!(
            "{}: baud {} -> silent interval {}",
            link.port_name(), baud_rate, format_duration(silent_interval)
        );

        Ok(Self {
            link,
            framer,
            state: LinkState::Idle,
            baud_rate,
            silent_interval,
            timeout,
            last_frame_end: None,
            timer: None,
            read_interest: false,
            in_flight: None,
            registry: TransactionRegistry::new(),
            ids: TransactionIdAllocator::new(),
            stats: LinkStats::default(),
            logger: CallbackLogger::disabled(),
        })
    }

    /// Create an engine from the timing part of `config`
    pub fn with_config(link: L, framer: F, config: &RtuClientConfig) -> ModbusResult<Self> {
        config.validate()?;
        Self::new(link, framer, config.baud_rate, config.timeout())
    }

    /// Report sent, received and discarded frames to `logger`
    pub fn with_logger(mut self, logger: CallbackLogger) -> Self {
        self.logger = logger;
        self
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    pub fn silent_interval(&self) -> Duration {
        self.silent_interval
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// When the last frame finished going out, if any
    pub fn last_frame_end(&self) -> Option<Instant> {
        self.last_frame_end
    }

    pub fn pending_timer(&self) -> Option<PendingTimer> {
        self.timer
    }

    /// Whether the engine is currently waiting on read-readiness
    pub fn is_reading(&self) -> bool {
        self.read_interest
    }

    pub fn stats(&self) -> LinkStats {
        self.stats.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.state != LinkState::Closed && self.link.is_open()
    }

    pub fn link(&self) -> &L {
        &self.link
    }

    pub fn framer(&self) -> &F {
        &self.framer
    }

    /// Number of unresolved transactions (0 or 1)
    pub fn outstanding(&self) -> usize {
        self.registry.len()
    }

    /// Change the line speed of the port; the silent interval follows
    ///
    /// The port is reconfigured first and the pacing only changes once it
    /// accepted the new speed. On a closed link the rate is recorded and
    /// applied to the transport passed to [`reconnect`](Self::reconnect).
    pub fn set_baud_rate(&mut self, baud_rate: u32) -> ModbusResult<()> {
        match self.state {
            LinkState::Idle | LinkState::Closed => {}
            other => {
                return Err(ModbusError::protocol_state("set_baud_rate", "Idle or Closed", other.to_string()));
            }
        }

        let silent_interval = timing::silent_interval(baud_rate)?;
        if self.state == LinkState::Idle {
            self.link.set_baud_rate(baud_rate)?;
        }

        info!(
            "{}: baud {} -> {}, silent interval {}",
            self.link.port_name(), self.baud_rate, baud_rate, format_duration(silent_interval)
        );
        self.silent_interval = silent_interval;
        self.baud_rate = baud_rate;
        Ok(())
    }

    /// Change the response timeout for transactions started from now on
    pub fn set_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
        if timeout.is_zero() {
            return Err(ModbusError::configuration("Timeout must be greater than zero"));
        }
        self.timeout = timeout;
        Ok(())
    }

    /// How long a send started at `now` has to wait for the silent interval
    pub fn pacing_delay(&self, now: Instant) -> Duration {
        match self.last_frame_end {
            Some(end) => (end + self.silent_interval).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }

    /// Start a transaction
    ///
    /// Registers `request`, arms its timeout and moves the link to
    /// `Sending`. Nothing is written until [`drive`](Self::drive) runs.
    ///
    /// # Errors
    ///
    /// Returned synchronously, the request is not started:
    /// - `ProtocolState` when another transaction is in flight
    /// - `Connection` when the link was closed by an earlier I/O fault
    /// - `InvalidData` / `InvalidFunction` when the request cannot be framed
    pub fn execute(&mut self, request: ModbusRequest) -> ModbusResult<ResponseHandle> {
        match self.state {
            LinkState::Idle => {}
            LinkState::Closed => {
                return Err(ModbusError::connection(format!(
                    "{} is closed; reconnect before sending", self.link.port_name()
                )));
            }
            other => {
                return Err(ModbusError::protocol_state("execute", LinkState::Idle.to_string(), other.to_string()));
            }
        }

        request.validate()?;
        let packet = self.framer.build_packet(&request)?;
        let expected_response_length = self.framer.expected_response_length(&request);
        let exception_response_length = self.framer.exception_response_length();

        let id = self.ids.next();
        let slave_id = request.slave_id;
        let function = request.function;
        let (transaction, handle) = Transaction::new(id, request);
        self.registry.register(transaction)?;

        debug!(
            "transaction {}: {} slave {} expected_response_length = {}, exception_response_length = {}",
            id, function, slave_id, expected_response_length, exception_response_length
        );

        debug!("transaction {}: set timeout for {}", id, format_duration(self.timeout));
        self.timer = Some(PendingTimer {
            transaction_id: id,
            deadline: Instant::now() + self.timeout,
        });

        self.framer.reset_frame();
        self.in_flight = Some(InFlight {
            id,
            slave_id,
            function,
            packet,
            expected_response_length,
            exception_response_length,
        });
        self.stats.requests_sent += 1;
        self.transition(LinkState::Sending);

        Ok(handle)
    }

    /// Run the link until the in-flight transaction is resolved
    ///
    /// Returns immediately when the link is idle or closed.
    pub async fn drive(&mut self) {
        loop {
            match self.state {
                LinkState::Idle | LinkState::Closed => return,
                LinkState::Sending => self.send_in_flight().await,
                LinkState::WaitingForReply => self.await_reply().await,
            }
        }
    }

    /// `execute` + `drive` + await the result
    pub async fn request(&mut self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        let handle = self.execute(request)?;
        self.drive().await;
        handle.await
    }

    /// Close the link
    ///
    /// A transaction still in flight is resolved with a connection error.
    pub fn close(&mut self) -> ModbusResult<()> {
        if let Some(id) = self.in_flight.as_ref().map(|t| t.id) {
            self.clear_transaction();
            self.framer.reset_frame();
            self.registry.resolve(id, Err(ModbusError::connection("link closed by caller")));
        }
        self.transition(LinkState::Closed);
        self.link.close()?;
        Ok(())
    }

    /// Install a freshly opened transport after the link was closed
    ///
    /// The new link is switched to the engine's baud rate first; a link that
    /// rejects it is not installed.
    pub fn reconnect(&mut self, mut link: L) -> ModbusResult<()> {
        match self.state {
            LinkState::Idle | LinkState::Closed => {}
            other => {
                return Err(ModbusError::protocol_state("reconnect", "Idle or Closed", other.to_string()));
            }
        }
        link.set_baud_rate(self.baud_rate)?;

        if let Err(e) = self.link.close() {
            debug!("{}: closing old transport failed: {}", self.link.port_name(), e);
        }
        self.link = link;
        self.framer.reset_frame();
        info!("{}: link reconnected", self.link.port_name());
        self.transition(LinkState::Idle);
        Ok(())
    }

    /// Write completed for transaction `id`
    ///
    /// Records the frame end for pacing and starts waiting for the reply.
    /// A completion for a transaction that is no longer registered is ignored.
    pub fn on_write_done(&mut self, id: TransactionId, now: Instant) -> LinkState {
        if !self.is_live(id) || self.state != LinkState::Sending {
            debug!("transaction {}: ignoring late write completion", id);
            return self.state;
        }

        self.last_frame_end = Some(now);
        if let Some(in_flight) = self.in_flight.as_ref() {
            self.stats.bytes_sent += in_flight.packet.len() as u64;
            self.logger.log_packet(LogLevel::Debug, "send", &in_flight.packet);
        }

        debug!("transaction {}: frame sent, waiting for a reply", id);
        self.read_interest = true;
        self.transition(LinkState::WaitingForReply)
    }

    /// Bytes read on a readiness event for transaction `id`
    ///
    /// Feeds the framer and resolves the transaction once the accumulated
    /// frame reaches its byte budget.
    pub fn on_bytes_received(&mut self, id: TransactionId, bytes: &[u8]) -> LinkState {
        if !self.is_live(id) || self.state != LinkState::WaitingForReply {
            debug!("transaction {}: ignoring late readiness ({} bytes)", id, bytes.len());
            return self.state;
        }
        if bytes.is_empty() {
            return self.state;
        }

        debug!("transaction {}: recv: {}", id, bytes_to_hex(bytes));
        self.stats.bytes_received += bytes.len() as u64;
        self.logger.log_packet(LogLevel::Debug, "receive", bytes);
        self.framer.add_to_frame(bytes);

        if !self.frame_complete() {
            return self.state;
        }

        let Some(in_flight) = self.clear_transaction() else {
            return self.transition(LinkState::Idle);
        };
        self.transition(LinkState::Idle);

        let result = self.framer.decode_frame()
            .and_then(|response| Self::check_response(&in_flight, response));
        match &result {
            Ok(_) => self.stats.responses_received += 1,
            Err(e) => {
                warn!("transaction {}: invalid response: {}", id, e);
                self.stats.errors += 1;
            }
        }

        self.registry.resolve(id, result);
        self.state
    }

    /// Read fault on the transport while waiting for transaction `id`
    pub fn on_read_fault(&mut self, id: TransactionId, err: std::io::Error) -> LinkState {
        self.on_link_fault(id, "read", err)
    }

    /// Timeout fired for transaction `id`
    ///
    /// Stale timers and timers of already resolved transactions are no-ops.
    pub fn on_timeout(&mut self, id: TransactionId) -> LinkState {
        let armed = matches!(self.timer, Some(timer) if timer.transaction_id == id);
        if !armed || !self.is_live(id) {
            debug!("transaction {}: ignoring stale timeout", id);
            return self.state;
        }

        warn!("transaction {}: timeout after {}", id, format_duration(self.timeout));
        self.clear_transaction();
        self.framer.reset_frame();
        self.stats.timeouts += 1;
        self.stats.errors += 1;
        self.transition(LinkState::Idle);

        match self.link.drain_input() {
            Ok(stray) => {
                if !stray.is_empty() {
                    self.discard("after timeout", &stray);
                }
                let timeout_ms = self.timeout.as_millis() as u64;
                self.registry.resolve(
                    id,
                    Err(ModbusError::timeout(format!("transaction {} response", id), timeout_ms)),
                );
                self.state
            }
            Err(e) => {
                error!("transaction {}: cleanup after timeout failed: {}", id, e);
                self.shut_link();
                self.registry.resolve(id, Err(ModbusError::io(e.to_string())));
                self.state
            }
        }
    }

    async fn send_in_flight(&mut self) {
        let Some((id, deadline)) = self.armed() else {
            self.transition(LinkState::Idle);
            return;
        };

        let delay = self.pacing_delay(Instant::now());
        if !delay.is_zero() {
            debug!("transaction {}: waiting for 3.5 char before next send - {}", id, format_duration(delay));
            tokio::select! {
                biased;
                _ = sleep_until(deadline) => {
                    self.on_timeout(id);
                    return;
                }
                _ = sleep(delay) => {}
            }
        }

        match self.link.drain_input() {
            Ok(stale) if !stale.is_empty() => self.discard("before send", &stale),
            Ok(_) => {}
            Err(e) => {
                self.on_link_fault(id, "cleanup before send", e);
                return;
            }
        }

        let packet = match self.in_flight.as_ref() {
            Some(in_flight) => in_flight.packet.clone(),
            None => return,
        };
        debug!("transaction {}: send: {}", id, bytes_to_hex(&packet));

        // An expired deadline wins over a ready port
        let written = tokio::select! {
            biased;
            _ = sleep_until(deadline) => None,
            result = self.link.write_frame(&packet) => Some(result),
        };
        match written {
            Some(Ok(())) => {
                self.on_write_done(id, Instant::now());
            }
            Some(Err(e)) => {
                self.on_link_fault(id, "write", e);
            }
            None => {
                self.on_timeout(id);
            }
        }
    }

    async fn await_reply(&mut self) {
        let Some((id, deadline)) = self.armed() else {
            self.transition(LinkState::Idle);
            return;
        };

        let read = tokio::select! {
            biased;
            _ = sleep_until(deadline) => None,
            result = self.link.read_available() => Some(result),
        };
        match read {
            Some(Ok(bytes)) => {
                self.on_bytes_received(id, &bytes);
            }
            Some(Err(e)) => {
                self.on_read_fault(id, e);
            }
            None => {
                self.on_timeout(id);
            }
        }
    }

    /// Transport failure: close the link and resolve with an I/O error
    fn on_link_fault(&mut self, id: TransactionId, operation: &str, err: std::io::Error) -> LinkState {
        if !self.is_live(id) {
            debug!("transaction {}: ignoring late {} fault: {}", id, operation, err);
            return self.state;
        }

        error!("transaction {}: {} failed on {}: {}", id, operation, self.link.port_name(), err);
        self.clear_transaction();
        self.stats.errors += 1;
        self.shut_link();
        self.registry.resolve(
            id,
            Err(ModbusError::io(format!("{} failed: {}", operation, err))),
        );
        self.state
    }

    fn frame_complete(&self) -> bool {
        let Some(in_flight) = self.in_flight.as_ref() else {
            return false;
        };
        let length = self.framer.raw_frame().len();
        let is_exception = self.framer
            .peek_function_code()
            .map_or(false, |code| code & EXCEPTION_FLAG != 0);

        (is_exception && length == in_flight.exception_response_length)
            || length == in_flight.expected_response_length
    }

    fn check_response(in_flight: &InFlight, response: ModbusResponse) -> ModbusResult<ModbusResponse> {
        if response.slave_id != in_flight.slave_id {
            return Err(ModbusError::protocol(format!(
                "Response slave ID mismatch: expected {}, got {}",
                in_flight.slave_id, response.slave_id
            )));
        }
        if response.function != in_flight.function {
            return Err(ModbusError::protocol(format!(
                "Response function mismatch: expected {}, got {}",
                in_flight.function, response.function
            )));
        }
        Ok(response)
    }

    fn is_live(&self, id: TransactionId) -> bool {
        self.registry.lookup(id).is_some()
    }

    fn armed(&self) -> Option<(TransactionId, Instant)> {
        self.timer.map(|timer| (timer.transaction_id, timer.deadline))
    }

    /// Cancel the timer and stop reading; the partial frame is left to the caller
    fn clear_transaction(&mut self) -> Option<InFlight> {
        self.timer = None;
        self.read_interest = false;
        self.in_flight.take()
    }

    fn shut_link(&mut self) {
        self.framer.reset_frame();
        if let Err(e) = self.link.close() {
            debug!("{}: close failed: {}", self.link.port_name(), e);
        }
        self.transition(LinkState::Closed);
    }

    fn discard(&mut self, when: &str, bytes: &[u8]) {
        info!("Cleanup recv buffer {}: {}", when, bytes_to_hex(bytes));
        self.stats.bytes_discarded += bytes.len() as u64;
        self.logger.log_packet(LogLevel::Info, "discard", bytes);
    }

    fn transition(&mut self, next: LinkState) -> LinkState {
        if self.state != next {
            debug!("{}: {} -> {}", self.link.port_name(), self.state, next);
            self.state = next;
        }
        next
    }
}

/// Turn a device exception response into [`ModbusError::Exception`]
pub fn into_result(result: TransactionResult) -> ModbusResult<ModbusResponse> {
    let response = result?;
    match response.exception_error() {
        Some(error) => Err(error),
        None => Ok(response),
    }
}
