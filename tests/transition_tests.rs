//! State machine transitions driven by hand, without `drive()`
//!
//! Each transition function is fed the events the runtime would deliver, in
//! the order a test chooses, including late and duplicate ones.

mod common;

use std::io;
use std::time::Duration;

use tokio::time::Instant;

use common::{frame, MockSerialLink};
use voltage_modbus_rtu::*;

fn engine(link: &MockSerialLink) -> RtuTransactionEngine<MockSerialLink> {
    RtuTransactionEngine::new(link.clone(), RtuFramer::new(), 9600, Duration::from_secs(1)).unwrap()
}

fn read_registers(quantity: u16) -> ModbusRequest {
    ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, quantity)
}

#[tokio::test(start_paused = true)]
async fn test_execute_registers_and_arms_timer() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);

    let before = Instant::now();
    let handle = engine.execute(read_registers(1)).unwrap();

    assert_eq!(handle.transaction_id(), 1);
    assert_eq!(engine.state(), LinkState::Sending);
    assert_eq!(engine.outstanding(), 1);

    let timer = engine.pending_timer().unwrap();
    assert_eq!(timer.transaction_id, 1);
    assert_eq!(timer.deadline, before + Duration::from_secs(1));

    // Nothing hits the wire before the engine is driven
    assert!(link.writes().is_empty());
    assert!(!engine.is_reading());
}

#[tokio::test(start_paused = true)]
async fn test_write_done_starts_waiting() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let handle = engine.execute(read_registers(1)).unwrap();

    let now = Instant::now();
    let state = engine.on_write_done(handle.transaction_id(), now);

    assert_eq!(state, LinkState::WaitingForReply);
    assert_eq!(engine.last_frame_end(), Some(now));
    assert!(engine.is_reading());
    assert!(engine.pending_timer().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_complete_frame_resolves_once() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(1)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    let reply = frame("01 03 02 00 2A");
    assert_eq!(engine.on_bytes_received(id, &[]), LinkState::WaitingForReply);
    assert_eq!(engine.on_bytes_received(id, &reply[..4]), LinkState::WaitingForReply);
    assert!(handle.try_result().is_none());

    assert_eq!(engine.on_bytes_received(id, &reply[4..]), LinkState::Idle);
    assert!(engine.pending_timer().is_none());
    assert!(!engine.is_reading());
    assert_eq!(engine.outstanding(), 0);

    let response = handle.try_result().unwrap().unwrap();
    assert_eq!(response.data, vec![0x02, 0x00, 0x2A]);

    // Late timer and late readiness after resolution change nothing
    assert_eq!(engine.on_timeout(id), LinkState::Idle);
    assert_eq!(engine.on_bytes_received(id, &reply), LinkState::Idle);
    assert_eq!(engine.on_read_fault(id, io::Error::new(io::ErrorKind::Other, "late")), LinkState::Idle);

    let stats = engine.stats();
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.bytes_received, 7);
    assert!(engine.is_connected());
    assert!(handle.try_result().is_none());
}

#[tokio::test(start_paused = true)]
async fn test_exception_frame_completes_early() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(2)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    assert_eq!(engine.on_bytes_received(id, &frame("01 83 02")), LinkState::Idle);

    let response = handle.try_result().unwrap().unwrap();
    assert!(response.is_exception());
    assert_eq!(response.exception_code, Some(0x02));
}

/// Five bytes without the exception bit are just a partial normal reply
#[tokio::test(start_paused = true)]
async fn test_short_normal_frame_keeps_waiting() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(2)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    let reply = frame("01 03 04 00 0A 00 0B");
    assert_eq!(engine.on_bytes_received(id, &reply[..5]), LinkState::WaitingForReply);
    assert_eq!(engine.framer().raw_frame().len(), 5);
    assert!(handle.try_result().is_none());

    assert_eq!(engine.on_bytes_received(id, &reply[5..]), LinkState::Idle);
    assert!(handle.try_result().unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_drains_and_resolves() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(1)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());
    engine.on_bytes_received(id, &[0x01, 0x03]);
    link.preload(&[0x02, 0x00]);

    assert_eq!(engine.on_timeout(id), LinkState::Idle);

    assert!(matches!(handle.try_result(), Some(Err(ModbusError::Timeout { .. }))));
    assert!(engine.framer().raw_frame().is_empty());
    assert!(link.waiting().is_empty());
    assert!(engine.pending_timer().is_none());
    assert!(!engine.is_reading());
    assert_eq!(engine.stats().bytes_discarded, 2);

    // Readiness arriving after the timeout is ignored
    assert_eq!(engine.on_bytes_received(id, &[0x02, 0x00, 0x2A]), LinkState::Idle);
    assert!(engine.framer().raw_frame().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_timeout_cleanup_fault_closes_link() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(1)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    link.set_drain_fault(true);
    assert_eq!(engine.on_timeout(id), LinkState::Closed);

    assert!(matches!(handle.try_result(), Some(Err(ModbusError::Io { .. }))));
    assert!(link.is_closed());
}

/// A timer left over from an earlier transaction must not fire on the next one
#[tokio::test(start_paused = true)]
async fn test_stale_timer_ignored() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);

    let first = engine.execute(read_registers(1)).unwrap();
    engine.on_write_done(first.transaction_id(), Instant::now());
    engine.on_timeout(first.transaction_id());

    let mut second = engine.execute(read_registers(1)).unwrap();
    assert_eq!(second.transaction_id(), 2);
    engine.on_write_done(second.transaction_id(), Instant::now());

    assert_eq!(engine.on_timeout(first.transaction_id()), LinkState::WaitingForReply);
    assert_eq!(engine.on_write_done(first.transaction_id(), Instant::now()), LinkState::WaitingForReply);
    assert!(second.try_result().is_none());
    assert_eq!(engine.pending_timer().map(|t| t.transaction_id), Some(2));
}

#[tokio::test(start_paused = true)]
async fn test_read_fault_closes_link() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let mut handle = engine.execute(read_registers(1)).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    let state = engine.on_read_fault(id, io::Error::new(io::ErrorKind::BrokenPipe, "unplugged"));

    assert_eq!(state, LinkState::Closed);
    assert!(matches!(handle.try_result(), Some(Err(ModbusError::Io { .. }))));
    assert!(engine.pending_timer().is_none());
    assert!(!engine.is_reading());
    assert!(link.is_closed());

    // The timer that would have fired later is a no-op
    assert_eq!(engine.on_timeout(id), LinkState::Closed);
    assert_eq!(engine.stats().timeouts, 0);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rejected_while_busy() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    let _handle = engine.execute(read_registers(1)).unwrap();

    assert!(matches!(
        engine.reconnect(MockSerialLink::new("mock1")),
        Err(ModbusError::ProtocolState { .. })
    ));
    assert_eq!(engine.link().port_name(), "mock0");
}

#[tokio::test(start_paused = true)]
async fn test_read_coils_exception_completes_at_five_bytes() {
    let link = MockSerialLink::new("mock0");
    let mut engine = engine(&link);
    // slave + fc + byte count + 1 coil byte + crc
    let request = ModbusRequest::new_read(1, ModbusFunction::ReadCoils, 0, 8);
    let mut handle = engine.execute(request).unwrap();
    let id = handle.transaction_id();
    engine.on_write_done(id, Instant::now());

    let reply = frame("01 81 01");
    assert_eq!(engine.on_bytes_received(id, &reply[..4]), LinkState::WaitingForReply);
    assert_eq!(engine.on_bytes_received(id, &reply[4..]), LinkState::Idle);

    let response = handle.try_result().unwrap().unwrap();
    assert_eq!(response.function, ModbusFunction::ReadCoils);
    assert_eq!(response.exception, Some(ModbusException::IllegalFunction));
}

/// Engines on different links keep their own pacing and registries
#[tokio::test(start_paused = true)]
async fn test_engines_share_no_state() {
    let first_link = MockSerialLink::new("mock0");
    let second_link = MockSerialLink::new("mock1");
    let mut first = engine(&first_link);
    let mut second = engine(&second_link);

    let handle = first.execute(read_registers(1)).unwrap();
    first.on_write_done(handle.transaction_id(), Instant::now());

    assert!(second.last_frame_end().is_none());
    assert_eq!(second.pacing_delay(Instant::now()), Duration::ZERO);
    assert_eq!(second.state(), LinkState::Idle);
    assert_eq!(second.execute(read_registers(1)).unwrap().transaction_id(), 1);
    assert_eq!(first.state(), LinkState::WaitingForReply);
}
