//! # RTU Framer
//!
//! The framer is the codec the transaction engine leans on. It turns a
//! [`ModbusRequest`] into wire bytes, accumulates received bytes into a
//! partial frame, answers the two questions the engine needs to detect
//! completion (which function code is the frame carrying, and how long
//! must it be), and finally validates and decodes the complete frame.
//!
//! ## RTU Frame Layout
//!
//! ```text
//! +----------+---------------+-----------------+-----------+
//! | Slave ID | Function code |      Data       | CRC (LE)  |
//! |  1 byte  |    1 byte     |   0..252 bytes  |  2 bytes  |
//! +----------+---------------+-----------------+-----------+
//! ```
//!
//! An exception response always has five bytes: slave, function | 0x80,
//! exception code and CRC.

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, EXCEPTION_FLAG};

/// Maximum frame size for Modbus RTU
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Slave id + CRC wrapped around every PDU
pub const RTU_ADU_OVERHEAD: usize = 3;

/// Length of a complete exception response frame
pub const RTU_EXCEPTION_FRAME_LEN: usize = RTU_ADU_OVERHEAD + 2;

/// CRC calculator for RTU
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Calculate the CRC-16/MODBUS checksum of `data`
pub fn calculate_crc(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Frame codec used by the transaction engine
///
/// The engine only ever asks about byte counts and the exception bit; all
/// structural and checksum validation happens in [`Framer::decode_frame`].
pub trait Framer: Send {
    /// Encode a request into a complete frame ready for the wire
    fn build_packet(&self, request: &ModbusRequest) -> ModbusResult<Vec<u8>>;

    /// Drop any partially accumulated frame
    fn reset_frame(&mut self);

    /// Append received bytes to the partial frame
    fn add_to_frame(&mut self, bytes: &[u8]);

    /// Bytes accumulated so far
    fn raw_frame(&self) -> &[u8];

    /// Function code of the partial frame, once enough bytes have arrived
    fn peek_function_code(&self) -> Option<u8>;

    /// Frame length of a normal response to `request`
    fn expected_response_length(&self, request: &ModbusRequest) -> usize;

    /// Frame length of an exception response
    fn exception_response_length(&self) -> usize;

    /// Validate and decode the accumulated frame, then reset the buffer
    fn decode_frame(&mut self) -> ModbusResult<ModbusResponse>;
}

/// Modbus RTU implementation of [`Framer`]
#[derive(Debug, Default)]
pub struct RtuFramer {
    buffer: Vec<u8>,
}

impl RtuFramer {
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MAX_RTU_FRAME_SIZE),
        }
    }

    /// Decode one complete RTU frame
    pub fn decode(frame: &[u8]) -> ModbusResult<ModbusResponse> {
        if frame.len() < 4 {
            return Err(ModbusError::frame(format!(
                "RTU frame too short: {} bytes", frame.len()
            )));
        }
        if frame.len() > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::frame(format!(
                "RTU frame too large: {} bytes", frame.len()
            )));
        }

        let data_len = frame.len() - 2;
        let received_crc = u16::from_le_bytes([frame[data_len], frame[data_len + 1]]);
        let calculated_crc = calculate_crc(&frame[..data_len]);
        if received_crc != calculated_crc {
            return Err(ModbusError::crc_mismatch(calculated_crc, received_crc));
        }

        let slave_id = frame[0];
        let function_code = frame[1];

        if function_code & EXCEPTION_FLAG != 0 {
            if frame.len() != RTU_EXCEPTION_FRAME_LEN {
                return Err(ModbusError::frame(format!(
                    "Invalid exception response length: {} bytes", frame.len()
                )));
            }
            let function = ModbusFunction::from_u8(function_code & !EXCEPTION_FLAG)?;
            return Ok(ModbusResponse::new_exception(slave_id, function, frame[2]));
        }

        let function = ModbusFunction::from_u8(function_code)?;
        Ok(ModbusResponse::new_success(slave_id, function, frame[2..data_len].to_vec()))
    }
}

impl Framer for RtuFramer {
    fn build_packet(&self, request: &ModbusRequest) -> ModbusResult<Vec<u8>> {
        let mut frame = Vec::with_capacity(8 + request.data.len());

        frame.push(request.slave_id);
        frame.push(request.function.to_u8());

        match request.function {
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters => {
                frame.extend_from_slice(&request.address.to_be_bytes());
                frame.extend_from_slice(&request.quantity.to_be_bytes());
            },

            ModbusFunction::WriteSingleCoil => {
                frame.extend_from_slice(&request.address.to_be_bytes());
                let value: u16 = if request.data.first().copied().unwrap_or(0) != 0 { 0xFF00 } else { 0x0000 };
                frame.extend_from_slice(&value.to_be_bytes());
            },

            ModbusFunction::WriteSingleRegister => {
                frame.extend_from_slice(&request.address.to_be_bytes());
                let value = request.data.get(0..2).ok_or_else(|| {
                    ModbusError::invalid_data("Write single register needs 2 data bytes")
                })?;
                frame.extend_from_slice(value);
            },

            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleRegisters => {
                let byte_count = u8::try_from(request.data.len()).map_err(|_| {
                    ModbusError::invalid_data(format!("Payload too large: {} bytes", request.data.len()))
                })?;
                frame.extend_from_slice(&request.address.to_be_bytes());
                frame.extend_from_slice(&request.quantity.to_be_bytes());
                frame.push(byte_count);
                frame.extend_from_slice(&request.data);
            },
        }

        let crc = calculate_crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes()); // CRC is little-endian in RTU

        if frame.len() > MAX_RTU_FRAME_SIZE {
            return Err(ModbusError::invalid_data(format!(
                "Request frame exceeds {} bytes", MAX_RTU_FRAME_SIZE
            )));
        }

        Ok(frame)
    }

    fn reset_frame(&mut self) {
        self.buffer.clear();
    }

    fn add_to_frame(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    fn raw_frame(&self) -> &[u8] {
        &self.buffer
    }

    fn peek_function_code(&self) -> Option<u8> {
        self.buffer.get(1).copied()
    }

    fn expected_response_length(&self, request: &ModbusRequest) -> usize {
        RTU_ADU_OVERHEAD + request.response_pdu_size()
    }

    fn exception_response_length(&self) -> usize {
        RTU_EXCEPTION_FRAME_LEN
    }

    fn decode_frame(&mut self) -> ModbusResult<ModbusResponse> {
        let result = Self::decode(&self.buffer);
        self.buffer.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_calculation() {
        // 01 03 00 00 00 02 -> C4 0B
        let data = [0x01, 0x03, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(calculate_crc(&data).to_le_bytes(), [0xC4, 0x0B]);
    }

    #[test]
    fn test_build_read_packet() {
        let framer = RtuFramer::new();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
        let packet = framer.build_packet(&request).unwrap();
        assert_eq!(packet, vec![0x01, 0x03, 0x00, 0x00, 0x00, 0x02, 0xC4, 0x0B]);
    }

    #[test]
    fn test_build_write_coil_packet() {
        let framer = RtuFramer::new();
        let request = ModbusRequest::new_write(0x11, ModbusFunction::WriteSingleCoil, 0x00AC, vec![1]);
        let packet = framer.build_packet(&request).unwrap();
        assert_eq!(&packet[..6], &[0x11, 0x05, 0x00, 0xAC, 0xFF, 0x00]);
        assert_eq!(calculate_crc(&packet[..6]).to_le_bytes(), [packet[6], packet[7]]);
    }

    #[test]
    fn test_expected_lengths() {
        let framer = RtuFramer::new();
        let request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2);
        // slave + fc + byte count + 4 data + crc
        assert_eq!(framer.expected_response_length(&request), 9);
        assert_eq!(framer.exception_response_length(), 5);
    }

    #[test]
    fn test_accumulate_and_decode() {
        let mut framer = RtuFramer::new();
        assert_eq!(framer.peek_function_code(), None);

        framer.add_to_frame(&[0x01]);
        assert_eq!(framer.peek_function_code(), None);

        framer.add_to_frame(&[0x03, 0x04, 0x00, 0x0A]);
        assert_eq!(framer.peek_function_code(), Some(0x03));

        let mut tail = vec![0x00, 0x0B];
        let mut full = framer.raw_frame().to_vec();
        full.extend_from_slice(&tail);
        let crc = calculate_crc(&full);
        tail.extend_from_slice(&crc.to_le_bytes());
        framer.add_to_frame(&tail);
        assert_eq!(framer.raw_frame().len(), 9);

        let response = framer.decode_frame().unwrap();
        assert_eq!(response.slave_id, 1);
        assert_eq!(response.function, ModbusFunction::ReadHoldingRegisters);
        assert_eq!(response.data, vec![0x04, 0x00, 0x0A, 0x00, 0x0B]);
        assert!(framer.raw_frame().is_empty());
    }

    #[test]
    fn test_decode_exception_frame() {
        let mut frame = vec![0x01, 0x83, 0x02];
        let crc = calculate_crc(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());

        let response = RtuFramer::decode(&frame).unwrap();
        assert!(response.is_exception());
        assert_eq!(response.function, ModbusFunction::ReadHoldingRegisters);
        assert_eq!(response.exception_code, Some(0x02));
    }

    #[test]
    fn test_decode_rejects_bad_crc() {
        let frame = [0x01, 0x03, 0x02, 0x00, 0x01, 0xFF, 0xFF];
        match RtuFramer::decode(&frame) {
            Err(ModbusError::CrcMismatch { actual, .. }) => assert_eq!(actual, 0xFFFF),
            other => panic!("expected CRC mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        assert!(matches!(
            RtuFramer::decode(&[0x01, 0x03, 0x00]),
            Err(ModbusError::Frame { .. })
        ));
    }

    #[test]
    fn test_reset_frame() {
        let mut framer = RtuFramer::new();
        framer.add_to_frame(&[0x01, 0x03, 0x02]);
        framer.reset_frame();
        assert!(framer.raw_frame().is_empty());
        assert_eq!(framer.peek_function_code(), None);
    }
}
