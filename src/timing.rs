/// RTU character timing
///
/// A Modbus RTU receiver finds frame boundaries by silence on the line: at
/// least 3.5 character times must separate two frames. Above 19200 baud the
/// character time is so short that the protocol fixes the gap at 1.75 ms.

use std::time::Duration;

use crate::error::{ModbusError, ModbusResult};

/// Baud rates above this use the fixed silent interval
pub const HIGH_BAUD_THRESHOLD: u32 = 19_200;

/// Silent interval mandated for baud rates above [`HIGH_BAUD_THRESHOLD`]
pub const HIGH_BAUD_SILENT_INTERVAL: Duration = Duration::from_micros(1_750);

/// Start bit + 8 data bits + 2 stop/parity bits
pub const BITS_PER_CHARACTER: u32 = 11;

/// Number of character times in the inter-frame gap
pub const SILENT_CHARACTERS: f64 = 3.5;

fn check_baud_rate(baud_rate: u32) -> ModbusResult<()> {
    if baud_rate == 0 {
        return Err(ModbusError::configuration("Baud rate must be greater than zero"));
    }
    Ok(())
}

/// Time to transmit one character, in seconds
pub fn character_time(baud_rate: u32) -> ModbusResult<f64> {
    check_baud_rate(baud_rate)?;
    Ok(BITS_PER_CHARACTER as f64 / baud_rate as f64)
}

/// Silent interval in seconds, rounded to microsecond precision
pub fn silent_interval_secs(baud_rate: u32) -> ModbusResult<f64> {
    check_baud_rate(baud_rate)?;
    let secs = if baud_rate > HIGH_BAUD_THRESHOLD {
        HIGH_BAUD_SILENT_INTERVAL.as_secs_f64()
    } else {
        SILENT_CHARACTERS * character_time(baud_rate)?
    };
    Ok((secs * 1_000_000.0).round() / 1_000_000.0)
}

/// Minimum silence required between two frames at `baud_rate`
///
/// # Examples
///
/// ```rust
/// use std::time::Duration;
/// use voltage_modbus_rtu::timing::silent_interval;
///
/// assert_eq!(silent_interval(9600).unwrap(), Duration::from_micros(4010));
/// assert_eq!(silent_interval(115_200).unwrap(), Duration::from_micros(1750));
/// assert!(silent_interval(0).is_err());
/// ```
pub fn silent_interval(baud_rate: u32) -> ModbusResult<Duration> {
    let secs = silent_interval_secs(baud_rate)?;
    Ok(Duration::from_micros((secs * 1_000_000.0).round() as u64))
}
