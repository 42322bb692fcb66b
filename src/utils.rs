/// Formatting and logging helpers shared by the transport and the engine

/// Formatting and display utilities
pub mod format {
    use std::time::Duration;

    /// Format byte array as hex string
    pub fn bytes_to_hex(bytes: &[u8]) -> String {
        bytes.iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Format duration in a human-readable way
    pub fn format_duration(duration: Duration) -> String {
        let micros = duration.as_micros();
        if micros < 1000 {
            format!("{}us", micros)
        } else if micros < 1_000_000 {
            format!("{:.3}ms", duration.as_secs_f64() * 1000.0)
        } else {
            format!("{:.2}s", duration.as_secs_f64())
        }
    }
}

/// Logging utilities
pub mod logging {
    /// Initialize simple logger for testing
    pub fn init_test_logger() {
        let _ = env_logger::builder()
            .filter_level(log::LevelFilter::Debug)
            .is_test(true)
            .try_init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_formatting() {
        let bytes = vec![0x01, 0x03, 0x10, 0xFF];
        assert_eq!(format::bytes_to_hex(&bytes), "01 03 10 FF");
        assert_eq!(format::bytes_to_hex(&[]), "");

        assert_eq!(format::format_duration(Duration::from_micros(750)), "750us");
        assert_eq!(format::format_duration(Duration::from_micros(4010)), "4.010ms");
        assert_eq!(format::format_duration(Duration::from_millis(1500)), "1.50s");
    }
}
