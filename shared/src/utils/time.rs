//! Time-related utilities

use std::time::{SystemTime, UNIX_EPOCH};

/// Get the current system time in milliseconds since UNIX epoch
pub fn system_time_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_millis() as u64
}

/// Get the current system time in nanoseconds since UNIX epoch
pub fn system_time_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system time before UNIX epoch")
        .as_nanos() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time() {
        let millis = system_time_millis();
        let nanos = system_time_nanos();

        // Basic sanity check
        assert!(millis > 1_600_000_000_000); // After 2020
        assert!(nanos > millis);
    }
}
