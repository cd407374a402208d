//! Duration helpers for logs and reports.

use std::time::Duration;

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_ms() {
        assert_eq!(duration_ms(Duration::from_micros(2_500)), 2);
        assert_eq!(duration_ms(Duration::ZERO), 0);
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }
}
