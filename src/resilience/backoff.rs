//! Exponential backoff.

use std::time::Duration;

/// Delay before retry `attempt` (0-based): `base * 2^attempt`.
pub fn exponential_delay(attempt: u32, base: Duration) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_calculation() {
        let base = Duration::from_millis(100);
        assert_eq!(exponential_delay(0, base), Duration::from_millis(100));
        assert_eq!(exponential_delay(1, base), Duration::from_millis(200));
        assert_eq!(exponential_delay(3, base), Duration::from_millis(800));
    }

    #[test]
    fn test_backoff_saturates() {
        let base = Duration::from_millis(100);
        assert_eq!(exponential_delay(64, base), base.saturating_mul(u32::MAX));
    }
}
