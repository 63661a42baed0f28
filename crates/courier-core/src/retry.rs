use std::time::Duration;

/// Exponential backoff used by download retries.
///
/// The delay for retry `n` is `base * 2^n`, raised to the backend's
/// retry-after hint when one is present and clamped to `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl RetryPolicy {
    /// `max_delay_ms` is raised to `base_delay_ms` when smaller.
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
        }
    }

    pub fn base_delay_ms(&self) -> u64 {
        self.base_delay_ms
    }

    pub fn max_delay_ms(&self) -> u64 {
        self.max_delay_ms
    }

    /// Backoff before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: u32, retry_after_ms: Option<u64>) -> Duration {
        let factor = 2_u64.checked_pow(retry).unwrap_or(u64::MAX);
        let backoff = self.base_delay_ms.saturating_mul(factor);
        let floor = retry_after_ms.map_or(backoff, |hint| backoff.max(hint));
        Duration::from_millis(floor.min(self.max_delay_ms))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(500, 5_000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_base_delay() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(0, None),
            Duration::from_millis(500)
        );
    }

    #[test]
    fn doubles_per_attempt() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(1, None),
            Duration::from_millis(1_000)
        );
        assert_eq!(
            policy.delay_for_attempt(2, None),
            Duration::from_millis(2_000)
        );
    }

    #[test]
    fn caps_delay_at_max() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.delay_for_attempt(4, None),
            Duration::from_millis(5_000)
        );
        assert_eq!(
            policy.delay_for_attempt(u32::MAX, None),
            Duration::from_millis(5_000)
        );
    }

    #[test]
    fn honors_retry_after_hint_up_to_max() {
        let policy = RetryPolicy::new(500, 20_000);
        assert_eq!(
            policy.delay_for_attempt(1, Some(10_000)),
            Duration::from_millis(10_000)
        );
        assert_eq!(
            policy.delay_for_attempt(1, Some(60_000)),
            Duration::from_millis(20_000)
        );
    }

    #[test]
    fn max_never_below_base() {
        let policy = RetryPolicy::new(1_000, 10);
        assert_eq!(policy.max_delay_ms(), 1_000);
    }
}
