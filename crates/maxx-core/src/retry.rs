use std::time::Duration;

use maxx_storage::entities::retry_configs;

/// Capped exponential backoff: `min(initial × rate^k, max)` before the
/// k-th re-try of one route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_interval_ms: i64,
    /// Per-mille; 2000 = ×2.0 per step.
    pub backoff_rate: i64,
    pub max_interval_ms: i64,
}

impl RetryPolicy {
    pub fn from_entity(config: &retry_configs::Model) -> Self {
        Self {
            max_retries: config.max_retries.max(0) as u32,
            initial_interval_ms: config.initial_interval_ms.max(0),
            backoff_rate: config.backoff_rate.max(1_000),
            max_interval_ms: config.max_interval_ms.max(0),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let mut interval = self.initial_interval_ms as i128;
        for _ in 0..attempt {
            interval = interval * self.backoff_rate as i128 / 1_000;
            if interval >= self.max_interval_ms as i128 {
                interval = self.max_interval_ms as i128;
                break;
            }
        }
        Duration::from_millis(interval.min(self.max_interval_ms as i128).max(0) as u64)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_interval_ms: 500,
            backoff_rate: 2_000,
            max_interval_ms: 10_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doubling_sequence_caps_at_max() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_interval_ms: 100,
            backoff_rate: 2_000,
            max_interval_ms: 1_000,
        };
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(5), Duration::from_millis(1_000));
    }

    #[test]
    fn fractional_rate_rounds_down() {
        let policy = RetryPolicy {
            max_retries: 2,
            initial_interval_ms: 100,
            backoff_rate: 1_500,
            max_interval_ms: 10_000,
        };
        assert_eq!(policy.delay(1), Duration::from_millis(150));
        assert_eq!(policy.delay(2), Duration::from_millis(225));
    }
}
