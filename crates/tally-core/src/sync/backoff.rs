//! Retry backoff policy for transiently failed records.

use std::time::Duration;

/// Exponent ceiling; beyond this the max delay dominates anyway
const MAX_SHIFT: u32 = 16;

/// Capped exponential backoff: `min(base * 2^attempts, max)`.
///
/// There is deliberately no attempt cap. A transiently failing record must
/// eventually sync once connectivity or the service recovers; data loss is
/// not an acceptable trade for giving up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt is `base * 2`
    pub base: Duration,
    /// Upper bound on the delay between attempts
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(2),
            max: Duration::from_secs(300),
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, where `attempts` counts failures so far
    #[must_use]
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let factor = 1u32 << attempts.min(MAX_SHIFT);
        self.base.saturating_mul(factor).min(self.max)
    }

    /// Absolute next-eligible-attempt deadline (Unix ms)
    #[must_use]
    pub fn next_attempt_at(&self, attempts: u32, now_ms: i64) -> i64 {
        let delay_ms = i64::try_from(self.delay_for(attempts).as_millis()).unwrap_or(i64::MAX);
        now_ms.saturating_add(delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_increase_strictly_until_capped() {
        let policy = BackoffPolicy::default();

        let first = policy.delay_for(1);
        let second = policy.delay_for(2);
        let third = policy.delay_for(3);

        assert!(first < second);
        assert!(second < third);
        assert_eq!(policy.delay_for(30), policy.max);
    }

    #[test]
    fn delay_never_exceeds_max() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(10),
            max: Duration::from_secs(60),
        };

        for attempts in 0..64 {
            assert!(policy.delay_for(attempts) <= policy.max);
        }
    }

    #[test]
    fn next_attempt_at_offsets_from_now() {
        let policy = BackoffPolicy {
            base: Duration::from_secs(1),
            max: Duration::from_secs(300),
        };

        // One failure so far: 1s * 2^1 = 2s
        assert_eq!(policy.next_attempt_at(1, 1_000_000), 1_002_000);
    }
}
