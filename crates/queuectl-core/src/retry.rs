//! Backoff policy for failed jobs.

use chrono::Duration;

/// Default retry cap for new jobs when no config override is set.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base of the exponential backoff formula.
pub const DEFAULT_BACKOFF_BASE: u32 = 2;

/// Exponential backoff: a job that has failed `attempts` times becomes
/// eligible again after `base ^ attempts` seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base: u32,
}

impl BackoffPolicy {
    /// Creates a policy with the given base. A base below 1 is clamped to 1.
    #[must_use]
    pub fn new(base: u32) -> Self {
        Self { base: base.max(1) }
    }

    /// The configured base.
    #[must_use]
    pub const fn base(self) -> u32 {
        self.base
    }

    /// Delay before the next attempt, given the failure count so far.
    ///
    /// Overflowing powers saturate to a delay far beyond any practical
    /// schedule instead of panicking.
    #[must_use]
    pub fn delay_for_attempt(self, attempts: u32) -> Duration {
        let secs = i64::from(self.base)
            .checked_pow(attempts)
            .unwrap_or(i64::MAX);
        Duration::try_seconds(secs).unwrap_or_else(|| Duration::days(365_000))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_BACKOFF_BASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn default_base_is_two() {
        assert_eq!(BackoffPolicy::default().base(), 2);
    }

    #[test]
    fn powers_of_the_base() {
        let policy = BackoffPolicy::new(2);
        assert_eq!(policy.delay_for_attempt(1), Duration::seconds(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::seconds(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::seconds(8));
        assert_eq!(policy.delay_for_attempt(10), Duration::seconds(1024));
    }

    #[test]
    fn base_one_is_a_constant_delay() {
        let policy = BackoffPolicy::new(1);
        assert_eq!(policy.delay_for_attempt(1), Duration::seconds(1));
        assert_eq!(policy.delay_for_attempt(50), Duration::seconds(1));
    }

    #[test]
    fn zero_base_is_clamped() {
        assert_eq!(BackoffPolicy::new(0).base(), 1);
    }

    #[test]
    fn huge_exponents_saturate_instead_of_panicking() {
        let policy = BackoffPolicy::new(10);
        let delay = policy.delay_for_attempt(1000);
        assert!(delay > Duration::days(365));
    }

    proptest! {
        /// The delay is exactly base^attempts seconds while the power fits.
        #[test]
        fn delay_matches_the_formula(base in 1u32..6, attempts in 0u32..12) {
            let policy = BackoffPolicy::new(base);
            let expected = i64::from(base).pow(attempts);
            prop_assert_eq!(policy.delay_for_attempt(attempts), Duration::seconds(expected));
        }

        /// Delays never shrink as attempts accumulate.
        #[test]
        fn delay_is_monotonic(base in 1u32..6, attempts in 0u32..20) {
            let policy = BackoffPolicy::new(base);
            prop_assert!(
                policy.delay_for_attempt(attempts + 1) >= policy.delay_for_attempt(attempts)
            );
        }
    }
}
