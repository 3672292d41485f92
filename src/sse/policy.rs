//! Reconnection policy: attempt limits and exponential backoff.
//!
//! Both functions are pure. Attempts are counted from 1, so the first automatic
//! recovery waits exactly the base delay, the second twice that, and so on:
//!
//! ```
//! use std::time::Duration;
//! use sse_client_sdk::sse::policy::{delay_for, should_retry};
//!
//! let base = Duration::from_millis(100);
//! assert_eq!(delay_for(1, base), Duration::from_millis(100));
//! assert_eq!(delay_for(3, base), Duration::from_millis(400));
//! assert!(should_retry(2, 2));
//! assert!(!should_retry(3, 2));
//! ```
//!
//! There is no jitter and no upper cap on the delay. A large `max_attempts`
//! means unbounded growth; the only limit is arithmetic saturation at
//! [`Duration::MAX`].

use std::time::Duration;

/// Returns `true` if attempt number `attempt` is still within the budget.
///
/// A budget of `0` disables automatic retry entirely.
#[must_use]
pub const fn should_retry(attempt: u32, max_attempts: u32) -> bool {
    max_attempts != 0 && attempt <= max_attempts
}

/// Delay before attempt number `attempt`: `base_delay × 2^(attempt − 1)`.
///
/// Attempt `0` is treated as attempt `1`.
#[must_use]
pub fn delay_for(attempt: u32, base_delay: Duration) -> Duration {
    let exponent = attempt.saturating_sub(1);
    2_u32
        .checked_pow(exponent)
        .and_then(|factor| base_delay.checked_mul(factor))
        .unwrap_or(Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_per_attempt() {
        let base = Duration::from_millis(1000);
        for attempt in 1..=10_u32 {
            let expected = base * 2_u32.pow(attempt - 1);
            assert_eq!(delay_for(attempt, base), expected, "attempt {attempt}");
        }
    }

    #[test]
    fn delay_for_zero_attempt_is_base() {
        let base = Duration::from_millis(250);
        assert_eq!(delay_for(0, base), base);
    }

    #[test]
    fn delay_saturates_instead_of_overflowing() {
        assert_eq!(delay_for(40, Duration::from_secs(1)), Duration::MAX);
        assert_eq!(delay_for(u32::MAX, Duration::from_millis(1)), Duration::MAX);
    }

    #[test]
    fn zero_budget_never_retries() {
        for attempt in [0, 1, 2, 100, u32::MAX] {
            assert!(!should_retry(attempt, 0), "attempt {attempt}");
        }
    }

    #[test]
    fn retry_within_budget() {
        assert!(should_retry(1, 5));
        assert!(should_retry(5, 5));
        assert!(!should_retry(6, 5));
    }
}
