//! Property-based tests for retry backoff schedules

use std::time::Duration;

use proptest::prelude::*;

use branchscan_core::infrastructure::resilience::RetryPolicy;

fn policy(max_attempts: u32, initial_ms: u64, max_ms: u64, multiplier: f64) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(initial_ms),
        max_delay: Duration::from_millis(max_ms),
        backoff_multiplier: multiplier,
        retryable_patterns: Vec::new(),
    }
}

proptest! {
    #[test]
    fn test_schedule_has_one_delay_per_retry(
        max_attempts in 0u32..12,
        initial_ms in 1u64..5_000,
        multiplier in 1.0f64..4.0,
    ) {
        let schedule = policy(max_attempts, initial_ms, 60_000, multiplier).backoff_schedule();
        prop_assert_eq!(schedule.len(), max_attempts as usize);
    }

    #[test]
    fn test_delays_never_shrink_and_respect_cap(
        max_attempts in 1u32..12,
        initial_ms in 1u64..5_000,
        max_ms in 1u64..60_000,
        multiplier in 1.0f64..4.0,
    ) {
        let cap = Duration::from_millis(max_ms);
        let schedule = policy(max_attempts, initial_ms, max_ms, multiplier).backoff_schedule();

        prop_assert!(schedule.iter().all(|d| *d <= cap));
        for pair in schedule.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn test_total_attempts_is_retries_plus_one(max_attempts in 0u32..1_000) {
        let policy = RetryPolicy::default().with_max_attempts(max_attempts);
        prop_assert_eq!(policy.total_attempts(), max_attempts + 1);
    }
}
