//! Retry decisions and the background task that brings delayed jobs back

pub mod promoter;

pub use promoter::{DelayedJobPromoter, PromoterHandle, TickReport};

use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;

use crate::{error::JobError, QueueError, QueueResult};

/// Outcome of a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Park the job as Delayed for this long, then run it again
    RetryAfter(Duration),
    /// No attempts left, or the error is permanent
    GiveUp,
}

/// Exponential backoff: `base_delay * 2^(attempt - 1)`, capped at `max_delay`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction of the delay that may be randomly shaved off (0.0 disables jitter)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(3600), // 1 hour
            jitter: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Decide what happens after attempt number `attempts_made` failed.
    ///
    /// `max_attempts` is the job's own ceiling, fixed when it was enqueued.
    pub fn decide(&self, attempts_made: u32, max_attempts: u32, error: &JobError) -> RetryDecision {
        if !error.is_retryable() || attempts_made >= max_attempts {
            return RetryDecision::GiveUp;
        }
        RetryDecision::RetryAfter(self.backoff(attempts_made))
    }

    /// Delay before the attempt that follows attempt number `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);

        if self.jitter > 0.0 {
            let shave = rand::thread_rng().gen_range(0.0..=self.jitter);
            delay.mul_f64(1.0 - shave)
        } else {
            delay
        }
    }
}

/// Wall-clock instant at which a delayed job becomes due
pub fn retry_at(now: DateTime<Utc>, delay: Duration) -> QueueResult<DateTime<Utc>> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .ok_or_else(|| QueueError::Config(format!("retry delay {:?} is out of range", delay)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn delays_double_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(1000));
        assert_eq!(policy.backoff(2), Duration::from_millis(2000));
        assert_eq!(policy.backoff(3), Duration::from_millis(4000));
    }

    #[test]
    fn retries_until_attempts_run_out() {
        let policy = RetryPolicy::default();
        let err = JobError::retryable("smtp timeout");

        assert_eq!(policy.decide(1, 3, &err), RetryDecision::RetryAfter(Duration::from_millis(1000)));
        assert_eq!(policy.decide(2, 3, &err), RetryDecision::RetryAfter(Duration::from_millis(2000)));
        assert_eq!(policy.decide(3, 3, &err), RetryDecision::GiveUp);
    }

    #[test]
    fn retry_at_rejects_delays_past_the_calendar() {
        let now = Utc::now();
        assert_eq!(
            retry_at(now, Duration::from_millis(1500)).unwrap() - now,
            chrono::Duration::milliseconds(1500)
        );
        let err = retry_at(now, Duration::from_secs(u64::MAX / 2)).unwrap_err();
        assert!(matches!(err, QueueError::Config(msg) if msg.contains("retry delay")));
    }

    #[test]
    fn permanent_errors_are_not_retried() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.decide(1, 3, &JobError::permanent("bad address")), RetryDecision::GiveUp);
    }

    #[test]
    fn jitter_only_shortens_the_delay() {
        let policy = RetryPolicy::default().with_jitter(0.5);
        for _ in 0..50 {
            let delay = policy.backoff(2);
            assert!(delay <= Duration::from_millis(2000));
            assert!(delay >= Duration::from_millis(1000));
        }
    }

    proptest! {
        #[test]
        fn backoff_is_monotonic_and_capped(base_ms in 1u64..5_000, attempt in 1u32..64) {
            let policy = RetryPolicy::new(10, Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_secs(60));
            let current = policy.backoff(attempt);
            let next = policy.backoff(attempt + 1);

            prop_assert!(current <= Duration::from_secs(60));
            prop_assert!(next >= current);
        }
    }
}
