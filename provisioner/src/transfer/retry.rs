//! Exponential backoff with jitter around a fallible operation.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How many times to retry and how long to wait in between.
///
/// The delay after failed attempt `n` (counting from zero) is
/// `base_delay * 2^n` plus a uniformly random jitter in `0..=max_jitter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `0` disables retrying.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Upper bound of the random jitter in milliseconds.
    pub max_jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl RetryPolicy {
    /// Total attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// The delay before the attempt following failed attempt `attempt`,
    /// without jitter.
    ///
    /// # Examples
    ///
    /// ```
    /// use mediadeps_provisioner::transfer::RetryPolicy;
    /// use std::time::Duration;
    ///
    /// let policy = RetryPolicy { max_retries: 3, base_delay_ms: 100, max_jitter_ms: 0 };
    /// assert_eq!(policy.backoff(0), Duration::from_millis(100));
    /// assert_eq!(policy.backoff(2), Duration::from_millis(400));
    /// ```
    #[must_use]
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1_u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(self.base_delay_ms.saturating_mul(factor))
    }

    fn delay_with_jitter(&self, attempt: u32) -> Duration {
        let jitter = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        self.backoff(attempt)
            .saturating_add(Duration::from_millis(jitter))
    }
}

/// Run `op` until it succeeds or the policy is exhausted.
///
/// `op` receives the zero-based attempt number. Exhaustion yields the error
/// from the final attempt.
///
/// # Errors
///
/// Returns the last error produced by `op`.
///
/// # Examples
///
/// ```
/// use mediadeps_provisioner::transfer::{RetryPolicy, retry_with_backoff};
///
/// let policy = RetryPolicy { max_retries: 3, base_delay_ms: 0, max_jitter_ms: 0 };
/// let result: Result<u32, &str> =
///     retry_with_backoff(&policy, |attempt| if attempt < 2 { Err("busy") } else { Ok(attempt) });
/// assert_eq!(result, Ok(2));
/// ```
pub fn retry_with_backoff<T, E>(
    policy: &RetryPolicy,
    op: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E> {
    retry_with_backoff_notify(policy, op, |_, _, _| {})
}

/// [`retry_with_backoff`] with an observer called before each sleep.
///
/// `on_retry` receives the failed attempt number, its error, and the delay
/// about to be slept.
///
/// # Errors
///
/// Returns the last error produced by `op`.
pub fn retry_with_backoff_notify<T, E>(
    policy: &RetryPolicy,
    mut op: impl FnMut(u32) -> Result<T, E>,
    mut on_retry: impl FnMut(u32, &E, Duration),
) -> Result<T, E> {
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(value) => return Ok(value),
            Err(err) if attempt >= policy.max_retries => return Err(err),
            Err(err) => {
                let delay = policy.delay_with_jitter(attempt);
                log::debug!(
                    "attempt {} of {} failed; retrying in {delay:?}",
                    attempt + 1,
                    policy.max_attempts()
                );
                on_retry(attempt, &err, delay);
                std::thread::sleep(delay);
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn instant() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            base_delay_ms: 0,
            max_jitter_ms: 0,
        }
    }

    #[rstest]
    fn fails_twice_then_succeeds_in_three_calls(instant: RetryPolicy) {
        let mut calls = 0;
        let result: Result<&str, String> = retry_with_backoff(&instant, |_| {
            calls += 1;
            if calls <= 2 {
                Err(format!("failure {calls}"))
            } else {
                Ok("done")
            }
        });
        assert_eq!(result, Ok("done"));
        assert_eq!(calls, 3);
    }

    #[rstest]
    fn always_failing_stops_after_max_retries_plus_one(instant: RetryPolicy) {
        let mut calls = 0;
        let result: Result<(), String> = retry_with_backoff(&instant, |attempt| {
            calls += 1;
            Err(format!("failure {attempt}"))
        });
        assert_eq!(result, Err("failure 3".to_owned()));
        assert_eq!(calls, 4);
    }

    #[rstest]
    fn notifier_sees_each_failed_attempt_but_the_last(instant: RetryPolicy) {
        let mut seen = Vec::new();
        let result: Result<(), u32> = retry_with_backoff_notify(
            &instant,
            Err,
            |attempt, err, _| seen.push((attempt, *err)),
        );
        assert_eq!(result, Err(3));
        assert_eq!(seen, vec![(0, 0), (1, 1), (2, 2)]);
    }

    #[test]
    fn zero_retries_means_a_single_attempt() {
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let mut calls = 0;
        let result: Result<(), ()> = retry_with_backoff(&policy, |_| {
            calls += 1;
            Err(())
        });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }

    #[rstest]
    #[case(0, 1_000)]
    #[case(1, 2_000)]
    #[case(3, 8_000)]
    fn backoff_doubles_per_attempt(#[case] attempt: u32, #[case] expected_ms: u64) {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(attempt), Duration::from_millis(expected_ms));
    }

    #[test]
    fn backoff_saturates_instead_of_overflowing() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(200), Duration::from_millis(u64::MAX));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy {
            max_retries: 1,
            base_delay_ms: 10,
            max_jitter_ms: 5,
        };
        for _ in 0..50 {
            let delay = policy.delay_with_jitter(0);
            assert!(delay >= Duration::from_millis(10));
            assert!(delay <= Duration::from_millis(15));
        }
    }
}
