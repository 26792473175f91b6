//! Retry policies for message dispatch.
//!
//! A [`RetryPolicy`] decides how many times a failed operation is retried and how
//! long to wait before each retry. The bus wraps every consumer invocation in one; the
//! helpers here are public so services can reuse the same policies for their own
//! fallible calls.
//!
//! The retry limit counts retries, not attempts: a limit of 3 means one initial attempt
//! plus up to three retries.
//!
//! # Example
//!
//! ```rust
//! use service_common_runtime::retry::{RetryPolicy, retry_with_policy};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::interval(3, Duration::from_millis(10));
//!
//! let value = retry_with_policy(&policy, |_retry| async {
//!     // Your fallible operation here
//!     Ok::<_, String>(42)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// Retry limit of the default policy.
pub const DEFAULT_RETRY_LIMIT: usize = 3;

/// Interval between retries of the default policy.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// How a failed operation is retried.
///
/// # Default
///
/// [`RetryPolicy::Interval`] with a limit of 3 and 5 seconds between retries.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryPolicy {
    /// Never retry
    None,
    /// Retry right away, up to `limit` times
    Immediate {
        /// Maximum number of retries
        limit: usize,
    },
    /// Retry up to `limit` times, waiting `interval` before each retry
    Interval {
        /// Maximum number of retries
        limit: usize,
        /// Delay before each retry
        interval: Duration,
    },
    /// Retry once per listed delay, in order
    Intervals(Vec<Duration>),
    /// Retry with exponentially growing delays
    Exponential {
        /// Maximum number of retries
        limit: usize,
        /// Delay before the first retry
        min_interval: Duration,
        /// Cap on any single delay
        max_interval: Duration,
        /// Growth factor between consecutive delays
        multiplier: f64,
    },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::interval(DEFAULT_RETRY_LIMIT, DEFAULT_RETRY_INTERVAL)
    }
}

impl RetryPolicy {
    /// Retry right away, up to `limit` times.
    #[must_use]
    pub const fn immediate(limit: usize) -> Self {
        Self::Immediate { limit }
    }

    /// Retry up to `limit` times with a fixed `interval` before each retry.
    #[must_use]
    pub const fn interval(limit: usize, interval: Duration) -> Self {
        Self::Interval { limit, interval }
    }

    /// Retry once per delay in `intervals`.
    #[must_use]
    pub fn intervals(intervals: impl IntoIterator<Item = Duration>) -> Self {
        Self::Intervals(intervals.into_iter().collect())
    }

    /// Create a builder for an exponential backoff policy.
    #[must_use]
    pub const fn exponential() -> ExponentialBuilder {
        ExponentialBuilder {
            limit: DEFAULT_RETRY_LIMIT,
            min_interval: Duration::from_millis(100),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Maximum number of retries after the first attempt.
    #[must_use]
    pub fn retry_limit(&self) -> usize {
        match self {
            Self::None => 0,
            Self::Immediate { limit }
            | Self::Interval { limit, .. }
            | Self::Exponential { limit, .. } => *limit,
            Self::Intervals(intervals) => intervals.len(),
        }
    }

    /// Delay before retry number `retry` (0 for the first retry).
    ///
    /// Returns `None` once the retry budget is exhausted.
    #[must_use]
    pub fn delay_for_retry(&self, retry: usize) -> Option<Duration> {
        if retry >= self.retry_limit() {
            return None;
        }

        let delay = match self {
            Self::None => return None,
            Self::Immediate { .. } => Duration::ZERO,
            Self::Interval { interval, .. } => *interval,
            Self::Intervals(intervals) => intervals.get(retry).copied()?,
            Self::Exponential {
                min_interval,
                max_interval,
                multiplier,
                ..
            } => {
                #[allow(
                    clippy::cast_precision_loss,
                    clippy::cast_possible_truncation,
                    clippy::cast_possible_wrap,
                    clippy::cast_sign_loss
                )] // Delays are small; f64 covers them exactly enough
                let delay_ms =
                    min_interval.as_millis() as f64 * multiplier.powi(retry as i32);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let delay = Duration::from_millis(delay_ms as u64);
                delay.min(*max_interval)
            },
        };

        Some(delay)
    }
}

/// Builder for [`RetryPolicy::Exponential`].
#[derive(Debug, Clone)]
pub struct ExponentialBuilder {
    limit: usize,
    min_interval: Duration,
    max_interval: Duration,
    multiplier: f64,
}

impl ExponentialBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn min_interval(mut self, delay: Duration) -> Self {
        self.min_interval = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_interval(mut self, delay: Duration) -> Self {
        self.max_interval = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy::Exponential {
            limit: self.limit,
            min_interval: self.min_interval,
            max_interval: self.max_interval,
            multiplier: self.multiplier,
        }
    }
}

/// The final error of a retried operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{error} (after {retries} retries)")]
pub struct RetryError<E> {
    /// Error returned by the last attempt
    pub error: E,
    /// Number of retries performed before giving up
    pub retries: usize,
}

/// Retry an async operation under `policy`.
///
/// The operation receives the retry number: 0 on the first attempt, then 1, 2, ...
///
/// # Errors
///
/// Returns the last error, with the number of retries performed, once the policy's
/// budget is exhausted.
pub async fn retry_with_policy<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    retry_with_predicate(policy, operation, |_| true).await
}

/// Retry an async operation with custom retry logic.
///
/// This function allows you to provide a predicate to determine whether
/// an error is retryable. Non-retryable errors fail immediately.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once the budget is
/// exhausted, with the number of retries performed.
///
/// # Example
///
/// ```rust
/// use service_common_runtime::retry::{RetryPolicy, retry_with_predicate};
///
/// # async fn example() {
/// let result = retry_with_predicate(
///     &RetryPolicy::immediate(5),
///     |_retry| async { Err::<(), _>("permanent error") },
///     |err: &&str| err.contains("transient"),
/// )
/// .await;
///
/// assert_eq!(result.unwrap_err().retries, 0);
/// # }
/// ```
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    mut operation: F,
    is_retryable: P,
) -> Result<T, RetryError<E>>
where
    F: FnMut(usize) -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut retry = 0;

    loop {
        match operation(retry).await {
            Ok(result) => {
                if retry > 0 {
                    tracing::info!(retry, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(
                        error = %err,
                        "Error is not retryable, failing immediately"
                    );
                    return Err(RetryError {
                        error: err,
                        retries: retry,
                    });
                }

                let Some(delay) = policy.delay_for_retry(retry) else {
                    tracing::error!(
                        retries = retry,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(RetryError {
                        error: err,
                        retries: retry,
                    });
                };

                tracing::warn!(
                    retry = retry + 1,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying..."
                );

                if !delay.is_zero() {
                    sleep(delay).await;
                }
                retry += 1;
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    #[test]
    fn default_policy_is_three_retries_five_seconds_apart() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_limit(), 3);
        assert_eq!(policy.delay_for_retry(0), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_retry(2), Some(Duration::from_secs(5)));
        assert_eq!(policy.delay_for_retry(3), None);
    }

    #[test]
    fn exponential_delay_calculation() {
        let policy = RetryPolicy::exponential()
            .limit(5)
            .min_interval(Duration::from_millis(100))
            .multiplier(2.0)
            .max_interval(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_retry(0), Some(Duration::from_millis(100)));
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_millis(200)));
        assert_eq!(policy.delay_for_retry(2), Some(Duration::from_millis(400)));
        assert_eq!(policy.delay_for_retry(3), Some(Duration::from_millis(800)));
    }

    #[test]
    fn exponential_delay_is_capped() {
        let policy = RetryPolicy::exponential()
            .limit(10)
            .min_interval(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_interval(Duration::from_secs(2))
            .build();

        // 1000ms * 10^5 = 100,000,000ms, but capped at 2000ms
        assert_eq!(policy.delay_for_retry(5), Some(Duration::from_secs(2)));
    }

    #[test]
    fn intervals_follow_the_schedule() {
        let policy = RetryPolicy::intervals([Duration::from_secs(1), Duration::from_secs(7)]);
        assert_eq!(policy.retry_limit(), 2);
        assert_eq!(policy.delay_for_retry(1), Some(Duration::from_secs(7)));
        assert_eq!(policy.delay_for_retry(2), None);
    }

    #[test]
    fn none_never_retries() {
        assert_eq!(RetryPolicy::None.retry_limit(), 0);
        assert_eq!(RetryPolicy::None.delay_for_retry(0), None);
    }

    #[tokio::test(start_paused = true)]
    async fn default_policy_spaces_three_retries_by_five_seconds() {
        let policy = RetryPolicy::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let started = Instant::now();
        let timeline = Arc::new(std::sync::Mutex::new(Vec::new()));

        let result = retry_with_policy(&policy, |_retry| {
            let calls = Arc::clone(&calls);
            let timeline = Arc::clone(&timeline);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                timeline.lock().unwrap().push(started.elapsed());
                Err::<(), _>("consumer failed")
            }
        })
        .await;

        let error = result.unwrap_err();
        assert_eq!(error.retries, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4); // Initial attempt + 3 retries
        assert_eq!(
            *timeline.lock().unwrap(),
            vec![
                Duration::ZERO,
                Duration::from_secs(5),
                Duration::from_secs(10),
                Duration::from_secs(15),
            ]
        );
    }

    #[tokio::test]
    async fn retry_succeeds_on_first_try() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_policy(&RetryPolicy::default(), |_| {
            let c = Arc::clone(&counter_clone);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<_, String>(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1); // Only called once
    }

    #[tokio::test]
    async fn retry_number_is_passed_to_the_operation() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let result = retry_with_policy(&RetryPolicy::immediate(3), |retry| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(retry);
                if retry < 2 {
                    Err(format!("Attempt {retry} failed"))
                } else {
                    Ok(retry)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(2));
        assert_eq!(*seen.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn predicate_skips_non_retryable_errors() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = Arc::clone(&counter);

        let result = retry_with_predicate(
            &RetryPolicy::immediate(5),
            |_| {
                let c = Arc::clone(&counter_clone);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("permanent error")
                }
            },
            |err: &&str| err.contains("transient"),
        )
        .await;

        assert_eq!(
            result,
            Err(RetryError {
                error: "permanent error",
                retries: 0
            })
        );
        assert_eq!(counter.load(Ordering::SeqCst), 1); // No retries for non-retryable error
    }
}
