//! Bounded retry with backoff.
//!
//! This is the single retry utility for the inventory core. Ledger CAS
//! conflicts, mutex acquisition, compensation scheduling and startup
//! connections all go through it, each tagged with the [`Operation`] it
//! serves.
//!
//! # Example
//!
//! ```rust
//! use boxoffice_core::Operation;
//! use boxoffice_runtime::retry::{RetryPolicy, retry_with_predicate};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(50))
//!     .linear()
//!     .build();
//!
//! let value = retry_with_predicate(
//!     &policy,
//!     Operation::Reserve,
//!     || async { Ok::<_, String>(42) },
//!     |err: &String| err.contains("conflict"),
//! )
//! .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use boxoffice_core::Operation;
use std::time::Duration;
use tokio::time::sleep;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `initial_delay * multiplier^attempt`
    Exponential {
        /// Growth factor
        multiplier: f64,
    },
    /// `initial_delay * (attempt + 1)`
    Linear,
}

/// Retry policy configuration.
///
/// # Default Values
///
/// - `max_retries`: 3
/// - `initial_delay`: 100ms
/// - `max_delay`: 30 seconds
/// - `backoff`: exponential, multiplier 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Cap on any single delay
    pub max_delay: Duration,
    /// Growth strategy
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff: Backoff::Exponential { multiplier: 2.0 },
        }
    }

    /// Total attempts including the first one.
    #[must_use]
    pub const fn max_attempts(&self) -> usize {
        self.max_retries + 1
    }

    /// Delay before retry number `attempt` (zero-based), capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )] // Delays are small positive millisecond counts
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        let base_ms = self.initial_delay.as_millis() as f64;
        let delay_ms = match self.backoff {
            Backoff::Exponential { multiplier } => base_ms * multiplier.powi(attempt as i32),
            Backoff::Linear => base_ms * (attempt as f64 + 1.0),
        };

        let delay = Duration::from_millis(delay_ms as u64);
        delay.min(self.max_delay)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    max_retries: usize,
    initial_delay: Duration,
    max_delay: Duration,
    backoff: Backoff,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set delay before the first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Use exponential backoff with `multiplier`.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.backoff = Backoff::Exponential { multiplier };
        self
    }

    /// Use linear backoff.
    #[must_use]
    pub const fn linear(mut self) -> Self {
        self.backoff = Backoff::Linear;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub const fn build(self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            initial_delay: self.initial_delay,
            max_delay: self.max_delay,
            backoff: self.backoff,
        }
    }
}

/// Retry an async operation on every error.
///
/// Returns the first success, or the last error once the policy is exhausted.
///
/// # Errors
///
/// Returns the operation's last error when all attempts fail.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    op: Operation,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, op, operation, |_| true).await
}

/// Retry an async operation while `is_retryable` accepts its error.
///
/// A non-retryable error is returned immediately.
///
/// # Errors
///
/// Returns the first non-retryable error, or the last error once the policy
/// is exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    op: Operation,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    tracing::info!(operation = %op, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::debug!(operation = %op, error = %err, "Error is not retryable");
                    return Err(err);
                }

                if attempt >= policy.max_retries {
                    tracing::warn!(
                        operation = %op,
                        attempts = attempt + 1,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                tracing::debug!(
                    operation = %op,
                    attempt,
                    delay_ms = delay.as_millis(),
                    error = %err,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn exponential_delays_double() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(2.0)
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
    }

    #[test]
    fn linear_delays_grow_by_step() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(50))
            .linear()
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(50));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(150));
    }

    #[test]
    fn delays_are_capped() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .linear()
            .build();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = retry_with_backoff(&policy, Operation::Reserve, || {
            let c = Arc::clone(&counter);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 {
                    Err(format!("conflict {attempt}"))
                } else {
                    Ok(7)
                }
            }
        })
        .await;

        assert_eq!(result, Ok(7));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts_with_last_error() {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .build();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = retry_with_backoff(&policy, Operation::AcquireMutex, || {
            let c = Arc::clone(&counter);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(format!("busy {attempt}"))
            }
        })
        .await;

        assert_eq!(result, Err("busy 2".to_string()));
        assert_eq!(counter.load(Ordering::SeqCst), policy.max_attempts());
    }

    #[tokio::test]
    async fn non_retryable_error_is_returned_immediately() {
        let policy = RetryPolicy::default();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = retry_with_predicate(
            &policy,
            Operation::Reserve,
            || {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err::<i32, _>("insufficient stock")
                }
            },
            |err: &&str| err.contains("conflict"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_retries_runs_once() {
        let policy = RetryPolicy::builder().max_retries(0).build();
        let counter = Arc::new(AtomicUsize::new(0));

        let result = tokio_test::block_on(retry_with_backoff(&policy, Operation::Commit, || {
            let c = Arc::clone(&counter);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>("down")
            }
        }));

        tokio_test::assert_err!(result);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
