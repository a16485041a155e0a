//! Retry and backoff for transient store failures
//!
//! Delays grow exponentially, `min(base_delay * exponential_base^attempt,
//! max_delay)`, and are scaled by a random factor in `[0.5, 1.0]` when
//! jitter is enabled.

use std::future::Future;
use std::time::Duration;

use once_cell::sync::OnceCell;
use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::config::{defaults, DataLayerConfig};
use crate::error::{DataError, DataResult};

/// Immutable retry settings
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one, at least 1
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: defaults::DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay: Duration::from_secs_f64(defaults::DEFAULT_RETRY_BASE_DELAY_SECS),
            max_delay: Duration::from_secs_f64(defaults::DEFAULT_RETRY_MAX_DELAY_SECS),
            exponential_base: defaults::DEFAULT_RETRY_EXPONENTIAL_BASE,
            jitter: defaults::DEFAULT_RETRY_JITTER_ENABLED,
        }
    }
}

static DEFAULT_POLICY: OnceCell<RetryPolicy> = OnceCell::new();

impl RetryPolicy {
    /// Process-wide default, read from the environment on first use
    pub fn default_policy() -> RetryPolicy {
        DEFAULT_POLICY
            .get_or_init(|| match DataLayerConfig::from_env() {
                Ok(config) => config.retry_policy(),
                Err(e) => {
                    warn!(error = %e, "Invalid retry configuration, using defaults");
                    RetryPolicy::default()
                }
            })
            .clone()
    }

    /// Single attempt, no sleeping
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_exponential_base(mut self, base: f64) -> Self {
        self.exponential_base = base;
        self
    }

    pub fn with_jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Un-jittered delay after the zero-based `attempt` failed
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.exponential_base.powi(attempt.min(i32::MAX as u32) as i32);
        let secs = self.base_delay.as_secs_f64() * factor;
        let max = self.max_delay.as_secs_f64();
        if !secs.is_finite() || secs >= max {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs.max(0.0))
        }
    }

    /// Delay with jitter applied when enabled
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let delay = self.delay_for_attempt(attempt);
        if self.jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is exhausted
///
/// Each failure is classified; non-transient classes (validation,
/// authentication, permission) are returned immediately. On exhaustion the
/// classification of the last error is returned.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
) -> DataResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<DataError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    debug!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        "Operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(e) => {
                let error: DataError = e.into();
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max_attempts,
                    error_code = error.error_code(),
                    error = %error,
                    "Attempt failed"
                );

                if !error.is_transient() {
                    debug!(
                        operation = operation_name,
                        error_code = error.error_code(),
                        "Error is not retryable"
                    );
                    return Err(error);
                }

                if attempt + 1 >= max_attempts {
                    error!(
                        operation = operation_name,
                        attempts = max_attempts,
                        error_code = error.error_code(),
                        error = %error,
                        "All retry attempts failed"
                    );
                    return Err(error);
                }

                let delay = policy.jittered_delay(attempt);
                debug!(
                    operation = operation_name,
                    delay_ms = delay.as_millis() as u64,
                    "Backing off before next attempt"
                );
                sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Run a fallible future once, logging and discarding any failure
pub async fn safe_execute<T, E, Fut>(operation_name: &str, operation: Fut) -> Option<T>
where
    Fut: Future<Output = Result<T, E>>,
    E: Into<DataError>,
{
    match operation.await {
        Ok(value) => Some(value),
        Err(e) => {
            let error: DataError = e.into();
            error!(
                operation = operation_name,
                error_code = error.error_code(),
                error = %error,
                "Best-effort operation failed"
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, StoreError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tracing_test::traced_test;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(attempts)
            .with_base_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
            .with_jitter(false)
    }

    #[test]
    fn test_exponential_delays_are_capped() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_exponential_base(2.0)
            .with_jitter(false);

        assert_eq!(policy.delay_for_attempt(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(200), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_within_half_to_full_delay() {
        let policy = RetryPolicy::default()
            .with_base_delay(Duration::from_secs(2))
            .with_max_delay(Duration::from_secs(60))
            .with_jitter(true);

        for _ in 0..200 {
            let delay = policy.jittered_delay(1);
            assert!(delay >= Duration::from_secs(2));
            assert!(delay <= Duration::from_secs(4));
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_policy(3), "op", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DataError>(7) }
        })
        .await
        .unwrap();

        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(&fast_policy(3), "op", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(StoreError::Unavailable("primary down".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_classified_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = retry_with_backoff(&fast_policy(4), "op", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 3 {
                    Err::<(), _>(StoreError::Unavailable("down".into()))
                } else {
                    Err(StoreError::Timeout("slow".into()))
                }
            }
        })
        .await
        .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_between_attempts_only() {
        let policy = RetryPolicy::default()
            .with_max_attempts(3)
            .with_base_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(30))
            .with_jitter(false);
        let start = tokio::time::Instant::now();

        let _ = retry_with_backoff(&policy, "op", || async {
            Err::<(), _>(StoreError::Unavailable("down".into()))
        })
        .await;

        // 1s after the first failure, 2s after the second, nothing after the last
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed < Duration::from_millis(3100));
    }

    #[tokio::test]
    async fn test_validation_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = retry_with_backoff(&fast_policy(5), "op", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(StoreError::InvalidArgument("bad id".into())) }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    #[traced_test]
    async fn test_each_failed_attempt_is_logged() {
        let _ = retry_with_backoff(&fast_policy(2), "get_document", || async {
            Err::<(), _>(StoreError::Unavailable("down".into()))
        })
        .await;

        assert!(logs_contain("Attempt failed"));
        assert!(logs_contain("CONNECTION_ERROR"));
        assert!(logs_contain("All retry attempts failed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_safe_execute_swallows_errors() {
        let ok = safe_execute("op", async { Ok::<_, DataError>(1) }).await;
        assert_eq!(ok, Some(1));

        let failed: Option<()> =
            safe_execute("op", async { Err(StoreError::message("boom")) }).await;
        assert_eq!(failed, None);
        assert!(logs_contain("Best-effort operation failed"));
    }
}
