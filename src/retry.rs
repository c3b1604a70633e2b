//! Retry logic with exponential backoff
//!
//! Transient failures are retried up to [`RetryConfig::max_attempts`] total
//! attempts, with delays growing by `backoff_multiplier` and optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use replay_dl::retry::{IsRetryable, retry_with_backoff};
//! use replay_dl::config::RetryConfig;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() -> Result<(), MyError> {
//! let config = RetryConfig::default();
//! retry_with_backoff(&config, |_attempt| async { Ok::<_, MyError>(()) }).await?;
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{DownloadError, FetchError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (connection reset, timeout) should return `true`.
/// Permanent failures (unsupported host, size ceiling) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for DownloadError {
    fn is_retryable(&self) -> bool {
        match self {
            DownloadError::Network(_) | DownloadError::Timeout { .. } => true,
            // A bigger file will not shrink on retry
            DownloadError::SizeExceeded { .. } => false,
            DownloadError::UnsupportedFormat(_) => false,
            DownloadError::Cancelled => false,
        }
    }
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::Network { .. } | FetchError::Timeout { .. } => true,
            // Certificate problems need configuration, not another attempt
            FetchError::Ssl { .. } => false,
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// The closure receives the 1-based attempt number. Returns the successful
/// result, the first non-retryable error, or the last error once
/// `max_attempts` attempts have been made.
pub async fn retry_with_backoff<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 1;
    let mut delay = config.initial_delay;

    loop {
        match operation(attempt).await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(attempts = attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );

                let jittered_delay = if config.jitter {
                    add_jitter(delay)
                } else {
                    delay
                };
                tokio::time::sleep(jittered_delay).await;

                attempt += 1;
                let next_delay =
                    Duration::from_secs_f64(delay.as_secs_f64() * config.backoff_multiplier);
                delay = next_delay.min(config.max_delay);
            }
            Err(e) => {
                if e.is_retryable() {
                    tracing::error!(
                        error = %e,
                        attempts = attempt,
                        "Operation failed after all retry attempts exhausted"
                    );
                } else {
                    tracing::error!(error = %e, "Operation failed with non-retryable error");
                }
                return Err(e);
            }
        }
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// The actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    enum TestError {
        Transient,
        Permanent,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                TestError::Transient => write!(f, "transient error"),
                TestError::Permanent => write!(f, "permanent error"),
            }
        }
    }

    impl IsRetryable for TestError {
        fn is_retryable(&self) -> bool {
            matches!(self, TestError::Transient)
        }
    }

    fn fast_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }

    #[tokio::test]
    async fn test_success_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "should only call once");
    }

    #[tokio::test]
    async fn test_retry_transient_then_succeed() {
        let result = retry_with_backoff(&fast_config(3), |attempt| async move {
            if attempt < 3 {
                Err(TestError::Transient)
            } else {
                Ok(attempt)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 3, "should succeed on the third attempt");
    }

    #[tokio::test]
    async fn test_attempt_bound_counts_first_attempt() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Transient)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 3, "3 attempts in total");
    }

    #[tokio::test]
    async fn test_permanent_error_no_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = retry_with_backoff(&fast_config(3), |_| {
            let counter = counter_clone.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<i32, _>(TestError::Permanent)
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(
            counter.load(Ordering::SeqCst),
            1,
            "should not retry permanent error"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_capped_by_max_delay() {
        let config = RetryConfig {
            max_attempts: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(3),
            backoff_multiplier: 10.0,
            jitter: false,
        };

        let start = tokio::time::Instant::now();
        let _ = retry_with_backoff(&config, |_| async { Err::<i32, _>(TestError::Transient) }).await;

        // 1s + 3s + 3s + 3s between the five attempts
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(10), "waited {:?}", elapsed);
        assert!(elapsed < Duration::from_secs(11), "waited {:?}", elapsed);
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let delay = Duration::from_millis(100);
        for _ in 0..20 {
            let jittered = add_jitter(delay);
            assert!(jittered >= delay);
            assert!(jittered <= delay * 2);
        }
    }

    #[test]
    fn test_download_error_classification() {
        assert!(DownloadError::Network("reset".into()).is_retryable());
        assert!(DownloadError::Timeout { limit_secs: 1 }.is_retryable());
        assert!(
            !DownloadError::SizeExceeded {
                limit: 1,
                observed: 2
            }
            .is_retryable()
        );
        assert!(!DownloadError::UnsupportedFormat("no formats".into()).is_retryable());
        assert!(!DownloadError::Cancelled.is_retryable());
    }

    #[test]
    fn test_fetch_error_classification() {
        assert!(
            FetchError::Timeout {
                url: "https://a".into(),
                timeout_secs: 30
            }
            .is_retryable()
        );
        assert!(
            !FetchError::Ssl {
                url: "https://a".into(),
                message: "bad cert".into()
            }
            .is_retryable()
        );
    }
}
