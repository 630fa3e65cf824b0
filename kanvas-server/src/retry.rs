//! Retry with exponential backoff for provider and storage calls.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::metrics;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    /// Returns true for transient failures (network, 5xx).
    fn is_retryable(&self) -> bool;
}

/// Configuration for retry with exponential backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
    /// Add up to 25% random jitter to each delay.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values and jitter enabled.
    #[must_use]
    pub fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
            jitter: true,
        }
    }

    /// Disable jitter, for deterministic delays.
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Calculate delay for a given attempt number (0-indexed).
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let base_delay = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        let capped_delay = base_delay.min(self.max_delay_ms as f64) as u64;
        if !self.jitter {
            return capped_delay;
        }
        let jitter = rand::rng().random_range(0..=capped_delay / 4);
        capped_delay.saturating_add(jitter)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// `max_attempts` attempts have been made. The last error is returned.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn retry<T, E, F, Fut>(config: &RetryConfig, name: &str, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retryable + Display,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !error.is_retryable() {
                    tracing::debug!(operation = name, %error, "Non-retryable failure");
                    return Err(error);
                }
                if attempt + 1 >= max_attempts {
                    tracing::warn!(
                        operation = name,
                        attempts = max_attempts,
                        %error,
                        "Giving up after retries"
                    );
                    return Err(error);
                }
                let delay = config.delay_for_attempt(attempt);
                tracing::warn!(
                    "{} failed (attempt {}/{}), retrying in {}ms: {}",
                    name,
                    attempt + 1,
                    max_attempts,
                    delay,
                    error
                );
                metrics::record_retry(name);
                tokio::time::sleep(Duration::from_millis(delay)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug)]
    struct TestError {
        retryable: bool,
    }

    impl Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "test error (retryable={})", self.retryable)
        }
    }

    impl Retryable for TestError {
        fn is_retryable(&self) -> bool {
            self.retryable
        }
    }

    fn fast() -> RetryConfig {
        RetryConfig::new(3, 1, 5, 2.0).without_jitter()
    }

    #[test]
    fn test_retry_config_defaults() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.initial_delay_ms, 500);
        assert_eq!(config.max_delay_ms, 8_000);
        assert!(config.jitter);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let config = RetryConfig::new(10, 100, 1_000, 2.0).without_jitter();
        assert_eq!(config.delay_for_attempt(0), 100);
        assert_eq!(config.delay_for_attempt(1), 200);
        assert_eq!(config.delay_for_attempt(2), 400);
        assert_eq!(config.delay_for_attempt(5), 1_000);
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let config = RetryConfig::new(10, 400, 10_000, 2.0);
        for _ in 0..100 {
            let delay = config.delay_for_attempt(0);
            assert!((400..=500).contains(&delay), "delay {delay}");
        }
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<u32, TestError> = retry(&fast(), "test", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(TestError { retryable: true })
            } else {
                Ok(n)
            }
        })
        .await;
        assert_eq!(result.expect("should succeed"), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = retry(&fast(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError { retryable: true })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_fails_immediately() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), TestError> = retry(&fast(), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError { retryable: false })
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_zero_attempts_still_runs_once() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let config = RetryConfig::new(0, 1, 1, 2.0);
        let _: Result<(), TestError> = retry(&config, "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(TestError { retryable: true })
        })
        .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
