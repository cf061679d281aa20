// src/pipeline/retry.rs

//! Retry with exponential backoff for provider calls.
//!
//! - `RateLimited`: sleep for the requested wait, capped, and try again.
//!   The attempt budget is not consumed.
//! - `Transient`: sleep `base_delay * 2^(attempt-1)` and try again, up to
//!   `attempts` calls in total.
//! - `Permanent`: returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::ProviderError;
use crate::models::RetryConfig;
use crate::provider::ProviderResult;

/// Backoff policy for a single provider call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total calls for a transient failure (first try included)
    pub attempts: u32,
    pub base_delay: Duration,
    pub flood_wait_cap: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            flood_wait_cap: Duration::from_secs(config.flood_wait_cap_secs),
        }
    }

    /// Delay after the `attempt`-th failed call (1-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor)
    }

    /// Flood-wait actually slept for a requested `wait`.
    pub fn flood_wait(&self, wait: Duration) -> Duration {
        wait.min(self.flood_wait_cap)
    }

    /// Run `op` until it succeeds or fails in a way that is not retried.
    ///
    /// `label` prefixes the log lines, typically `channel: operation`.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> ProviderResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ProviderError::RateLimited { wait }) => {
                    let sleep = self.flood_wait(wait);
                    log::warn!(
                        "[{label}] Rate limited for {}s, sleeping {}s",
                        wait.as_secs(),
                        sleep.as_secs()
                    );
                    tokio::time::sleep(sleep).await;
                }
                Err(ProviderError::Transient(message)) if attempt < self.attempts => {
                    let delay = self.backoff_delay(attempt);
                    log::warn!(
                        "[{label}] Attempt {attempt}/{} failed: {message}; retrying in {}ms",
                        self.attempts,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use tokio::time::Instant;

    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_secs(2),
            flood_wait_cap: Duration::from_secs(60),
        }
    }

    /// Returns the scripted results in order, then succeeds with the call count.
    struct Script {
        results: Mutex<VecDeque<ProviderError>>,
        calls: Mutex<u32>,
    }

    impl Script {
        fn new(errors: Vec<ProviderError>) -> Self {
            Self {
                results: Mutex::new(errors.into()),
                calls: Mutex::new(0),
            }
        }

        async fn call(&self) -> ProviderResult<u32> {
            let mut calls = self.calls.lock().unwrap();
            *calls += 1;
            match self.results.lock().unwrap().pop_front() {
                Some(err) => Err(err),
                None => Ok(*calls),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = policy();
        assert_eq!(policy.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_delay(2), Duration::from_secs(4));
        assert_eq!(policy.backoff_delay(3), Duration::from_secs(8));
    }

    #[test]
    fn test_from_config() {
        let policy = RetryPolicy::from_config(&RetryConfig {
            attempts: 0,
            base_delay_ms: 250,
            flood_wait_cap_secs: 5,
        });
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.flood_wait_cap, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_is_capped_and_not_counted() {
        let script = Script::new(vec![
            ProviderError::RateLimited {
                wait: Duration::from_secs(500),
            },
            ProviderError::transient("reset"),
            ProviderError::transient("reset"),
        ]);
        let start = Instant::now();

        let result = policy().run("test", || script.call()).await;

        // Two transient failures still fit in three attempts because the
        // flood wait did not use one up.
        assert_eq!(result, Ok(4));
        assert_eq!(script.calls(), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(60 + 2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_flood_wait_below_cap_sleeps_requested_time() {
        let script = Script::new(vec![ProviderError::RateLimited {
            wait: Duration::from_secs(7),
        }]);
        let start = Instant::now();

        assert_eq!(policy().run("test", || script.call()).await, Ok(2));
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_exhaustion_propagates() {
        let script = Script::new(vec![
            ProviderError::transient("one"),
            ProviderError::transient("two"),
            ProviderError::transient("three"),
            ProviderError::transient("never reached"),
        ]);
        let start = Instant::now();

        let result = policy().run("test", || script.call()).await;

        assert_eq!(result, Err(ProviderError::transient("three")));
        assert_eq!(script.calls(), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(2 + 4));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_is_not_retried() {
        let script = Script::new(vec![ProviderError::permanent("no such channel")]);
        let start = Instant::now();

        let result = policy().run("test", || script.call()).await;

        assert_eq!(result, Err(ProviderError::permanent("no such channel")));
        assert_eq!(script.calls(), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }
}
