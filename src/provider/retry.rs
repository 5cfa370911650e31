//! Bounded exponential backoff for transient provider errors.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ProviderError;

use super::types::ProviderResult;

/// Default maximum attempts per provider call.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Retry policy for provider calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

const fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

const fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}

const fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

/// Result of a retried call together with the number of attempts made.
#[derive(Debug)]
pub struct Attempted<T> {
    /// Final result.
    pub result: ProviderResult<T>,
    /// Attempts made.
    pub attempts: u32,
}

impl<T> Attempted<T> {
    /// Returns true if the call failed with a transient error after using
    /// every attempt.
    #[must_use]
    pub fn exhausted(&self, policy: &RetryPolicy) -> bool {
        matches!(&self.result, Err(e) if e.is_transient()) && self.attempts >= policy.max_attempts
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (0 for the first retry).
    #[must_use]
    pub fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let backoff = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(retry))
            .min(self.max_delay_ms);
        let requested = error
            .retry_delay()
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Duration::from_millis(backoff.max(requested).min(self.max_delay_ms))
    }

    /// Runs `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Attempted<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(e) if e.is_transient() && attempt < max_attempts => {
                    let delay = self.delay_for(attempt - 1, &e);
                    warn!(
                        "{label}: transient error on attempt {attempt}/{max_attempts}: {e}; retrying in {} ms",
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!("{label}: giving up after {attempt} attempt(s): {e}");
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
