//! Bounded exponential backoff for transient backend faults.
//!
//! Only errors for which [`Error::is_retryable`] holds are retried. Callers
//! must therefore pass operations that are idempotent under a repeat, such as
//! reads or overwrite-by-name uploads.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

use spanstore_common::{Error, Result};

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(200);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Backoff policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,
    /// Scale each delay by a random factor in `[0.75, 1.25)`.
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy allowing `max_retries` retries with default delays.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }

    /// Policy that gives up after the first failure.
    pub fn none() -> Self {
        Self::new(0)
    }

    /// Set initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enable or disable jitter.
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `retry` (zero-based).
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let growth = self.backoff_multiplier.powi(retry.min(i32::MAX as u32) as i32);
        let uncapped = self.initial_delay.as_secs_f64() * growth;
        let mut secs = uncapped.min(self.max_delay.as_secs_f64());
        if self.jitter {
            secs *= 0.75 + rand::random::<f64>() / 2.0;
        }
        Duration::from_secs_f64(secs.max(0.0))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Retry policy as written in configuration files, with delays in
/// milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay_ms: DEFAULT_INITIAL_DELAY.as_millis() as u64,
            max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
            jitter: true,
        }
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            initial_delay: Duration::from_millis(settings.initial_delay_ms),
            max_delay: Duration::from_millis(settings.max_delay_ms),
            jitter: settings.jitter,
            ..Self::default()
        }
    }
}

/// Runs operations under a [`RetryConfig`].
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    config: RetryConfig,
}

impl RetryExecutor {
    /// Create a new retry executor.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Run `operation`, repeating it on transient errors.
    ///
    /// The last error is returned once the retry budget is spent.
    pub async fn execute<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.execute_with_condition(operation, Error::is_retryable)
            .await
    }

    /// Like [`RetryExecutor::execute`], with the caller deciding which
    /// errors are worth another attempt.
    pub async fn execute_with_condition<F, Fut, T, C>(
        &self,
        operation: F,
        should_retry: C,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
        C: Fn(&Error) -> bool,
    {
        let mut retries = 0;
        loop {
            let err = match operation().await {
                Ok(value) => {
                    if retries > 0 {
                        debug!(retries, "Operation recovered");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !should_retry(&err) {
                return Err(err);
            }
            if retries == self.config.max_retries {
                warn!(attempts = retries + 1, error = %err, "Giving up");
                return Err(err);
            }

            let delay = self.config.delay_for_attempt(retries);
            retries += 1;
            warn!(attempt = retries, delay_ms = delay.as_millis() as u64, error = %err, "Transient failure, retrying");
            sleep(delay).await;
        }
    }

    /// Get the retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}
