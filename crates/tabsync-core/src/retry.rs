//! Classified-error retry with exponential backoff.
//!
//! Each attempt runs under its own timeout and races the owning view's
//! `ActiveSignal`: when the view goes away the attempt future is dropped, which
//! aborts the underlying transport call, and no further attempts are made.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::SyncConfig;
use crate::error::{Classification, ClassifiedError, ErrorKind, FetchError};
use crate::lifecycle::ActiveSignal;

/// Decides whether a failed attempt may be retried.
pub type Classifier = fn(&FetchError) -> Classification;

fn default_classifier(err: &FetchError) -> Classification {
    err.classification()
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub timeout: Duration,
    pub classify: Classifier,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
            timeout: config.timeout(),
            classify: default_classifier,
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
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

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_classifier(mut self, classify: Classifier) -> Self {
        self.classify = classify;
        self
    }

    /// Delay before the zero-indexed `attempt` (>= 1): the first retry waits
    /// `base_delay`, each later one twice as long, capped at `max_delay`.
    ///
    /// That is `base_delay * 2^(attempt - 1)`, not `2^attempt`: with a 100ms
    /// base the first two retries wait 100ms and 200ms.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

pub struct RetryExecutor;

impl RetryExecutor {
    /// Run `fetch` until it succeeds, fails fatally, or `max_attempts` is
    /// reached. The final error is returned with its classification.
    pub async fn run<T, F, Fut>(
        mut fetch: F,
        policy: &RetryPolicy,
        signal: &ActiveSignal,
    ) -> Result<T, ClassifiedError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            if attempt > 0 {
                let backoff = policy.backoff(attempt);
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => return Err(abandoned(attempt)),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
            if !signal.is_active() {
                return Err(abandoned(attempt));
            }

            let outcome = tokio::select! {
                biased;
                _ = signal.cancelled() => Err(FetchError::cancelled()),
                result = tokio::time::timeout(policy.timeout, fetch()) => match result {
                    Ok(r) => r,
                    Err(_) => Err(FetchError::timeout(format!(
                        "no response within {}ms",
                        policy.timeout.as_millis()
                    ))),
                },
            };
            attempt += 1;

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt = attempt, "Fetch succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if err.kind == ErrorKind::Cancelled {
                return Err(abandoned(attempt));
            }

            let classification = match err.kind {
                ErrorKind::Timeout => Classification::Retryable,
                _ => (policy.classify)(&err),
            };

            if classification == Classification::Fatal || attempt >= max_attempts {
                return Err(ClassifiedError {
                    source: err,
                    classification,
                    attempts: attempt,
                });
            }

            warn!(
                attempt = attempt,
                max_attempts = max_attempts,
                backoff_ms = policy.backoff(attempt).as_millis() as u64,
                error = %err,
                "Fetch failed, backing off"
            );
        }
    }
}

fn abandoned(attempts: u32) -> ClassifiedError {
    debug!(attempts = attempts, "View inactive, abandoning fetch");
    ClassifiedError {
        source: FetchError::cancelled(),
        classification: Classification::Fatal,
        attempts,
    }
}

// ============================================================================
// Tests
// ============================================================================
