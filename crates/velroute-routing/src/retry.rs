//! Retry policy
//!
//! Wraps a single remote call with bounded retries. Only reads and searches
//! are retried, and only on transient failures (timeouts, connection errors,
//! 5xx). Every attempt is bounded by `min(per-attempt timeout, remaining
//! deadline)`, and backoff sleeps race the caller's cancellation token.
//!
//! A retry is only scheduled when its backoff plus a full attempt still fits
//! in the remaining deadline. Otherwise the sequence ends as
//! `RetryExhausted`, which counts against the breaker and allows fallback.

use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use velroute_core::{Error, HybridSettings, OperationKind, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub exponential: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&HybridSettings::default())
    }
}

impl From<&HybridSettings> for RetryPolicy {
    fn from(settings: &HybridSettings) -> Self {
        Self {
            enabled: settings.enable_retry_policy,
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            max_delay: settings.max_delay(),
            exponential: settings.use_exponential_backoff,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Delay before retry number `retry` (1-based)
    pub fn delay(&self, retry: u32) -> Duration {
        if !self.exponential {
            return self.base_delay;
        }
        let factor = 2u32.checked_pow(retry.saturating_sub(1));
        factor
            .and_then(|f| self.base_delay.checked_mul(f))
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    /// Whether `operation` may be retried at all
    pub fn applies_to(&self, operation: OperationKind) -> bool {
        self.enabled && operation.is_read()
    }

    /// Total attempts allowed for `operation`
    pub fn max_attempts(&self, operation: OperationKind) -> u32 {
        if self.applies_to(operation) {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Run `call` until it succeeds, fails permanently, or attempts run out
    ///
    /// `on_retry(retry_number, delay, error)` is invoked before each backoff.
    ///
    /// # Errors
    /// - the call's own error when it is not transient, or when only one attempt is allowed
    /// - `Error::RetryExhausted` after the last allowed attempt failed transiently, or when
    ///   the next backoff plus a full attempt no longer fits before the deadline
    /// - `Error::DeadlineExceeded` when the deadline cuts the first attempt short
    /// - `Error::Cancelled` when `cancel` fires during an attempt or a backoff
    pub async fn run<T, F, Fut>(
        &self,
        operation: OperationKind,
        deadline: Instant,
        per_attempt: Duration,
        cancel: &CancellationToken,
        mut on_retry: impl FnMut(u32, Duration, &Error),
        mut call: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.max_attempts(operation);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DeadlineExceeded { attempts: attempt });
            }

            attempt += 1;
            let budget = per_attempt.min(remaining);
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                outcome = tokio::time::timeout(budget, call()) => outcome,
            };

            let err = match outcome {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(err)) => err,
                Err(_) if budget < per_attempt && attempt == 1 => {
                    return Err(Error::DeadlineExceeded { attempts: attempt });
                }
                Err(_) => Error::UpstreamTimeout {
                    secs: budget.as_secs_f64().ceil() as u64,
                },
            };

            if !err.is_transient() {
                return Err(err);
            }
            if attempt >= max_attempts {
                return Err(if max_attempts > 1 {
                    Error::RetryExhausted {
                        attempts: attempt,
                        last: Box::new(err),
                    }
                } else {
                    err
                });
            }

            let delay = self.delay(attempt);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if delay.saturating_add(per_attempt) > remaining {
                return Err(Error::RetryExhausted {
                    attempts: attempt,
                    last: Box::new(err),
                });
            }

            on_retry(attempt, delay, &err);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
