//! Retry loop: run an async operation until success or the policy says stop.

use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::error::{CapabilityError, ErrorKind, RetryError};
use super::policy::{Backoff, BackoffPolicy};

/// A successful result plus the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: u32,
}

/// Wraps one logical operation (a phase, or one task's download) with the
/// backoff policy. Each `run` call starts a fresh attempt counter.
#[derive(Debug, Clone)]
pub struct RetryableOperation {
    policy: BackoffPolicy,
    label: String,
    verbose: bool,
    cancel: CancellationToken,
}

impl RetryableOperation {
    pub fn new(policy: BackoffPolicy, label: impl Into<String>) -> Self {
        Self {
            policy,
            label: label.into(),
            verbose: false,
            cancel: CancellationToken::new(),
        }
    }

    /// Log every failed attempt at warn level instead of debug.
    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Abandon the operation (and any backoff wait) when `cancel` fires.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Runs `op` until it succeeds, fails non-transiently, or the retry budget
    /// is spent. On transient failure, sleeps for the backoff delay then tries again.
    pub async fn run<F, Fut, T>(&self, mut op: F) -> Result<Attempted<T>, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CapabilityError>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(RetryError::Cancelled { attempts: attempt });
            }
            attempt += 1;

            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                result = op() => result,
            };

            let err = match result {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(op = %self.label, attempts = attempt, "succeeded after retry");
                    }
                    return Ok(Attempted {
                        value,
                        attempts: attempt,
                    });
                }
                Err(err) => err,
            };

            match err.kind() {
                ErrorKind::Fatal => {
                    tracing::error!(op = %self.label, attempt, error = %err, "fatal failure");
                    return Err(RetryError::Fatal {
                        attempts: attempt,
                        source: err,
                    });
                }
                ErrorKind::Permanent => {
                    tracing::warn!(op = %self.label, attempt, error = %err, "failed, not retryable");
                    return Err(RetryError::Rejected {
                        attempts: attempt,
                        source: err,
                    });
                }
                ErrorKind::Transient => {}
            }

            let delay = match self.policy.decide(attempt) {
                Backoff::RetryAfter(delay) => delay,
                Backoff::Exhausted => {
                    tracing::warn!(
                        op = %self.label,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        source: err,
                    });
                }
            };

            let delay_ms = delay.as_millis() as u64;
            if self.verbose {
                tracing::warn!(
                    op = %self.label,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms,
                    error = %err,
                    "attempt failed, retrying"
                );
            } else {
                tracing::debug!(
                    op = %self.label,
                    attempt,
                    max_attempts = self.policy.max_attempts(),
                    delay_ms,
                    error = %err,
                    "attempt failed, retrying"
                );
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(RetryError::Cancelled { attempts: attempt });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
