use rand::Rng;
use std::time::Duration;

/// Decision returned by the backoff policy after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Retry after the given delay.
    RetryAfter(Duration),
    /// Retry budget spent; surface the last failure.
    Exhausted,
}

/// Exponential backoff policy with a cap and a retry budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    /// Retries allowed after the first attempt (0 = a single attempt).
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial: Duration,
    /// Upper bound on any delay.
    pub max: Duration,
    /// Stretch each delay by a random factor in [1, 2), still capped at `max`.
    pub jitter: bool,
}

/// Exponent clamp; 2^16 * initial is far past any sane `max`.
const MAX_EXPONENT: u32 = 16;

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial: Duration::from_secs(5),
            max: Duration::from_secs(60),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Decide what to do after `attempt` failed attempts.
    ///
    /// `attempt` is 1-based (1 = the first attempt just failed). Returns
    /// `Backoff::Exhausted` once `attempt >= max_retries + 1`; otherwise the
    /// delay is `min(initial * 2^(attempt-1), max)`.
    pub fn decide(&self, attempt: u32) -> Backoff {
        let attempt = attempt.max(1);
        if attempt > self.max_retries {
            return Backoff::Exhausted;
        }

        let exp = attempt.saturating_sub(1).min(MAX_EXPONENT);
        let delay = self.initial.saturating_mul(1u32 << exp).min(self.max);
        if self.jitter {
            return Backoff::RetryAfter(jittered(delay).min(self.max));
        }
        Backoff::RetryAfter(delay)
    }

    /// Total attempts this policy allows, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

fn jittered(delay: Duration) -> Duration {
    let extra: f64 = rand::thread_rng().gen_range(0.0..1.0);
    delay.saturating_add(delay.mul_f64(extra))
}
