//! In-process retry policy: bounded attempts with backoff.

use std::time::Duration;

/// Delay strategy between in-process attempts.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Backoff {
    /// Same delay after every failed attempt.
    Fixed(Duration),
    /// `base * multiplier^(attempt - 1)`: 2s, 4s, 8s, ... for base=2s,
    /// multiplier=2.0.
    Exponential { base: Duration, multiplier: f64 },
}

/// Bounded retry with backoff, applied to every handler error.
///
/// There is no retryable/non-retryable classification: every error is
/// treated as transient up to the budget, including failures injected
/// through the envelope's simulate-failure flag. A delivery that spends
/// the budget is handed to the failure outbox, not dropped.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, first try included.
    pub max_attempts: u32,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(Self::DEFAULT_MAX_ATTEMPTS, Duration::from_secs(1))
    }
}

impl RetryPolicy {
    /// Default in-process attempt budget.
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// Fixed delay between attempts.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Exponential backoff between attempts.
    pub fn exponential(max_attempts: u32, base: Duration, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff: Backoff::Exponential { base, multiplier },
        }
    }

    /// Delay to wait after the `attempt`-th failure (1-indexed).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, multiplier } => {
                let exponent = attempt.saturating_sub(1) as i32;
                Duration::from_secs_f64(base.as_secs_f64() * multiplier.powi(exponent))
            }
        }
    }
}
