//! Capped exponential backoff shared by the HTTP executor and the reconnect supervisor.

use std::time::Duration;

/// Delays grow as `base * 2^(attempt - 1)`, saturating, and are capped at `max` when set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    base: Duration,
    max: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(base: Duration) -> Self {
        Self { base, max: None }
    }

    pub fn with_max(mut self, max: Duration) -> Self {
        self.max = Some(max);
        self
    }

    /// Delay associated with the given attempt number (1-based).
    ///
    /// Attempt `0` is treated like attempt `1`.
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(Duration::MAX);
        match self.max {
            Some(max) => delay.min(max),
            None => delay,
        }
    }
}
