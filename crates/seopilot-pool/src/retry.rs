//! Retry policy for transient handler failures.

use std::time::Duration;

use rand::Rng;
use seopilot_core::{PoolConfig, SeoPilotError};

/// Decides whether a failed attempt is retried and how long to wait first.
///
/// Transient errors retry up to `max_attempts` total attempts with exponential
/// backoff plus jitter; permanent errors, timeouts, and everything else fail
/// the task immediately.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_backoff: Duration,
    max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_backoff,
            max_backoff: Duration::from_secs(60),
        }
    }

    pub fn from_config(cfg: &PoolConfig) -> Self {
        Self::new(cfg.max_attempts, Duration::from_millis(cfg.base_backoff_ms))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether attempt number `attempt` (1-based) may be followed by another.
    pub fn should_retry(&self, error: &SeoPilotError, attempt: u32) -> bool {
        error.is_transient() && attempt < self.max_attempts
    }

    /// Backoff before attempt `next_attempt` (2-based: the delay after the
    /// first failure is `base * 1`, then `base * 2`, `base * 4`, ...), with up
    /// to 20% random jitter to spread synchronized retries.
    pub fn backoff(&self, next_attempt: u32) -> Duration {
        let exp = next_attempt.saturating_sub(2).min(16);
        let raw = self.base_backoff.saturating_mul(1u32 << exp);
        let capped = raw.min(self.max_backoff);
        let jitter = rand::thread_rng().gen_range(0.0..0.2);
        capped.mul_f64(1.0 + jitter)
    }
}
