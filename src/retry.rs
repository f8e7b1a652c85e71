//! Backoff schedule for whole-file upload retries.

use std::time::Duration;

/// Extra attempts after the first failed upload.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Exponential backoff with up to one unit of random jitter.
///
/// The wait before retry `n` (1-based) is `unit * (2^n + U[0, 1))`, so
/// with the default one-second unit the waits are roughly 2s, 4s, 8s, 16s
/// and 32s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Creates a policy with `max_retries` extra attempts and the given
    /// backoff unit.
    pub fn new(max_retries: u32, unit: Duration) -> Self {
        Self { max_retries, unit }
    }

    /// A policy that gives up after the first failure.
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    /// Number of extra attempts.
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Wait before retry `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let factor = 2f64.powi(retry as i32) + rand::random::<f64>();
        self.unit.mul_f64(factor)
    }

    /// The full schedule, one entry per retry.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let policy = *self;
        (1..=self.max_retries).map(move |retry| policy.delay(retry))
    }
}
