//! Bounded re-checks with backoff.

use std::time::Duration;

/// How many times, and how far apart, to re-check a condition.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Number of checks; zero is treated as one.
    pub attempts: u32,
    /// Delay before the second check.
    pub interval: Duration,
    /// Growth factor applied to the delay after each further check.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    /// A single immediate re-check.
    fn default() -> Self {
        Self {
            attempts: 1,
            interval: Duration::ZERO,
            multiplier: 1.0,
        }
    }
}

impl RetryPolicy {
    /// `attempts` checks spaced by `interval`, doubling each time.
    #[must_use]
    pub const fn exponential(attempts: u32, interval: Duration) -> Self {
        Self {
            attempts,
            interval,
            multiplier: 2.0,
        }
    }

    /// Delay to wait before each check; the first check is immediate.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let mut next = self.interval;
        (0..self.attempts.max(1)).map(move |i| {
            if i == 0 {
                return Duration::ZERO;
            }
            let current = next;
            next = next.mul_f64(self.multiplier.max(1.0));
            current
        })
    }

    /// Check `condition` until it holds or the attempts run out.
    pub fn poll(&self, mut condition: impl FnMut() -> bool) -> bool {
        for (attempt, delay) in self.delays().enumerate() {
            if !delay.is_zero() {
                tracing::debug!(attempt, ?delay, "Waiting before re-check");
                std::thread::sleep(delay);
            }
            if condition() {
                return true;
            }
        }
        false
    }
}
