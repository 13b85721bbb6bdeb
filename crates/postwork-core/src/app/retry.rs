//! Retry policy: decides backoff delays.

use std::time::Duration;

/// Backoff between attempts.
///
/// `multiplier == 1.0` gives the fixed interval the supervisors and the status
/// writer use; anything larger backs off exponentially.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,
}

impl RetryPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self {
            base_delay: delay,
            multiplier: 1.0,
        }
    }

    pub fn exponential(base_delay: Duration, multiplier: f64) -> Self {
        Self {
            base_delay,
            multiplier,
        }
    }

    /// Delay before the next retry.
    ///
    /// `attempts` is the number of attempts already made (1-indexed):
    /// delay = base_delay * multiplier^(attempts - 1)
    ///
    /// With base_delay=2s, multiplier=2.0:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = base_secs * self.multiplier.powi(exponent);
        if delay_secs.is_finite() {
            Duration::try_from_secs_f64(delay_secs).unwrap_or(Duration::MAX)
        } else {
            Duration::MAX
        }
    }
}

impl Default for RetryPolicy {
    /// Transport retry default: 500ms doubling.
    fn default() -> Self {
        Self::exponential(Duration::from_millis(500), 2.0)
    }
}
