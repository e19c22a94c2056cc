//! Exponential reconnect backoff with a cumulative ceiling.

use std::time::Duration;

/// Delay schedule for one reconnect episode: `base * 2^attempt`.
///
/// Once the delays handed out in the episode add up to the ceiling, no
/// further delay is offered and the episode is over.
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base: Duration,
    ceiling: Duration,
    attempt: u32,
    accumulated: Duration,
}

/// Smallest usable base. A zero base would never accumulate toward the
/// ceiling.
const MIN_BASE: Duration = Duration::from_millis(1);

impl ReconnectBackoff {
    pub fn new(base: Duration, ceiling: Duration) -> Self {
        Self {
            base: base.max(MIN_BASE),
            ceiling,
            attempt: 0,
            accumulated: Duration::ZERO,
        }
    }

    /// Delay before the next attempt, or `None` when the ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.accumulated >= self.ceiling {
            return None;
        }
        let factor = 1u32.checked_shl(self.attempt.min(31)).unwrap_or(u32::MAX);
        let delay = self.base.checked_mul(factor).unwrap_or(self.ceiling);
        self.accumulated = self.accumulated.saturating_add(delay);
        Some(delay)
    }

    /// The attempt that followed the last delay failed.
    pub fn record_failure(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
    }

    /// Start a fresh episode.
    pub fn reset(&mut self) {
        self.attempt = 0;
        self.accumulated = Duration::ZERO;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn accumulated(&self) -> Duration {
        self.accumulated
    }
}
