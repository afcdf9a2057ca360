//! Timing utilities for the long-running loops.
//!
//! - Retry policies: a pure mapping from attempt number to delay
//! - Interval gates for periodic work inside a faster loop
//! - Timestamp formatting for artifact names

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay after every failure.
    Fixed(Duration),
    /// `base * 2^(attempt-1)`, capped at `max`.
    Exponential { base: Duration, max: Duration },
}

/// Bounded retry policy for fallible initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures after which the caller gives up.
    pub max_attempts: u32,

    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Delay to wait after the `attempt`-th consecutive failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, max } => {
                let exponent = attempt.saturating_sub(1).min(31);
                base.checked_mul(1u32 << exponent)
                    .map(|d| d.min(max))
                    .unwrap_or(max)
            }
        }
    }

    /// Whether `failures` consecutive failures exhaust the policy.
    pub fn is_exhausted(&self, failures: u32) -> bool {
        failures >= self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::fixed(3, Duration::from_secs(2))
    }
}

/// Fires at most once per interval. Used for periodic diagnostics
/// inside a loop that ticks much faster.
#[derive(Debug)]
pub struct IntervalGate {
    interval: Duration,
    last_tick: Instant,
}

impl IntervalGate {
    /// Create a gate whose first tick fires one full interval after `start`.
    pub fn starting_at(interval: Duration, start: Instant) -> Self {
        Self {
            interval,
            last_tick: start,
        }
    }

    /// Returns true and re-arms if the interval has elapsed since the last tick.
    pub fn should_tick(&mut self, now: Instant) -> bool {
        if now.saturating_duration_since(self.last_tick) >= self.interval {
            self.last_tick = now;
            true
        } else {
            false
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

/// Filesystem-safe timestamp with millisecond resolution, e.g. `20260101_120000_042`.
pub fn file_stamp(at: &DateTime<Local>) -> String {
    at.format("%Y%m%d_%H%M%S_%3f").to_string()
}
