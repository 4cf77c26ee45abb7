//! Capped exponential backoff on top of backon's [`ExponentialBuilder`].

use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBackoff, ExponentialBuilder};

use crate::config::RetryConfig;

/// Larger factors clamp to this so `Duration` products stay in range.
const MAX_FACTOR: f64 = 1_000_000.0;

/// Delays that follow each failed attempt: `initial_delay`, then times
/// `backoff_factor` per step, capped at `max_delay`.
///
/// Never runs out and never hands out a shorter delay than the one before.
pub struct BackoffSchedule {
    inner: ExponentialBackoff,
    max: Duration,
    last: Duration,
}

impl BackoffSchedule {
    pub fn new(config: &RetryConfig) -> Self {
        let inner = ExponentialBuilder::default()
            .with_min_delay(config.initial_delay)
            .with_factor(config.backoff_factor.clamp(1.0, MAX_FACTOR) as f32)
            .with_max_delay(config.max_delay)
            .with_max_times(usize::MAX)
            .build();

        Self {
            inner,
            max: config.max_delay,
            last: Duration::ZERO,
        }
    }

    /// Delay handed out for 0-based `attempt`.
    ///
    /// Stops stepping once the schedule goes flat, so huge attempt numbers
    /// return the cap immediately.
    pub fn delay_at(mut self, attempt: u32) -> Duration {
        let mut delay = Duration::ZERO;
        for step in 0..=attempt {
            let next = self.next().unwrap_or(self.max);
            if step > 0 && next == delay {
                break;
            }
            delay = next;
        }
        delay
    }
}

impl Iterator for BackoffSchedule {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let delay = self.inner.next().unwrap_or(self.max).clamp(self.last, self.max);
        self.last = delay;
        Some(delay)
    }
}
