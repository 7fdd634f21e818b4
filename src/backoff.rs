//! Reconnection delay schedule.

use std::time::Duration;

use crate::config::BackoffConfig;

/// Growing delay between reconnection attempts.
///
/// The delay starts at `base`, is multiplied by `factor` after every
/// scheduled attempt and never exceeds `ceiling`. A successful open resets
/// it to `base`.
#[derive(Clone, Debug)]
pub struct BackoffSchedule {
    base: Duration,
    factor: f64,
    ceiling: Duration,
    current: Duration,
}

impl BackoffSchedule {
    pub fn new(base: Duration, factor: f64, ceiling: Duration) -> Self {
        let base = base.min(ceiling);
        Self {
            base,
            factor: factor.max(1.0),
            ceiling,
            current: base,
        }
    }

    /// Delay the next scheduled attempt will wait for.
    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    /// Return the delay for the attempt being scheduled now, then grow it.
    pub fn advance(&mut self) -> Duration {
        let delay = self.current;
        self.current = Duration::try_from_secs_f64(self.current.as_secs_f64() * self.factor)
            .map_or(self.ceiling, |next| next.min(self.ceiling));
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

impl From<&BackoffConfig> for BackoffSchedule {
    fn from(config: &BackoffConfig) -> Self {
        Self::new(
            Duration::from_millis(config.base_ms),
            config.factor,
            Duration::from_millis(config.ceiling_ms),
        )
    }
}
