//! Adaptive tick cadence.

use crate::round::LOW_TIMER;
use std::time::Duration;

/// Tick intervals for the three phases of a round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cadence {
    /// Clickable window (timer above the countdown threshold)
    pub normal: Duration,
    /// Terminal countdown
    pub fast: Duration,
    /// Result settling, or no timer read yet
    pub slow: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Self {
            normal: Duration::from_millis(200),
            fast: Duration::from_millis(100),
            slow: Duration::from_millis(1000),
        }
    }
}

impl Cadence {
    /// Delay before the next tick given the last timer read and the current
    /// throttle multiplier.
    pub fn interval(&self, timer: Option<u8>, throttle: f64) -> Duration {
        let base = match timer {
            Some(t) if t > LOW_TIMER => self.normal,
            Some(t) if t > 0 => self.fast,
            _ => self.slow,
        };
        base.mul_f64(throttle.max(1.0))
    }
}
