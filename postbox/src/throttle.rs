//! A pump polls its queue quickly while there is traffic and slows down
//! once the queue has been empty for a while.
//!
//! The delay is a step function of the time since the last
//! [reset](Throttle::reset):
//!
//! | idle for   | poll every |
//! |------------|------------|
//! | < 1s       | 100ms      |
//! | 1s - 2s    | 250ms      |
//! | 2s - 3s    | 500ms      |
//! | >= 3s      | 1000ms     |

use std::time::Duration;

use tokio::time::Instant;

use crate::constants::{BACKOFF_STEPS, INITIAL_POLL_DELAY};

#[derive(Debug, Clone)]
pub struct Throttle {
    delay: Duration,
    last_reset: Instant,
}

impl Throttle {
    pub fn new() -> Self {
        Self {
            delay: INITIAL_POLL_DELAY,
            last_reset: Instant::now(),
        }
    }

    /// How long to wait before the next poll.
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Called after every delivery attempt, successful or not.
    pub fn reset(&mut self) {
        self.delay = INITIAL_POLL_DELAY;
        self.last_reset = Instant::now();
    }

    /// Called once per empty poll. Never restarts the idle timer.
    pub fn back_off(&mut self) {
        self.back_off_after(self.last_reset.elapsed());
    }

    fn back_off_after(&mut self, idle: Duration) {
        if let Some(step) = step_delay(idle) {
            // elapsed time is monotonic, but never let a step shrink the delay
            self.delay = self.delay.max(step);
        }
    }
}

impl Default for Throttle {
    fn default() -> Self {
        Self::new()
    }
}

/// The delay for a queue which has been idle for `idle`, or None when it
/// should stay unchanged.
pub fn step_delay(idle: Duration) -> Option<Duration> {
    BACKOFF_STEPS
        .iter()
        .rev()
        .find(|(threshold, _)| idle >= *threshold)
        .map(|(_, delay)| *delay)
}
