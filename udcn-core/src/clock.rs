//! Monotonic time source for the scheduler (spec.md §4.1).

use std::time::Instant;

#[derive(Debug, Clone)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self { epoch: Instant::now() }
    }

    /// Microseconds since this clock was created. Callers compare these
    /// against each other, never against a wall-clock timestamp.
    pub fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}
