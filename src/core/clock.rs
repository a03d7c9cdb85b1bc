//! Monotonic nanosecond clock for entry timestamps.

use std::time::{SystemTime, UNIX_EPOCH};

/// Wall-clock nanoseconds with a monotonicity guard.
///
/// Stamps are strictly increasing even when the wall clock stalls or jumps
/// backward: ties advance by one nanosecond instead of repeating.
#[derive(Debug)]
pub struct Clock {
    last_ns: u64,
}

impl Clock {
    pub fn new() -> Self {
        Clock { last_ns: 0 }
    }

    /// Produce a stamp strictly greater than every previous stamp from this
    /// clock.
    pub fn tick(&mut self) -> u64 {
        let now = Self::now_ns();
        self.last_ns = if now > self.last_ns {
            now
        } else {
            self.last_ns + 1
        };
        self.last_ns
    }

    /// Fold in a stamp recovered from the journal.
    ///
    /// Ensures the next `tick()` lands strictly after every replayed entry,
    /// even if the wall clock moved backward across the restart.
    pub fn observe(&mut self, seen_ns: u64) {
        if seen_ns > self.last_ns {
            self.last_ns = seen_ns;
        }
    }

    fn now_ns() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
