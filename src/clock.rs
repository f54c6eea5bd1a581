//! Monotonic time for deadline accounting.
//!
//! The worker times its sleeps by deadlines; wall-clock adjustments must not
//! cause spurious wakeups or infinite waits. Timestamps are offsets from a
//! per-clock epoch, which keeps the far-future sentinel a plain
//! `Duration::MAX` and lets the tokio test clock govern time in tests.

use std::ops::Add;
use std::time::Duration;

use tokio::time::Instant;

/// A monotonic timestamp. Totally ordered; later is greater.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct MonoTime(Duration);

impl MonoTime {
    /// Farthest representable point in the future. Sorts after every
    /// timestamp a clock can produce.
    pub const FAR_FUTURE: MonoTime = MonoTime(Duration::MAX);

    /// Duration elapsed since `earlier`; zero if `earlier` is not earlier.
    pub fn since(self, earlier: MonoTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl Add<Duration> for MonoTime {
    type Output = MonoTime;

    fn add(self, d: Duration) -> MonoTime {
        MonoTime(self.0.saturating_add(d))
    }
}

/// Source of [`MonoTime`] values for one scheduler worker.
#[derive(Debug, Clone)]
pub struct MonoClock {
    epoch: Instant,
}

impl MonoClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }

    /// Current monotonic time. Successive calls never decrease.
    pub fn now(&self) -> MonoTime {
        MonoTime(self.epoch.elapsed())
    }
}

impl Default for MonoClock {
    fn default() -> Self {
        Self::new()
    }
}
