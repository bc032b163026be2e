//! Monotonic time sources.
//!
//! Every timestamp the watchdog and trackers produce comes from a [`Clock`],
//! so tests can drive time by hand with [`ManualClock`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::domain::MonotonicInstant;

pub trait Clock: Send + Sync {
    fn now(&self) -> MonotonicInstant;
}

/// Clock backed by [`Instant`], measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> MonotonicInstant {
        MonotonicInstant::from_duration(self.origin.elapsed())
    }
}

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    nanos: AtomicU64,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn starting_at(at: MonotonicInstant) -> Self {
        Self { nanos: AtomicU64::new(at.as_nanos()) }
    }

    /// Move forward by `by` and return the new time.
    pub fn advance(&self, by: Duration) -> MonotonicInstant {
        let step = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let previous = self
            .nanos
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| Some(n.saturating_add(step)))
            .unwrap_or_else(|n| n);
        MonotonicInstant::from_nanos(previous.saturating_add(step))
    }

    /// Jump to `at`. Going backwards is ignored; the clock is monotonic.
    pub fn set(&self, at: MonotonicInstant) {
        self.nanos.fetch_max(at.as_nanos(), Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> MonotonicInstant {
        MonotonicInstant::from_nanos(self.nanos.load(Ordering::Acquire))
    }
}
