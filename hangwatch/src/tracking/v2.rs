//! Frame-aware hang detection.

use std::sync::Arc;
use std::time::Duration;

use crate::classification::{classify_hang, degraded_delay, has_recovered};
use crate::config::TrackerConfig;
use crate::domain::{HangDuration, HangType, MonotonicInstant, TrackerError};
use crate::frames::{FrameHealthSource, Interval};

use super::{DetectionStrategy, Tracker, TrackerDeps};

/// Classifies stalls from rendered frames, detects degraded rendering while
/// pulses still complete, and requires frame delay to settle before a hang
/// ends.
///
/// The exact end of a hang is not observable from frame data, so the stop
/// notice carries a range: from the last unhealthy sample to when recovery
/// was confirmed.
#[derive(Clone)]
pub struct FrameStrategy {
    frames: Arc<dyn FrameHealthSource>,
}

impl FrameStrategy {
    #[must_use]
    pub fn new(frames: Arc<dyn FrameHealthSource>) -> Self {
        Self { frames }
    }
}

impl DetectionStrategy for FrameStrategy {
    fn name(&self) -> &'static str {
        "v2"
    }

    fn classify_stall(&self, window: Interval) -> Option<HangType> {
        classify_hang(window, self.frames.as_ref())
    }

    fn degraded_delay(&self, window: Interval) -> Option<Duration> {
        degraded_delay(window.duration(), self.frames.sample_in(window)?)
    }

    fn has_recovered(&self, window: Interval) -> bool {
        has_recovered(window, self.frames.as_ref())
    }

    fn measure(
        &self,
        started_at: MonotonicInstant,
        last_unhealthy_at: MonotonicInstant,
        now: MonotonicInstant,
    ) -> HangDuration {
        HangDuration::between(
            last_unhealthy_at.saturating_duration_since(started_at),
            now.saturating_duration_since(started_at),
        )
    }
}

impl Tracker<FrameStrategy> {
    /// # Errors
    /// Returns [`TrackerError::Config`] for an invalid configuration.
    pub fn v2(
        config: TrackerConfig,
        deps: TrackerDeps,
        frames: Arc<dyn FrameHealthSource>,
    ) -> Result<Self, TrackerError> {
        Self::new(config, deps, FrameStrategy::new(frames))
    }
}
