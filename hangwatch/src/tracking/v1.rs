//! Pulse-only hang detection.

use crate::config::TrackerConfig;
use crate::domain::{HangDuration, HangType, MonotonicInstant, TrackerError};
use crate::frames::Interval;

use super::{DetectionStrategy, Tracker, TrackerDeps};

/// Reports every stall longer than the timeout as [`HangType::Unknown`] and
/// measures it exactly, from the late pulse's start to when it landed.
#[derive(Debug, Clone, Copy, Default)]
pub struct PulseStrategy;

impl DetectionStrategy for PulseStrategy {
    fn name(&self) -> &'static str {
        "v1"
    }

    fn classify_stall(&self, _window: Interval) -> Option<HangType> {
        Some(HangType::Unknown)
    }

    fn measure(
        &self,
        started_at: MonotonicInstant,
        last_unhealthy_at: MonotonicInstant,
        _now: MonotonicInstant,
    ) -> HangDuration {
        HangDuration::exact(last_unhealthy_at.saturating_duration_since(started_at))
    }
}

impl Tracker<PulseStrategy> {
    /// # Errors
    /// Returns [`TrackerError::Config`] for an invalid configuration.
    pub fn v1(config: TrackerConfig, deps: TrackerDeps) -> Result<Self, TrackerError> {
        Self::new(config, deps, PulseStrategy)
    }
}
