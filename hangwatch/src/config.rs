//! Watchdog and tracker configuration.
//!
//! Durations serialize as integer milliseconds so the host SDK can carry these
//! in its own options files. Loading those files is the host's job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

/// Refresh rate assumed when the host does not report one.
pub const DEFAULT_REFRESH_RATE: f64 = 60.0;

/// A pulse is late once it takes longer than this many frame durations.
pub const PULSE_TIMEOUT_TO_FRAME_RATIO: f64 = 1.5;

/// Default hang threshold.
pub const DEFAULT_TIMEOUT_INTERVAL: Duration = Duration::from_secs(2);

/// Consecutive healthy pulses required before a hang is declared over.
pub const DEFAULT_RECOVERY_PULSES: u32 = 3;

/// Floor for the suspension filter, see [`TrackerConfig::suspension_gap`].
pub const DEFAULT_MIN_SUSPENSION_GAP: Duration = Duration::from_millis(500);

/// Timing of the pulse round-trip performed by [`crate::watchdog::HangWatchdog`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// How long one timed wait lasts before the pulse is reported late.
    #[serde(with = "millis")]
    pub pulse_timeout: Duration,
    /// Pause between a completed pulse and the next one.
    #[serde(with = "millis")]
    pub pulse_interval: Duration,
}

impl WatchdogConfig {
    /// Derive pulse timing from the display refresh rate.
    ///
    /// At 60 Hz a frame lasts 16.7 ms, so a pulse is late after 25 ms.
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidRefreshRate`] for zero, negative or
    /// non-finite rates.
    pub fn for_refresh_rate(frames_per_second: f64) -> Result<Self, ConfigError> {
        if !frames_per_second.is_finite() || frames_per_second <= 0.0 {
            return Err(ConfigError::InvalidRefreshRate(frames_per_second));
        }
        Ok(Self {
            pulse_timeout: frames(frames_per_second, PULSE_TIMEOUT_TO_FRAME_RATIO),
            pulse_interval: frames(frames_per_second, 1.0),
        })
    }

    /// # Errors
    /// Returns [`ConfigError::ZeroDuration`] when either duration is zero. A
    /// zero interval would queue pulses back to back on the monitored thread.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pulse_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "pulse_timeout" });
        }
        if self.pulse_interval.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "pulse_interval" });
        }
        Ok(())
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            pulse_timeout: frames(DEFAULT_REFRESH_RATE, PULSE_TIMEOUT_TO_FRAME_RATIO),
            pulse_interval: frames(DEFAULT_REFRESH_RATE, 1.0),
        }
    }
}

/// `count` frame durations at `frames_per_second`, rounded to the nanosecond.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn frames(frames_per_second: f64, count: f64) -> Duration {
    Duration::from_nanos((1e9 * count / frames_per_second).round() as u64)
}

/// Hang thresholds shared by both tracking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// A stall must last at least this long to be reported.
    #[serde(with = "millis")]
    pub timeout_interval: Duration,

    pub watchdog: WatchdogConfig,

    /// Healthy pulses in a row needed to end a hang.
    pub recovery_pulses: u32,

    /// A pulse faster than this counts as healthy.
    #[serde(with = "millis")]
    pub recovery_threshold: Duration,

    /// Trailing window over which frame delay must have settled (frame-aware strategy).
    #[serde(with = "millis")]
    pub recovery_window: Duration,

    /// Lower bound of the gap treated as a suspended watchdog.
    #[serde(with = "millis")]
    pub min_suspension_gap: Duration,
}

impl TrackerConfig {
    /// Defaults scaled to the given hang threshold.
    #[must_use]
    pub fn with_timeout(timeout_interval: Duration) -> Self {
        let watchdog = WatchdogConfig::default();
        Self {
            timeout_interval,
            watchdog,
            recovery_pulses: DEFAULT_RECOVERY_PULSES,
            recovery_threshold: watchdog.pulse_timeout,
            recovery_window: timeout_interval * 2 / 5,
            min_suspension_gap: DEFAULT_MIN_SUSPENSION_GAP,
        }
    }

    /// Replace the pulse timing, keeping `recovery_threshold` in step with it.
    #[must_use]
    pub fn with_watchdog(mut self, watchdog: WatchdogConfig) -> Self {
        self.watchdog = watchdog;
        self.recovery_threshold = watchdog.pulse_timeout;
        self
    }

    /// Jump in elapsed time between two late ticks of one stall beyond which
    /// the watchdog thread itself must have been suspended (app suspended,
    /// machine asleep). Such stalls are discarded.
    #[must_use]
    pub fn suspension_gap(&self) -> Duration {
        self.watchdog.pulse_timeout + self.timeout_interval.max(self.min_suspension_gap)
    }

    /// # Errors
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_interval.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "timeout_interval" });
        }
        // No pulse is faster than zero, so a hang could never end.
        if self.recovery_threshold.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "recovery_threshold" });
        }
        if self.recovery_window.is_zero() {
            return Err(ConfigError::ZeroDuration { field: "recovery_window" });
        }
        if self.recovery_pulses == 0 {
            return Err(ConfigError::NoRecoveryPulses);
        }
        self.watchdog.validate()
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self::with_timeout(DEFAULT_TIMEOUT_INTERVAL)
    }
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
