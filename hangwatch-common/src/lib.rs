//! # Shared Hang Data Types
//!
//! Plain value types exchanged between the hang watchdog, the trackers built on
//! top of it, and whatever consumes hang events downstream (crash reporters,
//! event pipelines). Nothing in here owns a thread or a lock.
//!
//! ## Key Types
//!
//! - [`HangId`] - Unique identifier minted once per hang episode
//! - [`HangType`] - Severity classification of a hang
//! - [`MonotonicInstant`] - Point on a monotonic clock, in nanoseconds
//! - [`RunLoopIteration`] - One completed unit of work on the monitored thread
//! - [`HangDuration`] - Measured (possibly bounded) length of a hang
//! - [`HangEvent`] - Immutable payload handed to listeners and sinks
//!
//! Enable the `serde` feature to serialize these for export.

use std::fmt;
use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Identity
// ============================================================================

/// Opaque identifier of one contiguous hang.
///
/// Correlates a "detected" notification with its "stopped" notification and
/// lets late, re-entrant ticks of the same stall be recognised. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct HangId(Uuid);

impl HangId {
    /// Mint a fresh random identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    #[must_use]
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for HangId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HangId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hang:{}", self.0.simple())
    }
}

// ============================================================================
// Classification
// ============================================================================

/// Severity of a detected hang.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(rename_all = "snake_case"))]
pub enum HangType {
    /// No frame was rendered during the stall.
    FullyBlocking,
    /// Some frames were rendered, but frame delay covered most of the stall.
    NonFullyBlocking,
    /// No frame data was available to tell the two apart.
    #[default]
    Unknown,
}

impl HangType {
    /// Returns true for the two classifications backed by frame data.
    #[must_use]
    pub fn is_concrete(self) -> bool {
        !matches!(self, HangType::Unknown)
    }

    /// Exception type used when a hang is reported as an error event.
    #[must_use]
    pub fn exception_type(self) -> &'static str {
        match self {
            HangType::FullyBlocking => "App Hanging Fully Blocked",
            HangType::NonFullyBlocking => "App Hanging Non Fully Blocked",
            HangType::Unknown => "App Hanging",
        }
    }
}

impl fmt::Display for HangType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            HangType::FullyBlocking => "fully-blocking",
            HangType::NonFullyBlocking => "non-fully-blocking",
            HangType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Time
// ============================================================================

/// Instant on a monotonic clock, stored as nanoseconds since the clock's origin.
///
/// The origin is whatever the producing clock chose (process start, a test
/// epoch). Instants from different clocks must not be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(transparent))]
pub struct MonotonicInstant(u64);

impl MonotonicInstant {
    pub const ZERO: MonotonicInstant = MonotonicInstant(0);

    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[must_use]
    pub fn from_duration(since_origin: Duration) -> Self {
        Self(u64::try_from(since_origin.as_nanos()).unwrap_or(u64::MAX))
    }

    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[must_use]
    pub fn as_duration(self) -> Duration {
        Duration::from_nanos(self.0)
    }

    /// Time elapsed from `earlier` to `self`, or zero if `earlier` is later.
    #[must_use]
    pub fn saturating_duration_since(self, earlier: MonotonicInstant) -> Duration {
        Duration::from_nanos(self.0.saturating_sub(earlier.0))
    }

    #[must_use]
    pub fn saturating_add(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_add(nanos))
    }

    /// Instant `duration` before `self`, clamped at the clock origin.
    #[must_use]
    pub fn saturating_sub(self, duration: Duration) -> Self {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        Self(self.0.saturating_sub(nanos))
    }
}

impl fmt::Display for MonotonicInstant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_duration().as_secs_f64())
    }
}

/// One completed unit of work (a pulse) on the monitored thread.
///
/// `end_time >= start_time` always holds: the constructor and deserialization
/// both clamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize), serde(from = "IterationFields"))]
pub struct RunLoopIteration {
    start_time: MonotonicInstant,
    end_time: MonotonicInstant,
}

impl RunLoopIteration {
    #[must_use]
    pub fn new(start_time: MonotonicInstant, end_time: MonotonicInstant) -> Self {
        Self { start_time, end_time: end_time.max(start_time) }
    }

    #[must_use]
    pub fn start_time(&self) -> MonotonicInstant {
        self.start_time
    }

    #[must_use]
    pub fn end_time(&self) -> MonotonicInstant {
        self.end_time
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end_time.saturating_duration_since(self.start_time)
    }
}

#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct IterationFields {
    start_time: MonotonicInstant,
    end_time: MonotonicInstant,
}

#[cfg(feature = "serde")]
impl From<IterationFields> for RunLoopIteration {
    fn from(fields: IterationFields) -> Self {
        Self::new(fields.start_time, fields.end_time)
    }
}

/// Length of a hang. `min == max` when it was measured exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HangDuration {
    pub min: Duration,
    pub max: Duration,
}

impl HangDuration {
    #[must_use]
    pub fn exact(duration: Duration) -> Self {
        Self { min: duration, max: duration }
    }

    /// Bounded duration; `max` is raised to `min` if given out of order.
    #[must_use]
    pub fn between(min: Duration, max: Duration) -> Self {
        Self { min, max: max.max(min) }
    }

    #[must_use]
    pub fn is_exact(&self) -> bool {
        self.min == self.max
    }
}

impl fmt::Display for HangDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_exact() {
            write!(f, "{:.3}s", self.min.as_secs_f64())
        } else {
            write!(f, "{:.3}s..{:.3}s", self.min.as_secs_f64(), self.max.as_secs_f64())
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// Hang notification payload. Immutable once emitted.
///
/// `duration` is `None` on the detection notice (the hang is still running)
/// and carries the measured length on the stop notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HangEvent {
    pub id: HangId,
    pub kind: HangType,
    pub started_at: MonotonicInstant,
    pub duration: Option<HangDuration>,
}

impl HangEvent {
    #[must_use]
    pub fn detected(id: HangId, kind: HangType, started_at: MonotonicInstant) -> Self {
        Self { id, kind, started_at, duration: None }
    }

    #[must_use]
    pub fn stopped(self, duration: HangDuration) -> Self {
        Self { duration: Some(duration), ..self }
    }
}
