//! Hang severity classification.
//!
//! Pure functions over frame-health samples. Given the stall window and what
//! the frame source saw during it:
//!
//! | frame data           | verdict                  |
//! |----------------------|--------------------------|
//! | unavailable          | `Unknown` (fail open)    |
//! | zero frames rendered | `FullyBlocking`          |
//! | delay >= 80% window  | `NonFullyBlocking`       |
//! | otherwise            | no hang                  |
//!
//! Degraded rendering caught while pulses still land ([`degraded_delay`])
//! also needs at least [`MIN_DELAYED_FRAMES`] late frames.

use std::time::Duration;

use crate::domain::HangType;
use crate::frames::{FrameHealthSource, FrameSample, Interval};

/// Share of the window covered by frame delay at which a stall that still
/// rendered frames counts as a hang.
pub const NON_FULLY_BLOCKING_DELAY_RATIO: f64 = 0.8;

/// Share of the recovery window frame delay must stay under before a hang
/// may end.
pub const RECOVERED_DELAY_RATIO: f64 = 0.2;

/// Late frames needed before slow rendering counts as a hang on its own. One
/// frozen frame is a stall, and only late pulses may report a stall.
pub const MIN_DELAYED_FRAMES: u64 = 2;

/// Fraction of `window` covered by `delay`, clamped to `0.0..=1.0`.
#[must_use]
pub fn delay_ratio(window: Duration, delay: Duration) -> f64 {
    if window.is_zero() {
        return 0.0;
    }
    (delay.as_secs_f64() / window.as_secs_f64()).clamp(0.0, 1.0)
}

/// Classify a stall of length `window`. `None` means "not a hang".
#[must_use]
pub fn classify_sample(window: Duration, sample: Option<FrameSample>) -> Option<HangType> {
    let Some(sample) = sample else {
        return Some(HangType::Unknown);
    };
    if sample.frames_rendered == 0 {
        return Some(HangType::FullyBlocking);
    }
    if window.is_zero() {
        return None;
    }
    (delay_ratio(window, sample.frame_delay) >= NON_FULLY_BLOCKING_DELAY_RATIO)
        .then_some(HangType::NonFullyBlocking)
}

/// Frame delay over a window in which pulses kept landing, when rendering was
/// degraded enough to be a non-fully-blocking hang.
#[must_use]
pub fn degraded_delay(window: Duration, sample: FrameSample) -> Option<Duration> {
    if sample.delayed_frames < MIN_DELAYED_FRAMES {
        return None;
    }
    match classify_sample(window, Some(sample))? {
        HangType::NonFullyBlocking => Some(sample.frame_delay),
        HangType::FullyBlocking | HangType::Unknown => None,
    }
}

/// Classify the stall covering `window` using `frames`.
#[must_use]
pub fn classify_hang(window: Interval, frames: &dyn FrameHealthSource) -> Option<HangType> {
    classify_sample(window.duration(), frames.sample_in(window))
}

/// True when frame delay over `window` has settled. Without frame data the
/// pulse timings alone decide, so this returns true.
#[must_use]
pub fn has_recovered(window: Interval, frames: &dyn FrameHealthSource) -> bool {
    frames
        .frame_delay_in(window)
        .is_none_or(|delay| delay_ratio(window.duration(), delay) < RECOVERED_DELAY_RATIO)
}
