//! Frame-rendering health.
//!
//! [`FrameHealthSource`] is what the frame-aware tracker samples to tell a
//! fully blocked UI from a merely janky one. [`FrameTracker`] implements it
//! from frame timestamps; [`DisplayLink`] feeds it by rendering "frames" on
//! the monitored thread at the display rate.
//!
//! Frame delay is the part of each frame that ran past its expected duration:
//!
//! ```text
//!   prev frame        expected end          frame end
//!   |──────────────────|░░░░░░░░░░░░░░░░░░░░░|
//!                       └── delay ──────────┘
//! ```
//!
//! The frame still being rendered counts too, up to the query time, so a UI
//! that is blocked right now shows the full stall as delay.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, warn};

use crate::clock::Clock;
use crate::domain::MonotonicInstant;
use crate::probe::MainThreadProbe;

/// Closed time range on the tracker's clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: MonotonicInstant,
    pub end: MonotonicInstant,
}

impl Interval {
    /// `end` is clamped so it is never before `start`.
    #[must_use]
    pub fn new(start: MonotonicInstant, end: MonotonicInstant) -> Self {
        Self { start, end: end.max(start) }
    }

    /// The `length` leading up to `end`.
    #[must_use]
    pub fn ending_at(end: MonotonicInstant, length: Duration) -> Self {
        Self::new(end.saturating_sub(length), end)
    }

    #[must_use]
    pub fn duration(&self) -> Duration {
        self.end.saturating_duration_since(self.start)
    }

    /// Length of the overlap between `self` and `[start, end]`.
    #[must_use]
    pub fn overlap(&self, start: MonotonicInstant, end: MonotonicInstant) -> Duration {
        let from = self.start.max(start);
        let to = self.end.min(end);
        to.saturating_duration_since(from)
    }
}

/// Frames rendered and accumulated frame delay over one interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSample {
    pub frames_rendered: u64,
    /// Frames whose delay overlaps the interval, the one in progress included.
    pub delayed_frames: u64,
    pub frame_delay: Duration,
}

/// Rolling view of recently rendered frames. `None` means no data for the
/// interval (tracking off, or the interval predates the retained history).
pub trait FrameHealthSource: Send + Sync {
    fn frames_rendered_in(&self, interval: Interval) -> Option<u64>;

    /// Total frame delay that fell inside `interval`.
    fn frame_delay_in(&self, interval: Interval) -> Option<Duration>;

    /// Number of frames contributing to [`FrameHealthSource::frame_delay_in`].
    fn delayed_frames_in(&self, interval: Interval) -> Option<u64>;

    fn average_frame_delay_in(&self, interval: Interval) -> Option<Duration> {
        let frames = self.frames_rendered_in(interval)?;
        let delay = self.frame_delay_in(interval)?;
        Some(delay / u32::try_from(frames.max(1)).unwrap_or(u32::MAX))
    }

    /// Both measures from one consistent view of the history.
    fn sample_in(&self, interval: Interval) -> Option<FrameSample> {
        Some(FrameSample {
            frames_rendered: self.frames_rendered_in(interval)?,
            delayed_frames: self.delayed_frames_in(interval)?,
            frame_delay: self.frame_delay_in(interval)?,
        })
    }
}

// ============================================================================
// FrameTracker
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct Frame {
    start: MonotonicInstant,
    end: MonotonicInstant,
}

#[derive(Debug, Default)]
struct FrameState {
    running: bool,
    /// Earliest instant the retained history fully describes.
    covered_since: MonotonicInstant,
    previous: MonotonicInstant,
    frames: VecDeque<Frame>,
}

pub struct FrameTracker {
    clock: Arc<dyn Clock>,
    expected_frame_duration: Duration,
    keep_for: Duration,
    state: Mutex<FrameState>,
}

impl FrameTracker {
    /// History older than `keep_for` is discarded.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>, expected_frame_duration: Duration, keep_for: Duration) -> Self {
        Self {
            clock,
            expected_frame_duration,
            keep_for,
            state: Mutex::new(FrameState::default()),
        }
    }

    #[must_use]
    pub fn expected_frame_duration(&self) -> Duration {
        self.expected_frame_duration
    }

    /// Begin tracking. History starts empty at the current time.
    pub fn start(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        if state.running {
            return;
        }
        *state = FrameState { running: true, covered_since: now, previous: now, frames: VecDeque::new() };
        debug!("frame tracking started at {now}");
    }

    pub fn stop(&self) {
        let mut state = self.lock();
        state.running = false;
        state.frames.clear();
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    /// A frame finished rendering now.
    pub fn record_frame(&self) {
        let now = self.clock.now();
        let mut state = self.lock();
        if !state.running {
            return;
        }
        let start = state.previous;
        state.frames.push_back(Frame { start, end: now });
        state.previous = now;

        let horizon = now.saturating_sub(self.keep_for);
        while let Some(oldest) = state.frames.front().copied() {
            if oldest.end >= horizon {
                break;
            }
            state.frames.pop_front();
            state.covered_since = state.covered_since.max(oldest.end);
        }
    }

    fn sample_locked(&self, state: &FrameState, interval: Interval) -> Option<FrameSample> {
        if !state.running || interval.start < state.covered_since {
            return None;
        }

        let mut sample = FrameSample { frames_rendered: 0, delayed_frames: 0, frame_delay: Duration::ZERO };
        for frame in &state.frames {
            if frame.end > interval.start && frame.end <= interval.end {
                sample.frames_rendered += 1;
            }
            self.add_delay(&mut sample, interval, frame.start, frame.end);
        }
        self.add_delay(&mut sample, interval, state.previous, self.clock.now());
        Some(sample)
    }

    /// Add the late part of the frame `[start, end]` that falls in `interval`.
    fn add_delay(&self, sample: &mut FrameSample, interval: Interval, start: MonotonicInstant, end: MonotonicInstant) {
        let delay = interval.overlap(start.saturating_add(self.expected_frame_duration), end);
        if !delay.is_zero() {
            sample.delayed_frames += 1;
            sample.frame_delay += delay;
        }
    }

    fn lock(&self) -> MutexGuard<'_, FrameState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FrameHealthSource for FrameTracker {
    fn frames_rendered_in(&self, interval: Interval) -> Option<u64> {
        self.sample_in(interval).map(|s| s.frames_rendered)
    }

    fn frame_delay_in(&self, interval: Interval) -> Option<Duration> {
        self.sample_in(interval).map(|s| s.frame_delay)
    }

    fn delayed_frames_in(&self, interval: Interval) -> Option<u64> {
        self.sample_in(interval).map(|s| s.delayed_frames)
    }

    fn sample_in(&self, interval: Interval) -> Option<FrameSample> {
        let state = self.lock();
        self.sample_locked(&state, interval)
    }
}

// ============================================================================
// DisplayLink
// ============================================================================

/// Vsync stand-in: every frame interval, queues one frame on the monitored
/// thread unless the previous one has not run yet.
pub struct DisplayLink {
    frames: Arc<FrameTracker>,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl DisplayLink {
    /// Start `frames` and begin ticking.
    ///
    /// # Errors
    /// Returns the OS error if the ticker thread cannot be spawned.
    pub fn start(frames: Arc<FrameTracker>, probe: Arc<dyn MainThreadProbe>) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let interval = frames.expected_frame_duration();
        let pending = Arc::new(AtomicBool::new(false));
        frames.start();

        let tracker = Arc::clone(&frames);
        let handle = thread::Builder::new().name("display-link".to_string()).spawn(move || {
            while let Err(RecvTimeoutError::Timeout) = stop_rx.recv_timeout(interval) {
                if pending.swap(true, Ordering::AcqRel) {
                    continue;
                }
                let tracker = Arc::clone(&tracker);
                let pending = Arc::clone(&pending);
                probe.schedule_on_monitored_thread(Box::new(move || {
                    tracker.record_frame();
                    pending.store(false, Ordering::Release);
                }));
            }
        })?;

        Ok(Self { frames, stop_tx: Some(stop_tx), handle: Some(handle) })
    }
}

impl Drop for DisplayLink {
    fn drop(&mut self) {
        drop(self.stop_tx.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("display link thread panicked");
            }
        }
        self.frames.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    const FRAME: Duration = Duration::from_millis(16);

    fn tracker() -> (Arc<ManualClock>, FrameTracker) {
        let clock = Arc::new(ManualClock::new());
        let frames = FrameTracker::new(clock.clone(), FRAME, Duration::from_secs(10));
        (clock, frames)
    }

    fn ms(v: u64) -> MonotonicInstant {
        MonotonicInstant::from_duration(Duration::from_millis(v))
    }

    #[test]
    fn test_no_data_when_stopped_or_before_tracking() {
        let (clock, frames) = tracker();
        assert!(frames.sample_in(Interval::new(ms(0), ms(10))).is_none());

        clock.set(ms(100));
        frames.start();
        clock.advance(Duration::from_millis(50));
        assert!(frames.sample_in(Interval::new(ms(50), ms(150))).is_none());
        assert!(frames.sample_in(Interval::new(ms(100), ms(150))).is_some());
    }

    #[test]
    fn test_smooth_rendering_has_no_delay() {
        let (clock, frames) = tracker();
        frames.start();
        for _ in 0..10 {
            clock.advance(FRAME);
            frames.record_frame();
        }
        let sample = frames.sample_in(Interval::new(ms(0), ms(160))).unwrap();
        assert_eq!(sample.frames_rendered, 10);
        assert_eq!(sample.delayed_frames, 0);
        assert_eq!(sample.frame_delay, Duration::ZERO);
    }

    #[test]
    fn test_slow_frame_counts_delay_past_expected_duration() {
        let (clock, frames) = tracker();
        frames.start();
        clock.advance(Duration::from_millis(116));
        frames.record_frame();

        let sample = frames.sample_in(Interval::new(ms(0), ms(116))).unwrap();
        assert_eq!(sample.frames_rendered, 1);
        assert_eq!(sample.delayed_frames, 1);
        assert_eq!(sample.frame_delay, Duration::from_millis(100));
        assert_eq!(frames.average_frame_delay_in(Interval::new(ms(0), ms(116))), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_frame_in_progress_counts_as_delay() {
        let (clock, frames) = tracker();
        frames.start();
        clock.advance(FRAME);
        frames.record_frame();
        clock.advance(Duration::from_millis(216));

        let window = Interval::ending_at(clock.now(), Duration::from_millis(200));
        let sample = frames.sample_in(window).unwrap();
        assert_eq!(sample.frames_rendered, 0);
        assert_eq!(sample.delayed_frames, 1);
        assert_eq!(sample.frame_delay, Duration::from_millis(200));
    }

    #[test]
    fn test_each_late_frame_counts_once() {
        let (clock, frames) = tracker();
        frames.start();
        for _ in 0..3 {
            clock.advance(Duration::from_millis(50));
            frames.record_frame();
        }
        clock.advance(FRAME);
        frames.record_frame();

        let sample = frames.sample_in(Interval::new(ms(0), clock.now())).unwrap();
        assert_eq!(sample.frames_rendered, 4);
        assert_eq!(sample.delayed_frames, 3);
        assert_eq!(sample.frame_delay, Duration::from_millis(102));
    }

    #[test]
    fn test_old_history_is_dropped() {
        let clock = Arc::new(ManualClock::new());
        let frames = FrameTracker::new(clock.clone(), FRAME, Duration::from_millis(100));
        frames.start();
        for _ in 0..20 {
            clock.advance(FRAME);
            frames.record_frame();
        }
        assert!(frames.sample_in(Interval::new(ms(0), ms(320))).is_none());
        assert!(frames.sample_in(Interval::ending_at(clock.now(), Duration::from_millis(50))).is_some());
    }

    #[test]
    fn test_interval_overlap() {
        let window = Interval::new(ms(100), ms(200));
        assert_eq!(window.overlap(ms(50), ms(150)), Duration::from_millis(50));
        assert_eq!(window.overlap(ms(250), ms(300)), Duration::ZERO);
        assert_eq!(Interval::ending_at(ms(10), Duration::from_millis(50)).start, ms(0));
    }
}
