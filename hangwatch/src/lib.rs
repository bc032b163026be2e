//! # hangwatch - Application Hang (ANR) Detection Core
//!
//! hangwatch runs inside a host application and notices, without help from
//! application code, when the monitored (UI) thread stops processing work for
//! too long. It classifies how badly the thread is stuck and tells interested
//! subsystems exactly once per episode when the hang starts and when it ends.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Host application process                      │
//! │  ┌───────────────────┐   pulses / frames   ┌───────────────────┐ │
//! │  │  Monitored thread │◀────────────────────│ MainThreadProbe   │ │
//! │  │   (UI run loop)   │                     │ DisplayLink       │ │
//! │  └───────────────────┘                     └───────────────────┘ │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                │ pulse completed / late
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                        hangwatch (this crate)                     │
//! │                                                                   │
//! │  ┌──────────────┐   late/finished   ┌────────────────────────┐   │
//! │  │ HangWatchdog │──────────────────▶│ Tracker (v1 / v2)      │   │
//! │  │ (own thread) │                   │  state machine + gates │   │
//! │  └──────────────┘                   └───────────┬────────────┘   │
//! │         ▲                                        │                │
//! │         │ Clock               FrameHealthSource ─┤ classification │
//! │                                                  ▼                │
//! │                                   ┌────────────────────────────┐ │
//! │                                   │ ListenerRegistry           │ │
//! │                                   │  ─▶ HangReporter ─▶ sink   │ │
//! │                                   └────────────────────────────┘ │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Detection pipeline
//!
//! - [`watchdog`]: background thread timing pulse round-trips, reports late
//!   and finished pulses
//! - [`frames`]: frame-rendering health ([`frames::FrameHealthSource`],
//!   [`frames::FrameTracker`], [`frames::DisplayLink`])
//! - [`classification`]: pure hang severity verdicts from frame samples
//! - [`tracking`]: the v1 (pulse-only) and v2 (frame-aware) trackers behind
//!   one [`tracking::AnrTracker`] interface
//!
//! ### Collaborators and plumbing
//!
//! - [`clock`]: monotonic time, with a manual clock for tests
//! - [`probe`]: scheduling onto the monitored thread
//! - [`environment`]: foreground and debugger gates
//! - [`registry`]: weak-tolerant, re-entrant listener set
//! - [`export`]: hang reports and sinks
//! - [`config`]: thresholds and pulse timing
//! - [`domain`]: shared value types and errors
//! - [`cli`]: arguments of the demo binary
//!
//! ## Typical Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use hangwatch::clock::SystemClock;
//! use hangwatch::config::TrackerConfig;
//! use hangwatch::environment::StaticGate;
//! use hangwatch::probe::MonitoredThread;
//! use hangwatch::tracking::{AnrTracker, AnrTrackerV1, TrackerDeps};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ui = Arc::new(MonitoredThread::spawn("ui")?);
//! let deps = TrackerDeps {
//!     clock: Arc::new(SystemClock::new()),
//!     probe: ui.clone(),
//!     gate: Arc::new(StaticGate::default()),
//! };
//! let tracker = AnrTrackerV1::v1(TrackerConfig::default(), deps)?;
//! let handle = tracker.add_callbacks(
//!     |kind| println!("hang detected: {kind}"),
//!     |duration| println!("hang over: {duration:?}"),
//! )?;
//! // ...
//! tracker.remove_listener(handle);
//! # Ok(())
//! # }
//! ```
//!
//! ## Key Concepts
//!
//! - **Pulse**: a no-op task sent through the monitored thread to time it
//! - **Late tick**: the watchdog's report that the current pulse is overdue
//! - **Fully blocking**: no frame rendered during the stall
//! - **Non-fully blocking**: frames rendered, but delay covered most of the stall

pub mod classification;
pub mod cli;
pub mod clock;
pub mod config;
pub mod domain;
pub mod environment;
pub mod export;
pub mod frames;
pub mod probe;
pub mod registry;
pub mod tracking;
pub mod watchdog;
