//! # ANR Trackers
//!
//! Ties a [`HangWatchdog`] and a [`DetectionStrategy`] to a set of hang
//! listeners.
//!
//! ```text
//!  HangWatchdog ──late/finished──▶ Shared::on_late / on_finished
//!                                      │  (tracker lock)
//!                                      ▼
//!                               HangStateMachine ──Notice──┐
//!                                                          │ (lock released)
//!                                                          ▼
//!                                 ListenerRegistry<dyn HangListener>
//! ```
//!
//! Listener registration, state transitions, and starting or stopping the
//! watchdog all happen under one lock per tracker. Listeners are always
//! called with that lock released, so they may add or remove listeners or
//! clear the tracker from inside a callback.
//!
//! The watchdog thread exists only while at least one listener is
//! registered. Removing the last listener (or its owner dropping it) stops
//! and joins the thread.
//!
//! Two strategies share this machinery:
//! - [`PulseStrategy`] (v1): pulse timing only, every hang is `Unknown`.
//! - [`FrameStrategy`] (v2): frame data classifies fully vs non-fully
//!   blocking hangs and also catches degraded rendering while pulses land.

mod machine;
mod v1;
mod v2;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use log::{debug, info};

use crate::clock::Clock;
use crate::config::TrackerConfig;
use crate::domain::{
    HangDuration, HangEvent, HangId, HangType, MonotonicInstant, RunLoopIteration, TrackerError,
};
use crate::environment::EnvironmentGate;
use crate::frames::Interval;
use crate::probe::MainThreadProbe;
use crate::registry::{ListenerHandle, ListenerRegistry};
use crate::watchdog::{HangWatchdog, WatchdogJoin, WatchdogStats};

use machine::{HangStateMachine, Notice};
pub use v1::PulseStrategy;
pub use v2::FrameStrategy;

/// Pulse-only tracker.
pub type AnrTrackerV1 = Tracker<PulseStrategy>;

/// Frame-aware tracker.
pub type AnrTrackerV2 = Tracker<FrameStrategy>;

// ============================================================================
// Public contracts
// ============================================================================

/// Receives hang notices. Called on the watchdog thread.
pub trait HangListener: Send + Sync {
    fn hang_detected(&self, event: &HangEvent);
    fn hang_stopped(&self, event: &HangEvent);
}

/// Listener built from two closures.
pub struct FnListener<D, S> {
    on_detected: D,
    on_stopped: S,
}

impl<D, S> FnListener<D, S>
where
    D: Fn(HangType) + Send + Sync + 'static,
    S: Fn(Option<HangDuration>) + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(on_detected: D, on_stopped: S) -> Arc<Self> {
        Arc::new(Self { on_detected, on_stopped })
    }
}

impl<D, S> HangListener for FnListener<D, S>
where
    D: Fn(HangType) + Send + Sync,
    S: Fn(Option<HangDuration>) + Send + Sync,
{
    fn hang_detected(&self, event: &HangEvent) {
        (self.on_detected)(event.kind);
    }

    fn hang_stopped(&self, event: &HangEvent) {
        (self.on_stopped)(event.duration);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackerState {
    Idle,
    Armed,
    HangInProgress(HangId),
}

/// Interface shared by both tracker strategies.
pub trait AnrTracker: Send + Sync {
    /// Make sure tracking runs if anyone is listening. Registering a
    /// listener does this implicitly.
    ///
    /// # Errors
    /// Fails if the watchdog thread cannot be spawned.
    fn start(&self) -> Result<(), TrackerError>;

    /// Register without taking ownership: the registration lapses when the
    /// caller drops its last `Arc`.
    ///
    /// # Errors
    /// Fails if the watchdog thread cannot be spawned; nothing is registered.
    fn add_listener(&self, listener: &Arc<dyn HangListener>) -> Result<ListenerHandle, TrackerError>;

    /// Register and keep `listener` alive until removed.
    ///
    /// # Errors
    /// As [`AnrTracker::add_listener`].
    fn add_owned_listener(&self, listener: Arc<dyn HangListener>) -> Result<ListenerHandle, TrackerError>;

    /// Returns false for an unknown handle.
    fn remove_listener(&self, handle: ListenerHandle) -> bool;

    /// Remove every listener and stop tracking. Once this returns from any
    /// thread other than the watchdog's own, the watchdog thread has exited
    /// and no further notice is delivered.
    fn clear(&self);

    fn state(&self) -> TrackerState;

    fn watchdog_stats(&self) -> WatchdogStats;
}

/// Decides what counts as a hang. See [`PulseStrategy`] and [`FrameStrategy`].
pub trait DetectionStrategy: Send + 'static {
    fn name(&self) -> &'static str;

    /// Verdict for a stall covering `window`, `None` when it is not a hang.
    fn classify_stall(&self, window: Interval) -> Option<HangType>;

    /// Frame delay within `window` when rendering is degraded even though
    /// pulses complete. Only frame-aware strategies report this.
    fn degraded_delay(&self, _window: Interval) -> Option<Duration> {
        None
    }

    /// Whether the UI has settled over `window`.
    fn has_recovered(&self, _window: Interval) -> bool {
        true
    }

    /// Length of an episode that started at `started_at`, was last seen
    /// unhealthy at `last_unhealthy_at` and was confirmed over at `now`.
    fn measure(
        &self,
        started_at: MonotonicInstant,
        last_unhealthy_at: MonotonicInstant,
        now: MonotonicInstant,
    ) -> HangDuration;
}

/// Host collaborators every tracker needs.
#[derive(Clone)]
pub struct TrackerDeps {
    pub clock: Arc<dyn Clock>,
    pub probe: Arc<dyn MainThreadProbe>,
    pub gate: Arc<dyn EnvironmentGate>,
}

// ============================================================================
// Tracker
// ============================================================================

struct Inner<S> {
    machine: HangStateMachine<S>,
    /// Listeners told about the episode in progress.
    recipients: Vec<ListenerHandle>,
}

struct Shared<S> {
    listeners: ListenerRegistry<dyn HangListener>,
    inner: Mutex<Inner<S>>,
    watchdog: HangWatchdog,
    clock: Arc<dyn Clock>,
    gate: Arc<dyn EnvironmentGate>,
}

/// ANR tracker parameterised by its detection strategy.
pub struct Tracker<S: DetectionStrategy> {
    shared: Arc<Shared<S>>,
}

impl<S: DetectionStrategy> Tracker<S> {
    /// # Errors
    /// Returns [`TrackerError::Config`] for an invalid configuration.
    pub fn new(config: TrackerConfig, deps: TrackerDeps, strategy: S) -> Result<Self, TrackerError> {
        config.validate()?;
        let watchdog = HangWatchdog::new(config.watchdog, Arc::clone(&deps.clock), deps.probe);
        let shared = Arc::new(Shared {
            listeners: ListenerRegistry::new(),
            inner: Mutex::new(Inner {
                machine: HangStateMachine::new(config, strategy),
                recipients: Vec::new(),
            }),
            watchdog,
            clock: deps.clock,
            gate: deps.gate,
        });

        // Observers hold the tracker weakly: the watchdog must not keep it alive.
        let weak: Weak<Shared<S>> = Arc::downgrade(&shared);
        shared.watchdog.add_late_observer(move |id, elapsed| {
            if let Some(shared) = weak.upgrade() {
                shared.on_late(id, elapsed);
            }
        });
        let weak: Weak<Shared<S>> = Arc::downgrade(&shared);
        shared.watchdog.add_finished_observer(move |iteration| {
            if let Some(shared) = weak.upgrade() {
                shared.on_finished(iteration);
            }
        });

        Ok(Self { shared })
    }

    /// Register a pair of closures. The registration owns them.
    ///
    /// # Errors
    /// As [`AnrTracker::add_listener`].
    pub fn add_callbacks(
        &self,
        on_detected: impl Fn(HangType) + Send + Sync + 'static,
        on_stopped: impl Fn(Option<HangDuration>) + Send + Sync + 'static,
    ) -> Result<ListenerHandle, TrackerError> {
        self.add_owned_listener(FnListener::new(on_detected, on_stopped))
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.shared.listeners.len()
    }

    #[must_use]
    pub fn is_watchdog_running(&self) -> bool {
        self.shared.watchdog.is_running()
    }
}

impl<S: DetectionStrategy> AnrTracker for Tracker<S> {
    fn start(&self) -> Result<(), TrackerError> {
        self.shared.reconcile()
    }

    fn add_listener(&self, listener: &Arc<dyn HangListener>) -> Result<ListenerHandle, TrackerError> {
        self.shared.register(|registry| registry.add(listener))
    }

    fn add_owned_listener(&self, listener: Arc<dyn HangListener>) -> Result<ListenerHandle, TrackerError> {
        self.shared.register(move |registry| registry.add_owned(listener))
    }

    fn remove_listener(&self, handle: ListenerHandle) -> bool {
        let (removed, join) = {
            let mut inner = self.shared.lock();
            let removed = self.shared.listeners.remove(handle);
            inner.recipients.retain(|h| *h != handle);
            (removed, self.shared.stop_if_unobserved(&mut inner))
        };
        if let Some(join) = join {
            join.wait();
        }
        removed
    }

    fn clear(&self) {
        let join = {
            let mut inner = self.shared.lock();
            self.shared.listeners.clear();
            self.shared.stop_if_unobserved(&mut inner)
        };
        if let Some(join) = join {
            join.wait();
        }
    }

    fn state(&self) -> TrackerState {
        self.shared.lock().machine.state()
    }

    fn watchdog_stats(&self) -> WatchdogStats {
        self.shared.watchdog.stats()
    }
}

impl<S: DetectionStrategy> Drop for Tracker<S> {
    fn drop(&mut self) {
        self.clear();
    }
}

// ============================================================================
// Shared state, driven from both the caller's and the watchdog's thread
// ============================================================================

impl<S: DetectionStrategy> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, Inner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(
        &self,
        add: impl FnOnce(&ListenerRegistry<dyn HangListener>) -> ListenerHandle,
    ) -> Result<ListenerHandle, TrackerError> {
        let mut inner = self.lock();
        let handle = add(&self.listeners);
        if let Err(err) = self.watchdog.start() {
            self.listeners.remove(handle);
            return Err(err.into());
        }
        inner.machine.arm();
        debug!("listener {} registered", handle.as_u64());
        Ok(handle)
    }

    fn reconcile(&self) -> Result<(), TrackerError> {
        let join = {
            let mut inner = self.lock();
            if self.listeners.is_empty() {
                self.stop_if_unobserved(&mut inner)
            } else {
                self.watchdog.start()?;
                inner.machine.arm();
                None
            }
        };
        if let Some(join) = join {
            join.wait();
        }
        Ok(())
    }

    /// Disarm and stop the watchdog when nobody listens. Caller holds the lock
    /// and must wait on the returned join after releasing it.
    fn stop_if_unobserved(&self, inner: &mut Inner<S>) -> Option<WatchdogJoin> {
        if !self.listeners.is_empty() {
            return None;
        }
        inner.machine.disarm();
        inner.recipients.clear();
        let join = self.watchdog.request_stop();
        if join.is_some() {
            info!("last hang listener gone, stopping watchdog");
        }
        join
    }

    fn on_late(&self, id: HangId, elapsed: Duration) {
        let now = self.clock.now();
        let delivery = {
            let mut inner = self.lock();
            inner
                .machine
                .on_late(id, elapsed, now, self.gate.as_ref())
                .map(|notice| self.route(&mut inner, notice))
        };
        self.deliver(delivery);
    }

    fn on_finished(&self, iteration: RunLoopIteration) {
        let now = self.clock.now();
        let delivery = {
            let mut inner = self.lock();
            inner
                .machine
                .on_finished(iteration, now, self.gate.as_ref())
                .map(|notice| self.route(&mut inner, notice))
        };
        self.deliver(delivery);
    }

    /// Pick who hears about `notice`. A new episode goes to every current
    /// listener; corrections and the stop go only to those who heard the
    /// detection.
    fn route(&self, inner: &mut Inner<S>, notice: Notice) -> (Vec<ListenerHandle>, Notice) {
        let recipients = match notice {
            Notice::Detected { corrected: false, .. } => {
                inner.recipients = self.listeners.handles();
                inner.recipients.clone()
            }
            Notice::Detected { corrected: true, .. } => inner.recipients.clone(),
            Notice::Stopped(_) => std::mem::take(&mut inner.recipients),
        };
        (recipients, notice)
    }

    fn deliver(&self, delivery: Option<(Vec<ListenerHandle>, Notice)>) {
        if let Some((recipients, notice)) = delivery {
            self.listeners.notify(&recipients, |listener| match &notice {
                Notice::Detected { event, .. } => listener.hang_detected(event),
                Notice::Stopped(event) => listener.hang_stopped(event),
            });
        }
        // Weak listeners may have lapsed since the last walk.
        if self.listeners.is_empty() {
            let join = self.stop_if_unobserved(&mut self.lock());
            if let Some(join) = join {
                join.wait();
            }
        }
    }
}
