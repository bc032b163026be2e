//! Tracker state machine.
//!
//! Pure: takes watchdog signals plus the current time and environment, and
//! returns the notice to deliver, if any. Owned by the tracker behind its
//! single lock; never calls listeners itself.
//!
//! ```text
//!            arm                 late tick >= timeout, gates open
//!   Idle ─────────▶ Armed ─────────────────────────────▶ HangInProgress(id)
//!     ▲               ▲  ◀──────── recovery_pulses healthy pulses ─┘
//!     └── disarm ─────┘
//! ```

use std::time::Duration;

use log::{debug, info, warn};

use super::{DetectionStrategy, TrackerState};
use crate::config::TrackerConfig;
use crate::domain::{HangEvent, HangId, HangType, MonotonicInstant, RunLoopIteration};
use crate::environment::EnvironmentGate;
use crate::frames::Interval;

/// What the tracker must tell its listeners.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Notice {
    /// `corrected` marks a reclassification of an episode already announced.
    Detected { event: HangEvent, corrected: bool },
    Stopped(HangEvent),
}

#[derive(Debug, Clone, Copy)]
struct Episode {
    event: HangEvent,
    last_unhealthy_at: MonotonicInstant,
    healthy_pulses: u32,
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Idle,
    Armed,
    InProgress(Episode),
}

/// Late ticks seen for the stall currently reported by the watchdog.
#[derive(Debug, Clone, Copy)]
struct Stall {
    id: HangId,
    last_elapsed: Duration,
    discarded: bool,
}

pub(crate) struct HangStateMachine<S> {
    config: TrackerConfig,
    strategy: S,
    phase: Phase,
    stall: Option<Stall>,
    cooldown_until: Option<MonotonicInstant>,
}

impl<S: DetectionStrategy> HangStateMachine<S> {
    pub(crate) fn new(config: TrackerConfig, strategy: S) -> Self {
        Self { config, strategy, phase: Phase::Idle, stall: None, cooldown_until: None }
    }

    pub(crate) fn state(&self) -> TrackerState {
        match self.phase {
            Phase::Idle => TrackerState::Idle,
            Phase::Armed => TrackerState::Armed,
            Phase::InProgress(episode) => TrackerState::HangInProgress(episode.event.id),
        }
    }

    pub(crate) fn arm(&mut self) {
        if matches!(self.phase, Phase::Idle) {
            self.phase = Phase::Armed;
        }
    }

    /// Back to idle. An episode in progress is dropped without a stop notice.
    pub(crate) fn disarm(&mut self) {
        if let Phase::InProgress(episode) = self.phase {
            debug!("{} tracker disarmed during hang {}", self.strategy.name(), episode.event.id);
        }
        self.phase = Phase::Idle;
        self.stall = None;
        self.cooldown_until = None;
    }

    /// The watchdog's current pulse is `elapsed` overdue-or-not, tick `id`.
    pub(crate) fn on_late(
        &mut self,
        id: HangId,
        elapsed: Duration,
        now: MonotonicInstant,
        gate: &dyn EnvironmentGate,
    ) -> Option<Notice> {
        if matches!(self.phase, Phase::Idle) || self.is_suspended_stall(id, elapsed) {
            return None;
        }
        let timeout = self.config.timeout_interval;

        match &mut self.phase {
            Phase::Idle => None,
            Phase::Armed => {
                if elapsed < timeout || !gates_open(gate) {
                    return None;
                }
                let kind = self.strategy.classify_stall(Interval::ending_at(now, timeout))?;
                let event = HangEvent::detected(id, kind, now.saturating_sub(elapsed));
                info!("{} hang {id} detected ({kind}) after {elapsed:?}", self.strategy.name());
                self.phase = Phase::InProgress(Episode {
                    event,
                    last_unhealthy_at: now,
                    healthy_pulses: 0,
                });
                Some(Notice::Detected { event, corrected: false })
            }
            Phase::InProgress(episode) => {
                episode.healthy_pulses = 0;
                episode.last_unhealthy_at = now;
                if episode.event.kind.is_concrete() {
                    return None;
                }
                let kind = self
                    .strategy
                    .classify_stall(Interval::ending_at(now, timeout))
                    .filter(|kind| kind.is_concrete())?;
                episode.event.kind = kind;
                info!("hang {} reclassified as {kind}", episode.event.id);
                Some(Notice::Detected { event: episode.event, corrected: true })
            }
        }
    }

    /// The watchdog's pulse landed.
    pub(crate) fn on_finished(
        &mut self,
        iteration: RunLoopIteration,
        now: MonotonicInstant,
        gate: &dyn EnvironmentGate,
    ) -> Option<Notice> {
        self.stall = None;
        let config = self.config;

        match &mut self.phase {
            Phase::Idle => None,
            Phase::Armed => {
                if self.cooldown_until.is_some_and(|until| now < until) || !gates_open(gate) {
                    return None;
                }
                let delay = self.strategy.degraded_delay(Interval::ending_at(now, config.timeout_interval))?;
                let id = HangId::new();
                let event = HangEvent::detected(id, HangType::NonFullyBlocking, now.saturating_sub(delay));
                info!("{} hang {id} detected (non-fully-blocking), frame delay {delay:?}", self.strategy.name());
                self.phase = Phase::InProgress(Episode {
                    event,
                    last_unhealthy_at: now,
                    healthy_pulses: 0,
                });
                Some(Notice::Detected { event, corrected: false })
            }
            Phase::InProgress(episode) => {
                let fast = iteration.duration() < config.recovery_threshold;
                if fast && self.strategy.has_recovered(Interval::ending_at(now, config.recovery_window)) {
                    episode.healthy_pulses += 1;
                } else {
                    episode.healthy_pulses = 0;
                    episode.last_unhealthy_at = if fast { now } else { iteration.end_time() };
                }
                if episode.healthy_pulses < config.recovery_pulses {
                    return None;
                }

                let duration = self.strategy.measure(
                    episode.event.started_at,
                    episode.last_unhealthy_at,
                    now,
                );
                let event = episode.event.stopped(duration);
                info!("hang {} stopped after {duration}", event.id);
                self.phase = Phase::Armed;
                self.cooldown_until = Some(now.saturating_add(config.timeout_interval));
                Some(Notice::Stopped(event))
            }
        }
    }

    /// True when ticks of this stall must be ignored because the elapsed time
    /// jumped further than the watchdog can account for: its own thread was
    /// suspended, not the monitored one.
    fn is_suspended_stall(&mut self, id: HangId, elapsed: Duration) -> bool {
        let previous = match self.stall {
            Some(stall) if stall.id == id => {
                if stall.discarded {
                    return true;
                }
                stall.last_elapsed
            }
            _ => Duration::ZERO,
        };
        let discarded = elapsed.saturating_sub(previous) > self.config.suspension_gap();
        if discarded {
            warn!("watchdog was suspended for {:?}, ignoring stall {id}", elapsed.saturating_sub(previous));
        }
        self.stall = Some(Stall { id, last_elapsed: elapsed, discarded });
        discarded
    }
}

fn gates_open(gate: &dyn EnvironmentGate) -> bool {
    if !gate.is_app_foregrounded() {
        debug!("app in background, hang tick ignored");
        return false;
    }
    if gate.is_debugger_attached() {
        debug!("debugger attached, hang tick ignored");
        return false;
    }
    true
}
