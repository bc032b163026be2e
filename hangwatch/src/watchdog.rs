//! # Hang Watchdog
//!
//! Times round-trips of a trivial "pulse" through the monitored thread.
//!
//! ```text
//!   hang-watchdog thread                     monitored thread
//!   ────────────────────                     ────────────────
//!   wait pulse_interval (or stop)
//!   schedule pulse ─────────────────────────▶ queue
//!   select {                                   ...busy...
//!     done     ─▶ finished(iteration)  ◀────── pulse runs, sends now()
//!     stop     ─▶ exit
//!     timeout  ─▶ late(hang_id, elapsed), select again
//!   }
//! ```
//!
//! A stall produces one late tick per `pulse_timeout` until the pulse lands.
//! All ticks of one stall carry the same [`HangId`]; the id is retired when
//! the pulse completes. Waiting is an iterative loop, so a stall of any length
//! costs constant stack.
//!
//! Shutdown never blocks on the monitored thread: dropping the stop sender
//! wakes the `select!` immediately, and a pulse that runs after the watchdog
//! moved on sends into a channel nobody reads.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};

use crate::clock::Clock;
use crate::config::WatchdogConfig;
use crate::domain::{HangId, MonotonicInstant, RunLoopIteration, WatchdogError};
use crate::probe::MainThreadProbe;
use crate::registry::{ListenerHandle, ListenerRegistry};

/// `late(hang_id, elapsed_since_pulse_start)`
pub type LateObserver = dyn Fn(HangId, Duration) + Send + Sync;

/// `finished(iteration)`
pub type FinishedObserver = dyn Fn(RunLoopIteration) + Send + Sync;

const THREAD_NAME: &str = "hang-watchdog";

/// Snapshot of watchdog counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchdogStats {
    pub threads_started: u64,
    pub threads_exited: u64,
    pub pulses_sent: u64,
    pub pulses_completed: u64,
    pub late_ticks: u64,
}

impl WatchdogStats {
    /// Watchdog threads currently alive.
    #[must_use]
    pub fn threads_running(&self) -> u64 {
        self.threads_started.saturating_sub(self.threads_exited)
    }
}

#[derive(Default)]
struct Counters {
    threads_started: AtomicU64,
    threads_exited: AtomicU64,
    pulses_sent: AtomicU64,
    pulses_completed: AtomicU64,
    late_ticks: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WatchdogStats {
        WatchdogStats {
            threads_started: self.threads_started.load(Ordering::Acquire),
            threads_exited: self.threads_exited.load(Ordering::Acquire),
            pulses_sent: self.pulses_sent.load(Ordering::Relaxed),
            pulses_completed: self.pulses_completed.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
        }
    }
}

/// State shared with the background thread.
struct Core {
    config: WatchdogConfig,
    clock: Arc<dyn Clock>,
    probe: Arc<dyn MainThreadProbe>,
    late: ListenerRegistry<LateObserver>,
    finished: ListenerRegistry<FinishedObserver>,
    counters: Counters,
}

struct Worker {
    handle: JoinHandle<()>,
    stop_tx: Sender<()>,
    alive: Arc<AtomicBool>,
}

/// Pending join of a watchdog thread that was told to stop.
#[must_use = "the thread is only guaranteed gone after wait()"]
pub struct WatchdogJoin {
    handle: JoinHandle<()>,
}

impl WatchdogJoin {
    /// Block until the thread has exited.
    ///
    /// Called from the watchdog thread itself (a listener stopping tracking
    /// from inside its own callback) this returns immediately; the thread
    /// exits as soon as the callback returns.
    pub fn wait(self) {
        if self.handle.thread().id() == thread::current().id() {
            debug!("stop requested from the watchdog thread, not joining");
            return;
        }
        if self.handle.join().is_err() {
            warn!("watchdog thread panicked");
        }
    }
}

pub struct HangWatchdog {
    core: Arc<Core>,
    worker: Mutex<Option<Worker>>,
}

impl HangWatchdog {
    #[must_use]
    pub fn new(
        config: WatchdogConfig,
        clock: Arc<dyn Clock>,
        probe: Arc<dyn MainThreadProbe>,
    ) -> Self {
        let core = Core {
            config,
            clock,
            probe,
            late: ListenerRegistry::new(),
            finished: ListenerRegistry::new(),
            counters: Counters::default(),
        };
        Self { core: Arc::new(core), worker: Mutex::new(None) }
    }

    #[must_use]
    pub fn config(&self) -> &WatchdogConfig {
        &self.core.config
    }

    /// Start pulsing. No-op while a watchdog thread is already running.
    ///
    /// # Errors
    /// Returns [`WatchdogError::Spawn`] if the thread cannot be created.
    pub fn start(&self) -> Result<(), WatchdogError> {
        let mut slot = self.lock_worker();
        if let Some(worker) = slot.as_ref() {
            if worker.alive.load(Ordering::Acquire) && !worker.handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(stale) = slot.take() {
            stale.alive.store(false, Ordering::Release);
            drop(stale.stop_tx);
            WatchdogJoin { handle: stale.handle }.wait();
        }

        let (stop_tx, stop_rx) = bounded::<()>(0);
        let alive = Arc::new(AtomicBool::new(true));
        let core = Arc::clone(&self.core);
        let thread_alive = Arc::clone(&alive);
        let handle = thread::Builder::new()
            .name(THREAD_NAME.to_string())
            .spawn(move || run(&core, &thread_alive, &stop_rx))
            .map_err(WatchdogError::Spawn)?;

        *slot = Some(Worker { handle, stop_tx, alive });
        Ok(())
    }

    /// Tell the background thread to exit without waiting for it.
    ///
    /// Returns `None` if nothing was running.
    pub fn request_stop(&self) -> Option<WatchdogJoin> {
        let worker = self.lock_worker().take()?;
        worker.alive.store(false, Ordering::Release);
        drop(worker.stop_tx);
        Some(WatchdogJoin { handle: worker.handle })
    }

    /// Stop pulsing and wait for the background thread to exit.
    pub fn stop(&self) {
        if let Some(join) = self.request_stop() {
            join.wait();
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.lock_worker().as_ref().is_some_and(|w| !w.handle.is_finished())
    }

    pub fn add_late_observer(
        &self,
        observer: impl Fn(HangId, Duration) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let observer: Arc<LateObserver> = Arc::new(observer);
        self.core.late.add_owned(observer)
    }

    pub fn remove_late_observer(&self, handle: ListenerHandle) -> bool {
        self.core.late.remove(handle)
    }

    pub fn add_finished_observer(
        &self,
        observer: impl Fn(RunLoopIteration) + Send + Sync + 'static,
    ) -> ListenerHandle {
        let observer: Arc<FinishedObserver> = Arc::new(observer);
        self.core.finished.add_owned(observer)
    }

    pub fn remove_finished_observer(&self, handle: ListenerHandle) -> bool {
        self.core.finished.remove(handle)
    }

    #[must_use]
    pub fn stats(&self) -> WatchdogStats {
        self.core.counters.snapshot()
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for HangWatchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

// ============================================================================
// Background loop
// ============================================================================

enum PulseOutcome {
    Completed(MonotonicInstant),
    Dropped,
    TimedOut,
    Stopped,
}

struct ExitGuard<'a>(&'a Counters);

impl Drop for ExitGuard<'_> {
    fn drop(&mut self) {
        self.0.threads_exited.fetch_add(1, Ordering::AcqRel);
        debug!("watchdog thread exited");
    }
}

fn run(core: &Core, alive: &AtomicBool, stop_rx: &Receiver<()>) {
    core.counters.threads_started.fetch_add(1, Ordering::AcqRel);
    let _guard = ExitGuard(&core.counters);
    info!(
        "watchdog started (pulse timeout {:?}, interval {:?})",
        core.config.pulse_timeout, core.config.pulse_interval
    );

    while alive.load(Ordering::Acquire) {
        match stop_rx.recv_timeout(core.config.pulse_interval) {
            Err(RecvTimeoutError::Timeout) => {}
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
        if !alive.load(Ordering::Acquire) || !pulse(core, alive, stop_rx) {
            break;
        }
    }
}

/// One pulse round-trip. Returns false when the watchdog must exit.
fn pulse(core: &Core, alive: &AtomicBool, stop_rx: &Receiver<()>) -> bool {
    let (done_tx, done_rx) = bounded::<MonotonicInstant>(1);
    let started = core.clock.now();
    let clock = Arc::clone(&core.clock);
    core.probe.schedule_on_monitored_thread(Box::new(move || {
        // Capacity 1 and a single send: never blocks the monitored thread.
        let _ = done_tx.send(clock.now());
    }));
    core.counters.pulses_sent.fetch_add(1, Ordering::Relaxed);

    let mut hang_id: Option<HangId> = None;
    loop {
        let outcome = select! {
            recv(done_rx) -> msg => match msg {
                Ok(end) => PulseOutcome::Completed(end),
                Err(_) => PulseOutcome::Dropped,
            },
            recv(stop_rx) -> _ => PulseOutcome::Stopped,
            default(core.config.pulse_timeout) => PulseOutcome::TimedOut,
        };

        match outcome {
            PulseOutcome::TimedOut => {
                if !alive.load(Ordering::Acquire) {
                    return false;
                }
                let id = *hang_id.get_or_insert_with(|| {
                    let id = HangId::new();
                    debug!("pulse late, tracking stall {id}");
                    id
                });
                let elapsed = core.clock.now().saturating_duration_since(started);
                core.counters.late_ticks.fetch_add(1, Ordering::Relaxed);
                core.late.notify_all(|observer| observer(id, elapsed));
            }
            PulseOutcome::Completed(end) => {
                core.counters.pulses_completed.fetch_add(1, Ordering::Relaxed);
                let iteration = RunLoopIteration::new(started, end);
                core.finished.notify_all(|observer| observer(iteration));
                return true;
            }
            PulseOutcome::Dropped => {
                warn!("pulse was dropped by the monitored thread");
                return true;
            }
            PulseOutcome::Stopped => return false,
        }
    }
}
