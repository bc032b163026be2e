use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use hangwatch::clock::{Clock, SystemClock};
use hangwatch::config::{TrackerConfig, WatchdogConfig};
use hangwatch::domain::HangEvent;
use hangwatch::environment::StaticGate;
use hangwatch::probe::MonitoredThread;
use hangwatch::registry::ListenerHandle;
use hangwatch::tracking::{AnrTracker, AnrTrackerV1, FnListener, HangListener, TrackerDeps, TrackerState};

fn tracker(ui: &Arc<MonitoredThread>) -> Arc<AnrTrackerV1> {
    let watchdog = WatchdogConfig {
        pulse_timeout: Duration::from_millis(25),
        pulse_interval: Duration::from_millis(2),
    };
    let config = TrackerConfig::with_timeout(Duration::from_millis(50)).with_watchdog(watchdog);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let deps = TrackerDeps { clock, probe: ui.clone(), gate: Arc::new(StaticGate::default()) };
    Arc::new(AnrTrackerV1::v1(config, deps).unwrap())
}

fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[derive(Default)]
struct Counting {
    detected: AtomicU64,
    stopped: AtomicU64,
}

impl HangListener for Counting {
    fn hang_detected(&self, _event: &HangEvent) {
        self.detected.fetch_add(1, Ordering::SeqCst);
    }

    fn hang_stopped(&self, _event: &HangEvent) {
        self.stopped.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_clear_right_after_start_never_reports() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);
    let counting = Arc::new(Counting::default());

    for _ in 0..10 {
        tracker.add_owned_listener(counting.clone()).unwrap();
        tracker.start().unwrap();
        tracker.clear();
        assert!(!tracker.is_watchdog_running());
        assert_eq!(tracker.state(), TrackerState::Idle);
    }
    ui.run(|| thread::sleep(Duration::from_millis(120)));
    thread::sleep(Duration::from_millis(200));

    let stats = tracker.watchdog_stats();
    assert_eq!(stats.threads_started, 10);
    assert_eq!(stats.threads_exited, 10);
    assert_eq!(counting.detected.load(Ordering::SeqCst), 0);
}

#[test]
fn test_removing_last_listener_mid_hang_stops_quietly() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);
    let counting = Arc::new(Counting::default());
    let handle = tracker.add_owned_listener(counting.clone()).unwrap();

    thread::sleep(Duration::from_millis(20));
    ui.run(|| thread::sleep(Duration::from_millis(400)));
    assert!(wait_for(Duration::from_secs(3), || counting.detected.load(Ordering::SeqCst) == 1));

    assert!(tracker.remove_listener(handle));
    assert!(!tracker.is_watchdog_running());
    assert_eq!(tracker.state(), TrackerState::Idle);

    thread::sleep(Duration::from_millis(500));
    assert_eq!(counting.stopped.load(Ordering::SeqCst), 0);
    assert!(!tracker.remove_listener(handle));
}

#[test]
fn test_listener_removing_itself_from_callback() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);

    let self_handle: Arc<OnceLock<ListenerHandle>> = Arc::new(OnceLock::new());
    let a_stopped = Arc::new(AtomicU64::new(0));
    let quitter = {
        let weak = Arc::downgrade(&tracker);
        let self_handle = Arc::clone(&self_handle);
        let a_stopped = Arc::clone(&a_stopped);
        FnListener::new(
            move |_| {
                if let (Some(tracker), Some(handle)) = (weak.upgrade(), self_handle.get()) {
                    assert!(tracker.remove_listener(*handle));
                }
            },
            move |_| {
                a_stopped.fetch_add(1, Ordering::SeqCst);
            },
        )
    };
    let handle = tracker.add_owned_listener(quitter).unwrap();
    self_handle.set(handle).unwrap();

    let steady = Arc::new(Counting::default());
    tracker.add_owned_listener(steady.clone()).unwrap();

    thread::sleep(Duration::from_millis(20));
    ui.run(|| thread::sleep(Duration::from_millis(120)));
    assert!(wait_for(Duration::from_secs(3), || steady.stopped.load(Ordering::SeqCst) == 1));

    assert_eq!(steady.detected.load(Ordering::SeqCst), 1);
    assert_eq!(a_stopped.load(Ordering::SeqCst), 0);
    assert_eq!(tracker.listener_count(), 1);
    tracker.clear();
}

#[test]
fn test_clear_from_detection_callback() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);
    let stopped = Arc::new(AtomicU64::new(0));
    let cleared = Arc::new(AtomicU64::new(0));

    let clearing = {
        let weak = Arc::downgrade(&tracker);
        let stopped = Arc::clone(&stopped);
        let cleared = Arc::clone(&cleared);
        FnListener::new(
            move |_| {
                if let Some(tracker) = weak.upgrade() {
                    tracker.clear();
                    cleared.fetch_add(1, Ordering::SeqCst);
                }
            },
            move |_| {
                stopped.fetch_add(1, Ordering::SeqCst);
            },
        )
    };
    tracker.add_owned_listener(clearing).unwrap();

    thread::sleep(Duration::from_millis(20));
    ui.run(|| thread::sleep(Duration::from_millis(150)));
    assert!(wait_for(Duration::from_secs(3), || cleared.load(Ordering::SeqCst) == 1));

    assert!(wait_for(Duration::from_secs(3), || tracker.watchdog_stats().threads_running() == 0));
    assert!(!tracker.is_watchdog_running());
    assert_eq!(tracker.listener_count(), 0);
    assert_eq!(tracker.state(), TrackerState::Idle);

    thread::sleep(Duration::from_millis(300));
    assert_eq!(stopped.load(Ordering::SeqCst), 0);
}

#[test]
fn test_dropped_weak_listener_stops_watchdog() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);

    let listener: Arc<dyn HangListener> = Arc::new(Counting::default());
    tracker.add_listener(&listener).unwrap();
    assert!(tracker.is_watchdog_running());

    drop(listener);
    assert!(wait_for(Duration::from_secs(3), || !tracker.is_watchdog_running()));
    assert!(wait_for(Duration::from_secs(3), || tracker.watchdog_stats().threads_running() == 0));
    assert_eq!(tracker.listener_count(), 0);
}

#[test]
fn test_concurrent_add_remove_during_hangs() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let tracker = tracker(&ui);
    let handles = Arc::new(Mutex::new(Vec::new()));

    let stalls = {
        let ui = Arc::clone(&ui);
        thread::spawn(move || {
            for _ in 0..3 {
                ui.run(|| thread::sleep(Duration::from_millis(80)));
                thread::sleep(Duration::from_millis(60));
            }
        })
    };

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let tracker = Arc::clone(&tracker);
            let handles = Arc::clone(&handles);
            thread::spawn(move || {
                for i in 0..25 {
                    let handle = tracker.add_owned_listener(Arc::new(Counting::default())).unwrap();
                    handles.lock().unwrap().push(handle);
                    thread::sleep(Duration::from_millis(3));
                    if i % 2 == 1 {
                        let handle = handles.lock().unwrap().pop();
                        if let Some(handle) = handle {
                            assert!(tracker.remove_listener(handle));
                        }
                    }
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }
    stalls.join().unwrap();

    let remaining: Vec<ListenerHandle> = handles.lock().unwrap().drain(..).collect();
    assert_eq!(tracker.listener_count(), remaining.len());
    for handle in remaining {
        assert!(tracker.remove_listener(handle));
    }

    assert_eq!(tracker.listener_count(), 0);
    assert_eq!(tracker.state(), TrackerState::Idle);
    assert!(wait_for(Duration::from_secs(3), || !tracker.is_watchdog_running()));
    assert!(wait_for(Duration::from_secs(3), || tracker.watchdog_stats().threads_running() == 0));
}
