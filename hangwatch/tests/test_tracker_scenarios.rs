use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use hangwatch::clock::{Clock, SystemClock};
use hangwatch::config::{TrackerConfig, WatchdogConfig};
use hangwatch::domain::{HangDuration, HangType};
use hangwatch::environment::StaticGate;
use hangwatch::frames::{DisplayLink, FrameTracker};
use hangwatch::probe::MonitoredThread;
use hangwatch::tracking::{
    AnrTracker, AnrTrackerV1, AnrTrackerV2, DetectionStrategy, Tracker, TrackerDeps, TrackerState,
};

#[derive(Debug, Clone, Copy, PartialEq)]
enum Seen {
    Detected(HangType),
    Stopped(Option<HangDuration>),
}

fn config() -> TrackerConfig {
    let watchdog = WatchdogConfig {
        pulse_timeout: Duration::from_millis(25),
        pulse_interval: Duration::from_millis(2),
    };
    TrackerConfig::with_timeout(Duration::from_millis(50)).with_watchdog(watchdog)
}

fn deps(ui: &Arc<MonitoredThread>, clock: &Arc<dyn Clock>) -> TrackerDeps {
    TrackerDeps { clock: Arc::clone(clock), probe: ui.clone(), gate: Arc::new(StaticGate::default()) }
}

fn record<S: DetectionStrategy>(tracker: &Tracker<S>) -> Arc<Mutex<Vec<Seen>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let on_detected = Arc::clone(&seen);
    let on_stopped = Arc::clone(&seen);
    tracker
        .add_callbacks(
            move |kind| on_detected.lock().unwrap().push(Seen::Detected(kind)),
            move |duration| on_stopped.lock().unwrap().push(Seen::Stopped(duration)),
        )
        .unwrap();
    seen
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

#[test]
fn test_pulse_tracker_reports_one_block_once() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let tracker = AnrTrackerV1::v1(config(), deps(&ui, &clock)).unwrap();
    let seen = record(&tracker);

    thread::sleep(Duration::from_millis(50));
    ui.run(|| thread::sleep(Duration::from_millis(130)));

    assert!(wait_for(Duration::from_secs(3), || seen.lock().unwrap().len() >= 2));
    thread::sleep(Duration::from_millis(100));
    tracker.clear();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 2, "{seen:?}");
    assert_eq!(seen[0], Seen::Detected(HangType::Unknown));
    let Seen::Stopped(Some(duration)) = seen[1] else { panic!("expected stop, got {seen:?}") };
    assert!(duration.is_exact());
    assert!(duration.min >= Duration::from_millis(90), "{duration}");
    assert!(duration.min <= Duration::from_millis(400), "{duration}");
}

#[test]
fn test_frame_tracker_reports_fully_blocking() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let frames = Arc::new(FrameTracker::new(Arc::clone(&clock), Duration::from_millis(16), Duration::from_secs(5)));
    let link = DisplayLink::start(Arc::clone(&frames), ui.clone()).unwrap();
    let tracker = AnrTrackerV2::v2(config(), deps(&ui, &clock), frames).unwrap();
    let seen = record(&tracker);

    thread::sleep(Duration::from_millis(100));
    ui.run(|| thread::sleep(Duration::from_millis(200)));

    assert!(wait_for(Duration::from_secs(3), || seen.lock().unwrap().len() >= 2));
    tracker.clear();
    drop(link);

    let seen = seen.lock().unwrap();
    assert_eq!(seen[0], Seen::Detected(HangType::FullyBlocking), "{seen:?}");
    let Seen::Stopped(Some(duration)) = seen[1] else { panic!("expected stop, got {seen:?}") };
    assert!(duration.min >= Duration::from_millis(140), "{duration}");
    assert!(duration.max <= Duration::from_millis(800), "{duration}");
    assert!(duration.max >= duration.min);
}

#[test]
fn test_short_blocks_never_detected() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let mut config = config();
    config.watchdog.pulse_interval = Duration::from_millis(1);
    let tracker = AnrTrackerV1::v1(config, deps(&ui, &clock)).unwrap();
    let seen = record(&tracker);

    let deadline = Instant::now() + Duration::from_secs(30);
    while tracker.watchdog_stats().pulses_completed < 1000 && Instant::now() < deadline {
        ui.run(|| thread::sleep(Duration::from_millis(8)));
        thread::sleep(Duration::from_millis(12));
    }
    tracker.clear();

    assert!(tracker.watchdog_stats().pulses_completed >= 1000);
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn test_background_app_is_not_reported() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let gate = Arc::new(StaticGate::new(false, false));
    let deps = TrackerDeps { clock, probe: ui.clone(), gate: gate.clone() };
    let tracker = AnrTrackerV1::v1(config(), deps).unwrap();
    let seen = record(&tracker);

    ui.run(|| thread::sleep(Duration::from_millis(150)));
    thread::sleep(Duration::from_millis(300));
    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(tracker.state(), TrackerState::Armed);

    gate.set_foregrounded(true);
    ui.run(|| thread::sleep(Duration::from_millis(150)));
    assert!(wait_for(Duration::from_secs(3), || seen.lock().unwrap().len() >= 2));
    tracker.clear();
}

#[test]
fn test_each_listener_hears_each_stall_once() {
    let ui = Arc::new(MonitoredThread::spawn("ui").unwrap());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let tracker = AnrTrackerV1::v1(config(), deps(&ui, &clock)).unwrap();

    let counters: Vec<(Arc<AtomicU64>, Arc<AtomicU64>)> = (0..3)
        .map(|_| {
            let detected = Arc::new(AtomicU64::new(0));
            let stopped = Arc::new(AtomicU64::new(0));
            let (d, s) = (Arc::clone(&detected), Arc::clone(&stopped));
            tracker
                .add_callbacks(
                    move |_| {
                        d.fetch_add(1, Ordering::SeqCst);
                    },
                    move |_| {
                        s.fetch_add(1, Ordering::SeqCst);
                    },
                )
                .unwrap();
            (detected, stopped)
        })
        .collect();

    for _ in 0..2 {
        thread::sleep(Duration::from_millis(100));
        ui.run(|| thread::sleep(Duration::from_millis(120)));
        let stopped = &counters[0].1;
        let target = stopped.load(Ordering::SeqCst) + 1;
        assert!(wait_for(Duration::from_secs(3), || stopped.load(Ordering::SeqCst) >= target));
    }
    tracker.clear();

    for (detected, stopped) in &counters {
        assert_eq!(detected.load(Ordering::SeqCst), 2);
        assert_eq!(stopped.load(Ordering::SeqCst), 2);
    }
}
