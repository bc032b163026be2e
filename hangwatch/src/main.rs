//! # hangwatch - Demo Entry Point
//!
//! Runs a simulated UI thread (a task queue plus a display link rendering
//! frames on it), attaches a hang tracker, injects the configured stalls,
//! and prints what the tracker reports. Optionally exports hang reports as
//! JSON lines.

// Summary output converts durations for display
#![allow(clippy::cast_precision_loss)]

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use hangwatch::cli::{Args, Strategy};
use hangwatch::clock::{Clock, SystemClock};
use hangwatch::config::TrackerConfig;
use hangwatch::environment::StaticGate;
use hangwatch::export::{HangReporter, JsonLinesSink};
use hangwatch::frames::{DisplayLink, FrameTracker};
use hangwatch::probe::{MainThreadProbe, MonitoredThread};
use hangwatch::tracking::{AnrTracker, AnrTrackerV1, AnrTrackerV2, HangListener, TrackerDeps};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Frame history kept by the display link's tracker.
const FRAME_HISTORY: Duration = Duration::from_secs(30);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.chain().any(|cause| cause.is::<hangwatch::domain::ConfigError>()) {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Tracker for the chosen strategy, plus the display link feeding it frames.
fn build_tracker(
    strategy: Strategy,
    config: TrackerConfig,
    deps: TrackerDeps,
) -> Result<(Box<dyn AnrTracker>, Option<DisplayLink>)> {
    match strategy {
        Strategy::V1 => Ok((Box::new(AnrTrackerV1::v1(config, deps)?), None)),
        Strategy::V2 => {
            let frame_duration = config.watchdog.pulse_interval;
            let frames = Arc::new(FrameTracker::new(Arc::clone(&deps.clock), frame_duration, FRAME_HISTORY));
            let link = DisplayLink::start(Arc::clone(&frames), Arc::clone(&deps.probe))
                .context("Failed to start display link")?;
            let tracker = AnrTrackerV2::v2(config, deps, frames)?;
            Ok((Box::new(tracker), Some(link)))
        }
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;
    let config = args.tracker_config().context("Invalid configuration")?;

    if !quiet {
        println!("hangwatch v{}", env!("CARGO_PKG_VERSION"));
        println!("strategy: {:?}", args.strategy);
        println!(
            "timeout: {:?}, pulse timeout: {:?}",
            config.timeout_interval, config.watchdog.pulse_timeout
        );
    }

    let ui = Arc::new(MonitoredThread::spawn("ui-main").context("Failed to spawn UI thread")?);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock::new());
    let probe: Arc<dyn MainThreadProbe> = ui.clone();
    let deps = TrackerDeps { clock: Arc::clone(&clock), probe, gate: Arc::new(StaticGate::default()) };
    let (tracker, display_link) = build_tracker(args.strategy, config, deps)?;

    // Console listener
    let detected = Arc::new(AtomicU64::new(0));
    let stopped = Arc::new(AtomicU64::new(0));
    {
        let detected = Arc::clone(&detected);
        let stopped = Arc::clone(&stopped);
        let clock = Arc::clone(&clock);
        let console: Arc<dyn HangListener> = hangwatch::tracking::FnListener::new(
            move |kind| {
                detected.fetch_add(1, Ordering::Relaxed);
                if !quiet {
                    println!("[{}] hang detected: {kind}", clock.now());
                }
            },
            move |duration| {
                stopped.fetch_add(1, Ordering::Relaxed);
                if !quiet {
                    match duration {
                        Some(d) => println!("hang stopped after {d}"),
                        None => println!("hang stopped"),
                    }
                }
            },
        );
        tracker.add_owned_listener(console)?;
    }

    // Optional export
    let reporter = match &args.export {
        Some(path) => {
            let sink = JsonLinesSink::create(path)
                .with_context(|| format!("Failed to create export file {}", path.display()))?;
            let reporter: Arc<HangReporter> = Arc::new(HangReporter::new(Arc::new(sink), !args.skip_non_fully_blocking));
            let listener: Arc<dyn HangListener> = reporter.clone();
            tracker.add_listener(&listener)?;
            if !quiet {
                println!("export: {}", path.display());
            }
            Some((reporter, listener))
        }
        None => None,
    };

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit = if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };
    let gap = Duration::from_millis(args.gap);
    // Leave room after the last stall for recovery to be confirmed.
    let settle = config.timeout_interval * 2 + gap;

    let mut schedule = args.stall_durations().collect::<Vec<_>>().into_iter();
    let mut next_at = started + gap;
    let mut schedule_done_at: Option<Instant> = None;
    let mut exit_reason = "interrupted";

    loop {
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        let now = Instant::now();
        if schedule_done_at.is_none() && now >= next_at {
            if let Some(stall) = schedule.next() {
                info!("injecting {stall:?} stall on the UI thread");
                ui.run(move || thread::sleep(stall));
                next_at = now + stall + gap;
            } else {
                schedule_done_at = Some(now);
            }
        }
        if let Some(done_at) = schedule_done_at {
            if duration_limit.is_none() && now >= done_at + settle {
                exit_reason = "schedule complete";
                break;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(10)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    // Stop tracking before the UI thread goes away.
    let stats = tracker.watchdog_stats();
    tracker.clear();
    drop(display_link);

    if !quiet {
        eprintln!(
            "\n{}: {:.1}s, {} hangs detected, {} stopped",
            exit_reason,
            started.elapsed().as_secs_f64(),
            detected.load(Ordering::Relaxed),
            stopped.load(Ordering::Relaxed),
        );
        eprintln!("watchdog: {} pulses, {} late ticks", stats.pulses_completed, stats.late_ticks);
        if let Some((reporter, _)) = &reporter {
            eprintln!("exported {} hang reports", reporter.captured());
        }
    }

    Ok(())
}
