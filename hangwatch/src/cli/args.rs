//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{TrackerConfig, WatchdogConfig};
use crate::domain::ConfigError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Strategy {
    /// Pulse timing only; every hang is reported as unknown severity
    V1,
    /// Frame-aware; tells fully from non-fully blocking hangs
    V2,
}

#[derive(Parser, Debug)]
#[command(
    name = "hangwatch",
    about = "Simulate a UI thread, inject stalls, and report the hangs detected",
    after_help = "\
EXAMPLES:
    hangwatch                                  Default stall schedule, frame-aware tracker
    hangwatch --strategy v1 --stalls 300,2500  Pulse-only tracker, two stalls
    hangwatch --export hangs.jsonl             Also write hang reports as JSON lines"
)]
pub struct Args {
    /// Detection strategy
    #[arg(long, value_enum, default_value = "v2")]
    pub strategy: Strategy,

    /// Hang threshold in milliseconds
    #[arg(long, default_value = "250", value_name = "MS")]
    pub timeout: u64,

    /// Display refresh rate; derives pulse timing
    #[arg(long, default_value = "60")]
    pub fps: f64,

    /// Override the pulse timeout in milliseconds
    #[arg(long, value_name = "MS")]
    pub pulse_timeout: Option<u64>,

    /// Stalls to inject on the UI thread, in milliseconds
    #[arg(long, value_delimiter = ',', default_value = "120,600,1500", value_name = "MS,...")]
    pub stalls: Vec<u64>,

    /// Quiet time between stalls in milliseconds
    #[arg(long, default_value = "800", value_name = "MS")]
    pub gap: u64,

    /// Stop after N seconds (0 = when the schedule is done)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Write hang reports to file as JSON lines
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Do not report non-fully-blocking hangs to the export file
    #[arg(long, requires = "export")]
    pub skip_non_fully_blocking: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Tracker configuration described by these arguments.
    ///
    /// # Errors
    /// Returns the first invalid value.
    pub fn tracker_config(&self) -> Result<TrackerConfig, ConfigError> {
        let mut watchdog = WatchdogConfig::for_refresh_rate(self.fps)?;
        if let Some(ms) = self.pulse_timeout {
            watchdog.pulse_timeout = Duration::from_millis(ms);
        }
        let config = TrackerConfig::with_timeout(Duration::from_millis(self.timeout)).with_watchdog(watchdog);
        config.validate()?;
        Ok(config)
    }

    pub fn stall_durations(&self) -> impl Iterator<Item = Duration> + '_ {
        self.stalls.iter().copied().map(Duration::from_millis)
    }
}
