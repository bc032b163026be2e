//! Host environment checks that gate hang reporting.
//!
//! Hangs are only reported while the app is in the foreground and no
//! debugger is attached; a paused debugger looks exactly like a hang.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

pub trait EnvironmentGate: Send + Sync {
    fn is_app_foregrounded(&self) -> bool;
    fn is_debugger_attached(&self) -> bool;
}

/// Gate with flags set by the host (or a test) at runtime.
#[derive(Debug)]
pub struct StaticGate {
    foregrounded: AtomicBool,
    debugger_attached: AtomicBool,
}

impl StaticGate {
    #[must_use]
    pub fn new(foregrounded: bool, debugger_attached: bool) -> Self {
        Self {
            foregrounded: AtomicBool::new(foregrounded),
            debugger_attached: AtomicBool::new(debugger_attached),
        }
    }

    pub fn set_foregrounded(&self, value: bool) {
        self.foregrounded.store(value, Ordering::Release);
    }

    pub fn set_debugger_attached(&self, value: bool) {
        self.debugger_attached.store(value, Ordering::Release);
    }
}

impl Default for StaticGate {
    /// Foregrounded, no debugger.
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl EnvironmentGate for StaticGate {
    fn is_app_foregrounded(&self) -> bool {
        self.foregrounded.load(Ordering::Acquire)
    }

    fn is_debugger_attached(&self) -> bool {
        self.debugger_attached.load(Ordering::Acquire)
    }
}

/// Linux gate: a process is being debugged when `/proc/self/status` reports a
/// non-zero `TracerPid`. A headless process is always "foregrounded".
#[derive(Debug, Clone)]
pub struct ProcStatusGate {
    status_path: PathBuf,
}

impl ProcStatusGate {
    #[must_use]
    pub fn new() -> Self {
        Self::with_status_path("/proc/self/status")
    }

    #[must_use]
    pub fn with_status_path(path: impl AsRef<Path>) -> Self {
        Self { status_path: path.as_ref().to_path_buf() }
    }
}

impl Default for ProcStatusGate {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentGate for ProcStatusGate {
    fn is_app_foregrounded(&self) -> bool {
        true
    }

    fn is_debugger_attached(&self) -> bool {
        // Unreadable status (non-Linux, sandbox) counts as no debugger.
        fs::read_to_string(&self.status_path)
            .ok()
            .and_then(|status| parse_tracer_pid(&status))
            .is_some_and(|pid| pid != 0)
    }
}

/// Extract `TracerPid` from the contents of a `/proc/<pid>/status` file.
#[must_use]
pub fn parse_tracer_pid(status: &str) -> Option<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("TracerPid:"))
        .and_then(|value| value.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const STATUS: &str = "Name:\tapp\nState:\tS (sleeping)\nTracerPid:\t4242\nUid:\t1000\n";

    #[test]
    fn test_parse_tracer_pid() {
        assert_eq!(parse_tracer_pid(STATUS), Some(4242));
        assert_eq!(parse_tracer_pid("TracerPid:\t0\n"), Some(0));
        assert_eq!(parse_tracer_pid("Name:\tapp\n"), None);
    }

    #[test]
    fn test_proc_status_gate_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(STATUS.as_bytes()).unwrap();

        let gate = ProcStatusGate::with_status_path(file.path());
        assert!(gate.is_debugger_attached());
        assert!(gate.is_app_foregrounded());
    }

    #[test]
    fn test_missing_status_file_means_no_debugger() {
        let gate = ProcStatusGate::with_status_path("/nonexistent/status");
        assert!(!gate.is_debugger_attached());
    }

    #[test]
    fn test_static_gate_flags() {
        let gate = StaticGate::default();
        assert!(gate.is_app_foregrounded());
        gate.set_foregrounded(false);
        gate.set_debugger_attached(true);
        assert!(!gate.is_app_foregrounded());
        assert!(gate.is_debugger_attached());
    }
}
