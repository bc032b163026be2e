//! Structured error types for hangwatch
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! Hang detection itself never fails at runtime; these only surface from
//! construction, thread spawning and report export.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum WatchdogError {
    #[error("Failed to spawn watchdog thread: {0}")]
    Spawn(#[source] std::io::Error),
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("recovery_pulses must be at least 1")]
    NoRecoveryPulses,

    #[error("Refresh rate must be positive and finite, got {0}")]
    InvalidRefreshRate(f64),
}

#[derive(Error, Debug)]
pub enum TrackerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Watchdog(#[from] WatchdogError),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
