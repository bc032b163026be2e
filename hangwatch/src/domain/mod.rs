//! Domain model for hangwatch
//!
//! This module contains the core domain types and errors:
//! - Value types shared with event consumers (re-exported from `hangwatch-common`)
//! - Structured error handling

pub mod errors;

// Re-export common types for convenience
pub use hangwatch_common::{
    HangDuration, HangEvent, HangId, HangType, MonotonicInstant, RunLoopIteration,
};

pub use errors::{ConfigError, ExportError, TrackerError, WatchdogError};
