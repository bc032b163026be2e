//! Hang report export
//!
//! [`HangReporter`] is a [`HangListener`] that turns each finished episode
//! into a [`HangReport`] and hands it to a [`HangSink`]. What happens next
//! (persistence, upload) belongs to the sink. [`JsonLinesSink`] writes one
//! JSON object per line.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, warn};
use serde::Serialize;

use crate::domain::{ExportError, HangDuration, HangEvent, HangId, HangType, MonotonicInstant};
use crate::tracking::HangListener;

/// One finished hang, ready for an event pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HangReport {
    pub id: HangId,
    pub kind: HangType,
    pub exception_type: &'static str,
    /// Nanoseconds on the tracker's monotonic clock.
    pub started_at: MonotonicInstant,
    pub min_duration_ms: u64,
    pub max_duration_ms: u64,
    pub message: String,
}

impl HangReport {
    /// Build a report from a stop notice. `None` for a detection notice.
    #[must_use]
    pub fn from_event(event: &HangEvent) -> Option<Self> {
        let duration = event.duration?;
        Some(Self {
            id: event.id,
            kind: event.kind,
            exception_type: event.kind.exception_type(),
            started_at: event.started_at,
            min_duration_ms: millis(duration.min),
            max_duration_ms: millis(duration.max),
            message: message(duration),
        })
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn message(duration: HangDuration) -> String {
    if duration.is_exact() {
        format!("App hanging for at least {} ms.", millis(duration.min))
    } else {
        format!(
            "App hanging between {:.1} and {:.1} seconds.",
            duration.min.as_secs_f64(),
            duration.max.as_secs_f64()
        )
    }
}

pub trait HangSink: Send + Sync {
    /// # Errors
    /// Returns the sink's I/O or encoding failure.
    fn capture(&self, report: &HangReport) -> Result<(), ExportError>;
}

/// Writes reports as newline-delimited JSON.
pub struct JsonLinesSink<W: Write + Send> {
    writer: Mutex<W>,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer: Mutex::new(writer) }
    }

    /// Inspect the underlying writer, e.g. an in-memory buffer.
    pub fn with_writer<R>(&self, f: impl FnOnce(&W) -> R) -> R {
        f(&self.lock())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock(&self) -> MutexGuard<'_, W> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl JsonLinesSink<BufWriter<File>> {
    /// Create (or truncate) `path`.
    ///
    /// # Errors
    /// Returns [`ExportError::Io`] if the file cannot be created.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, ExportError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write + Send> HangSink for JsonLinesSink<W> {
    fn capture(&self, report: &HangReport) -> Result<(), ExportError> {
        let mut writer = self.lock();
        serde_json::to_writer(&mut *writer, report)?;
        writer.write_all(b"\n")?;
        writer.flush()?;
        Ok(())
    }
}

/// Listener that reports finished hangs to a sink.
///
/// Only episodes detected while the reporter was running are reported.
/// Non-fully-blocking hangs can be opted out of.
pub struct HangReporter {
    sink: Arc<dyn HangSink>,
    report_non_fully_blocking: bool,
    paused: AtomicBool,
    pending: Mutex<Option<HangId>>,
    captured: AtomicU64,
}

impl HangReporter {
    #[must_use]
    pub fn new(sink: Arc<dyn HangSink>, report_non_fully_blocking: bool) -> Self {
        Self {
            sink,
            report_non_fully_blocking,
            paused: AtomicBool::new(false),
            pending: Mutex::new(None),
            captured: AtomicU64::new(0),
        }
    }

    /// Ignore hangs detected from now on until [`HangReporter::resume`].
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Reports successfully handed to the sink.
    #[must_use]
    pub fn captured(&self) -> u64 {
        self.captured.load(Ordering::Relaxed)
    }

    fn pending(&self) -> MutexGuard<'_, Option<HangId>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wants(&self, kind: HangType) -> bool {
        self.report_non_fully_blocking || kind != HangType::NonFullyBlocking
    }
}

impl HangListener for HangReporter {
    fn hang_detected(&self, event: &HangEvent) {
        let mut pending = self.pending();
        if self.is_paused() {
            debug!("reporter paused, not reporting {}", event.id);
            return;
        }
        // A correction may turn a wanted hang into an unwanted one.
        *pending = self.wants(event.kind).then_some(event.id);
    }

    fn hang_stopped(&self, event: &HangEvent) {
        if self.pending().take_if(|id| *id == event.id).is_none() {
            return;
        }
        let Some(report) = HangReport::from_event(event) else { return };
        match self.sink.capture(&report) {
            Ok(()) => {
                self.captured.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => warn!("failed to export hang report {}: {e}", report.id),
        }
    }
}
