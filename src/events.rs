//! Structured transfer events for the logging collaborator.
//!
//! The engine, retry loop and strategies report lifecycle milestones as
//! [`TransferEvent`]s through an [`EventSink`]. The default [`TracingSink`]
//! forwards them to `tracing`; [`MemorySink`] records them for inspection.
//! Sinks are infallible so logging can never abort a transfer.

use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use tracing::{debug, info, warn};

use crate::download::TransferStats;

/// A lifecycle event emitted while a batch runs.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferEvent {
    /// A transfer attempt is about to begin.
    DownloadStart {
        /// Target being fetched.
        target: String,
        /// Planned destination.
        destination: PathBuf,
    },
    /// Periodic byte-count update (throttled like the progress display).
    DownloadProgress {
        /// Target being fetched.
        target: String,
        /// Bytes transferred so far.
        bytes: u64,
        /// Total size when known.
        total: Option<u64>,
    },
    /// The target finished successfully.
    DownloadComplete {
        /// Target that finished.
        target: String,
        /// Transfer statistics.
        stats: TransferStats,
    },
    /// The target failed after all attempts.
    DownloadError {
        /// Target that failed.
        target: String,
        /// Error description.
        error: String,
    },
    /// An attempt failed and will be retried after `delay_ms`.
    RetryAttempt {
        /// Target being retried.
        target: String,
        /// The attempt that just failed (1-indexed).
        attempt_number: u32,
        /// Backoff before the next attempt.
        delay_ms: u64,
    },
}

impl TransferEvent {
    /// Stable event name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::DownloadStart { .. } => "download_start",
            Self::DownloadProgress { .. } => "download_progress",
            Self::DownloadComplete { .. } => "download_complete",
            Self::DownloadError { .. } => "download_error",
            Self::RetryAttempt { .. } => "retry_attempt",
        }
    }

    /// Target the event refers to.
    #[must_use]
    pub fn target(&self) -> &str {
        match self {
            Self::DownloadStart { target, .. }
            | Self::DownloadProgress { target, .. }
            | Self::DownloadComplete { target, .. }
            | Self::DownloadError { target, .. }
            | Self::RetryAttempt { target, .. } => target,
        }
    }
}

/// Receiver for transfer events.
pub trait EventSink: Send + Sync {
    /// Records one event. Must not panic or block for long.
    fn emit(&self, event: TransferEvent);
}

/// Forwards events to `tracing` with structured fields.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: TransferEvent) {
        let name = event.name();
        match event {
            TransferEvent::DownloadStart {
                target,
                destination,
            } => {
                info!(event = name, target = %target, destination = %destination.display(), "download started");
            }
            TransferEvent::DownloadProgress {
                target,
                bytes,
                total,
            } => {
                debug!(event = name, target = %target, bytes, total = ?total, "download progress");
            }
            TransferEvent::DownloadComplete { target, stats } => {
                info!(
                    event = name,
                    target = %target,
                    bytes = stats.bytes_transferred,
                    duration_ms = stats.duration.as_millis(),
                    speed_bps = stats.average_speed as u64,
                    resumed = stats.resumed,
                    already_present = stats.already_present,
                    path = %stats.path.display(),
                    "download complete"
                );
            }
            TransferEvent::DownloadError { target, error } => {
                warn!(event = name, target = %target, error = %error, "download failed");
            }
            TransferEvent::RetryAttempt {
                target,
                attempt_number,
                delay_ms,
            } => {
                info!(event = name, target = %target, attempt_number, delay_ms, "retrying download");
            }
        }
    }
}

/// Collects events in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<TransferEvent>>,
}

impl MemorySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every event recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TransferEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns the recorded events with the given name.
    #[must_use]
    pub fn named(&self, name: &str) -> Vec<TransferEvent> {
        self.events()
            .into_iter()
            .filter(|event| event.name() == name)
            .collect()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: TransferEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
