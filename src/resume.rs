//! Resume markers for partially written HTTP downloads.
//!
//! A marker lives next to its destination as `<destination>.resume` and
//! records how many bytes of the target are already on disk. The HTTP
//! strategy reads it before a transfer to decide whether to send a
//! `Range` request, refreshes it while streaming, and deletes it once the
//! file is complete.
//!
//! Marker persistence is best-effort: a failed write is logged and resume
//! is disabled for the rest of that attempt, but the transfer continues.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// File extension appended to the destination path.
pub const MARKER_EXTENSION: &str = "resume";

/// Minimum time between two marker writes for the same destination.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(1);

/// Errors produced by marker persistence.
#[derive(Debug, Error)]
pub enum ResumeError {
    /// I/O error reading or writing the marker file.
    #[error("I/O error on resume marker {path}: {source}")]
    Io {
        /// Marker path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// JSON serialization error (shouldn't occur for well-formed markers).
    #[error("JSON serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Persistent record of a partially written destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeMarker {
    /// Target the bytes were fetched from.
    pub target: String,
    /// Total size announced by the server, 0 if unknown.
    pub total_size: u64,
    /// Bytes written to the destination so far.
    pub bytes_downloaded: u64,
    /// Unix seconds when the transfer first started.
    pub created_at: u64,
    /// Unix seconds of the last marker update.
    pub last_modified_at: u64,
}

impl ResumeMarker {
    /// Creates a marker stamped with the current time.
    #[must_use]
    pub fn new(target: impl Into<String>, total_size: u64, bytes_downloaded: u64) -> Self {
        let now = unix_now();
        Self {
            target: target.into(),
            total_size,
            bytes_downloaded,
            created_at: now,
            last_modified_at: now,
        }
    }

    /// Updates the byte count and modification time.
    pub fn touch(&mut self, bytes_downloaded: u64) {
        self.bytes_downloaded = bytes_downloaded;
        self.last_modified_at = unix_now();
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Returns the marker path for a destination: `<destination>.resume`.
#[must_use]
pub fn marker_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_os_string();
    name.push(".");
    name.push(MARKER_EXTENSION);
    PathBuf::from(name)
}

/// Reads, writes, and clears resume markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResumeStore;

impl ResumeStore {
    /// Creates a store.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Reads the marker for `destination`.
    ///
    /// A missing, unreadable, or corrupt marker is reported as `None`.
    #[instrument(level = "debug", skip(self), fields(destination = %destination.display()))]
    pub async fn read(&self, destination: &Path) -> Option<ResumeMarker> {
        let path = marker_path(destination);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read resume marker");
                return None;
            }
        };

        match serde_json::from_slice::<ResumeMarker>(&contents) {
            Ok(marker) => Some(marker),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring corrupt resume marker");
                None
            }
        }
    }

    /// Writes the marker atomically (temp file then rename).
    ///
    /// # Errors
    ///
    /// Returns [`ResumeError`] if the marker cannot be serialized or written.
    pub async fn write(&self, destination: &Path, marker: &ResumeMarker) -> Result<(), ResumeError> {
        let path = marker_path(destination);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        let json = serde_json::to_vec(marker)?;
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|source| ResumeError::Io {
                path: tmp.clone(),
                source,
            })?;
        if let Err(source) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(ResumeError::Io { path, source });
        }

        debug!(
            path = %path.display(),
            bytes = marker.bytes_downloaded,
            "resume marker written"
        );
        Ok(())
    }

    /// Deletes the marker. A marker that does not exist is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`ResumeError::Io`] if the file exists but cannot be removed.
    pub async fn clear(&self, destination: &Path) -> Result<(), ResumeError> {
        let path = marker_path(destination);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ResumeError::Io { path, source }),
        }
    }
}

/// Throttled marker writer for one transfer attempt.
///
/// Calls to [`record`](Self::record) persist at most once per
/// [`CHECKPOINT_INTERVAL`]. The first persistence failure disables the
/// checkpointer for the rest of the attempt.
#[derive(Debug)]
pub struct Checkpointer {
    store: ResumeStore,
    destination: PathBuf,
    marker: ResumeMarker,
    last_write: Option<Instant>,
    interval: Duration,
    enabled: bool,
}

impl Checkpointer {
    /// Creates a checkpointer that continues `marker` for `destination`.
    #[must_use]
    pub fn new(store: ResumeStore, destination: impl Into<PathBuf>, marker: ResumeMarker) -> Self {
        Self {
            store,
            destination: destination.into(),
            marker,
            last_write: None,
            interval: CHECKPOINT_INTERVAL,
            enabled: true,
        }
    }

    /// Creates a checkpointer that never writes.
    #[must_use]
    pub fn disabled(destination: impl Into<PathBuf>) -> Self {
        let destination = destination.into();
        Self {
            store: ResumeStore,
            marker: ResumeMarker::new(String::new(), 0, 0),
            destination,
            last_write: None,
            interval: CHECKPOINT_INTERVAL,
            enabled: false,
        }
    }

    /// Overrides the write interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Whether marker writes are still enabled.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Records progress, writing the marker if the interval has elapsed.
    pub async fn record(&mut self, bytes_downloaded: u64) {
        if !self.enabled {
            return;
        }
        let now = Instant::now();
        if self
            .last_write
            .is_some_and(|last| now.duration_since(last) < self.interval)
        {
            return;
        }
        self.marker.touch(bytes_downloaded);
        self.last_write = Some(now);
        if let Err(error) = self.store.write(&self.destination, &self.marker).await {
            warn!(
                destination = %self.destination.display(),
                error = %error,
                "failed to persist resume marker, disabling resume for this attempt"
            );
            self.enabled = false;
        }
    }

    /// Writes the marker now, ignoring the interval.
    ///
    /// Used when an attempt fails so the marker matches the flushed file.
    pub async fn persist(&mut self, bytes_downloaded: u64) {
        if !self.enabled {
            return;
        }
        self.last_write = None;
        self.record(bytes_downloaded).await;
    }

    /// Deletes the marker after a successful transfer.
    pub async fn finish(self) {
        if let Err(error) = self.store.clear(&self.destination).await {
            warn!(
                destination = %self.destination.display(),
                error = %error,
                "failed to remove resume marker"
            );
        }
    }
}
