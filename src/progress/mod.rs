//! Per-transfer progress tracking.
//!
//! The [`ProgressTracker`] keeps one [`ProgressState`] per running transfer,
//! derives speed, ETA, and percentage from raw byte counts, and forwards
//! throttled snapshots to a [`ProgressRender`] implementation. Byte
//! accounting is never throttled; only rendering is.

mod render;
mod tracker;

use std::fmt;
use std::time::Duration;

pub use render::{BarRenderer, NullRenderer, ProgressRender, format_bytes};
pub use tracker::{DEFAULT_RENDER_INTERVAL, ProgressState, ProgressTracker};

/// Identifies one progress stream.
///
/// Batch tasks use `b<batch>-t<index>`; per-file streams of a multi-file
/// transfer are children of the task id (`b1-t0/2`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(String);

impl TaskId {
    /// Creates an id from any string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id of the task at `index` within batch `batch`.
    #[must_use]
    pub fn for_task(batch: u64, index: usize) -> Self {
        Self(format!("b{batch}-t{index}"))
    }

    /// Id of the `n`-th per-file stream under this task.
    #[must_use]
    pub fn child(&self, n: usize) -> Self {
        Self(format!("{}/{n}", self.0))
    }

    /// Returns true if this id is a per-file stream of another task.
    #[must_use]
    pub fn is_child(&self) -> bool {
        self.0.contains('/')
    }

    /// Returns true if this id is a per-file stream of `parent`.
    #[must_use]
    pub fn is_child_of(&self, parent: &TaskId) -> bool {
        self.0
            .strip_prefix(parent.as_str())
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// Borrowed string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Display colour bucket for a completion percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorBand {
    /// 0 to 49 percent.
    Low,
    /// 50 to 99 percent.
    Mid,
    /// Complete.
    Done,
}

impl ColorBand {
    /// Maps a percentage to its band.
    #[must_use]
    pub fn for_percent(percent: f64) -> Self {
        if percent >= 100.0 {
            Self::Done
        } else if percent >= 50.0 {
            Self::Mid
        } else {
            Self::Low
        }
    }

    /// indicatif colour name for the bar.
    #[must_use]
    pub fn color(self) -> &'static str {
        match self {
            Self::Low => "red",
            Self::Mid => "yellow",
            Self::Done => "green",
        }
    }
}

/// Point-in-time view of one progress stream.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    /// Stream id.
    pub id: TaskId,
    /// Display name.
    pub filename: String,
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// Total size, `None` while unknown.
    pub total_size: Option<u64>,
    /// Completion percentage, 0 while the total is unknown, never above 100.
    pub percent: f64,
    /// Instantaneous speed in bytes per second.
    pub speed: f64,
    /// Estimated time remaining, when both total and speed are known.
    pub eta: Option<Duration>,
}

impl ProgressSnapshot {
    /// Colour band for the snapshot's percentage.
    #[must_use]
    pub fn band(&self) -> ColorBand {
        ColorBand::for_percent(self.percent)
    }
}

/// Completion percentage, clamped to 100 and 0 when `total` is unknown.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn percent(bytes: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (bytes as f64 / total as f64 * 100.0).min(100.0)
}

/// Remaining time at `speed` bytes per second.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn eta(bytes: u64, total: u64, speed: f64) -> Option<Duration> {
    if total == 0 || speed <= 0.0 || !speed.is_finite() {
        return None;
    }
    let remaining = total.saturating_sub(bytes) as f64;
    // Announced totals can be large enough to overflow a Duration
    Duration::try_from_secs_f64(remaining / speed).ok()
}
