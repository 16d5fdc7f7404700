use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::render::{NullRenderer, ProgressRender};
use super::{ProgressSnapshot, TaskId, eta, percent};

/// Default minimum time between two renders of the same stream.
pub const DEFAULT_RENDER_INTERVAL: Duration = Duration::from_millis(100);

/// Per-stream counters owned by the tracker.
#[derive(Debug, Clone)]
pub struct ProgressState {
    /// Display name.
    pub filename: String,
    /// Total size in bytes, 0 if unknown.
    pub total_size: u64,
    /// Bytes transferred so far.
    pub bytes_transferred: u64,
    /// When the last speed sample was taken.
    pub last_sample_at: Instant,
    /// Byte count at the last speed sample.
    pub last_sample_bytes: u64,
    /// Last computed speed in bytes per second.
    pub speed: f64,
    /// When the stream was last rendered, `None` before the first render.
    pub last_render_at: Option<Instant>,
    /// Highest percentage reported so far.
    pub last_percent: f64,
}

impl ProgressState {
    fn new(filename: String, total_size: u64, now: Instant) -> Self {
        Self {
            filename,
            total_size,
            bytes_transferred: 0,
            last_sample_at: now,
            last_sample_bytes: 0,
            speed: 0.0,
            last_render_at: None,
            last_percent: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample(&mut self, bytes: u64, now: Instant) {
        self.bytes_transferred = bytes;
        let elapsed = now.saturating_duration_since(self.last_sample_at);
        if elapsed.is_zero() {
            return;
        }
        let delta = bytes.saturating_sub(self.last_sample_bytes);
        self.speed = delta as f64 / elapsed.as_secs_f64();
        self.last_sample_at = now;
        self.last_sample_bytes = bytes;
    }

    fn snapshot(&mut self, id: &TaskId) -> ProgressSnapshot {
        self.last_percent = self
            .last_percent
            .max(percent(self.bytes_transferred, self.total_size));
        ProgressSnapshot {
            id: id.clone(),
            filename: self.filename.clone(),
            bytes_transferred: self.bytes_transferred,
            total_size: (self.total_size > 0).then_some(self.total_size),
            percent: self.last_percent,
            speed: self.speed,
            eta: eta(self.bytes_transferred, self.total_size, self.speed),
        }
    }
}

/// Tracks byte progress for every running transfer.
///
/// Shared across tasks behind an `Arc`; every method takes `&self`.
pub struct ProgressTracker {
    states: DashMap<TaskId, ProgressState>,
    renderer: Arc<dyn ProgressRender>,
    min_render_interval: Duration,
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("active", &self.states.len())
            .field("min_render_interval", &self.min_render_interval)
            .finish_non_exhaustive()
    }
}

impl ProgressTracker {
    /// Creates a tracker that renders through `renderer`.
    pub fn new(renderer: Arc<dyn ProgressRender>, min_render_interval: Duration) -> Self {
        Self {
            states: DashMap::new(),
            renderer,
            min_render_interval,
        }
    }

    /// Creates a tracker that keeps counters but renders nothing.
    #[must_use]
    pub fn silent() -> Self {
        Self::new(Arc::new(NullRenderer), DEFAULT_RENDER_INTERVAL)
    }

    /// Starts (or restarts) a stream.
    pub fn start(&self, id: &TaskId, filename: &str, total: Option<u64>) {
        let state = ProgressState::new(filename.to_string(), total.unwrap_or(0), Instant::now());
        self.states.insert(id.clone(), state);
        self.renderer.on_start(id, filename, total);
        trace!(task = %id, filename, ?total, "progress started");
    }

    /// Records that `bytes` have been transferred so far.
    ///
    /// Returns true if the update was rendered. The first update after
    /// [`start`](Self::start) always renders; later ones render at most once
    /// per render interval. Updates for unknown ids are ignored.
    pub fn update(&self, id: &TaskId, bytes: u64, total: Option<u64>) -> bool {
        match self.apply_update(id, bytes, total, Instant::now()) {
            Some(snapshot) => {
                self.renderer.on_update(&snapshot);
                true
            }
            None => false,
        }
    }

    /// Applies an update at `now` and returns the snapshot to render, if any.
    pub(crate) fn apply_update(
        &self,
        id: &TaskId,
        bytes: u64,
        total: Option<u64>,
        now: Instant,
    ) -> Option<ProgressSnapshot> {
        let Some(mut state) = self.states.get_mut(id) else {
            debug!(task = %id, "progress update for unknown task ignored");
            return None;
        };

        if let Some(total) = total {
            state.total_size = total;
        }
        state.sample(bytes, now);

        let due = state
            .last_render_at
            .is_none_or(|last| now.saturating_duration_since(last) >= self.min_render_interval);
        if !due {
            return None;
        }
        state.last_render_at = Some(now);
        Some(state.snapshot(id))
    }

    /// Ends a stream successfully and drops its state.
    pub fn complete(&self, id: &TaskId) {
        let removed = self.states.remove(id);
        if let Some((_, state)) = removed {
            trace!(task = %id, bytes = state.bytes_transferred, "progress complete");
        }
        self.renderer.on_complete(id);
    }

    /// Ends a stream with an error and drops its state.
    pub fn error(&self, id: &TaskId, message: &str) {
        self.states.remove(id);
        self.renderer.on_error(id, message);
    }

    /// Ends a stream and every per-file stream under it with an error.
    ///
    /// Used when a task dies without reaching its own terminal call.
    pub fn abandon(&self, id: &TaskId, message: &str) {
        let children: Vec<TaskId> = self
            .states
            .iter()
            .filter(|entry| entry.key().is_child_of(id))
            .map(|entry| entry.key().clone())
            .collect();
        for child in &children {
            self.error(child, message);
        }
        self.error(id, message);
    }

    /// Copy of a stream's current progress.
    #[must_use]
    pub fn snapshot(&self, id: &TaskId) -> Option<ProgressSnapshot> {
        self.states.get_mut(id).map(|mut state| state.snapshot(id))
    }

    /// Number of streams currently tracked.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.states.len()
    }
}
