use dashmap::DashMap;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

use super::{ColorBand, ProgressSnapshot, TaskId};

/// Output side of the progress tracker.
///
/// Called from many tasks at once; implementations must not block.
pub trait ProgressRender: Send + Sync {
    /// A stream started.
    fn on_start(&self, id: &TaskId, filename: &str, total: Option<u64>);
    /// A throttled progress update.
    fn on_update(&self, snapshot: &ProgressSnapshot);
    /// The stream finished.
    fn on_complete(&self, id: &TaskId);
    /// The stream failed.
    fn on_error(&self, id: &TaskId, message: &str);
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullRenderer;

impl ProgressRender for NullRenderer {
    fn on_start(&self, _id: &TaskId, _filename: &str, _total: Option<u64>) {}
    fn on_update(&self, _snapshot: &ProgressSnapshot) {}
    fn on_complete(&self, _id: &TaskId) {}
    fn on_error(&self, _id: &TaskId, _message: &str) {}
}

/// One indicatif bar per stream inside a shared `MultiProgress`.
///
/// Bars with a known total are coloured by [`ColorBand`]; streams of
/// unknown size show a spinner with the byte count.
pub struct BarRenderer {
    multi: MultiProgress,
    bars: DashMap<TaskId, (ProgressBar, Option<ColorBand>)>,
}

impl std::fmt::Debug for BarRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BarRenderer")
            .field("bars", &self.bars.len())
            .finish_non_exhaustive()
    }
}

impl Default for BarRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl BarRenderer {
    /// Draws to stderr.
    #[must_use]
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    /// Draws nowhere; bars still track state.
    #[must_use]
    pub fn hidden() -> Self {
        Self::with_draw_target(ProgressDrawTarget::hidden())
    }

    fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: DashMap::new(),
        }
    }

    /// Number of bars not yet finished.
    #[must_use]
    pub fn active_bars(&self) -> usize {
        self.bars.len()
    }
}

fn bar_style(band: ColorBand) -> ProgressStyle {
    let template = format!(
        "{{prefix:.bold}} [{{bar:30.{}/white}}] {{bytes}}/{{total_bytes}} {{msg}}",
        band.color()
    );
    ProgressStyle::with_template(&template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner} {prefix:.bold} {bytes} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn prefix_for(id: &TaskId, filename: &str) -> String {
    if id.is_child() {
        format!("  -> {filename}")
    } else {
        filename.to_string()
    }
}

impl ProgressRender for BarRenderer {
    fn on_start(&self, id: &TaskId, filename: &str, total: Option<u64>) {
        if let Some((_, (old, _))) = self.bars.remove(id) {
            old.finish_and_clear();
            self.multi.remove(&old);
        }

        let (bar, band) = match total {
            Some(total) if total > 0 => {
                let bar = ProgressBar::new(total);
                bar.set_style(bar_style(ColorBand::Low));
                (bar, Some(ColorBand::Low))
            }
            _ => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(spinner_style());
                (bar, None)
            }
        };
        let bar = self.multi.add(bar);
        bar.set_prefix(prefix_for(id, filename));
        self.bars.insert(id.clone(), (bar, band));
    }

    fn on_update(&self, snapshot: &ProgressSnapshot) {
        let Some(mut entry) = self.bars.get_mut(&snapshot.id) else {
            return;
        };
        let (bar, band) = &mut *entry;

        if let Some(total) = snapshot.total_size {
            let next_band = snapshot.band();
            if *band != Some(next_band) {
                bar.set_style(bar_style(next_band));
                *band = Some(next_band);
            }
            bar.set_length(total);
        }
        bar.set_position(snapshot.bytes_transferred);

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let speed = format_bytes(snapshot.speed as u64);
        let message = match snapshot.eta {
            Some(eta) => format!("{speed}/s ETA {}s", eta.as_secs()),
            None => format!("{speed}/s"),
        };
        bar.set_message(message);
    }

    fn on_complete(&self, id: &TaskId) {
        if let Some((_, (bar, _))) = self.bars.remove(id) {
            bar.finish_with_message("done");
        }
    }

    fn on_error(&self, id: &TaskId, message: &str) {
        if let Some((_, (bar, _))) = self.bars.remove(id) {
            bar.abandon_with_message(format!("failed: {message}"));
        }
    }
}

/// Human-readable byte formatting.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
