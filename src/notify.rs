//! Completion notifications.
//!
//! The engine reports per-target results and the batch summary to a
//! [`Notifier`]. Notifiers are fire-and-forget: they never fail and never
//! block the caller.

use std::time::Duration;

use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::download::{TransferFailure, TransferStats};
use crate::progress::format_bytes;

/// Receiver for completion notifications.
pub trait Notifier: Send + Sync {
    /// One target finished.
    fn notify_complete(&self, target: &str, stats: &TransferStats);
    /// One target failed after all attempts.
    fn notify_error(&self, target: &str, failure: &TransferFailure);
    /// The whole batch finished.
    fn notify_batch_complete(&self, count: usize, total_bytes: u64, duration: Duration);
}

/// Ignores every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn notify_complete(&self, _target: &str, _stats: &TransferStats) {}
    fn notify_error(&self, _target: &str, _failure: &TransferFailure) {}
    fn notify_batch_complete(&self, _count: usize, _total_bytes: u64, _duration: Duration) {}
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify_complete(&self, target: &str, stats: &TransferStats) {
        info!(target = %target, path = %stats.path.display(), bytes = stats.bytes_transferred, "finished");
    }

    fn notify_error(&self, target: &str, failure: &TransferFailure) {
        warn!(target = %target, kind = %failure.kind, error = %failure.message, "failed");
    }

    fn notify_batch_complete(&self, count: usize, total_bytes: u64, duration: Duration) {
        info!(
            count,
            total_bytes,
            seconds = duration.as_secs_f64(),
            "batch finished"
        );
    }
}

/// Shows desktop notifications through `notify-send`.
///
/// Each notification spawns the program on the current Tokio runtime and
/// does not wait for it. Spawn failures and non-zero exits are logged at
/// debug level and otherwise ignored.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
    app_name: String,
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl DesktopNotifier {
    /// Uses `notify-send` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program("notify-send")
    }

    /// Uses a different notification program with the same arguments.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            app_name: "omnifetch".to_string(),
        }
    }

    fn send(&self, summary: String, body: String) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!("no runtime available, dropping desktop notification");
            return;
        };
        let program = self.program.clone();
        let app_name = self.app_name.clone();
        handle.spawn(async move {
            let status = Command::new(&program)
                .arg("--app-name")
                .arg(&app_name)
                .arg(&summary)
                .arg(&body)
                .stdin(std::process::Stdio::null())
                .stdout(std::process::Stdio::null())
                .stderr(std::process::Stdio::null())
                .status()
                .await;
            match status {
                Ok(status) if status.success() => {}
                Ok(status) => debug!(program = %program, %status, "notification program failed"),
                Err(e) => debug!(program = %program, error = %e, "notification program unavailable"),
            }
        });
    }
}

impl Notifier for DesktopNotifier {
    fn notify_complete(&self, target: &str, stats: &TransferStats) {
        let name = stats
            .path
            .file_name()
            .map_or_else(|| target.to_string(), |n| n.to_string_lossy().into_owned());
        self.send(
            "Download complete".to_string(),
            format!("{name} ({})", format_bytes(stats.bytes_transferred)),
        );
    }

    fn notify_error(&self, target: &str, failure: &TransferFailure) {
        self.send("Download failed".to_string(), format!("{target}: {failure}"));
    }

    fn notify_batch_complete(&self, count: usize, total_bytes: u64, duration: Duration) {
        self.send(
            "Batch finished".to_string(),
            format!(
                "{count} item(s), {} in {:.1}s",
                format_bytes(total_bytes),
                duration.as_secs_f64()
            ),
        );
    }
}
