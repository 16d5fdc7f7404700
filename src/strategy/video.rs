//! Video-hosting pages through `yt-dlp`.
//!
//! yt-dlp resolves the page, picks formats, and may download several
//! streams (video, audio) before merging them. Each `Destination:` line
//! opens a per-file progress stream.

use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Instant;

use async_trait::async_trait;
use regex::Regex;
use tracing::{debug, info, instrument};
use url::Url;

use super::external::{ClientCommand, ClientExit, parse_size, run_streaming};
use super::{Protocol, TransferContext, TransferStrategy, TransferTask};
use crate::download::{TransferError, TransferStats};
use crate::progress::TaskId;

/// Default yt-dlp binary.
const YT_DLP: &str = "yt-dlp";

/// Output template relative to the output directory.
const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Hosts served by the video strategy, matched exactly or as a parent domain.
const VIDEO_HOSTS: &[&str] = &[
    "youtube.com",
    "youtu.be",
    "vimeo.com",
    "dailymotion.com",
    "dai.ly",
    "twitch.tv",
    "soundcloud.com",
    "bilibili.com",
    "tiktok.com",
];

/// Stderr fragments that mean retrying cannot help.
const PERMANENT_MARKERS: &[&str] = &[
    "unsupported url",
    "video unavailable",
    "private video",
    "http error 404",
    "http error 403",
    "this video has been removed",
];

#[allow(clippy::expect_used)]
static DESTINATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\] Destination: (?P<path>.+)$")
        .expect("destination regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static PROGRESS_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\[download\]\s+(?P<pct>[\d.]+)% of\s+~?\s*(?P<size>[\d.]+)(?P<unit>[KMGT]?i?B)",
    )
    .expect("progress regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static ALREADY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[download\] (?P<path>.+) has already been downloaded")
        .expect("already-downloaded regex is valid") // Static pattern, safe to panic
});

#[allow(clippy::expect_used)]
static MERGER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[Merger\] Merging formats into "(?P<path>.+)"$"#)
        .expect("merger regex is valid") // Static pattern, safe to panic
});

/// Returns true for http(s) URLs on a known video-hosting site.
#[must_use]
pub fn is_video_host(target: &str) -> bool {
    let Ok(url) = Url::parse(target) else {
        return false;
    };
    if !matches!(url.scheme(), "http" | "https") {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    let host = host.to_ascii_lowercase();
    VIDEO_HOSTS.iter().any(|known| {
        host == *known
            || host
                .strip_suffix(known)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}

/// Transfers video pages with yt-dlp.
#[derive(Debug, Clone)]
pub struct VideoStrategy {
    program: String,
}

impl Default for VideoStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoStrategy {
    /// Uses `yt-dlp` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(YT_DLP)
    }

    /// Uses a specific yt-dlp binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, task: &TransferTask) -> ClientCommand {
        let options = &task.options;
        let mut command = ClientCommand::new(&self.program)
            .arg("--newline")
            .arg("--no-colors")
            .arg("--no-playlist")
            .arg("--socket-timeout")
            .arg(options.timeout.as_secs().max(1).to_string());
        if !options.resume {
            command = command.arg("--no-continue");
        }
        command
            .arg("-o")
            .arg(task.destination.join(OUTPUT_TEMPLATE).as_os_str())
            .arg("--")
            .arg(&task.target)
    }
}

#[async_trait]
impl TransferStrategy for VideoStrategy {
    fn protocol(&self) -> Protocol {
        Protocol::Video
    }

    fn can_handle(&self, target: &str) -> bool {
        is_video_host(target)
    }

    #[instrument(skip(self, task, ctx), fields(target = %task.target, task = %ctx.task_id()))]
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError> {
        let started = Instant::now();
        let command = self.command(task);

        let mut monitor = YtDlpMonitor::new(ctx);
        let exit = run_streaming(&command, |line| monitor.on_line(line)).await?;
        let succeeded = exit.success();
        let summary = monitor.finish(succeeded);

        if !succeeded {
            return Err(map_yt_dlp_exit(&task.target, &exit, command.program()));
        }

        let path = summary
            .merged
            .or_else(|| match summary.files.as_slice() {
                [single] => Some(single.clone()),
                _ => None,
            })
            .unwrap_or_else(|| task.destination.clone());
        info!(
            path = %path.display(),
            bytes = summary.bytes,
            files = summary.files.len(),
            "video transfer complete"
        );
        Ok(TransferStats::new(summary.bytes, started.elapsed(), path))
    }
}

/// The file yt-dlp is currently writing.
#[derive(Debug)]
struct CurrentFile {
    id: TaskId,
    done: u64,
    total: Option<u64>,
}

#[derive(Debug, Default)]
struct YtDlpSummary {
    bytes: u64,
    files: Vec<PathBuf>,
    merged: Option<PathBuf>,
}

/// Turns yt-dlp `--newline` output into aggregate and per-file progress.
struct YtDlpMonitor<'a> {
    ctx: &'a TransferContext,
    current: Option<CurrentFile>,
    opened: usize,
    finished_bytes: u64,
    files: Vec<PathBuf>,
    merged: Option<PathBuf>,
}

impl<'a> YtDlpMonitor<'a> {
    fn new(ctx: &'a TransferContext) -> Self {
        Self {
            ctx,
            current: None,
            opened: 0,
            finished_bytes: 0,
            files: Vec::new(),
            merged: None,
        }
    }

    fn on_line(&mut self, line: &str) {
        if let Some(caps) = PROGRESS_PATTERN.captures(line) {
            self.on_progress(&caps["pct"], &caps["size"], &caps["unit"]);
        } else if let Some(caps) = DESTINATION_PATTERN.captures(line) {
            let path = PathBuf::from(caps["path"].trim());
            self.open_file(path);
        } else if let Some(caps) = ALREADY_PATTERN.captures(line) {
            debug!(path = &caps["path"], "yt-dlp reports file already present");
            self.files.push(PathBuf::from(caps["path"].trim()));
        } else if let Some(caps) = MERGER_PATTERN.captures(line) {
            self.merged = Some(PathBuf::from(&caps["path"]));
        }
    }

    fn open_file(&mut self, path: PathBuf) {
        self.close_current(true);
        let name = path
            .file_name()
            .map_or_else(|| path.to_string_lossy(), |name| name.to_string_lossy())
            .into_owned();
        let id = self.ctx.start_file(self.opened, &name, None);
        self.opened += 1;
        self.files.push(path);
        self.current = Some(CurrentFile {
            id,
            done: 0,
            total: None,
        });
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn on_progress(&mut self, pct: &str, size: &str, unit: &str) {
        let (Ok(pct), Some(total)) = (pct.parse::<f64>(), parse_size(size, unit)) else {
            return;
        };
        let done = ((pct.clamp(0.0, 100.0) / 100.0) * total as f64).round() as u64;
        let Some(current) = self.current.as_mut() else {
            // Progress without a Destination line: report the aggregate only
            self.ctx.report(self.finished_bytes + done, Some(self.finished_bytes + total));
            return;
        };
        current.done = done;
        current.total = Some(total);
        self.ctx.report_file(&current.id, done, Some(total));
        self.ctx
            .report(self.finished_bytes + done, Some(self.finished_bytes + total));
    }

    fn close_current(&mut self, succeeded: bool) {
        if let Some(current) = self.current.take() {
            if succeeded {
                self.finished_bytes += current.total.unwrap_or(current.done);
                self.ctx.finish_file(&current.id);
            } else {
                self.finished_bytes += current.done;
                self.ctx.fail_file(&current.id, "yt-dlp failed");
            }
        }
    }

    fn finish(mut self, succeeded: bool) -> YtDlpSummary {
        self.close_current(succeeded);
        YtDlpSummary {
            bytes: self.finished_bytes,
            files: self.files,
            merged: self.merged,
        }
    }
}

/// Maps a failed yt-dlp exit to a transfer error.
///
/// yt-dlp exits 1 for nearly everything, so stderr decides: extractor
/// refusals and removed or private videos are permanent, timeouts map to
/// [`TransferError::Timeout`], the rest is transient. Exit 2 is a usage
/// error and also permanent.
fn map_yt_dlp_exit(target: &str, exit: &ClientExit, program: &str) -> TransferError {
    let message = exit.message(program);
    let lower = message.to_lowercase();
    if exit.code == Some(2) || PERMANENT_MARKERS.iter().any(|m| lower.contains(m)) {
        TransferError::protocol(target, message, true)
    } else if lower.contains("timed out") {
        TransferError::timeout(target)
    } else {
        TransferError::protocol(target, message, false)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::download::{ErrorKind, FailureType, classify_error};
    use crate::events::MemorySink;
    use crate::progress::ProgressTracker;
    use crate::strategy::TransferOptions;

    const VIDEO: &str = "https://www.youtube.com/watch?v=dQw4w9WgXcQ";

    fn context(tracker: &Arc<ProgressTracker>) -> TransferContext {
        let id = TaskId::new("b0-t0");
        tracker.start(&id, "video", None);
        TransferContext::new(Arc::clone(tracker), Arc::new(MemorySink::new()), id, VIDEO)
    }

    fn task(destination: PathBuf, resume: bool) -> TransferTask {
        TransferTask {
            index: 0,
            target: VIDEO.to_string(),
            protocol: Protocol::Video,
            destination,
            options: Arc::new(TransferOptions {
                resume,
                ..TransferOptions::default()
            }),
        }
    }

    #[test]
    fn test_is_video_host() {
        assert!(is_video_host(VIDEO));
        assert!(is_video_host("https://youtube.com/shorts/abc"));
        assert!(is_video_host("https://m.youtube.com/watch?v=1"));
        assert!(is_video_host("http://vimeo.com/123"));
        assert!(is_video_host("https://www.twitch.tv/videos/1"));
        assert!(!is_video_host("https://notyoutube.com/watch"));
        assert!(!is_video_host("https://example.com/video.mp4"));
        assert!(!is_video_host("ftp://youtube.com/a"));
        assert!(!is_video_host("youtube.com/watch?v=1"));
    }

    #[test]
    fn test_monitor_tracks_files_and_merge() {
        let tracker = Arc::new(ProgressTracker::silent());
        let ctx = context(&tracker);
        let mut monitor = YtDlpMonitor::new(&ctx);

        monitor.on_line("[youtube] dQw4w9WgXcQ: Downloading webpage");
        monitor.on_line("[download] Destination: /out/Song.f137.mp4");
        monitor.on_line("[download]  50.0% of ~ 10.00MiB at  1.00MiB/s ETA 00:05");
        assert_eq!(
            tracker.snapshot(&TaskId::new("b0-t0/0")).unwrap().bytes_transferred,
            5 * 1024 * 1024
        );
        monitor.on_line("[download] 100% of 10.00MiB in 00:10");
        monitor.on_line("[download] Destination: /out/Song.f140.m4a");
        monitor.on_line("[download] 100.0% of 2.00MiB at 1.00MiB/s ETA 00:00");
        monitor.on_line(r#"[Merger] Merging formats into "/out/Song.mkv""#);

        // First stream closed when the second opened
        assert!(tracker.snapshot(&TaskId::new("b0-t0/0")).is_none());
        assert_eq!(
            tracker.snapshot(ctx.task_id()).unwrap().bytes_transferred,
            12 * 1024 * 1024
        );

        let summary = monitor.finish(true);
        assert_eq!(summary.bytes, 12 * 1024 * 1024);
        assert_eq!(summary.files.len(), 2);
        assert_eq!(summary.merged, Some(PathBuf::from("/out/Song.mkv")));
    }

    #[test]
    fn test_monitor_already_downloaded() {
        let tracker = Arc::new(ProgressTracker::silent());
        let ctx = context(&tracker);
        let mut monitor = YtDlpMonitor::new(&ctx);
        monitor.on_line("[download] /out/Song.mp4 has already been downloaded");
        let summary = monitor.finish(true);
        assert_eq!(summary.bytes, 0);
        assert_eq!(summary.files, vec![PathBuf::from("/out/Song.mp4")]);
    }

    #[test]
    fn test_map_yt_dlp_exit() {
        let cases = [
            (1, "ERROR: [youtube] abc: Private video", ErrorKind::Protocol, FailureType::Permanent),
            (1, "ERROR: Unsupported URL: https://x", ErrorKind::Protocol, FailureType::Permanent),
            (1, "ERROR: unable to download: HTTP Error 404: Not Found", ErrorKind::Protocol, FailureType::Permanent),
            (2, "yt-dlp: error: no such option", ErrorKind::Protocol, FailureType::Permanent),
            (1, "ERROR: Read timed out.", ErrorKind::Timeout, FailureType::Transient),
            (1, "ERROR: HTTP Error 503", ErrorKind::Protocol, FailureType::Transient),
        ];
        for (code, stderr, kind, failure_type) in cases {
            let exit = ClientExit {
                code: Some(code),
                stderr_tail: stderr.to_string(),
            };
            let error = map_yt_dlp_exit(VIDEO, &exit, "yt-dlp");
            assert_eq!(error.kind(), kind, "{stderr}");
            assert_eq!(classify_error(&error), failure_type, "{stderr}");
        }
    }

    #[test]
    fn test_command_respects_resume() {
        let strategy = VideoStrategy::new();
        let with_resume = format!("{:?}", strategy.command(&task(PathBuf::from("/out"), true)));
        let without = format!("{:?}", strategy.command(&task(PathBuf::from("/out"), false)));
        assert!(!with_resume.contains("--no-continue"));
        assert!(without.contains("--no-continue"));
        assert!(with_resume.contains("%(title)s.%(ext)s"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_yt_dlp_run() {
        use crate::strategy::external::tests::fake_client;

        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_client(
            dir.path(),
            "yt-dlp",
            "echo '[download] Destination: /out/Clip.mp4'\n\
             echo '[download]  100.0% of 1.00KiB at 1.00KiB/s ETA 00:00'",
        );
        let tracker = Arc::new(ProgressTracker::silent());

        let stats = VideoStrategy::with_program(program)
            .attempt(&task(dir.path().to_path_buf(), true), &context(&tracker))
            .await
            .unwrap();

        assert_eq!(stats.bytes_transferred, 1024);
        assert_eq!(stats.path, PathBuf::from("/out/Clip.mp4"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_fake_yt_dlp_failure() {
        use crate::strategy::external::tests::fake_client;

        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_client(
            dir.path(),
            "yt-dlp",
            "echo 'ERROR: [youtube] abc: Video unavailable' >&2; exit 1",
        );
        let tracker = Arc::new(ProgressTracker::silent());

        let err = VideoStrategy::with_program(program)
            .attempt(&task(dir.path().to_path_buf(), true), &context(&tracker))
            .await
            .unwrap_err();
        assert_eq!(classify_error(&err), FailureType::Permanent);
        assert!(err.to_string().contains("Video unavailable"));
    }
}
