//! BitTorrent magnet links through `aria2c`.
//!
//! aria2c handles peer discovery and piece exchange. This strategy only
//! builds the command line, turns the periodic `[#gid done/total(pct%)]`
//! readouts into progress, and maps aria2c's exit codes onto transfer
//! errors.

use std::collections::VecDeque;
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

/// Default aria2c binary.
const ARIA2C: &str = "aria2c";

/// Error lines kept from aria2c's console output.
const ERROR_TAIL_LINES: usize = 5;

/// One download readout inside an aria2c summary line.
#[allow(clippy::expect_used)]
static READOUT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\[#(?P<gid>[0-9a-fA-F]+)\s+(?P<done>[\d.]+)(?P<done_unit>[KMGT]?i?B)(?:/(?P<total>[\d.]+)(?P<total_unit>[KMGT]?i?B))?",
    )
    .expect("aria2c readout regex is valid") // Static pattern, safe to panic
});

/// Returns true for `magnet:?` URIs carrying a BitTorrent info hash.
#[must_use]
pub fn is_magnet_link(target: &str) -> bool {
    let lower = target.trim().to_ascii_lowercase();
    lower.starts_with("magnet:?") && (lower.contains("xt=urn:btih:") || lower.contains("xt=urn:btmh:"))
}

/// Display name (`dn=`) of a magnet link, if present.
fn magnet_display_name(target: &str) -> Option<String> {
    let url = Url::parse(target).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "dn")
        .map(|(_, value)| value.into_owned())
        .filter(|name| !name.trim().is_empty())
}

/// Transfers magnet links with aria2c, seeding nothing afterwards.
#[derive(Debug, Clone)]
pub struct TorrentStrategy {
    program: String,
}

impl Default for TorrentStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl TorrentStrategy {
    /// Uses `aria2c` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(ARIA2C)
    }

    /// Uses a specific aria2c binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self, task: &TransferTask) -> ClientCommand {
        let options = &task.options;
        ClientCommand::new(&self.program)
            .arg("--seed-time=0")
            .arg("--summary-interval=1")
            .arg("--enable-color=false")
            .arg("--console-log-level=notice")
            .arg("--bt-save-metadata=false")
            .arg(format!("--continue={}", options.resume))
            .arg(format!(
                "--connect-timeout={}",
                options.connect_timeout.as_secs().max(1)
            ))
            .arg(format!("--timeout={}", options.timeout.as_secs().max(1)))
            .arg(format!("--bt-stop-timeout={}", options.timeout.as_secs().max(1)))
            .arg("--dir")
            .arg(task.destination.as_os_str())
            .arg(&task.target)
    }
}

#[async_trait]
impl TransferStrategy for TorrentStrategy {
    fn protocol(&self) -> Protocol {
        Protocol::BitTorrent
    }

    fn can_handle(&self, target: &str) -> bool {
        is_magnet_link(target)
    }

    #[instrument(skip(self, task, ctx), fields(target = %task.target, task = %ctx.task_id()))]
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError> {
        let started = Instant::now();
        let name = magnet_display_name(&task.target).unwrap_or_else(|| "torrent".to_string());
        let command = self.command(task);

        let mut monitor = Aria2Monitor::new(ctx, name);
        let exit = run_streaming(&command, |line| monitor.on_line(line)).await?;
        let succeeded = exit.success();
        let summary = monitor.finish(succeeded);

        if !succeeded {
            return Err(map_aria2_exit(&task.target, &exit, &summary.errors, command.program()));
        }

        let path = match summary.completed_paths.as_slice() {
            [single] => single.clone(),
            _ => task.destination.clone(),
        };
        info!(
            path = %path.display(),
            bytes = summary.bytes,
            files = summary.completed_paths.len(),
            "torrent transfer complete"
        );
        Ok(TransferStats::new(summary.bytes, started.elapsed(), path))
    }
}

/// One aria2c download (metadata or content) seen in the readouts.
#[derive(Debug)]
struct Aria2Stream {
    gid: String,
    id: TaskId,
    done: u64,
    total: Option<u64>,
}

/// What the monitor learned once aria2c exited.
#[derive(Debug, Default)]
struct Aria2Summary {
    bytes: u64,
    completed_paths: Vec<PathBuf>,
    errors: Vec<String>,
}

/// Turns aria2c console lines into aggregate and per-download progress.
struct Aria2Monitor<'a> {
    ctx: &'a TransferContext,
    name: String,
    streams: Vec<Aria2Stream>,
    completed_paths: Vec<PathBuf>,
    errors: VecDeque<String>,
}

impl<'a> Aria2Monitor<'a> {
    fn new(ctx: &'a TransferContext, name: String) -> Self {
        Self {
            ctx,
            name,
            streams: Vec::new(),
            completed_paths: Vec::new(),
            errors: VecDeque::with_capacity(ERROR_TAIL_LINES),
        }
    }

    fn on_line(&mut self, line: &str) {
        let mut saw_readout = false;
        for caps in READOUT_PATTERN.captures_iter(line) {
            let Some(done) = parse_size(&caps["done"], &caps["done_unit"]) else {
                continue;
            };
            let total = match (caps.name("total"), caps.name("total_unit")) {
                (Some(total), Some(unit)) => {
                    parse_size(total.as_str(), unit.as_str()).filter(|t| *t > 0)
                }
                _ => None,
            };
            self.record(&caps["gid"], done, total);
            saw_readout = true;
        }
        if saw_readout {
            let (bytes, total) = self.aggregate();
            self.ctx.report(bytes, total);
            return;
        }

        if let Some((_, path)) = line.split_once("Download complete: ") {
            debug!(path, "aria2c finished a download");
            self.completed_paths.push(PathBuf::from(path.trim()));
        } else if line.contains("[ERROR]") || line.contains("errorCode=") || line.starts_with("Exception") {
            if self.errors.len() == ERROR_TAIL_LINES {
                self.errors.pop_front();
            }
            self.errors.push_back(line.to_string());
        }
    }

    fn record(&mut self, gid: &str, done: u64, total: Option<u64>) {
        if let Some(stream) = self.streams.iter_mut().find(|s| s.gid == gid) {
            stream.done = done;
            if total.is_some() {
                stream.total = total;
            }
            self.ctx.report_file(&stream.id, done, total);
            return;
        }
        let label = format!("{} #{gid}", self.name);
        let id = self.ctx.start_file(self.streams.len(), &label, total);
        self.ctx.report_file(&id, done, total);
        self.streams.push(Aria2Stream {
            gid: gid.to_string(),
            id,
            done,
            total,
        });
    }

    /// Sum of all streams; the total is known only if every stream's is.
    fn aggregate(&self) -> (u64, Option<u64>) {
        let bytes = self.streams.iter().map(|s| s.done).sum();
        let total = self
            .streams
            .iter()
            .map(|s| s.total)
            .sum::<Option<u64>>();
        (bytes, total)
    }

    fn finish(self, succeeded: bool) -> Aria2Summary {
        for stream in &self.streams {
            if succeeded {
                self.ctx.finish_file(&stream.id);
            } else {
                self.ctx.fail_file(&stream.id, "aria2c failed");
            }
        }
        let bytes = if succeeded {
            self.streams.iter().map(|s| s.total.unwrap_or(s.done)).sum()
        } else {
            self.aggregate().0
        };
        Aria2Summary {
            bytes,
            completed_paths: self.completed_paths,
            errors: self.errors.into_iter().collect(),
        }
    }
}

/// Maps a failed aria2c exit to a transfer error.
///
/// | Exit | Meaning | Error |
/// |------|---------|-------|
/// | 2 | timeout | Timeout |
/// | 6, 19 | network problem, name resolution | Connection |
/// | 3, 9, 24, 28 | not found, disk full, auth, bad option | permanent Protocol |
/// | other | | transient Protocol |
fn map_aria2_exit(target: &str, exit: &ClientExit, errors: &[String], program: &str) -> TransferError {
    let message = if exit.stderr_tail.is_empty() && !errors.is_empty() {
        errors.join("\n")
    } else {
        exit.message(program)
    };
    match exit.code {
        Some(2) => TransferError::timeout(target),
        Some(6 | 19) => TransferError::connection(target, message),
        Some(3 | 9 | 24 | 28) => TransferError::protocol(target, message, true),
        _ => TransferError::protocol(target, message, false),
    }
}
