//! FTP transfers through `curl`, plus the curl plumbing shared with SFTP.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::external::{ClientCommand, ClientExit, run_polling};
use super::{Protocol, TransferContext, TransferStrategy, TransferTask};
use crate::download::constants::POLL_INTERVAL_MS;
use crate::download::{TransferError, TransferStats};
use crate::resume::{ResumeMarker, ResumeStore};

/// Default curl binary.
pub(super) const CURL: &str = "curl";

/// Transfers `ftp://` and `ftps://` URLs with curl.
#[derive(Debug, Clone)]
pub struct FtpStrategy {
    program: String,
}

impl Default for FtpStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl FtpStrategy {
    /// Uses `curl` from `PATH`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_program(CURL)
    }

    /// Uses a specific curl binary.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl TransferStrategy for FtpStrategy {
    fn protocol(&self) -> Protocol {
        Protocol::Ftp
    }

    fn can_handle(&self, target: &str) -> bool {
        has_scheme_and_host(target, &["ftp", "ftps"])
    }

    #[instrument(skip(self, task, ctx), fields(target = %task.target, task = %ctx.task_id()))]
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError> {
        curl_transfer(&self.program, task, ctx).await
    }
}

/// True if `target` parses as a URL with one of `schemes` and a host.
pub(super) fn has_scheme_and_host(target: &str, schemes: &[&str]) -> bool {
    Url::parse(target).is_ok_and(|url| {
        schemes.contains(&url.scheme()) && url.host_str().is_some_and(|host| !host.is_empty())
    })
}

/// One curl download of `task.target` into `task.destination`.
///
/// Resumes with `--continue-at` when a marker matches the partial file,
/// and leaves a marker behind on failure so the next attempt can continue.
pub(super) async fn curl_transfer(
    program: &str,
    task: &TransferTask,
    ctx: &TransferContext,
) -> Result<TransferStats, TransferError> {
    let started = Instant::now();
    let destination = &task.destination;
    let store = ResumeStore::new();
    let resume = task.options.resume;

    let offset = if resume {
        resume_offset(&store, destination, &task.target).await
    } else {
        0
    };

    let mut command = ClientCommand::new(program)
        .arg("--fail")
        .arg("--silent")
        .arg("--show-error")
        .arg("--connect-timeout")
        .arg(task.options.connect_timeout.as_secs().max(1).to_string())
        .arg("--speed-limit")
        .arg("1")
        .arg("--speed-time")
        .arg(task.options.timeout.as_secs().max(1).to_string())
        .arg("--output")
        .arg(destination.as_os_str());
    if offset > 0 {
        command = command.arg("--continue-at").arg(offset.to_string());
        debug!(offset, "resuming with curl");
    }
    command = command.arg("--").arg(&task.target);

    ctx.report(offset, None);
    let exit = run_polling(
        &command,
        destination,
        Duration::from_millis(POLL_INTERVAL_MS),
        |size| ctx.report(size, None),
    )
    .await?;

    let final_size = tokio::fs::metadata(destination)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);

    if !exit.success() {
        let error = map_curl_exit(&task.target, destination, &exit, command.program());
        keep_or_discard_partial(&store, destination, &task.target, resume, final_size).await;
        return Err(error);
    }

    if let Err(error) = store.clear(destination).await {
        warn!(error = %error, "failed to remove resume marker");
    }

    let transferred = final_size.saturating_sub(offset);
    info!(
        path = %destination.display(),
        bytes = final_size,
        resumed = offset > 0,
        "curl transfer complete"
    );
    Ok(TransferStats::new(transferred, started.elapsed(), destination).with_resumed(offset > 0))
}

async fn resume_offset(store: &ResumeStore, destination: &Path, target: &str) -> u64 {
    let Some(marker) = store.read(destination).await else {
        return 0;
    };
    let on_disk = tokio::fs::metadata(destination)
        .await
        .map(|meta| meta.len())
        .unwrap_or(0);
    if marker.target == target && on_disk > 0 && on_disk == marker.bytes_downloaded {
        on_disk
    } else {
        debug!(
            marker_bytes = marker.bytes_downloaded,
            on_disk, "resume marker does not match partial file, restarting"
        );
        0
    }
}

async fn keep_or_discard_partial(
    store: &ResumeStore,
    destination: &Path,
    target: &str,
    resume: bool,
    size: u64,
) {
    if resume && size > 0 {
        let marker = ResumeMarker::new(target, 0, size);
        if let Err(error) = store.write(destination, &marker).await {
            warn!(error = %error, "failed to persist resume marker");
        }
        return;
    }
    debug!(path = %destination.display(), "cleaning up partial file after error");
    let _ = tokio::fs::remove_file(destination).await;
}

/// Maps a failed curl exit to a transfer error.
///
/// | Exit | Meaning | Error |
/// |------|---------|-------|
/// | 6, 7 | resolve/connect failed | Connection |
/// | 28 | timeout or stall | Timeout |
/// | 9, 67, 78 | access denied, login denied, no such file | permanent Protocol |
/// | 23 | local write error | Io |
/// | other | | transient Protocol |
pub(super) fn map_curl_exit(
    target: &str,
    destination: &Path,
    exit: &ClientExit,
    program: &str,
) -> TransferError {
    let message = exit.message(program);
    match exit.code {
        Some(6 | 7) => TransferError::connection(target, message),
        Some(28) => TransferError::timeout(target),
        Some(9 | 67 | 78) => TransferError::protocol(target, message, true),
        Some(23) => TransferError::io(destination, std::io::Error::other(message)),
        _ => TransferError::protocol(target, message, false),
    }
}
