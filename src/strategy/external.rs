//! Child-process runner shared by the curl, aria2c, and yt-dlp strategies.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use crate::download::TransferError;
use crate::download::constants::STDERR_TAIL_LINES;

/// Program plus arguments for one client invocation.
#[derive(Debug, Clone)]
pub(crate) struct ClientCommand {
    program: String,
    args: Vec<OsString>,
}

impl ClientCommand {
    pub(crate) fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub(crate) fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub(crate) fn program(&self) -> &str {
        &self.program
    }

    fn spawn(&self, stdout: Stdio) -> Result<Child, TransferError> {
        debug!(program = %self.program, args = ?self.args, "spawning client");
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    TransferError::client_unavailable(&self.program, e)
                } else {
                    TransferError::internal(format!("failed to start {}: {e}", self.program))
                }
            })
    }
}

/// How a client process ended.
#[derive(Debug, Clone)]
pub(crate) struct ClientExit {
    /// Exit code, `None` if killed by a signal.
    pub code: Option<i32>,
    /// Last lines the client wrote to stderr.
    pub stderr_tail: String,
}

impl ClientExit {
    pub(crate) fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Best human-readable reason for a failure.
    pub(crate) fn message(&self, program: &str) -> String {
        if self.stderr_tail.is_empty() {
            match self.code {
                Some(code) => format!("{program} exited with status {code}"),
                None => format!("{program} was terminated by a signal"),
            }
        } else {
            self.stderr_tail.clone()
        }
    }
}

/// Runs the client, calling `on_line` for every non-empty stdout line.
///
/// Lines are split on both `\n` and `\r` so carriage-return progress
/// readouts arrive one update at a time.
pub(crate) async fn run_streaming<F>(
    command: &ClientCommand,
    mut on_line: F,
) -> Result<ClientExit, TransferError>
where
    F: FnMut(&str) + Send,
{
    let mut child = command.spawn(Stdio::piped())?;
    let stderr = spawn_stderr_collector(&mut child);

    if let Some(stdout) = child.stdout.take() {
        let mut segments = BufReader::new(stdout).split(b'\n');
        loop {
            match segments.next_segment().await {
                Ok(Some(segment)) => {
                    let text = String::from_utf8_lossy(&segment);
                    for line in text.split('\r') {
                        let line = line.trim();
                        if !line.is_empty() {
                            trace!(program = %command.program(), line, "client output");
                            on_line(line);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(program = %command.program(), error = %e, "stopped reading client output");
                    break;
                }
            }
        }
    }

    finish(command, child, stderr).await
}

/// Runs the client, calling `on_size` with the size of `watch` every
/// `interval` while it runs and once more after it exits.
pub(crate) async fn run_polling<F>(
    command: &ClientCommand,
    watch: &Path,
    interval: Duration,
    mut on_size: F,
) -> Result<ClientExit, TransferError>
where
    F: FnMut(u64) + Send,
{
    let mut child = command.spawn(Stdio::null())?;
    let stderr = spawn_stderr_collector(&mut child);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let status = loop {
        tokio::select! {
            status = child.wait() => break status,
            _ = ticker.tick() => {
                if let Ok(meta) = tokio::fs::metadata(watch).await {
                    on_size(meta.len());
                }
            }
        }
    };
    if let Ok(meta) = tokio::fs::metadata(watch).await {
        on_size(meta.len());
    }

    let status = status.map_err(|e| {
        TransferError::internal(format!("failed to wait for {}: {e}", command.program()))
    })?;
    Ok(ClientExit {
        code: status.code(),
        stderr_tail: collect_stderr(stderr).await,
    })
}

async fn finish(
    command: &ClientCommand,
    mut child: Child,
    stderr: Option<JoinHandle<String>>,
) -> Result<ClientExit, TransferError> {
    let status = child.wait().await.map_err(|e| {
        TransferError::internal(format!("failed to wait for {}: {e}", command.program()))
    })?;
    let exit = ClientExit {
        code: status.code(),
        stderr_tail: collect_stderr(stderr).await,
    };
    debug!(program = %command.program(), code = ?exit.code, "client exited");
    Ok(exit)
}

fn spawn_stderr_collector(child: &mut Child) -> Option<JoinHandle<String>> {
    child
        .stderr
        .take()
        .map(|stderr| tokio::spawn(tail_lines(stderr, STDERR_TAIL_LINES)))
}

async fn collect_stderr(handle: Option<JoinHandle<String>>) -> String {
    match handle {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

/// Keeps the last `keep` non-empty lines of a stream.
async fn tail_lines<R>(reader: R, keep: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut tail = VecDeque::with_capacity(keep);
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        if tail.len() == keep {
            tail.pop_front();
        }
        tail.push_back(line);
    }
    Vec::from(tail).join("\n")
}

/// Parses a human size such as `1.5MiB`, `10.00MiB`, `512KiB`, `3GB`, `0B`.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub(crate) fn parse_size(number: &str, unit: &str) -> Option<u64> {
    let value: f64 = number.parse().ok()?;
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    let multiplier: u64 = match unit {
        "B" => 1,
        "KiB" => 1 << 10,
        "MiB" => 1 << 20,
        "GiB" => 1 << 30,
        "TiB" => 1 << 40,
        "KB" | "kB" => 1_000,
        "MB" => 1_000_000,
        "GB" => 1_000_000_000,
        "TB" => 1_000_000_000_000,
        _ => return None,
    };
    Some((value * multiplier as f64).round() as u64)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
pub(crate) mod tests {
    use super::*;

    /// Writes an executable shell script standing in for a client program.
    #[cfg(unix)]
    pub(crate) fn fake_client(dir: &Path, name: &str, body: &str) -> String {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_parse_size_units() {
        assert_eq!(parse_size("0", "B"), Some(0));
        assert_eq!(parse_size("512", "KiB"), Some(512 * 1024));
        assert_eq!(parse_size("1.5", "MiB"), Some(1_572_864));
        assert_eq!(parse_size("2", "GB"), Some(2_000_000_000));
        assert_eq!(parse_size("1", "XB"), None);
        assert_eq!(parse_size("abc", "B"), None);
    }

    #[test]
    fn test_client_exit_message_prefers_stderr() {
        let exit = ClientExit {
            code: Some(3),
            stderr_tail: "remote file not found".to_string(),
        };
        assert_eq!(exit.message("aria2c"), "remote file not found");
        let exit = ClientExit {
            code: Some(3),
            stderr_tail: String::new(),
        };
        assert_eq!(exit.message("aria2c"), "aria2c exited with status 3");
    }

    #[tokio::test]
    async fn test_missing_program_is_client_unavailable() {
        let command = ClientCommand::new("omnifetch-definitely-missing-client");
        let err = run_streaming(&command, |_| {}).await.unwrap_err();
        assert!(matches!(err, TransferError::ClientUnavailable { .. }));
        assert!(err.to_string().contains("omnifetch-definitely-missing-client"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_streaming_splits_lines_and_carriage_returns() {
        let dir = tempfile::TempDir::new().unwrap();
        let program = fake_client(
            dir.path(),
            "client",
            r"printf 'one\rtwo\nthree\n\n'; echo 'oops' >&2; exit 4",
        );

        let mut lines = Vec::new();
        let exit = run_streaming(&ClientCommand::new(program), |line| {
            lines.push(line.to_string());
        })
        .await
        .unwrap();

        assert_eq!(lines, vec!["one", "two", "three"]);
        assert_eq!(exit.code, Some(4));
        assert!(!exit.success());
        assert_eq!(exit.stderr_tail, "oops");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_polling_reports_final_size() {
        let dir = tempfile::TempDir::new().unwrap();
        let out = dir.path().join("out.bin");
        let program = fake_client(
            dir.path(),
            "client",
            &format!("printf 'hello' > '{}'", out.display()),
        );

        let mut sizes = Vec::new();
        let exit = run_polling(
            &ClientCommand::new(program),
            &out,
            Duration::from_millis(10),
            |size| sizes.push(size),
        )
        .await
        .unwrap();

        assert!(exit.success());
        assert_eq!(sizes.last(), Some(&5));
    }
}
