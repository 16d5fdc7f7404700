//! Constants for the download module (timeouts, limits).

/// Default connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default read timeout (5 minutes for large files).
///
/// External clients use it as the stall timeout: a transfer that moves no
/// bytes for this long is aborted.
pub const READ_TIMEOUT_SECS: u64 = 300;

/// How often external clients' output files are polled for progress.
pub const POLL_INTERVAL_MS: u64 = 250;

/// Number of stderr lines kept from an external client for error messages.
pub const STDERR_TAIL_LINES: usize = 20;
