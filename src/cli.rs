//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::Parser;

use omnifetch_core::download::constants::READ_TIMEOUT_SECS;
use omnifetch_core::{DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DuplicatePolicy};

/// Default delay before the first retry, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

const EXIT_CODES_HELP: &str = "Exit codes:
  0 = all targets succeeded
  1 = every target failed, or a fatal error
  2 = partial success";

/// Fetch many targets at once.
///
/// Each TARGET is a URL (http, https, ftp, ftps, sftp), a magnet link, or a
/// path to a list file with one target per line. When no TARGET is given,
/// the list is read from stdin.
#[derive(Parser, Debug, Clone)]
#[command(name = "omnifetch")]
#[command(author, version, about, after_help = EXIT_CODES_HELP)]
pub struct Args {
    /// Targets or target list files
    #[arg(value_name = "TARGET")]
    pub targets: Vec<String>,

    /// Directory downloads are written to (default: current directory)
    #[arg(short = 'o', long)]
    pub output_dir: Option<PathBuf>,

    /// Maximum concurrent transfers (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY as u8, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum retry attempts for transient failures (0-10)
    #[arg(short = 'r', long, default_value_t = DEFAULT_MAX_RETRIES as u8, value_parser = clap::value_parser!(u8).range(0..=10))]
    pub max_retries: u8,

    /// Delay before the first retry in milliseconds; doubles per retry (max 60000)
    #[arg(long, default_value_t = DEFAULT_RETRY_DELAY_MS, value_parser = clap::value_parser!(u64).range(0..=60000))]
    pub retry_delay_ms: u64,

    /// Abort a transfer that makes no progress for this many seconds (1-3600)
    #[arg(long, default_value_t = READ_TIMEOUT_SECS, value_parser = clap::value_parser!(u64).range(1..=3600))]
    pub timeout_secs: u64,

    /// Start every transfer from scratch instead of resuming partial files
    #[arg(long)]
    pub no_resume: bool,

    /// Show a desktop notification when the batch finishes
    #[arg(long)]
    pub notify: bool,

    /// What to do when a destination file already exists
    #[arg(long, value_name = "POLICY", default_value_t = DuplicatePolicy::Rename, value_parser = parse_duplicate_policy)]
    pub on_duplicate: DuplicatePolicy,

    /// Stop starting new transfers after the first failure
    #[arg(long)]
    pub stop_on_error: bool,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,
}

fn parse_duplicate_policy(value: &str) -> Result<DuplicatePolicy, String> {
    value
        .parse::<DuplicatePolicy>()
        .map_err(|err| err.to_string())
}
