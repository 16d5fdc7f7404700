use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, bail};
use clap::{ArgMatches, CommandFactory, FromArgMatches, parser::ValueSource};
use omnifetch_core::download::constants::CONNECT_TIMEOUT_SECS;
use omnifetch_core::download::DEFAULT_MAX_DELAY;
use omnifetch_core::progress::DEFAULT_RENDER_INTERVAL;
use omnifetch_core::{DuplicatePolicy, TransferOptions};

use crate::app_config::{FileConfig, VerbositySetting};
use crate::cli::Args;

/// Which arguments were given explicitly on the command line.
///
/// Only these override values from the config file; clap defaults never do.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct CliValueSources {
    pub(crate) output_dir: bool,
    pub(crate) concurrency: bool,
    pub(crate) max_retries: bool,
    pub(crate) retry_delay_ms: bool,
    pub(crate) timeout_secs: bool,
    pub(crate) no_resume: bool,
    pub(crate) notify: bool,
    pub(crate) on_duplicate: bool,
    pub(crate) verbose: bool,
    pub(crate) quiet: bool,
}

/// Fully resolved run settings. Built once, never mutated afterwards.
#[derive(Debug, Clone)]
pub(crate) struct EngineConfig {
    pub(crate) output_dir: PathBuf,
    pub(crate) concurrency: usize,
    pub(crate) stop_on_error: bool,
    pub(crate) notify: bool,
    pub(crate) verbose: u8,
    pub(crate) quiet: bool,
    pub(crate) no_color: bool,
    pub(crate) progress_interval: Duration,
    pub(crate) transfer: TransferOptions,
}

pub(crate) fn parse_cli_with_sources() -> (Args, CliValueSources) {
    let command = Args::command();
    let matches = command.get_matches();
    let args = Args::from_arg_matches(&matches).unwrap_or_else(|err| err.exit());
    let sources = collect_sources(&matches);
    (args, sources)
}

fn collect_sources(matches: &ArgMatches) -> CliValueSources {
    CliValueSources {
        output_dir: is_commandline_value(matches, "output_dir"),
        concurrency: is_commandline_value(matches, "concurrency"),
        max_retries: is_commandline_value(matches, "max_retries"),
        retry_delay_ms: is_commandline_value(matches, "retry_delay_ms"),
        timeout_secs: is_commandline_value(matches, "timeout_secs"),
        no_resume: is_commandline_value(matches, "no_resume"),
        notify: is_commandline_value(matches, "notify"),
        on_duplicate: is_commandline_value(matches, "on_duplicate"),
        verbose: is_commandline_value(matches, "verbose"),
        quiet: is_commandline_value(matches, "quiet"),
    }
}

fn is_commandline_value(matches: &ArgMatches, id: &str) -> bool {
    matches.value_source(id) == Some(ValueSource::CommandLine)
}

/// Merges CLI arguments over file config over built-in defaults.
pub(crate) fn resolve_engine_config(
    args: &Args,
    cli_sources: &CliValueSources,
    file_config: Option<&FileConfig>,
) -> Result<EngineConfig> {
    let file = file_config.cloned().unwrap_or_default();

    let output_dir = pick(
        cli_sources.output_dir,
        args.output_dir.clone(),
        file.output_dir,
    )
    .unwrap_or_else(|| PathBuf::from("."));

    let concurrency = pick_value(cli_sources.concurrency, args.concurrency, file.concurrency);
    let max_retries = pick_value(cli_sources.max_retries, args.max_retries, file.max_retries);
    let retry_delay_ms = pick_value(
        cli_sources.retry_delay_ms,
        args.retry_delay_ms,
        file.retry_delay_ms,
    );
    let timeout_secs = pick_value(cli_sources.timeout_secs, args.timeout_secs, file.timeout_secs);
    let on_duplicate: DuplicatePolicy =
        pick_value(cli_sources.on_duplicate, args.on_duplicate, file.on_duplicate);

    let resume = if cli_sources.no_resume {
        !args.no_resume
    } else {
        file.resume.unwrap_or(true)
    };
    let notify = if cli_sources.notify {
        args.notify
    } else {
        file.notify.unwrap_or(false)
    };

    let (verbose, quiet) = if cli_sources.verbose || cli_sources.quiet {
        (args.verbose, args.quiet)
    } else {
        file.verbosity
            .map_or((args.verbose, args.quiet), config_verbosity)
    };

    let retry_base_delay = Duration::from_millis(retry_delay_ms);
    let max_retry_delay = file
        .max_retry_delay_ms
        .map_or(DEFAULT_MAX_DELAY, Duration::from_millis)
        .max(retry_base_delay);

    if !(1..=100).contains(&concurrency) {
        bail!("Invalid effective concurrency value: {concurrency}. Expected range: 1..=100");
    }

    let transfer = TransferOptions {
        max_retries: u32::from(max_retries),
        retry_base_delay,
        max_retry_delay,
        timeout: Duration::from_secs(timeout_secs),
        connect_timeout: Duration::from_secs(
            file.connect_timeout_secs.unwrap_or(CONNECT_TIMEOUT_SECS),
        ),
        resume,
        duplicate_policy: on_duplicate,
        ..TransferOptions::default()
    };

    Ok(EngineConfig {
        output_dir,
        concurrency: usize::from(concurrency),
        stop_on_error: args.stop_on_error,
        notify,
        verbose,
        quiet,
        no_color: args.no_color,
        progress_interval: file
            .progress_interval_ms
            .map_or(DEFAULT_RENDER_INTERVAL, Duration::from_millis),
        transfer,
    })
}

fn pick<T>(from_cli: bool, cli_value: Option<T>, file_value: Option<T>) -> Option<T> {
    if from_cli { cli_value } else { file_value.or(cli_value) }
}

fn pick_value<T>(from_cli: bool, cli_value: T, file_value: Option<T>) -> T {
    if from_cli {
        cli_value
    } else {
        file_value.unwrap_or(cli_value)
    }
}

fn config_verbosity(verbosity: VerbositySetting) -> (u8, bool) {
    match verbosity {
        VerbositySetting::Default => (0, false),
        VerbositySetting::Verbose => (1, false),
        VerbositySetting::Quiet => (0, true),
        VerbositySetting::Debug => (2, false),
    }
}

pub(crate) fn resolve_default_log_level(config: &EngineConfig) -> &'static str {
    if config.quiet {
        "error"
    } else {
        match config.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    }
}

pub(crate) fn should_force_cli_log_level(cli_sources: &CliValueSources) -> bool {
    cli_sources.verbose || cli_sources.quiet
}
