use std::io::{self, IsTerminal};
use std::sync::Arc;

use anyhow::{Context, Result};
use omnifetch_core::progress::{NullRenderer, ProgressRender};
use omnifetch_core::{
    BarRenderer, DesktopNotifier, DownloadEngine, LogNotifier, Notifier, ProgressTracker,
    StrategySet, parse_targets,
};
use tracing::{debug, info, warn};

use crate::app::{config_manager, config_runtime, exit_handler, input_processor, terminal};
use crate::{ProcessExit, output};

pub(crate) async fn run_omnifetch() -> Result<ProcessExit> {
    let (args, cli_sources) = config_runtime::parse_cli_with_sources();
    let resolved = config_manager::resolve_config(&args, &cli_sources)?;
    let config = resolved.engine;

    let default_level = config_runtime::resolve_default_log_level(&config);
    let force_cli_log_level = config_runtime::should_force_cli_log_level(&cli_sources);
    let no_color = terminal::is_no_color_requested(config.no_color);
    terminal::init_tracing(default_level, force_cli_log_level, no_color);

    if let Some(path) = &resolved.config_path {
        info!(path = %path.display(), "Loaded config file");
    }
    debug!(?config, "Configuration resolved");

    let input = input_processor::process_input(&args.targets)?;
    let Some(input_text) = input.text else {
        output::print_quick_start_guidance(input.piped_stdin_was_empty);
        return Ok(ProcessExit::Success);
    };

    let parse_result = parse_targets(&input_text);
    output::log_parse_feedback(&parse_result);
    if parse_result.is_empty() {
        warn!("No valid targets found in input");
        return Ok(if parse_result.skipped_count() > 0 {
            ProcessExit::Failure
        } else {
            ProcessExit::Success
        });
    }
    let targets = parse_result.targets();

    let strategies = StrategySet::standard(&config.transfer)
        .context("Failed to initialize transfer strategies")?;

    let render_bars = terminal::should_render_bars(
        io::stderr().is_terminal(),
        config.quiet,
        terminal::is_dumb_terminal(),
    );
    let renderer: Arc<dyn ProgressRender> = if render_bars {
        Arc::new(BarRenderer::new())
    } else {
        Arc::new(NullRenderer)
    };
    let tracker = Arc::new(ProgressTracker::new(renderer, config.progress_interval));

    let notifier: Arc<dyn Notifier> = if config.notify {
        Arc::new(DesktopNotifier::new())
    } else {
        Arc::new(LogNotifier)
    };

    let engine = DownloadEngine::new(
        config.output_dir.clone(),
        config.transfer.clone(),
        strategies,
    )
    .with_tracker(tracker)
    .with_notifier(notifier);

    info!(
        targets = targets.len(),
        concurrency = config.concurrency,
        output_dir = %config.output_dir.display(),
        "omnifetch starting"
    );

    let result = engine
        .run_batch(&targets, config.concurrency, config.stop_on_error)
        .await?;

    if !config.quiet {
        output::print_batch_summary(&result);
    }

    Ok(exit_handler::exit_outcome_for_batch(&result))
}
