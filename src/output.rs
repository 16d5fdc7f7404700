//! CLI output formatting and display helpers.

use omnifetch_core::progress::format_bytes;
use omnifetch_core::{BatchResult, ParseResult, TransferOutcome};
use tracing::{info, warn};

/// Message when no input was provided at all.
pub const NO_INPUT_GUIDANCE: &str = "No input provided. Pipe targets via stdin or pass them as arguments.";

/// Message when stdin was piped but empty.
pub const EMPTY_STDIN_GUIDANCE: &str =
    "Received empty stdin input. Pipe URLs, magnet links, or a target list.";

/// Example for piping input.
pub const INPUT_PIPE_EXAMPLE: &str = "Example: cat targets.txt | omnifetch -o downloads";

/// Example for passing targets as arguments.
pub const INPUT_ARG_EXAMPLE: &str = "Example: omnifetch https://example.com/file.iso";

/// Returns terminal width from COLUMNS, or 80 if unset/invalid.
pub fn terminal_width() -> usize {
    std::env::var("COLUMNS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|width| *width >= 20)
        .unwrap_or(80)
}

/// Truncates text to at most `width` chars, appending ellipsis if truncated.
pub fn truncate_to_width(text: &str, width: usize) -> String {
    let text_len = text.chars().count();
    if text_len <= width {
        return text.to_string();
    }
    if width == 0 {
        return String::new();
    }
    if width == 1 {
        return "…".to_string();
    }

    let mut output: String = text.chars().take(width - 1).collect();
    output.push('…');
    output
}

/// Returns lines for quick-start guidance (headline + examples), truncated to width.
pub fn quick_start_guidance_lines(empty_stdin: bool, width: usize) -> Vec<String> {
    let headline = if empty_stdin {
        EMPTY_STDIN_GUIDANCE
    } else {
        NO_INPUT_GUIDANCE
    };

    vec![
        truncate_to_width(headline, width),
        truncate_to_width(INPUT_PIPE_EXAMPLE, width),
        truncate_to_width(INPUT_ARG_EXAMPLE, width),
    ]
}

/// Prints quick-start guidance to stdout (no input or empty stdin).
pub fn print_quick_start_guidance(empty_stdin: bool) {
    let width = terminal_width().min(80);
    for line in quick_start_guidance_lines(empty_stdin, width) {
        println!("{line}");
    }
}

pub(crate) fn log_parse_feedback(parse_result: &ParseResult) {
    info!(
        targets = parse_result.len(),
        skipped = parse_result.skipped_count(),
        "{parse_result}"
    );
    for skipped in &parse_result.skipped {
        warn!(skipped = %skipped, "Skipped unrecognized input");
    }
}

/// Headline summarizing a finished batch.
pub fn batch_headline(result: &BatchResult) -> String {
    let mut headline = format!(
        "{} of {} succeeded, {} failed",
        result.succeeded,
        result.total(),
        result.failed
    );
    if result.skipped > 0 {
        headline.push_str(&format!(", {} skipped", result.skipped));
    }
    headline.push_str(&format!(
        " ({} in {:.1}s)",
        format_bytes(result.total_bytes),
        result.duration.as_secs_f64()
    ));
    headline
}

/// One line per failed target, truncated to `width`.
pub fn failure_lines(result: &BatchResult, width: usize) -> Vec<String> {
    result
        .results
        .iter()
        .filter_map(|entry| match &entry.outcome {
            TransferOutcome::Failure(failure) => Some(truncate_to_width(
                &format!("  ✗ {} {}", entry.target, failure),
                width,
            )),
            TransferOutcome::Success(_) => None,
        })
        .collect()
}

/// Prints the batch summary to stdout.
pub fn print_batch_summary(result: &BatchResult) {
    println!("{}", batch_headline(result));
    for line in failure_lines(result, terminal_width()) {
        println!("{line}");
    }
}
