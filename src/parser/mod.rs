//! Target list parsing.
//!
//! A target list is newline-delimited text: one URL or magnet link per
//! line. Blank lines and lines starting with `#` or `//` are ignored, and a
//! single pair of surrounding `"` or `'` quotes is stripped. Anything else
//! that is not a recognizable target is skipped with a warning; it never
//! fails the whole list.
//!
//! # Example
//!
//! ```
//! use omnifetch_core::parser::{TargetKind, parse_targets};
//!
//! let result = parse_targets("# mirrors\nhttps://example.com/a.iso\nnot a target\n");
//! assert_eq!(result.len(), 1);
//! assert_eq!(result.items[0].kind, TargetKind::Url);
//! assert_eq!(result.skipped_count(), 1);
//! ```

mod error;
mod input;

pub use error::{MAX_TARGET_LENGTH, ParseError};
pub use input::{ParseResult, ParsedTarget, SkippedLine, TargetKind};

use tracing::{debug, warn};
use url::Url;

use crate::strategy::is_magnet_link;

/// URL schemes some strategy can transfer.
const SUPPORTED_SCHEMES: &[&str] = &["http", "https", "ftp", "ftps", "sftp"];

/// Parses a target list.
///
/// Accepted targets keep their input order. Rejected lines are recorded in
/// [`ParseResult::skipped`] and logged at warn level.
#[must_use]
pub fn parse_targets(input: &str) -> ParseResult {
    let mut result = ParseResult::new();

    for (index, raw_line) in input.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw_line.trim();
        if is_ignorable(trimmed) {
            continue;
        }
        let candidate = strip_quotes(trimmed);

        match classify_target(candidate) {
            Ok(kind) => {
                debug!(line, kind = %kind, target = %candidate, "parsed target");
                result.items.push(ParsedTarget {
                    line,
                    kind,
                    value: candidate.to_string(),
                });
            }
            Err(error) => {
                warn!(line, error = %error, "skipping unrecognized line");
                result.skipped.push(SkippedLine {
                    line,
                    content: raw_line.to_string(),
                    error,
                });
            }
        }
    }

    debug!(
        targets = result.len(),
        skipped = result.skipped_count(),
        "target list parsed"
    );
    result
}

/// Decides whether `candidate` is a transferable target.
///
/// # Errors
///
/// Returns a [`ParseError`] describing why the text is not a target.
pub fn classify_target(candidate: &str) -> Result<TargetKind, ParseError> {
    if candidate.chars().count() > MAX_TARGET_LENGTH {
        return Err(ParseError::too_long(candidate));
    }
    if candidate
        .get(..7)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("magnet:"))
    {
        return if is_magnet_link(candidate) {
            Ok(TargetKind::Magnet)
        } else {
            Err(ParseError::magnet_without_hash(candidate))
        };
    }

    let url = Url::parse(candidate).map_err(|e| ParseError::malformed(candidate, &e.to_string()))?;
    if !SUPPORTED_SCHEMES.contains(&url.scheme()) {
        return Err(ParseError::unsupported_scheme(candidate, url.scheme()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ParseError::no_host(candidate));
    }
    Ok(TargetKind::Url)
}

fn is_ignorable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with("//")
}

/// Strips one pair of matching surrounding quotes.
fn strip_quotes(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    value
}
