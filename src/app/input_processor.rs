//! Assembly of target list text from positional arguments and/or stdin.

use std::fs;
use std::io::{self, IsTerminal, Read};
use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

/// Collected input text plus whether stdin was piped but empty.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct InputText {
    pub(crate) text: Option<String>,
    pub(crate) piped_stdin_was_empty: bool,
}

/// Builds the target list text.
///
/// Each positional argument naming an existing file is replaced by that
/// file's contents; every other argument is taken as a target line. Stdin is
/// read only when no positional argument is given and it is not a terminal.
pub(crate) fn process_input(targets: &[String]) -> Result<InputText> {
    if !targets.is_empty() {
        return Ok(InputText {
            text: Some(expand_positionals(targets)?),
            piped_stdin_was_empty: false,
        });
    }

    if io::stdin().is_terminal() {
        return Ok(InputText::default());
    }

    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read target list from stdin")?;
    if buffer.trim().is_empty() {
        return Ok(InputText {
            text: None,
            piped_stdin_was_empty: true,
        });
    }
    Ok(InputText {
        text: Some(buffer),
        piped_stdin_was_empty: false,
    })
}

fn expand_positionals(targets: &[String]) -> Result<String> {
    let mut segments = Vec::with_capacity(targets.len());
    for target in targets {
        let path = Path::new(target);
        if looks_like_list_file(target, path) {
            debug!(path = %path.display(), "reading target list file");
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read target list '{}'", path.display()))?;
            segments.push(contents);
        } else {
            segments.push(target.clone());
        }
    }
    Ok(segments.join("\n"))
}

fn looks_like_list_file(target: &str, path: &Path) -> bool {
    !target.contains("://") && !target.starts_with("magnet:") && path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_positional_targets_are_joined_in_order() {
        let text = expand_positionals(&[
            "https://example.com/a".to_string(),
            "https://example.com/b".to_string(),
        ])
        .unwrap();
        assert_eq!(text, "https://example.com/a\nhttps://example.com/b");
    }

    #[test]
    fn test_list_file_contents_are_inlined() {
        let temp = TempDir::new().unwrap();
        let list = temp.path().join("targets.txt");
        fs::write(&list, "# mirrors\nhttps://example.com/b\n").unwrap();

        let text = expand_positionals(&[
            "https://example.com/a".to_string(),
            list.to_string_lossy().into_owned(),
        ])
        .unwrap();
        assert!(text.starts_with("https://example.com/a\n# mirrors"));
        assert!(text.contains("https://example.com/b"));
    }

    #[test]
    fn test_missing_path_is_kept_as_target_text() {
        let text = expand_positionals(&["./does-not-exist.txt".to_string()]).unwrap();
        assert_eq!(text, "./does-not-exist.txt");
    }

    #[test]
    fn test_positionals_skip_stdin() {
        let input = process_input(&["https://example.com/a".to_string()]).unwrap();
        assert_eq!(input.text.as_deref(), Some("https://example.com/a"));
        assert!(!input.piped_stdin_was_empty);
    }
}
