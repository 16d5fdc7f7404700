//! Integration tests for the target list parser.
//!
//! These tests verify the parser's behavior with realistic inputs
//! and across module boundaries.

use omnifetch_core::parser::{ParseError, TargetKind, classify_target, parse_targets};
use omnifetch_core::{StrategySet, TransferOptions};

/// A realistic mirror list with comments, quotes and junk.
#[test]
fn test_parse_realistic_target_list() {
    let input = r#"
# Release mirrors
https://mirror.example.org/releases/os-24.04.iso
  "ftp://ftp.example.org/pub/os-24.04.iso"
// the sftp box needs keys
sftp://backup.example.org/srv/archive.tar.gz
'magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a&dn=os-24.04.iso'
https://www.youtube.com/watch?v=dQw4w9WgXcQ

this is commentary, not a target
mailto:ops@example.org
"#;

    let result = parse_targets(input);

    assert_eq!(result.len(), 5, "Should accept exactly 5 targets");
    assert_eq!(result.skipped_count(), 2);
    assert_eq!(result.items[1].value, "ftp://ftp.example.org/pub/os-24.04.iso");
    assert_eq!(result.items[3].kind, TargetKind::Magnet);
    assert!(matches!(
        result.skipped[1].error,
        ParseError::UnsupportedScheme { .. }
    ));
}

/// Every accepted target has a strategy in the standard set.
#[test]
fn test_every_parsed_target_has_a_strategy() {
    let input = "\
https://example.com/a.bin
ftp://ftp.example.com/b.bin
ftps://ftp.example.com/c.bin
sftp://host.example.com/d.bin
magnet:?xt=urn:btih:c12fe1c06bba254a9dc9f519b335aa7c1367a88a
https://vimeo.com/76979871
";
    let strategies = StrategySet::standard(&TransferOptions::default()).unwrap();

    let result = parse_targets(input);

    assert_eq!(result.len(), 6);
    for target in result.targets() {
        assert!(
            strategies.select(&target).is_some(),
            "no strategy for {target}"
        );
    }
}

/// Line numbers refer to the original input, comments included.
#[test]
fn test_line_numbers_survive_skipped_lines() {
    let result = parse_targets("# header\n\nnope\nhttps://example.com/x\n");
    assert_eq!(result.items[0].line, 4);
    assert_eq!(result.skipped[0].line, 3);
    assert_eq!(result.skipped[0].content, "nope");
}

#[test]
fn test_classify_target_public_api() {
    assert_eq!(
        classify_target("https://example.com/file").unwrap(),
        TargetKind::Url
    );
    assert!(classify_target("https://").is_err());
    assert!(classify_target("").is_err());
}

/// Windows line endings parse the same as Unix ones.
#[test]
fn test_crlf_input() {
    let result = parse_targets("https://example.com/a\r\nhttps://example.com/b\r\n");
    assert_eq!(
        result.targets(),
        vec!["https://example.com/a", "https://example.com/b"]
    );
}
