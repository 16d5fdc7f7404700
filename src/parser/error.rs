//! Error types for target list parsing.

use thiserror::Error;

/// Maximum target length to accept.
/// Magnet links with many trackers run long, so this is well above browser
/// URL limits.
pub const MAX_TARGET_LENGTH: usize = 8192;

/// Why a line of a target list was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The line is not a URL or magnet link.
    #[error("invalid target '{target}': {reason}\n  Suggestion: {suggestion}")]
    InvalidTarget {
        /// The text that failed validation
        target: String,
        /// Why the target is invalid
        reason: String,
        /// How to fix the issue
        suggestion: String,
    },

    /// The URL scheme has no transfer strategy.
    #[error("unsupported scheme '{scheme}' in '{target}'\n  Suggestion: Use http, https, ftp, ftps, sftp or magnet targets")]
    UnsupportedScheme {
        /// The rejected target
        target: String,
        /// Its scheme
        scheme: String,
    },

    /// Target exceeds [`MAX_TARGET_LENGTH`].
    #[error("target too long ({length} chars, max {max}): {preview}...")]
    TargetTooLong {
        /// First characters for display
        preview: String,
        /// Actual length
        length: usize,
        /// Maximum allowed
        max: usize,
    },
}

impl ParseError {
    /// Creates an `InvalidTarget` error for text that does not parse as a URL.
    #[must_use]
    pub fn malformed(target: &str, reason: &str) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: reason.to_string(),
            suggestion: "Check the URL format and try again".to_string(),
        }
    }

    /// Creates an `InvalidTarget` error for a URL without a host.
    #[must_use]
    pub fn no_host(target: &str) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: "URL has no host".to_string(),
            suggestion: "Include a host, e.g. https://example.com/file".to_string(),
        }
    }

    /// Creates an `InvalidTarget` error for a magnet link without an info hash.
    #[must_use]
    pub fn magnet_without_hash(target: &str) -> Self {
        Self::InvalidTarget {
            target: target.to_string(),
            reason: "magnet link has no xt=urn:btih: info hash".to_string(),
            suggestion: "Copy the full magnet link including its xt parameter".to_string(),
        }
    }

    /// Creates an `UnsupportedScheme` error.
    #[must_use]
    pub fn unsupported_scheme(target: &str, scheme: &str) -> Self {
        Self::UnsupportedScheme {
            target: target.to_string(),
            scheme: scheme.to_string(),
        }
    }

    /// Creates a `TargetTooLong` error.
    #[must_use]
    pub fn too_long(target: &str) -> Self {
        Self::TargetTooLong {
            preview: target.chars().take(60).collect(),
            length: target.chars().count(),
            max: MAX_TARGET_LENGTH,
        }
    }
}
