//! Error types for transfer attempts.
//!
//! Every strategy reports failures as a [`TransferError`]. The engine never
//! lets one escape a task: it is converted into a
//! [`TransferFailure`](super::TransferFailure) at the task boundary, keeping
//! its [`ErrorKind`] and retryability.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Coarse failure taxonomy reported in batch summaries and events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// No transfer strategy claims the target.
    UnsupportedTargetKind,
    /// Connection could not be established or was dropped.
    Connection,
    /// Connect or read timeout elapsed.
    Timeout,
    /// The remote side or the client tool reported a protocol-level error.
    Protocol,
    /// Destination could not be written.
    FileSystem,
    /// Malformed target list entry.
    Validation,
    /// Task panic or missing client program.
    Internal,
}

impl ErrorKind {
    /// Returns the stable snake_case label used in logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnsupportedTargetKind => "unsupported_target_kind",
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Protocol => "protocol",
            Self::FileSystem => "file_system",
            Self::Validation => "validation",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur during a single transfer attempt.
#[derive(Debug, Error)]
pub enum TransferError {
    /// No registered strategy recognizes the target.
    #[error("no transfer strategy supports target {target}")]
    UnsupportedTarget {
        /// The unrecognized target.
        target: String,
    },

    /// Network-level error (DNS resolution, connection refused, reset).
    #[error("connection error fetching {target}: {message}")]
    Connection {
        /// The target being fetched.
        target: String,
        /// Description of the underlying failure.
        message: String,
    },

    /// Connect or read timeout.
    #[error("timeout fetching {target}")]
    Timeout {
        /// The target that timed out.
        target: String,
    },

    /// HTTP error response (4xx client errors, 5xx server errors).
    #[error("HTTP {status} fetching {target}")]
    HttpStatus {
        /// The URL that returned an error status.
        target: String,
        /// The HTTP status code.
        status: u16,
    },

    /// Protocol error reported by a client library or external program.
    #[error("protocol error fetching {target}: {message}")]
    Protocol {
        /// The target being fetched.
        target: String,
        /// Error description, usually the client's stderr tail.
        message: String,
        /// Whether retrying cannot help (e.g. remote file not found).
        permanent: bool,
    },

    /// File system error writing the destination.
    #[error("IO error writing to {path}: {source}")]
    Io {
        /// The file path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Final file size does not match the size the server announced.
    #[error(
        "integrity check failed for {path}: expected {expected_bytes} bytes, got {actual_bytes}"
    )]
    Integrity {
        /// Destination that failed verification.
        path: PathBuf,
        /// Expected size in bytes.
        expected_bytes: u64,
        /// Actual size in bytes.
        actual_bytes: u64,
    },

    /// The external client program could not be started.
    #[error("client program `{program}` is not available: {source}")]
    ClientUnavailable {
        /// Program name, e.g. `aria2c`.
        program: String,
        /// Spawn error.
        #[source]
        source: std::io::Error,
    },

    /// The transfer task panicked or failed in an unexpected way.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl TransferError {
    /// Creates an unsupported-target error.
    pub fn unsupported(target: impl Into<String>) -> Self {
        Self::UnsupportedTarget {
            target: target.into(),
        }
    }

    /// Creates a connection error.
    pub fn connection(target: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.into(),
        }
    }

    /// Creates a timeout error.
    pub fn timeout(target: impl Into<String>) -> Self {
        Self::Timeout {
            target: target.into(),
        }
    }

    /// Creates an HTTP status error.
    pub fn http_status(target: impl Into<String>, status: u16) -> Self {
        Self::HttpStatus {
            target: target.into(),
            status,
        }
    }

    /// Creates a protocol error.
    pub fn protocol(target: impl Into<String>, message: impl Into<String>, permanent: bool) -> Self {
        Self::Protocol {
            target: target.into(),
            message: message.into(),
            permanent,
        }
    }

    /// Creates an IO error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Creates an integrity mismatch error.
    pub fn integrity(path: impl Into<PathBuf>, expected_bytes: u64, actual_bytes: u64) -> Self {
        Self::Integrity {
            path: path.into(),
            expected_bytes,
            actual_bytes,
        }
    }

    /// Creates a missing-program error.
    pub fn client_unavailable(program: impl Into<String>, source: std::io::Error) -> Self {
        Self::ClientUnavailable {
            program: program.into(),
            source,
        }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Maps a reqwest error to a timeout or connection error.
    pub fn from_reqwest(target: impl Into<String>, error: &reqwest::Error) -> Self {
        if error.is_timeout() {
            Self::timeout(target)
        } else {
            Self::connection(target, error.to_string())
        }
    }

    /// Returns the taxonomy bucket for this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedTarget { .. } => ErrorKind::UnsupportedTargetKind,
            Self::Connection { .. } => ErrorKind::Connection,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::HttpStatus { .. } | Self::Protocol { .. } | Self::Integrity { .. } => {
                ErrorKind::Protocol
            }
            Self::Io { .. } => ErrorKind::FileSystem,
            Self::ClientUnavailable { .. } | Self::Internal { .. } => ErrorKind::Internal,
        }
    }
}
