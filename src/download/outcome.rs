//! Terminal results of a transfer attempt.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::error::{ErrorKind, TransferError};
use super::retry::{FailureType, classify_error};

/// Statistics for one successful transfer.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferStats {
    /// Bytes written during this transfer (excludes bytes already on disk before a resume).
    pub bytes_transferred: u64,
    /// Wall-clock time of the successful attempt.
    pub duration: Duration,
    /// Average throughput in bytes per second.
    pub average_speed: f64,
    /// File or directory the transfer wrote to.
    pub path: PathBuf,
    /// Whether an HTTP range resume was used.
    pub resumed: bool,
    /// The destination already existed and the duplicate policy said skip.
    pub already_present: bool,
}

impl TransferStats {
    /// Builds stats, deriving the average speed from bytes and duration.
    #[must_use]
    pub fn new(bytes_transferred: u64, duration: Duration, path: impl Into<PathBuf>) -> Self {
        Self {
            bytes_transferred,
            duration,
            average_speed: average_speed(bytes_transferred, duration),
            path: path.into(),
            resumed: false,
            already_present: false,
        }
    }

    /// Stats for a destination that was left untouched.
    #[must_use]
    pub fn already_present(path: impl Into<PathBuf>) -> Self {
        Self {
            already_present: true,
            ..Self::new(0, Duration::ZERO, path)
        }
    }

    /// Marks the stats as produced by a range resume.
    #[must_use]
    pub fn with_resumed(mut self, resumed: bool) -> Self {
        self.resumed = resumed;
        self
    }
}

/// Bytes per second, zero when no time elapsed.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn average_speed(bytes: u64, duration: Duration) -> f64 {
    let secs = duration.as_secs_f64();
    if secs > 0.0 { bytes as f64 / secs } else { 0.0 }
}

/// A failed transfer, reduced to what the retry loop and summaries need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferFailure {
    /// Taxonomy bucket.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
    /// Whether another attempt may succeed.
    pub failure_type: FailureType,
}

impl TransferFailure {
    /// Creates a failure with an explicit retry classification.
    pub fn new(kind: ErrorKind, message: impl Into<String>, failure_type: FailureType) -> Self {
        Self {
            kind,
            message: message.into(),
            failure_type,
        }
    }

    /// Returns true if the retry policy may try again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.failure_type == FailureType::Transient
    }
}

impl From<TransferError> for TransferFailure {
    fn from(error: TransferError) -> Self {
        let failure_type = classify_error(&error);
        Self::new(error.kind(), error.to_string(), failure_type)
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

/// Terminal result of a transfer.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferOutcome {
    /// The transfer finished.
    Success(TransferStats),
    /// The transfer failed.
    Failure(TransferFailure),
}

impl TransferOutcome {
    /// Returns true for [`TransferOutcome::Success`].
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// Returns the stats for a successful outcome.
    #[must_use]
    pub fn stats(&self) -> Option<&TransferStats> {
        match self {
            Self::Success(stats) => Some(stats),
            Self::Failure(_) => None,
        }
    }

    /// Returns the failure for an unsuccessful outcome.
    #[must_use]
    pub fn failure(&self) -> Option<&TransferFailure> {
        match self {
            Self::Success(_) => None,
            Self::Failure(failure) => Some(failure),
        }
    }
}

impl From<Result<TransferStats, TransferError>> for TransferOutcome {
    fn from(result: Result<TransferStats, TransferError>) -> Self {
        match result {
            Ok(stats) => Self::Success(stats),
            Err(error) => Self::Failure(error.into()),
        }
    }
}
