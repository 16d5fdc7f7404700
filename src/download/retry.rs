//! Retry logic with exponential backoff for transient transfer failures.
//!
//! This module provides the [`RetryPolicy`] and [`FailureType`] types for
//! classifying transfer errors and determining retry behavior, plus
//! [`with_retry`], which wraps one strategy attempt in the retry loop.
//!
//! # Overview
//!
//! When an attempt fails, the error is classified into a [`FailureType`]:
//! - [`FailureType::Transient`] - Temporary failures that may succeed on retry
//! - [`FailureType::Permanent`] - Failures that won't succeed regardless of retries
//!
//! The [`RetryPolicy`] then determines whether to retry based on failure type
//! and attempt count. The delay before attempt `n + 1` is
//! `base_delay * 2^(n - 1)`, capped at `max_delay`, plus optional jitter.
//!
//! # Example
//!
//! ```
//! use omnifetch_core::download::{FailureType, RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(3, Duration::from_millis(500), Duration::from_secs(32));
//!
//! match policy.should_retry(FailureType::Transient, 1) {
//!     RetryDecision::Retry { delay, attempt } => {
//!         assert_eq!(delay, Duration::from_millis(500));
//!         assert_eq!(attempt, 2);
//!     }
//!     RetryDecision::DoNotRetry { .. } => unreachable!(),
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, instrument, warn};

use super::error::TransferError;
use super::outcome::TransferOutcome;
use crate::events::{EventSink, TransferEvent};

/// Default maximum retries after the initial attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default base delay for exponential backoff (1 second).
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default maximum delay cap (32 seconds).
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(32);

/// Classification of transfer failure types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    /// Temporary failure that may succeed on retry.
    ///
    /// Examples: timeout, connection reset, 5xx server errors.
    Transient,

    /// Permanent failure that won't succeed regardless of retries.
    ///
    /// Examples: 404 Not Found, unsupported target, read-only destination.
    Permanent,
}

/// Decision on whether to retry a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the specified delay.
    Retry {
        /// How long to wait before retrying.
        delay: Duration,
        /// Which attempt number this will be (1-indexed, so first retry is attempt 2).
        attempt: u32,
    },

    /// Do not retry.
    DoNotRetry {
        /// Human-readable reason why retry is not attempted.
        reason: String,
    },
}

/// Configuration for retry behavior with exponential backoff.
///
/// # Default Values
///
/// - `max_attempts`: 4 (one attempt plus [`DEFAULT_MAX_RETRIES`])
/// - `base_delay`: 1 second
/// - `max_delay`: 32 seconds
/// - `jitter`: none
///
/// # Delay Calculation
///
/// ```text
/// delay = min(base_delay * 2^(attempt - 1), max_delay) + random(0..=jitter)
/// ```
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial attempt).
    max_attempts: u32,

    /// Delay after the first failed attempt.
    base_delay: Duration,

    /// Cap on any single backoff delay.
    max_delay: Duration,

    /// Upper bound of random jitter added to each delay.
    jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_RETRIES + 1,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter: Duration::ZERO,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Maximum attempts including initial (clamped to >= 1)
    /// * `base_delay` - Delay after the first failure
    /// * `max_delay` - Cap on any single delay
    #[must_use]
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            jitter: Duration::ZERO,
        }
    }

    /// Creates a policy with a custom `max_attempts`, using defaults for other settings.
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            ..Self::default()
        }
    }

    /// Adds up to `jitter` of random delay to each backoff.
    #[must_use]
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Returns the maximum number of attempts configured.
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns the base backoff delay.
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    /// Upper bound on the total time spent sleeping between attempts.
    #[must_use]
    pub fn max_total_delay(&self) -> Duration {
        (1..self.max_attempts)
            .map(|attempt| self.backoff(attempt) + self.jitter)
            .fold(Duration::ZERO, Duration::saturating_add)
    }

    /// Determines whether to retry a failed attempt.
    ///
    /// # Arguments
    ///
    /// * `failure_type` - Classification of the failure
    /// * `attempt` - The attempt number that just failed (1-indexed)
    #[instrument(level = "debug", skip(self), fields(max_attempts = self.max_attempts))]
    pub fn should_retry(&self, failure_type: FailureType, attempt: u32) -> RetryDecision {
        if failure_type == FailureType::Permanent {
            return RetryDecision::DoNotRetry {
                reason: "permanent failure - retry would not help".to_string(),
            };
        }

        if attempt >= self.max_attempts {
            debug!(attempt, max = self.max_attempts, "max attempts reached");
            return RetryDecision::DoNotRetry {
                reason: format!("max attempts ({}) exhausted", self.max_attempts),
            };
        }

        let delay = self.calculate_delay(attempt);

        debug!(
            attempt,
            next_attempt = attempt + 1,
            delay_ms = delay.as_millis(),
            "will retry"
        );

        RetryDecision::Retry {
            delay,
            attempt: attempt + 1,
        }
    }

    /// Exponential component of the delay after `attempt` failed.
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32
            .checked_shl(attempt.saturating_sub(1))
            .unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    fn calculate_delay(&self, attempt: u32) -> Duration {
        self.backoff(attempt) + self.calculate_jitter()
    }

    fn calculate_jitter(&self) -> Duration {
        let max_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if max_ms == 0 {
            return Duration::ZERO;
        }
        let jitter_ms = rand::thread_rng().gen_range(0..=max_ms);
        Duration::from_millis(jitter_ms)
    }
}

/// Result of running an attempt under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryReport {
    /// The final outcome (first success, or the last failure).
    pub outcome: TransferOutcome,
    /// How many times the attempt ran.
    pub attempts: u32,
}

/// Runs `attempt` until it succeeds, fails permanently, or the policy's
/// attempt budget is spent.
///
/// The closure receives the 1-indexed attempt number. Every failure that
/// will be retried is reported as a `retry_attempt` event before the
/// backoff sleep. The sleep suspends only the calling task.
#[instrument(level = "debug", skip(policy, events, attempt), fields(max_attempts = policy.max_attempts()))]
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    target: &str,
    events: &dyn EventSink,
    mut attempt: F,
) -> RetryReport
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = TransferOutcome>,
{
    let mut attempt_number = 0u32;

    loop {
        attempt_number += 1;
        debug!(attempt = attempt_number, "attempting transfer");

        let outcome = attempt(attempt_number).await;
        let Some(failure) = outcome.failure() else {
            return RetryReport {
                outcome,
                attempts: attempt_number,
            };
        };

        match policy.should_retry(failure.failure_type, attempt_number) {
            RetryDecision::Retry { delay, .. } => {
                events.emit(TransferEvent::RetryAttempt {
                    target: target.to_string(),
                    attempt_number,
                    delay_ms: u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                });
                tokio::time::sleep(delay).await;
            }
            RetryDecision::DoNotRetry { reason } => {
                warn!(
                    target = %target,
                    attempt = attempt_number,
                    kind = %failure.kind,
                    error = %failure.message,
                    %reason,
                    "giving up on transfer"
                );
                return RetryReport {
                    outcome,
                    attempts: attempt_number,
                };
            }
        }
    }
}

/// Classifies a transfer error into a failure type for retry decisions.
///
/// # Classification
///
/// | Error | Type | Rationale |
/// |-------|------|-----------|
/// | UnsupportedTarget | Permanent | No strategy will appear |
/// | Connection (most) | Transient | Server may come back |
/// | Connection (TLS) | Permanent | Certificate/config issue |
/// | Timeout | Transient | Network may recover |
/// | HttpStatus | by status | See [`classify_http_status`] |
/// | Protocol | flag | Strategy decides |
/// | Io (interrupted, timed out, would block) | Transient | Local hiccup |
/// | Io (other) | Permanent | Destination unwritable |
/// | Integrity | Transient | A fresh download may fix it |
/// | ClientUnavailable / Internal | Permanent | Environment issue |
#[must_use]
pub fn classify_error(error: &TransferError) -> FailureType {
    match error {
        TransferError::Connection { message, .. } => {
            if is_tls_message(message) {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        TransferError::Timeout { .. } | TransferError::Integrity { .. } => FailureType::Transient,
        TransferError::HttpStatus { status, .. } => classify_http_status(*status),
        TransferError::Protocol { permanent, .. } => {
            if *permanent {
                FailureType::Permanent
            } else {
                FailureType::Transient
            }
        }
        TransferError::Io { source, .. } => match source.kind() {
            std::io::ErrorKind::Interrupted
            | std::io::ErrorKind::TimedOut
            | std::io::ErrorKind::WouldBlock => FailureType::Transient,
            _ => FailureType::Permanent,
        },
        TransferError::UnsupportedTarget { .. }
        | TransferError::ClientUnavailable { .. }
        | TransferError::Internal { .. } => FailureType::Permanent,
    }
}

/// Classifies an HTTP status code into a failure type.
///
/// Explicit match arms are used for each status code for documentation purposes,
/// even though some return the same value.
#[allow(clippy::match_same_arms)]
#[must_use]
pub fn classify_http_status(status: u16) -> FailureType {
    match status {
        400 => FailureType::Permanent, // Bad Request
        401 => FailureType::Permanent, // Unauthorized
        403 => FailureType::Permanent, // Forbidden
        404 => FailureType::Permanent, // Not Found
        408 => FailureType::Transient, // Request Timeout
        410 => FailureType::Permanent, // Gone
        416 => FailureType::Transient, // Range Not Satisfiable - next attempt restarts from zero
        429 => FailureType::Transient, // Too Many Requests
        451 => FailureType::Permanent, // Unavailable For Legal Reasons

        500 => FailureType::Transient, // Internal Server Error
        502 => FailureType::Transient, // Bad Gateway
        503 => FailureType::Transient, // Service Unavailable
        504 => FailureType::Transient, // Gateway Timeout

        status if (400..500).contains(&status) => FailureType::Permanent,
        status if (500..600).contains(&status) => FailureType::Transient,

        _ => FailureType::Permanent,
    }
}

fn is_tls_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("certificate")
        || lower.contains("tls")
        || lower.contains("ssl")
        || lower.contains("handshake")
}
