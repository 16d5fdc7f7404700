//! Download orchestration: outcomes, retries, destinations, and the batch
//! engine.
//!
//! # Features
//!
//! - Bounded-concurrency batches with index-stable results
//! - Exponential-backoff retry with transient/permanent classification
//! - Destination planning with duplicate policies and resume reuse
//! - Structured error types with full context

pub mod constants;
mod engine;
mod error;
pub mod filename;
mod outcome;
mod retry;

pub use engine::{
    BatchResult, DEFAULT_CONCURRENCY, DownloadEngine, EngineError, MAX_CONCURRENCY,
    MIN_CONCURRENCY, TargetResult,
};
pub use error::{ErrorKind, TransferError};
pub use filename::{
    DestinationPlan, DuplicatePolicy, ParseDuplicatePolicyError, ensure_dir, filename_from_target,
    resolve_destination, sanitize_filename,
};
pub use outcome::{TransferFailure, TransferOutcome, TransferStats, average_speed};
pub use retry::{
    DEFAULT_BASE_DELAY, DEFAULT_MAX_DELAY, DEFAULT_MAX_RETRIES, FailureType, RetryDecision,
    RetryPolicy, RetryReport, classify_error, classify_http_status, with_retry,
};
