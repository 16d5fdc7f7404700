//! omnifetch core library
//!
//! Fetches HTTP(S), FTP, SFTP, BitTorrent magnet and video-hosting targets
//! from a list, with bounded concurrency, retry with backoff, resumable
//! HTTP transfers, and live per-transfer progress.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`download`] - Batch engine, retry policy, outcomes, destination planning
//! - [`strategy`] - One transfer strategy per protocol family
//! - [`progress`] - Per-transfer byte counters, speed, ETA, terminal bars
//! - [`resume`] - Resume markers stored next to partial files
//! - [`parser`] - Target list parsing
//! - [`events`] - Structured lifecycle events
//! - [`notify`] - Completion notifications

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod download;
pub mod events;
pub mod notify;
pub mod parser;
pub mod progress;
pub mod resume;
pub mod strategy;
mod user_agent;

// Re-export commonly used types
pub use download::{
    BatchResult, DEFAULT_CONCURRENCY, DEFAULT_MAX_RETRIES, DownloadEngine, DuplicatePolicy,
    EngineError, ErrorKind, FailureType, RetryPolicy, TargetResult, TransferError,
    TransferOutcome, TransferStats, classify_error,
};
pub use events::{EventSink, TracingSink, TransferEvent};
pub use notify::{DesktopNotifier, LogNotifier, NoopNotifier, Notifier};
pub use parser::{ParseResult, parse_targets};
pub use progress::{BarRenderer, ProgressTracker};
pub use strategy::{Protocol, StrategySet, TransferOptions, TransferStrategy};
