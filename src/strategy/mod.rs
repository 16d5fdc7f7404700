//! Transfer strategies, one per protocol family.
//!
//! # Architecture
//!
//! - [`TransferStrategy`] - Async trait every protocol client implements
//! - [`StrategySet`] - Priority-ordered collection used by the engine to pick
//!   a strategy per target
//! - [`HttpStrategy`] - In-process streaming HTTP(S) with range resume
//! - [`FtpStrategy`] / [`SftpStrategy`] - `curl` child process
//! - [`TorrentStrategy`] - `aria2c` child process for magnet links
//! - [`VideoStrategy`] - `yt-dlp` child process for video-hosting pages
//!
//! A strategy performs exactly one attempt per call. Retrying is the
//! caller's job (see [`with_retry`](crate::download::with_retry)).

mod external;
mod ftp;
mod http;
mod sftp;
mod torrent;
mod video;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::download::{DEFAULT_MAX_RETRIES, DuplicatePolicy, TransferError, TransferStats};
use crate::events::{EventSink, TransferEvent};
use crate::progress::{ProgressTracker, TaskId};
use crate::user_agent;

pub use ftp::FtpStrategy;
pub use http::HttpStrategy;
pub use sftp::SftpStrategy;
pub use torrent::{TorrentStrategy, is_magnet_link};
pub use video::{VideoStrategy, is_video_host};

/// Protocol family of a target.
///
/// Derives `Ord` in selection priority: a target claimed by several
/// strategies goes to the one that sorts first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    /// BitTorrent magnet link.
    BitTorrent = 0,
    /// Page on a video-hosting site.
    Video = 1,
    /// `sftp://` URL.
    Sftp = 2,
    /// `ftp://` or `ftps://` URL.
    Ftp = 3,
    /// `http://` or `https://` URL.
    Http = 4,
}

/// Selection order used by [`StrategySet::select`].
pub const PRIORITY: [Protocol; 5] = [
    Protocol::BitTorrent,
    Protocol::Video,
    Protocol::Sftp,
    Protocol::Ftp,
    Protocol::Http,
];

impl Protocol {
    /// Lowercase name for logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BitTorrent => "bittorrent",
            Self::Video => "video",
            Self::Sftp => "sftp",
            Self::Ftp => "ftp",
            Self::Http => "http",
        }
    }

    /// Whether one target may produce several files.
    ///
    /// Multi-file strategies write into the output directory instead of a
    /// planned destination file.
    #[must_use]
    pub fn is_multi_file(self) -> bool {
        matches!(self, Self::BitTorrent | Self::Video)
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-batch transfer settings shared by every task.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay after the first failed attempt.
    pub retry_base_delay: Duration,
    /// Cap on any single retry delay.
    pub max_retry_delay: Duration,
    /// Read timeout (HTTP) or stall timeout (external clients).
    pub timeout: Duration,
    /// Connect timeout.
    pub connect_timeout: Duration,
    /// User-Agent sent by the HTTP strategy.
    pub user_agent: String,
    /// Whether partially written files may be resumed.
    pub resume: bool,
    /// What to do when a destination file already exists.
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: crate::download::DEFAULT_BASE_DELAY,
            max_retry_delay: crate::download::DEFAULT_MAX_DELAY,
            timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            user_agent: user_agent::default_user_agent(),
            resume: true,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// One target scheduled for transfer.
#[derive(Debug, Clone)]
pub struct TransferTask {
    /// Position in the input list.
    pub index: usize,
    /// The target string as given.
    pub target: String,
    /// Protocol of the selected strategy.
    pub protocol: Protocol,
    /// Destination file, or the output directory for multi-file strategies.
    pub destination: PathBuf,
    /// Batch settings.
    pub options: Arc<TransferOptions>,
}

/// Progress and event plumbing handed to a strategy for one attempt.
pub struct TransferContext {
    tracker: Arc<ProgressTracker>,
    events: Arc<dyn EventSink>,
    task_id: TaskId,
    target: String,
}

impl fmt::Debug for TransferContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferContext")
            .field("task_id", &self.task_id)
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl TransferContext {
    /// Creates a context for `task_id`.
    pub fn new(
        tracker: Arc<ProgressTracker>,
        events: Arc<dyn EventSink>,
        task_id: TaskId,
        target: impl Into<String>,
    ) -> Self {
        Self {
            tracker,
            events,
            task_id,
            target: target.into(),
        }
    }

    /// The aggregate progress stream id.
    #[must_use]
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Reports aggregate progress.
    ///
    /// Emits a `download_progress` event whenever the tracker renders.
    pub fn report(&self, bytes: u64, total: Option<u64>) {
        if self.tracker.update(&self.task_id, bytes, total) {
            self.events.emit(TransferEvent::DownloadProgress {
                target: self.target.clone(),
                bytes,
                total,
            });
        }
    }

    /// Opens the `n`-th per-file stream of a multi-file transfer.
    #[must_use]
    pub fn start_file(&self, n: usize, filename: &str, total: Option<u64>) -> TaskId {
        let id = self.task_id.child(n);
        self.tracker.start(&id, filename, total);
        id
    }

    /// Reports progress on a per-file stream.
    pub fn report_file(&self, id: &TaskId, bytes: u64, total: Option<u64>) {
        self.tracker.update(id, bytes, total);
    }

    /// Closes a per-file stream.
    pub fn finish_file(&self, id: &TaskId) {
        self.tracker.complete(id);
    }

    /// Closes a per-file stream with an error.
    pub fn fail_file(&self, id: &TaskId, message: &str) {
        self.tracker.error(id, message);
    }
}

/// A client for one protocol family.
///
/// # Object Safety
///
/// Uses `async_trait` so strategies can be held as `Arc<dyn TransferStrategy>`.
#[async_trait]
pub trait TransferStrategy: Send + Sync {
    /// Protocol family served by this strategy.
    fn protocol(&self) -> Protocol;

    /// Returns true if this strategy can transfer `target`. Must be pure.
    fn can_handle(&self, target: &str) -> bool;

    /// Performs exactly one transfer attempt.
    ///
    /// Progress goes to `ctx`; the returned error is classified by the
    /// retry policy.
    async fn attempt(
        &self,
        task: &TransferTask,
        ctx: &TransferContext,
    ) -> Result<TransferStats, TransferError>;
}

/// Priority-ordered collection of strategies.
#[derive(Clone, Default)]
pub struct StrategySet {
    strategies: Vec<Arc<dyn TransferStrategy>>,
}

impl fmt::Debug for StrategySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.strategies.iter().map(|s| s.protocol()))
            .finish()
    }
}

impl StrategySet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the five standard strategies.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::Internal`] if the HTTP client cannot be built.
    pub fn standard(options: &TransferOptions) -> Result<Self, TransferError> {
        let mut set = Self::new();
        set.register(Arc::new(TorrentStrategy::new()));
        set.register(Arc::new(VideoStrategy::new()));
        set.register(Arc::new(SftpStrategy::new()));
        set.register(Arc::new(FtpStrategy::new()));
        set.register(Arc::new(HttpStrategy::new(options)?));
        Ok(set)
    }

    /// Adds a strategy, keeping the set sorted by [`PRIORITY`].
    ///
    /// Strategies of the same protocol are tried in registration order.
    pub fn register(&mut self, strategy: Arc<dyn TransferStrategy>) {
        debug!(protocol = %strategy.protocol(), "registering transfer strategy");
        self.strategies.push(strategy);
        self.strategies.sort_by_key(|s| s.protocol());
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, strategy: Arc<dyn TransferStrategy>) -> Self {
        self.register(strategy);
        self
    }

    /// Picks the highest-priority strategy that claims `target`.
    #[must_use]
    pub fn select(&self, target: &str) -> Option<Arc<dyn TransferStrategy>> {
        self.strategies
            .iter()
            .find(|strategy| strategy.can_handle(target))
            .cloned()
    }

    /// Number of registered strategies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    /// Returns true if no strategy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }
}
