//! Batch engine: strategy dispatch, bounded concurrency, and retries.
//!
//! # Overview
//!
//! [`DownloadEngine::run_batch`] takes an ordered list of targets, picks a
//! [`TransferStrategy`](crate::strategy::TransferStrategy) for each one,
//! and runs the transfers under a semaphore. Every transfer goes through
//! [`with_retry`](super::with_retry). Results come back in input order no
//! matter which transfer finished first.
//!
//! # Example
//!
//! ```no_run
//! use omnifetch_core::download::DownloadEngine;
//! use omnifetch_core::strategy::{StrategySet, TransferOptions};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let options = TransferOptions::default();
//! let strategies = StrategySet::standard(&options)?;
//! let engine = DownloadEngine::new("./downloads", options, strategies);
//! let targets = vec!["https://example.com/file.zip".to_string()];
//! let result = engine.run_batch(&targets, 4, false).await?;
//! println!("{} succeeded, {} failed", result.succeeded, result.failed);
//! # Ok(())
//! # }
//! ```

mod task;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use super::retry::RetryPolicy;
use super::{TransferError, TransferOutcome};
use crate::events::{EventSink, TracingSink};
use crate::notify::{NoopNotifier, Notifier};
use crate::progress::ProgressTracker;
use crate::strategy::{Protocol, StrategySet, TransferOptions};

use task::TaskRunner;

/// Minimum allowed concurrency value.
pub const MIN_CONCURRENCY: usize = 1;

/// Maximum allowed concurrency value.
pub const MAX_CONCURRENCY: usize = 100;

/// Default concurrency if not specified.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Error type for batch preconditions.
///
/// Per-target failures never surface here; they become
/// [`TransferOutcome::Failure`] entries in the [`BatchResult`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The target list was empty.
    #[error("no targets to download")]
    EmptyTargets,

    /// Invalid concurrency value provided.
    #[error(
        "invalid concurrency value {value}: must be between {MIN_CONCURRENCY} and {MAX_CONCURRENCY}"
    )]
    InvalidConcurrency {
        /// The invalid value that was provided.
        value: usize,
    },

    /// Semaphore was closed unexpectedly.
    #[error("semaphore closed unexpectedly")]
    SemaphoreClosed,
}

/// Final state of one target.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetResult {
    /// Position in the input list.
    pub index: usize,
    /// The target as given.
    pub target: String,
    /// Protocol of the selected strategy, `None` if no strategy matched.
    pub protocol: Option<Protocol>,
    /// Terminal outcome.
    pub outcome: TransferOutcome,
    /// Attempts made (0 when nothing was transferred).
    pub attempts: u32,
}

impl TargetResult {
    fn panicked(index: usize, target: String, message: &str) -> Self {
        let error = TransferError::internal(format!("transfer task panicked: {message}"));
        Self {
            index,
            target,
            protocol: None,
            outcome: TransferOutcome::Failure(error.into()),
            attempts: 0,
        }
    }
}

/// Aggregate result of [`DownloadEngine::run_batch`].
///
/// `succeeded + failed + skipped` always equals the number of input
/// targets, and `results[i].index == i` for every admitted target.
#[derive(Debug, Clone)]
pub struct BatchResult {
    /// One entry per admitted target, in input order.
    pub results: Vec<TargetResult>,
    /// Targets that ended in success.
    pub succeeded: usize,
    /// Targets that ended in failure.
    pub failed: usize,
    /// Targets never admitted because `stop_on_error` halted the batch.
    pub skipped: usize,
    /// Bytes moved by successful transfers.
    pub total_bytes: u64,
    /// Wall-clock time of the batch.
    pub duration: Duration,
}

impl BatchResult {
    /// Number of targets in the batch, admitted or not.
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }

    /// Returns true if every target succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failed == 0 && self.skipped == 0
    }

    /// Retries across the batch (attempts beyond the first).
    #[must_use]
    pub fn retries(&self) -> u32 {
        self.results
            .iter()
            .map(|r| r.attempts.saturating_sub(1))
            .sum()
    }
}

/// Counters updated by concurrent tasks.
#[derive(Debug, Default)]
struct BatchCounters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    total_bytes: AtomicU64,
}

impl BatchCounters {
    fn record(&self, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Success(stats) => {
                self.succeeded.fetch_add(1, Ordering::SeqCst);
                self.total_bytes
                    .fetch_add(stats.bytes_transferred, Ordering::SeqCst);
            }
            TransferOutcome::Failure(_) => {
                self.failed.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

/// Runs batches of transfers.
///
/// # Concurrency Model
///
/// - Each target runs in its own Tokio task
/// - A semaphore permit is acquired, in input order, before a task is spawned
/// - Permits are released automatically when tasks complete (RAII)
/// - With `stop_on_error`, admission halts once any task has failed
///
/// # Retry Behavior
///
/// - Transient errors are retried with exponential backoff
/// - Permanent errors fail immediately
/// - Backoff sleeps suspend only the task that is retrying
pub struct DownloadEngine {
    runner: Arc<TaskRunner>,
    batches: AtomicU64,
}

impl std::fmt::Debug for DownloadEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadEngine")
            .field("output_dir", &self.runner.output_dir())
            .field("retry_policy", self.runner.policy())
            .finish_non_exhaustive()
    }
}

impl DownloadEngine {
    /// Creates an engine writing into `output_dir`.
    ///
    /// Progress is tracked silently, events go to `tracing`, and
    /// notifications are dropped until overridden with the `with_*`
    /// builders.
    pub fn new(
        output_dir: impl Into<PathBuf>,
        options: TransferOptions,
        strategies: StrategySet,
    ) -> Self {
        let policy = RetryPolicy::new(
            options.max_retries.saturating_add(1),
            options.retry_base_delay,
            options.max_retry_delay,
        );
        let output_dir = output_dir.into();
        debug!(
            output_dir = %output_dir.display(),
            strategies = strategies.len(),
            max_attempts = policy.max_attempts(),
            "creating download engine"
        );
        Self {
            runner: Arc::new(TaskRunner::new(
                output_dir,
                Arc::new(options),
                strategies,
                policy,
                Arc::new(ProgressTracker::silent()),
                Arc::new(TracingSink),
                Arc::new(NoopNotifier),
            )),
            batches: AtomicU64::new(0),
        }
    }

    /// Replaces the retry policy.
    #[must_use]
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        self.map_runner(|runner| runner.with_policy(policy))
    }

    /// Replaces the progress tracker.
    #[must_use]
    pub fn with_tracker(self, tracker: Arc<ProgressTracker>) -> Self {
        self.map_runner(|runner| runner.with_tracker(tracker))
    }

    /// Replaces the event sink.
    #[must_use]
    pub fn with_events(self, events: Arc<dyn EventSink>) -> Self {
        self.map_runner(|runner| runner.with_events(events))
    }

    /// Replaces the notifier.
    #[must_use]
    pub fn with_notifier(self, notifier: Arc<dyn Notifier>) -> Self {
        self.map_runner(|runner| runner.with_notifier(notifier))
    }

    fn map_runner(self, f: impl FnOnce(TaskRunner) -> TaskRunner) -> Self {
        let runner = Arc::unwrap_or_clone(self.runner);
        Self {
            runner: Arc::new(f(runner)),
            batches: self.batches,
        }
    }

    /// Directory transfers are written into.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        self.runner.output_dir()
    }

    /// The retry policy applied to every transfer.
    #[must_use]
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.runner.policy()
    }

    /// Transfers every target and returns the results in input order.
    ///
    /// At most `concurrency` transfers run at once; `1` means strictly
    /// sequential in input order. With `stop_on_error`, no new target is
    /// admitted once a failure has been observed; transfers already
    /// running finish and the rest are counted as skipped.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyTargets`] for an empty list and
    /// [`EngineError::InvalidConcurrency`] for a limit outside 1-100.
    /// Individual transfer failures do NOT cause this method to error.
    #[instrument(skip(self, targets), fields(targets = targets.len()))]
    pub async fn run_batch(
        &self,
        targets: &[String],
        concurrency: usize,
        stop_on_error: bool,
    ) -> Result<BatchResult, EngineError> {
        if targets.is_empty() {
            return Err(EngineError::EmptyTargets);
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&concurrency) {
            return Err(EngineError::InvalidConcurrency { value: concurrency });
        }

        let batch = self.batches.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let counters = Arc::new(BatchCounters::default());
        let halted = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::with_capacity(targets.len());

        info!(batch, concurrency, stop_on_error, "starting batch");

        for (index, target) in targets.iter().enumerate() {
            // Acquire semaphore permit (blocks if at concurrency limit)
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|_| EngineError::SemaphoreClosed)?;

            if stop_on_error && halted.load(Ordering::SeqCst) {
                info!(
                    admitted = index,
                    skipped = targets.len() - index,
                    "failure observed, not admitting remaining targets"
                );
                break;
            }

            let runner = Arc::clone(&self.runner);
            let counters = Arc::clone(&counters);
            let halted = Arc::clone(&halted);
            let target = target.clone();

            let handle = tokio::spawn(async move {
                // Permit is dropped when this block exits (RAII)
                let _permit = permit;

                let result = runner.run(batch, index, target).await;
                counters.record(&result.outcome);
                if !result.outcome.is_success() {
                    halted.store(true, Ordering::SeqCst);
                }
                result
            });
            handles.push((index, handle));
        }

        let admitted = handles.len();
        debug!(admitted, "waiting for transfers to complete");

        let mut results = Vec::with_capacity(admitted);
        for (index, handle) in handles {
            match handle.await {
                Ok(result) => results.push(result),
                Err(e) => {
                    warn!(index, error = %e, "transfer task panicked");
                    let message = e.to_string();
                    self.runner.abandon(batch, index, &message);
                    let result = TargetResult::panicked(index, targets[index].clone(), &message);
                    self.runner.report_final(&result.target, &result.outcome);
                    counters.record(&result.outcome);
                    results.push(result);
                }
            }
        }
        results.sort_by_key(|r| r.index);

        let result = BatchResult {
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            skipped: targets.len() - admitted,
            total_bytes: counters.total_bytes.load(Ordering::SeqCst),
            duration: started.elapsed(),
            results,
        };
        info!(
            succeeded = result.succeeded,
            failed = result.failed,
            skipped = result.skipped,
            retries = result.retries(),
            total_bytes = result.total_bytes,
            "batch complete"
        );
        self.runner
            .notify_batch_complete(result.total(), result.total_bytes, result.duration);
        Ok(result)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::download::{ErrorKind, TransferStats};
    use crate::events::MemorySink;
    use crate::strategy::{TransferContext, TransferStrategy, TransferTask};

    /// Succeeds for `http://ok/...` and, after 50ms, for `http://slow/...`.
    /// Fails permanently for `http://bad/...` and panics for
    /// `http://panic/...`.
    struct ScriptedStrategy {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TransferStrategy for ScriptedStrategy {
        fn protocol(&self) -> Protocol {
            Protocol::Http
        }

        fn can_handle(&self, target: &str) -> bool {
            target.starts_with("http://")
        }

        async fn attempt(
            &self,
            task: &TransferTask,
            ctx: &TransferContext,
        ) -> Result<TransferStats, TransferError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if task.target.starts_with("http://panic/") {
                panic!("scripted panic");
            }
            if task.target.starts_with("http://bad/") {
                return Err(TransferError::http_status(&task.target, 404));
            }
            if task.target.starts_with("http://slow/") {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
            ctx.report(3, Some(3));
            Ok(TransferStats::new(3, Duration::from_millis(1), &task.destination))
        }
    }

    fn engine(dir: &TempDir) -> (DownloadEngine, Arc<ScriptedStrategy>) {
        let strategy = Arc::new(ScriptedStrategy {
            calls: AtomicUsize::new(0),
        });
        let strategies = StrategySet::new().with(Arc::clone(&strategy) as Arc<dyn TransferStrategy>);
        let options = TransferOptions {
            max_retries: 0,
            ..TransferOptions::default()
        };
        (DownloadEngine::new(dir.path(), options, strategies), strategy)
    }

    fn targets(list: &[&str]) -> Vec<String> {
        list.iter().map(|t| (*t).to_string()).collect()
    }

    // ==================== Precondition Tests ====================

    #[tokio::test]
    async fn test_run_batch_rejects_empty_targets() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let result = engine.run_batch(&[], 4, false).await;
        assert!(matches!(result, Err(EngineError::EmptyTargets)));
    }

    #[tokio::test]
    async fn test_run_batch_rejects_invalid_concurrency() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let list = targets(&["http://ok/a"]);
        assert!(matches!(
            engine.run_batch(&list, 0, false).await,
            Err(EngineError::InvalidConcurrency { value: 0 })
        ));
        assert!(matches!(
            engine.run_batch(&list, 101, false).await,
            Err(EngineError::InvalidConcurrency { value: 101 })
        ));
    }

    #[test]
    fn test_engine_builds_policy_from_options() {
        let dir = TempDir::new().unwrap();
        let options = TransferOptions {
            max_retries: 2,
            ..TransferOptions::default()
        };
        let engine = DownloadEngine::new(dir.path(), options, StrategySet::new());
        assert_eq!(engine.retry_policy().max_attempts(), 3);
        assert_eq!(engine.output_dir(), dir.path());
    }

    // ==================== Batch Tests ====================

    #[tokio::test]
    async fn test_run_batch_mixed_outcomes_keep_input_order() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let list = targets(&["http://ok/a.bin", "gopher://nope", "http://bad/c.bin"]);

        let result = engine.run_batch(&list, 2, false).await.unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 2);
        assert_eq!(result.skipped, 0);
        assert_eq!(result.total_bytes, 3);
        let order: Vec<&str> = result.results.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(order, vec!["http://ok/a.bin", "gopher://nope", "http://bad/c.bin"]);
        let unsupported = result.results[1].outcome.failure().unwrap();
        assert_eq!(unsupported.kind, ErrorKind::UnsupportedTargetKind);
        assert_eq!(result.results[1].attempts, 0);
        let stats = result.results[0].outcome.stats().unwrap();
        assert_eq!(stats.path, dir.path().join("a.bin"));
    }

    #[tokio::test]
    async fn test_run_batch_stop_on_error_sequential() {
        let dir = TempDir::new().unwrap();
        let (engine, strategy) = engine(&dir);
        let list = targets(&["http://ok/a", "http://bad/b", "http://ok/c", "http://ok/d"]);

        let result = engine.run_batch(&list, 1, true).await.unwrap();

        assert_eq!(result.succeeded, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.skipped, 2);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.total(), 4);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_batch_stop_on_error_concurrent_lets_running_task_finish() {
        let dir = TempDir::new().unwrap();
        let (engine, strategy) = engine(&dir);
        let list = targets(&[
            "http://bad/a",
            "http://slow/b",
            "http://ok/c",
            "http://ok/d",
            "http://ok/e",
        ]);

        let result = engine.run_batch(&list, 2, true).await.unwrap();

        assert_eq!(result.failed, 1);
        assert_eq!(result.succeeded, 1);
        assert_eq!(result.skipped, list.len() - 2);
        assert_eq!(result.results.len(), 2);
        assert!(result.results[1].outcome.is_success(), "in-flight transfer must finish");
        assert!(result.results.iter().all(|r| r.index < 2));
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_run_batch_records_panic_as_internal_failure() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let tracker = Arc::new(ProgressTracker::silent());
        let engine = engine.with_tracker(Arc::clone(&tracker));
        let list = targets(&["http://panic/a", "http://ok/b"]);

        let result = engine.run_batch(&list, 2, false).await.unwrap();

        assert_eq!(result.results[0].index, 0);
        let failure = result.results[0].outcome.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Internal);
        assert!(result.results[1].outcome.is_success());
        assert_eq!(result.succeeded + result.failed, 2);
        // Nothing of the dead task survives the batch
        assert_eq!(tracker.active_count(), 0);
        assert_eq!(engine.runner.claimed_count(), 0);
    }

    #[tokio::test]
    async fn test_run_batch_emits_lifecycle_events() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir);
        let sink = Arc::new(MemorySink::new());
        let engine = engine.with_events(Arc::clone(&sink) as Arc<dyn EventSink>);

        engine
            .run_batch(&targets(&["http://ok/a", "http://bad/b"]), 1, false)
            .await
            .unwrap();

        assert_eq!(sink.named("download_start").len(), 2);
        assert_eq!(sink.named("download_complete").len(), 1);
        assert_eq!(sink.named("download_error").len(), 1);
    }
}
