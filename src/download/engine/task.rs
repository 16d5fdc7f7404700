//! One target from strategy selection to notification.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use super::TargetResult;
use crate::download::filename::{
    MAX_RENAME_SUFFIX, numbered_candidate, path_exists, timestamped_candidate,
};
use crate::download::{
    DestinationPlan, DuplicatePolicy, RetryPolicy, TransferError, TransferOutcome, TransferStats,
    ensure_dir, filename_from_target, resolve_destination, with_retry,
};
use crate::events::{EventSink, TransferEvent};
use crate::notify::Notifier;
use crate::progress::{ProgressTracker, TaskId};
use crate::strategy::{
    Protocol, StrategySet, TransferContext, TransferOptions, TransferStrategy, TransferTask,
};

/// Where a task will write, or why it does not need to.
enum Planned {
    Transfer(PathBuf),
    AlreadyPresent(PathBuf),
}

/// Shared per-engine state every task runs against.
#[derive(Clone)]
pub(super) struct TaskRunner {
    output_dir: PathBuf,
    options: Arc<TransferOptions>,
    strategies: StrategySet,
    policy: RetryPolicy,
    tracker: Arc<ProgressTracker>,
    events: Arc<dyn EventSink>,
    notifier: Arc<dyn Notifier>,
    /// Destinations handed out to running tasks and the task holding each,
    /// so two targets with the same filename never share a file.
    claimed: Arc<Mutex<HashMap<PathBuf, TaskId>>>,
}

impl TaskRunner {
    pub(super) fn new(
        output_dir: PathBuf,
        options: Arc<TransferOptions>,
        strategies: StrategySet,
        policy: RetryPolicy,
        tracker: Arc<ProgressTracker>,
        events: Arc<dyn EventSink>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            output_dir,
            options,
            strategies,
            policy,
            tracker,
            events,
            notifier,
            claimed: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub(super) fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub(super) fn with_tracker(mut self, tracker: Arc<ProgressTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub(super) fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub(super) fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub(super) fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub(super) fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Runs one target to a terminal outcome. Never fails.
    #[instrument(skip(self, target), fields(task = %TaskId::for_task(batch, index), target = %target))]
    pub(super) async fn run(&self, batch: u64, index: usize, target: String) -> TargetResult {
        let Some(strategy) = self.strategies.select(&target) else {
            warn!("no strategy can handle target");
            let outcome = TransferOutcome::Failure(TransferError::unsupported(&target).into());
            self.report_final(&target, &outcome);
            return TargetResult {
                index,
                target,
                protocol: None,
                outcome,
                attempts: 0,
            };
        };
        let protocol = strategy.protocol();
        debug!(protocol = %protocol, "selected strategy");

        let id = TaskId::for_task(batch, index);
        let destination = match self.plan(&id, &target, index, protocol).await {
            Ok(Planned::Transfer(path)) => path,
            Ok(Planned::AlreadyPresent(path)) => {
                info!(path = %path.display(), "destination exists, skipping transfer");
                let outcome = TransferOutcome::Success(TransferStats::already_present(path));
                self.report_final(&target, &outcome);
                return TargetResult {
                    index,
                    target,
                    protocol: Some(protocol),
                    outcome,
                    attempts: 0,
                };
            }
            Err(error) => {
                let outcome = TransferOutcome::Failure(error.into());
                self.report_final(&target, &outcome);
                return TargetResult {
                    index,
                    target,
                    protocol: Some(protocol),
                    outcome,
                    attempts: 0,
                };
            }
        };

        self.events.emit(TransferEvent::DownloadStart {
            target: target.clone(),
            destination: destination.clone(),
        });

        let task = TransferTask {
            index,
            target,
            protocol,
            destination,
            options: Arc::clone(&self.options),
        };
        let (outcome, attempts) = self.transfer(strategy.as_ref(), &task, &id).await;

        self.release(&id, &task.destination);
        self.report_final(&task.target, &outcome);
        TargetResult {
            index,
            target: task.target,
            protocol: Some(protocol),
            outcome,
            attempts,
        }
    }

    /// Runs the strategy under the retry policy, wrapping every attempt in
    /// tracker `start` and `complete`/`error`.
    async fn transfer(
        &self,
        strategy: &dyn TransferStrategy,
        task: &TransferTask,
        id: &TaskId,
    ) -> (TransferOutcome, u32) {
        let label = display_name(task);
        let ctx = TransferContext::new(
            Arc::clone(&self.tracker),
            Arc::clone(&self.events),
            id.clone(),
            task.target.clone(),
        );
        let tracker = self.tracker.as_ref();
        let ctx = &ctx;
        let label = label.as_str();

        let report = with_retry(&self.policy, &task.target, self.events.as_ref(), move |attempt| async move {
            debug!(attempt, "starting attempt");
            tracker.start(id, label, None);
            let outcome = TransferOutcome::from(strategy.attempt(task, ctx).await);
            match &outcome {
                TransferOutcome::Success(_) => tracker.complete(id),
                TransferOutcome::Failure(failure) => tracker.error(id, &failure.to_string()),
            }
            outcome
        })
        .await;
        (report.outcome, report.attempts)
    }

    /// Picks the destination for a target.
    ///
    /// Multi-file protocols write into the output directory. Single-file
    /// protocols get a file named after the target, subject to the
    /// duplicate policy and any resume marker.
    async fn plan(
        &self,
        id: &TaskId,
        target: &str,
        index: usize,
        protocol: Protocol,
    ) -> Result<Planned, TransferError> {
        ensure_dir(&self.output_dir).await?;
        if protocol.is_multi_file() {
            return Ok(Planned::Transfer(self.output_dir.clone()));
        }

        let filename = filename_from_target(target, index);
        let policy = self.options.duplicate_policy;
        let plan =
            resolve_destination(&self.output_dir, &filename, target, policy, self.options.resume)
                .await;

        let path = match plan {
            DestinationPlan::AlreadyPresent(path) => return Ok(Planned::AlreadyPresent(path)),
            DestinationPlan::Write(path) | DestinationPlan::Resume(path) => path,
        };
        let path = if self.claim(id, &path) {
            path
        } else if policy == DuplicatePolicy::Rename {
            // Another running task of this batch owns the path
            self.claim_unique(id, &filename).await
        } else {
            debug!(path = %path.display(), "destination shared with a running task");
            path
        };
        debug!(path = %path.display(), "planned destination");
        Ok(Planned::Transfer(path))
    }

    /// Claims `path` for `id` unless another task holds it.
    fn claim(&self, id: &TaskId, path: &Path) -> bool {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.contains_key(path) {
            return false;
        }
        claimed.insert(path.to_path_buf(), id.clone());
        true
    }

    /// First numbered variant of `filename` that neither exists on disk nor
    /// is held by another task, claimed for `id`.
    async fn claim_unique(&self, id: &TaskId, filename: &str) -> PathBuf {
        for n in 1..=MAX_RENAME_SUFFIX {
            let candidate = numbered_candidate(&self.output_dir, filename, n);
            if !path_exists(&candidate).await && self.claim(id, &candidate) {
                return candidate;
            }
        }
        let fallback = timestamped_candidate(&self.output_dir, filename);
        self.claim(id, &fallback);
        fallback
    }

    fn release(&self, id: &TaskId, destination: &Path) {
        let mut claimed = self.claimed.lock().unwrap_or_else(PoisonError::into_inner);
        if claimed.get(destination) == Some(id) {
            claimed.remove(destination);
        }
    }

    /// Cleans up after a task that died before reaching a terminal outcome:
    /// its progress streams and any destination it claimed.
    pub(super) fn abandon(&self, batch: u64, index: usize, message: &str) {
        let id = TaskId::for_task(batch, index);
        self.tracker.abandon(&id, message);
        self.claimed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, owner| *owner != id);
    }

    #[cfg(test)]
    pub(super) fn claimed_count(&self) -> usize {
        self.claimed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Emits the terminal event and per-target notification.
    pub(super) fn report_final(&self, target: &str, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Success(stats) => {
                info!(
                    target = %target,
                    path = %stats.path.display(),
                    bytes = stats.bytes_transferred,
                    resumed = stats.resumed,
                    "transfer complete"
                );
                self.events.emit(TransferEvent::DownloadComplete {
                    target: target.to_string(),
                    stats: stats.clone(),
                });
                self.notifier.notify_complete(target, stats);
            }
            TransferOutcome::Failure(failure) => {
                warn!(target = %target, kind = %failure.kind, error = %failure.message, "transfer failed");
                self.events.emit(TransferEvent::DownloadError {
                    target: target.to_string(),
                    error: failure.to_string(),
                });
                self.notifier.notify_error(target, failure);
            }
        }
    }

    pub(super) fn notify_batch_complete(&self, count: usize, total_bytes: u64, duration: Duration) {
        self.notifier
            .notify_batch_complete(count, total_bytes, duration);
    }
}

/// Progress label: the destination filename, or the target for
/// multi-file transfers.
fn display_name(task: &TransferTask) -> String {
    if task.protocol.is_multi_file() {
        return task.target.clone();
    }
    task.destination
        .file_name()
        .map_or_else(|| task.target.clone(), |name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::download::{ErrorKind, FailureType, TransferFailure};
    use crate::events::MemorySink;

    /// Fails with a transient error until `succeed_on`, then succeeds.
    struct Flaky {
        calls: AtomicU32,
        succeed_on: u32,
    }

    #[async_trait]
    impl TransferStrategy for Flaky {
        fn protocol(&self) -> Protocol {
            Protocol::Http
        }

        fn can_handle(&self, target: &str) -> bool {
            target.starts_with("http")
        }

        async fn attempt(
            &self,
            task: &TransferTask,
            _ctx: &TransferContext,
        ) -> Result<TransferStats, TransferError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call < self.succeed_on {
                return Err(TransferError::http_status(&task.target, 503));
            }
            Ok(TransferStats::new(1, Duration::from_millis(1), &task.destination))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        completed: Mutex<Vec<String>>,
        failed: Mutex<Vec<String>>,
    }

    impl Notifier for RecordingNotifier {
        fn notify_complete(&self, target: &str, _stats: &TransferStats) {
            self.completed.lock().unwrap().push(target.to_string());
        }
        fn notify_error(&self, target: &str, _failure: &TransferFailure) {
            self.failed.lock().unwrap().push(target.to_string());
        }
        fn notify_batch_complete(&self, _count: usize, _total_bytes: u64, _duration: Duration) {}
    }

    fn runner(dir: &TempDir, strategy: Arc<dyn TransferStrategy>, options: TransferOptions) -> TaskRunner {
        let policy = RetryPolicy::new(
            options.max_retries + 1,
            Duration::from_millis(100),
            Duration::from_secs(1),
        );
        TaskRunner::new(
            dir.path().to_path_buf(),
            Arc::new(options),
            StrategySet::new().with(strategy),
            policy,
            Arc::new(ProgressTracker::silent()),
            Arc::new(MemorySink::new()),
            Arc::new(RecordingNotifier::default()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transient_failures() {
        let dir = TempDir::new().unwrap();
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 3,
        });
        let runner = runner(&dir, strategy, TransferOptions::default());

        let result = runner.run(0, 0, "http://example.com/a.bin".to_string()).await;

        assert!(result.outcome.is_success());
        assert_eq!(result.attempts, 3);
        assert_eq!(runner.tracker.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_gives_up_after_budget() {
        let dir = TempDir::new().unwrap();
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: u32::MAX,
        });
        let options = TransferOptions {
            max_retries: 2,
            ..TransferOptions::default()
        };
        let runner = runner(&dir, strategy, options);

        let result = runner.run(0, 0, "http://example.com/a.bin".to_string()).await;

        let failure = result.outcome.failure().unwrap();
        assert_eq!(failure.kind, ErrorKind::Protocol);
        assert_eq!(failure.failure_type, FailureType::Transient);
        assert_eq!(result.attempts, 3);
    }

    #[tokio::test]
    async fn test_run_skip_policy_reports_already_present() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.bin"), b"old").unwrap();
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let options = TransferOptions {
            duplicate_policy: DuplicatePolicy::Skip,
            ..TransferOptions::default()
        };
        let runner = runner(&dir, Arc::clone(&strategy) as Arc<dyn TransferStrategy>, options);

        let result = runner.run(0, 0, "http://example.com/a.bin".to_string()).await;

        let stats = result.outcome.stats().unwrap();
        assert!(stats.already_present);
        assert_eq!(stats.bytes_transferred, 0);
        assert_eq!(result.attempts, 0);
        assert_eq!(strategy.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plan_renames_paths_claimed_in_same_batch() {
        let dir = TempDir::new().unwrap();
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let runner = runner(&dir, strategy, TransferOptions::default());

        let (a, b, c) = (TaskId::for_task(0, 0), TaskId::for_task(0, 1), TaskId::for_task(0, 2));
        let first = runner.plan(&a, "http://a.example/file.zip", 0, Protocol::Http).await.unwrap();
        let second = runner.plan(&b, "http://b.example/file.zip", 1, Protocol::Http).await.unwrap();

        let (Planned::Transfer(first), Planned::Transfer(second)) = (first, second) else {
            panic!("expected transfers");
        };
        assert_eq!(first, dir.path().join("file.zip"));
        assert_eq!(second, dir.path().join("file_1.zip"));

        // Only the owner can release a claim
        runner.release(&b, &first);
        assert_eq!(runner.claimed_count(), 2);
        runner.release(&a, &first);
        let third = runner.plan(&c, "http://c.example/file.zip", 2, Protocol::Http).await.unwrap();
        assert!(matches!(third, Planned::Transfer(p) if p == dir.path().join("file.zip")));
    }

    #[tokio::test]
    async fn test_abandon_releases_claims_and_progress() {
        let dir = TempDir::new().unwrap();
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let runner = runner(&dir, strategy, TransferOptions::default());
        let id = TaskId::for_task(4, 0);
        runner.plan(&id, "http://a.example/file.zip", 0, Protocol::Http).await.unwrap();
        runner.tracker.start(&id, "file.zip", Some(10));
        runner.tracker.start(&id.child(1), "part", None);

        runner.abandon(4, 0, "task panicked");

        assert_eq!(runner.claimed_count(), 0);
        assert_eq!(runner.tracker.active_count(), 0);
    }

    #[tokio::test]
    async fn test_plan_multi_file_uses_output_dir() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("out");
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let mut runner = runner(&dir, strategy, TransferOptions::default());
        runner.output_dir.clone_from(&nested);

        let plan = runner
            .plan(&TaskId::for_task(0, 0), "magnet:?xt=urn:btih:abc", 0, Protocol::BitTorrent)
            .await
            .unwrap();
        assert!(matches!(plan, Planned::Transfer(p) if p == nested));
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn test_report_final_notifies() {
        let dir = TempDir::new().unwrap();
        let notifier = Arc::new(RecordingNotifier::default());
        let strategy = Arc::new(Flaky {
            calls: AtomicU32::new(0),
            succeed_on: 1,
        });
        let runner = runner(&dir, strategy, TransferOptions::default())
            .with_notifier(Arc::clone(&notifier) as Arc<dyn Notifier>);

        runner.run(0, 0, "http://example.com/ok.bin".to_string()).await;
        runner.run(0, 1, "gopher://example.com/x".to_string()).await;

        assert_eq!(*notifier.completed.lock().unwrap(), vec!["http://example.com/ok.bin"]);
        assert_eq!(*notifier.failed.lock().unwrap(), vec!["gopher://example.com/x"]);
    }
}
