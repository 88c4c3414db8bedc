//! Judge scheduler
//!
//! Accepts judging requests without blocking the caller, caps the number of
//! passes running at once, and never lets two passes for the same submission
//! overlap.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::core::{JudgeError, SubmissionStatus};
use crate::judger::Judger;

const BACKOFF_INITIAL: Duration = Duration::from_millis(50);
const BACKOFF_MAX: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Judging passes allowed to run at once
    pub max_concurrency: usize,
    /// Requests allowed to wait in the queue; one more may be held by the
    /// dispatcher while it waits for a free slot
    pub queue_capacity: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            queue_capacity: 256,
        }
    }
}

/// How an accepted request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new pass was queued
    Queued,
    /// The submission was already queued or being judged
    Coalesced,
}

struct Shared {
    judger: Arc<Judger>,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashSet<i64>>,
}

impl Shared {
    fn in_flight(&self) -> MutexGuard<'_, HashSet<i64>> {
        self.in_flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn claim(self: &Arc<Self>, submission_id: i64) -> Option<InFlightGuard> {
        if !self.in_flight().insert(submission_id) {
            return None;
        }
        Some(InFlightGuard {
            shared: Arc::clone(self),
            submission_id,
        })
    }
}

/// Ownership of a submission id while it is queued or judged.
/// Dropping it makes the id schedulable again.
struct InFlightGuard {
    shared: Arc<Shared>,
    submission_id: i64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight().remove(&self.submission_id);
    }
}

pub struct JudgeScheduler {
    shared: Arc<Shared>,
    sender: mpsc::Sender<InFlightGuard>,
    dispatcher: JoinHandle<()>,
}

impl JudgeScheduler {
    /// Spawn the dispatcher. Must be called inside a tokio runtime.
    pub fn start(judger: Arc<Judger>, config: SchedulerConfig) -> Self {
        let max_concurrency = config.max_concurrency.max(1);
        let queue_capacity = config.queue_capacity.max(1);

        let shared = Arc::new(Shared {
            judger,
            permits: Arc::new(Semaphore::new(max_concurrency)),
            in_flight: Mutex::new(HashSet::new()),
        });
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&shared), receiver));

        info!(
            "Judge scheduler started: max_concurrency={}, queue_capacity={}",
            max_concurrency, queue_capacity
        );

        Self {
            shared,
            sender,
            dispatcher,
        }
    }

    /// Request a judging pass without waiting for it.
    pub fn enqueue(&self, submission_id: i64) -> Result<Enqueued, JudgeError> {
        let Some(guard) = self.shared.claim(submission_id) else {
            debug!("Submission {} already scheduled, coalescing", submission_id);
            return Ok(Enqueued::Coalesced);
        };

        match self.sender.try_send(guard) {
            Ok(()) => Ok(Enqueued::Queued),
            // The returned guard is dropped here, releasing the id
            Err(TrySendError::Full(_)) => Err(JudgeError::QueueFull(submission_id)),
            Err(TrySendError::Closed(_)) => Err(JudgeError::SchedulerClosed),
        }
    }

    /// [`enqueue`](Self::enqueue), retrying a full queue with exponential backoff.
    pub async fn enqueue_with_backoff(
        &self,
        submission_id: i64,
        max_attempts: u32,
    ) -> Result<Enqueued, JudgeError> {
        let mut delay = BACKOFF_INITIAL;
        let mut attempt = 1;
        loop {
            match self.enqueue(submission_id) {
                Err(JudgeError::QueueFull(_)) if attempt < max_attempts => {
                    warn!(
                        "Judge queue full, retrying submission {} in {:?} (attempt {}/{})",
                        submission_id, delay, attempt, max_attempts
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(BACKOFF_MAX);
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// Judge a submission on the caller's task and return its final status.
    ///
    /// Shares the concurrency bound with queued passes. An already judged
    /// submission returns its existing status.
    pub async fn judge_now(&self, submission_id: i64) -> Result<SubmissionStatus, JudgeError> {
        let guard = self
            .shared
            .claim(submission_id)
            .ok_or(JudgeError::AlreadyInProgress(submission_id))?;
        let _permit = self
            .shared
            .permits
            .acquire()
            .await
            .map_err(|_| JudgeError::SchedulerClosed)?;

        let result = self.shared.judger.judge(submission_id).await;
        drop(guard);

        match result {
            Ok(report) => Ok(report.verdict.into()),
            Err(JudgeError::AlreadyJudged { verdict, .. }) => Ok(verdict.into()),
            Err(e) => Err(e),
        }
    }

    /// Number of submissions currently queued or being judged
    pub fn in_flight(&self) -> usize {
        self.shared.in_flight().len()
    }

    /// Stop accepting requests and wait for queued and running passes.
    pub async fn shutdown(self) {
        drop(self.sender);
        if let Err(e) = self.dispatcher.await {
            error!("Judge dispatcher terminated abnormally: {}", e);
        }
        info!("Judge scheduler stopped");
    }
}

async fn dispatch(shared: Arc<Shared>, mut receiver: mpsc::Receiver<InFlightGuard>) {
    let mut passes = JoinSet::new();

    // Take work first, then a slot: an idle dispatcher holds no permit
    while let Some(guard) = receiver.recv().await {
        let Ok(permit) = Arc::clone(&shared.permits).acquire_owned().await else {
            break;
        };
        passes.spawn(run_pass(Arc::clone(&shared), guard, permit));

        while let Some(result) = passes.try_join_next() {
            report_join(result);
        }
    }

    while let Some(result) = passes.join_next().await {
        report_join(result);
    }
}

async fn run_pass(shared: Arc<Shared>, guard: InFlightGuard, _permit: OwnedSemaphorePermit) {
    let submission_id = guard.submission_id;
    match shared.judger.judge(submission_id).await {
        Ok(report) => debug!(
            "Pass finished: submission_id={}, verdict={}",
            submission_id, report.verdict
        ),
        Err(JudgeError::AlreadyJudged { verdict, .. }) => {
            debug!(
                "Submission {} already judged ({}), skipping",
                submission_id, verdict
            )
        }
        Err(e) if e.is_infrastructure() => {
            error!("Judge pass failed for submission {}: {}", submission_id, e)
        }
        Err(e) => warn!("Judge pass for submission {} rejected: {}", submission_id, e),
    }
}

fn report_join(result: Result<(), JoinError>) {
    if let Err(e) = result {
        if e.is_panic() {
            error!("Judge pass panicked: {}", e);
        } else {
            warn!("Judge pass cancelled: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{SandboxError, Verdict};
    use crate::engine::sandbox::{ExecutionResult, ProcessStatus};
    use crate::engine::Executor;
    use crate::languages::{LanguageProfile, LanguageRegistry};
    use crate::store::{MemoryStore, Problem, Submission, TestCase};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio_test::{assert_err, assert_ok};

    /// Executor that echoes its input once released, recording concurrency
    struct Probe {
        calls: AtomicUsize,
        running: AtomicUsize,
        peak: AtomicUsize,
        started: Semaphore,
        release: Semaphore,
        delay: Duration,
    }

    impl Probe {
        fn open(delay: Duration) -> Arc<Self> {
            Self::build(delay, Semaphore::MAX_PERMITS)
        }

        fn gated() -> Arc<Self> {
            Self::build(Duration::ZERO, 0)
        }

        fn build(delay: Duration, permits: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                started: Semaphore::new(0),
                release: Semaphore::new(permits),
                delay,
            })
        }

        async fn wait_started(&self) {
            self.started.acquire().await.unwrap().forget();
        }

        fn open_gate(&self) {
            self.release.add_permits(1000);
        }
    }

    #[async_trait]
    impl Executor for Probe {
        async fn execute(
            &self,
            _source_code: &str,
            _profile: &LanguageProfile,
            stdin: &str,
            _time_limit: Duration,
        ) -> Result<ExecutionResult, SandboxError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.started.add_permits(1);

            if stdin == "panic" {
                self.running.fetch_sub(1, Ordering::SeqCst);
                panic!("executor exploded");
            }

            tokio::time::sleep(self.delay).await;
            self.release.acquire().await.unwrap().forget();
            self.running.fetch_sub(1, Ordering::SeqCst);

            Ok(ExecutionResult {
                verdict: Verdict::Accepted,
                stdout: stdin.to_string(),
                stderr: String::new(),
                status: ProcessStatus::Exited(0),
                elapsed: Duration::from_millis(1),
                diagnostic: None,
            })
        }
    }

    async fn setup(ids: &[i64], probe: Arc<Probe>) -> (Arc<MemoryStore>, Arc<Judger>) {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_problem(Problem {
                id: 1,
                time_limit_ms: 1000,
                testcases: vec![TestCase::new(1, "x", "x")],
            })
            .await;
        store
            .insert_problem(Problem {
                id: 2,
                time_limit_ms: 1000,
                testcases: vec![TestCase::new(1, "panic", "")],
            })
            .await;
        for &id in ids {
            let problem_id = if id < 0 { 2 } else { 1 };
            store
                .insert_submission(Submission::new(id, problem_id, "python", "code"))
                .await;
        }

        let judger = Judger::new(
            store.clone(),
            Arc::new(LanguageRegistry::builtin().unwrap()),
            probe,
        );
        (store, Arc::new(judger))
    }

    fn config(max_concurrency: usize, queue_capacity: usize) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrency,
            queue_capacity,
        }
    }

    /// Wait until the dispatcher has taken everything out of the queue
    async fn wait_queue_drained(scheduler: &JudgeScheduler) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.sender.capacity() < scheduler.sender.max_capacity() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    async fn status(store: &MemoryStore, id: i64) -> SubmissionStatus {
        store.submission(id).await.unwrap().status
    }

    #[tokio::test]
    async fn test_duplicate_requests_coalesce() {
        let probe = Probe::gated();
        let (store, judger) = setup(&[1], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(2, 8));

        assert_eq!(assert_ok!(scheduler.enqueue(1)), Enqueued::Queued);
        assert_eq!(assert_ok!(scheduler.enqueue(1)), Enqueued::Coalesced);
        probe.wait_started().await;
        assert_eq!(assert_ok!(scheduler.enqueue(1)), Enqueued::Coalesced);
        assert_eq!(scheduler.in_flight(), 1);

        probe.open_gate();
        scheduler.shutdown().await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            status(&store, 1).await,
            SubmissionStatus::Judged(Verdict::Accepted)
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let ids: Vec<i64> = (1..=6).collect();
        let probe = Probe::open(Duration::from_millis(50));
        let (store, judger) = setup(&ids, probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(2, 16));

        for &id in &ids {
            assert_eq!(assert_ok!(scheduler.enqueue(id)), Enqueued::Queued);
        }
        scheduler.shutdown().await;

        assert_eq!(probe.calls.load(Ordering::SeqCst), 6);
        assert!(probe.peak.load(Ordering::SeqCst) <= 2);
        for &id in &ids {
            assert_eq!(
                status(&store, id).await,
                SubmissionStatus::Judged(Verdict::Accepted)
            );
        }
    }

    #[tokio::test]
    async fn test_full_queue_is_rejected() {
        let probe = Probe::gated();
        let (store, judger) = setup(&[1, 2, 3, 4], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 1));

        // 1 runs, 2 waits in the dispatcher for a slot, 3 fills the queue
        assert_ok!(scheduler.enqueue(1));
        probe.wait_started().await;
        assert_ok!(scheduler.enqueue(2));
        wait_queue_drained(&scheduler).await;
        assert_ok!(scheduler.enqueue(3));

        let err = assert_err!(scheduler.enqueue(4));
        assert!(matches!(err, JudgeError::QueueFull(4)));
        assert!(!err.is_infrastructure());
        // A rejected id is not left claimed
        assert_eq!(scheduler.in_flight(), 3);

        probe.open_gate();
        scheduler.shutdown().await;

        assert!(status(&store, 3).await.verdict().is_some());
        assert!(status(&store, 4).await.is_pending());
    }

    #[tokio::test]
    async fn test_backoff_waits_for_room() {
        let probe = Probe::gated();
        let (store, judger) = setup(&[1, 2, 3, 4], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 1));

        assert_ok!(scheduler.enqueue(1));
        probe.wait_started().await;
        assert_ok!(scheduler.enqueue(2));
        wait_queue_drained(&scheduler).await;
        assert_ok!(scheduler.enqueue(3));

        let gate = probe.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            gate.open_gate();
        });

        let outcome = scheduler.enqueue_with_backoff(4, 10).await;
        assert_eq!(assert_ok!(outcome), Enqueued::Queued);

        scheduler.shutdown().await;
        assert!(status(&store, 4).await.verdict().is_some());
    }

    #[tokio::test]
    async fn test_backoff_gives_up() {
        let probe = Probe::gated();
        let (_, judger) = setup(&[1, 2, 3, 4], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 1));

        assert_ok!(scheduler.enqueue(1));
        probe.wait_started().await;
        assert_ok!(scheduler.enqueue(2));
        wait_queue_drained(&scheduler).await;
        assert_ok!(scheduler.enqueue(3));

        let err = assert_err!(scheduler.enqueue_with_backoff(4, 3).await);
        assert!(matches!(err, JudgeError::QueueFull(4)));

        probe.open_gate();
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn test_judge_now() {
        let probe = Probe::open(Duration::ZERO);
        let (store, judger) = setup(&[1], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 4));

        let first = assert_ok!(scheduler.judge_now(1).await);
        assert_eq!(first, SubmissionStatus::Judged(Verdict::Accepted));
        assert_eq!(status(&store, 1).await, first);

        // Re-running reports the existing terminal status without judging again
        let second = assert_ok!(scheduler.judge_now(1).await);
        assert_eq!(second, first);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);

        let missing = assert_err!(scheduler.judge_now(42).await);
        assert!(missing.is_infrastructure());

        scheduler.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_judge_now_with_idle_dispatcher() {
        let probe = Probe::open(Duration::ZERO);
        let (store, judger) = setup(&[1, 2], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 4));

        // Let the dispatcher park on an empty queue first
        tokio::time::sleep(Duration::from_millis(100)).await;

        let now = tokio::time::timeout(Duration::from_secs(3), scheduler.judge_now(1)).await;
        let now = assert_ok!(now.expect("judge_now blocked behind the idle dispatcher"));
        assert_eq!(now, SubmissionStatus::Judged(Verdict::Accepted));

        // The single slot is still usable by queued passes afterwards
        assert_ok!(scheduler.enqueue(2));
        scheduler.shutdown().await;
        assert_eq!(
            status(&store, 2).await,
            SubmissionStatus::Judged(Verdict::Accepted)
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_judge_now_respects_running_pass() {
        let probe = Probe::gated();
        let (_, judger) = setup(&[1], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(2, 4));

        assert_ok!(scheduler.enqueue(1));
        probe.wait_started().await;

        let err = assert_err!(scheduler.judge_now(1).await);
        assert!(matches!(err, JudgeError::AlreadyInProgress(1)));

        probe.open_gate();
        scheduler.shutdown().await;
        assert_eq!(probe.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_panicking_pass_is_contained() {
        let probe = Probe::open(Duration::ZERO);
        let (store, judger) = setup(&[-1, 1], probe.clone()).await;
        let scheduler = JudgeScheduler::start(judger, config(1, 4));

        assert_ok!(scheduler.enqueue(-1));
        assert_ok!(scheduler.enqueue(1));

        tokio::time::timeout(Duration::from_secs(5), async {
            while scheduler.in_flight() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        // The id is released and the submission is still pending
        assert!(status(&store, -1).await.is_pending());
        assert_eq!(
            status(&store, 1).await,
            SubmissionStatus::Judged(Verdict::Accepted)
        );

        scheduler.shutdown().await;
    }
}
