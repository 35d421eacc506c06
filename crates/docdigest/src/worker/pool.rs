use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::broadcast::{JobProgressHandle, ProgressState, ProgressTracker};
use crate::error::WorkerError;
use crate::pipeline::{Pipeline, PipelineContext, PipelineError};
use crate::queue::{ErrorClass, FailureDisposition, Job, JobQueue, JobState};
use crate::sanitize;
use crate::worker::job::{JobDisposition, JobResult};

type RunningJobs = Arc<Mutex<HashMap<String, CancellationToken>>>;

/// Pool tuning.
#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub worker_count: usize,
    /// How long an idle worker waits for a wake-up before polling the queue.
    pub poll_interval: Duration,
    /// How often expired progress records are pruned and records of jobs the
    /// queue settled on its own are finished.
    pub prune_interval: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            poll_interval: Duration::from_millis(250),
            prune_interval: Duration::from_secs(60),
        }
    }
}

/// Wakes idle workers after new work was enqueued.
#[derive(Clone)]
pub struct WorkerWaker {
    sender: Sender<()>,
}

impl WorkerWaker {
    pub fn wake(&self) {
        // A full channel already has enough pending wake-ups.
        let _ = self.sender.try_send(());
    }
}

pub struct WorkerPool {
    wake_sender: Sender<()>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    reaper: Option<JoinHandle<()>>,
    reaper_stop: Sender<()>,
    shutdown: CancellationToken,
    running: RunningJobs,
}

struct WorkerShared {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn JobQueue>,
    tracker: ProgressTracker,
    shutdown: CancellationToken,
    running: RunningJobs,
    result_sender: Sender<JobResult>,
}

impl WorkerPool {
    /// Spawns `settings.worker_count` worker threads plus the progress reaper.
    pub fn start(
        pipeline: Arc<Pipeline>,
        queue: Arc<dyn JobQueue>,
        tracker: ProgressTracker,
        settings: PoolSettings,
    ) -> Result<Self, WorkerError> {
        if settings.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be greater than 0".to_string(),
            ));
        }

        let (wake_sender, wake_receiver) = bounded::<()>(settings.worker_count);
        let (result_sender, result_receiver) = unbounded::<JobResult>();
        let (reaper_stop, reaper_signal) = bounded::<()>(1);
        let shutdown = CancellationToken::new();
        let running: RunningJobs = Arc::new(Mutex::new(HashMap::new()));

        let shared = Arc::new(WorkerShared {
            pipeline,
            queue,
            tracker: tracker.clone(),
            shutdown: shutdown.clone(),
            running: Arc::clone(&running),
            result_sender,
        });

        // Lease owners must be unique across processes sharing the database.
        let pool_id = uuid::Uuid::new_v4().simple().to_string();
        let mut workers = Vec::with_capacity(settings.worker_count);

        for index in 0..settings.worker_count {
            let worker_id = format!("{}-w{}", &pool_id[..8], index);
            let wake_rx = wake_receiver.clone();
            let worker_shared = Arc::clone(&shared);
            let poll_interval = settings.poll_interval;

            let handle = thread::Builder::new()
                .name(format!("docdigest-worker-{}", index))
                .spawn(move || run_worker(worker_id, wake_rx, worker_shared, poll_interval))
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        let reaper_shutdown = shutdown.clone();
        let reaper_queue = Arc::clone(&shared.queue);
        let prune_interval = settings.prune_interval;
        let reaper = thread::Builder::new()
            .name("docdigest-reaper".to_string())
            .spawn(move || {
                run_reaper(tracker, reaper_queue, reaper_signal, reaper_shutdown, prune_interval)
            })
            .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

        info!("Started {} workers", settings.worker_count);

        Ok(Self {
            wake_sender,
            result_receiver,
            workers,
            reaper: Some(reaper),
            reaper_stop,
            shutdown,
            running,
        })
    }

    pub fn waker(&self) -> WorkerWaker {
        WorkerWaker {
            sender: self.wake_sender.clone(),
        }
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<JobResult> {
        self.result_receiver.recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    /// Requests cooperative cancellation of a job running on this pool. The
    /// job stops at its next stage boundary.
    pub fn cancel(&self, job_id: &str) -> Result<(), WorkerError> {
        let running = lock_running(&self.running);
        match running.get(job_id) {
            Some(token) => {
                info!("Cancelling job {}", job_id);
                token.cancel();
                Ok(())
            }
            None => Err(WorkerError::UnknownJob(job_id.to_string())),
        }
    }

    /// Ids of the jobs currently being processed.
    pub fn running_jobs(&self) -> Vec<String> {
        lock_running(&self.running).keys().cloned().collect()
    }

    /// Stops leasing new work and interrupts running jobs at their next
    /// stage boundary; their leases are released.
    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub fn wait(mut self) {
        self.shutdown.cancel();
        // Dropping the senders wakes every idle thread.
        drop(self.wake_sender);
        drop(self.reaper_stop);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }
        if let Some(reaper) = self.reaper.take() {
            if reaper.join().is_err() {
                error!("Progress reaper panicked");
            }
        }

        info!("All workers have stopped");
    }
}

fn lock_running(running: &RunningJobs) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
    match running.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("Running job table lock was poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

fn run_worker(
    worker_id: String,
    wake_receiver: Receiver<()>,
    shared: Arc<WorkerShared>,
    poll_interval: Duration,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shared.shutdown.is_cancelled() {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match shared.queue.lease(&worker_id) {
            Ok(Some(job)) => {
                let result = process_job(&worker_id, job, &shared);
                if let Err(e) = shared.result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
                continue;
            }
            Ok(None) => {}
            Err(e) => error!("Worker {} could not lease: {}", worker_id, e),
        }

        match wake_receiver.recv_timeout(poll_interval) {
            Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                debug!("Worker {} wake channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Drives one leased job through the pipeline and settles it with the queue.
fn process_job(worker_id: &str, job: Job, shared: &WorkerShared) -> JobResult {
    let job_id = job.id.clone();
    let attempt = job.attempt;
    let filename = sanitize::redact_path(std::path::Path::new(&job.display_name));
    debug!(
        "Worker {} processing job {} ({}), attempt {}/{}",
        worker_id, job_id, filename, attempt, job.max_attempts
    );

    let progress = match shared.tracker.claim(&job_id, &filename) {
        Ok(handle) => handle,
        Err(e) => {
            // An earlier run whose lease expired is still writing. It stops at
            // its next renewal; this lease is left to expire.
            warn!("Worker {}: {}; leaving job {} leased", worker_id, e, job_id);
            return JobResult::new(&job_id, worker_id, attempt, JobDisposition::Abandoned)
                .with_error(e.to_string());
        }
    };

    let token = shared.shutdown.child_token();
    lock_running(&shared.running).insert(job_id.clone(), token.clone());

    let ctx = PipelineContext::new(job, worker_id, token);
    let (outcome, ctx) = shared.pipeline.run(ctx, &progress);

    lock_running(&shared.running).remove(&job_id);

    let queue = &shared.queue;
    let mut result = match outcome {
        Ok(()) => {
            let locator = ctx
                .artifact
                .as_ref()
                .map(|a| a.locator_string())
                .unwrap_or_default();
            let document_id = ctx.document_id.clone().unwrap_or_default();
            match queue.complete(&job_id, worker_id) {
                Ok(()) => {
                    info!("Job {} completed", job_id);
                    progress.complete(&locator);
                    JobResult::new(
                        &job_id,
                        worker_id,
                        attempt,
                        JobDisposition::Completed {
                            artifact_locator: locator,
                            document_id,
                        },
                    )
                }
                Err(e) => {
                    warn!("Job {} finished but could not be completed: {}", job_id, e);
                    abandon(&job_id, worker_id, attempt, progress, shared, e.to_string())
                }
            }
        }
        Err(e) if e.is_lease_lost() => {
            warn!("Worker {} lost the lease on job {}: {}", worker_id, job_id, e);
            abandon(&job_id, worker_id, attempt, progress, shared, e.to_string())
        }
        Err(e @ PipelineError::Cancelled { .. }) if shared.shutdown.is_cancelled() => {
            match queue.release(&job_id, worker_id) {
                Ok(()) => info!("Job {} released on shutdown", job_id),
                Err(qe) => warn!("Failed to release job {}: {}", job_id, qe),
            }
            JobResult::new(&job_id, worker_id, attempt, JobDisposition::Released)
                .with_error(e.to_string())
        }
        Err(e @ PipelineError::Cancelled { .. }) => {
            let message = e.to_string();
            match queue.dead_letter(&job_id, worker_id, ErrorClass::Permanent, &message) {
                Ok(()) => {
                    info!("Job {} cancelled", job_id);
                    progress.fail(&message);
                    JobResult::new(&job_id, worker_id, attempt, JobDisposition::Cancelled)
                        .with_error(message)
                }
                Err(qe) => {
                    warn!("Failed to cancel job {}: {}", job_id, qe);
                    abandon(&job_id, worker_id, attempt, progress, shared, qe.to_string())
                }
            }
        }
        Err(e) => {
            let message = e.to_string();
            match queue.fail(&job_id, worker_id, e.class(), &message) {
                Ok(FailureDisposition::Requeued { attempt: next, retry_at }) => {
                    progress.retrying(next, retry_at);
                    JobResult::new(
                        &job_id,
                        worker_id,
                        attempt,
                        JobDisposition::Requeued {
                            attempt: next,
                            retry_at,
                        },
                    )
                    .with_error(message)
                }
                Ok(FailureDisposition::DeadLettered) => {
                    progress.fail(&message);
                    JobResult::new(&job_id, worker_id, attempt, JobDisposition::DeadLettered)
                        .with_error(message)
                }
                Err(qe) => {
                    warn!("Failed to record failure of job {}: {}", job_id, qe);
                    abandon(&job_id, worker_id, attempt, progress, shared, message)
                }
            }
        }
    };

    result.used_ocr = ctx.used_ocr;
    result.degraded_chunks = ctx
        .summary
        .as_ref()
        .map(|s| s.degraded_chunks.clone())
        .unwrap_or_default();
    result
}

/// Gives up a job this worker no longer controls. If the queue already
/// settled it, the progress record is finished to match.
fn abandon(
    job_id: &str,
    worker_id: &str,
    attempt: u32,
    progress: JobProgressHandle,
    shared: &WorkerShared,
    error: String,
) -> JobResult {
    drop(progress);
    if settle_from_queue(&shared.tracker, shared.queue.as_ref(), job_id) {
        info!("Job {} was settled by the queue after its lease expired", job_id);
    }
    JobResult::new(job_id, worker_id, attempt, JobDisposition::Abandoned).with_error(error)
}

/// Copies a terminal queue state onto a progress record nobody owns.
fn settle_from_queue(tracker: &ProgressTracker, queue: &dyn JobQueue, job_id: &str) -> bool {
    match queue.get(job_id) {
        Ok(Some(job)) => match job.state {
            JobState::Completed => tracker.settle(job_id, ProgressState::Completed, None),
            JobState::Failed => {
                tracker.settle(job_id, ProgressState::Failed, job.last_error.as_deref())
            }
            JobState::Queued | JobState::Active => false,
        },
        Ok(None) => false,
        Err(e) => {
            warn!("Could not look up job {}: {}", job_id, e);
            false
        }
    }
}

fn run_reaper(
    tracker: ProgressTracker,
    queue: Arc<dyn JobQueue>,
    stop: Receiver<()>,
    shutdown: CancellationToken,
    interval: Duration,
) {
    loop {
        match stop.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) if !shutdown.is_cancelled() => {
                let settled = tracker
                    .unsettled()
                    .iter()
                    .filter(|job_id| settle_from_queue(&tracker, queue.as_ref(), job_id))
                    .count();
                if settled > 0 {
                    debug!("Settled {} progress records from the queue", settled);
                }
                let pruned = tracker.prune_expired();
                if pruned > 0 {
                    debug!("Pruned {} expired progress records", pruned);
                }
            }
            _ => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::ProgressState;
    use crate::db::Database;
    use crate::error::ExtractionError;
    use crate::persistence::SqlitePersistence;
    use crate::pipeline::PipelineConfig;
    use crate::processor::{Document, TextExtractor};
    use crate::queue::{JobState, NewJob, QueueSettings, SqliteJobQueue};
    use crate::storage::PdfArtifactStore;
    use crate::summarize::{ProviderResponse, SummarizationProvider, Summarizer, SummarizerSettings};
    use async_trait::async_trait;
    use std::num::NonZeroUsize;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    struct StaticExtractor;

    impl TextExtractor for StaticExtractor {
        fn extract(&self, path: &Path) -> Result<Document, ExtractionError> {
            if path.ends_with("broken.pdf") {
                return Err(ExtractionError::Corrupt {
                    path: path.to_path_buf(),
                    reason: "truncated".to_string(),
                });
            }
            Ok(Document {
                text: "Parliament passed the budget on Monday.".to_string(),
                page_count: 1,
                used_ocr: false,
            })
        }
    }

    /// Takes longer than a short lease and never renews it.
    struct SlowExtractor {
        delay: Duration,
    }

    impl TextExtractor for SlowExtractor {
        fn extract(&self, _path: &Path) -> Result<Document, ExtractionError> {
            std::thread::sleep(self.delay);
            Ok(Document {
                text: "Late edition.".to_string(),
                page_count: 1,
                used_ocr: false,
            })
        }
    }

    struct EchoProvider;

    #[async_trait]
    impl SummarizationProvider for EchoProvider {
        async fn summarize(&self, chunk_text: &str) -> ProviderResponse {
            ProviderResponse::Success(format!("- {}", chunk_text))
        }
    }

    struct Fixture {
        _tmp: TempDir,
        _runtime: tokio::runtime::Runtime,
        queue: Arc<SqliteJobQueue>,
        tracker: ProgressTracker,
        pipeline: Arc<Pipeline>,
    }

    fn fixture() -> Fixture {
        fixture_with(Arc::new(StaticExtractor), QueueSettings::default())
    }

    fn fixture_with(extractor: Arc<dyn TextExtractor>, queue_settings: QueueSettings) -> Fixture {
        let tmp = TempDir::new().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let db = Database::open_in_memory().unwrap();
        let queue = Arc::new(SqliteJobQueue::new(db.clone(), queue_settings));
        let output = tmp.path().join("output");
        let config = Arc::new(PipelineConfig {
            output_directory: output.clone(),
            ocr_languages: vec!["eng".to_string()],
            ocr_dpi: 300,
            min_text_chars: 1,
            max_chunk_chars: NonZeroUsize::new(4000).unwrap(),
            summarizer: SummarizerSettings::default(),
        });
        let pipeline = Arc::new(Pipeline::new(
            config,
            extractor,
            Summarizer::new(Arc::new(EchoProvider), SummarizerSettings::default()),
            Arc::new(PdfArtifactStore::new(&output)),
            Arc::new(SqlitePersistence::new(db)),
            queue.clone(),
            runtime.handle().clone(),
        ));
        Fixture {
            _tmp: tmp,
            _runtime: runtime,
            queue,
            tracker: ProgressTracker::default(),
            pipeline,
        }
    }

    fn settings(worker_count: usize) -> PoolSettings {
        PoolSettings {
            worker_count,
            poll_interval: Duration::from_millis(20),
            prune_interval: Duration::from_millis(50),
        }
    }

    fn enqueue(queue: &SqliteJobQueue, name: &str) -> String {
        queue
            .enqueue(NewJob {
                source_ref: PathBuf::from("/uploads").join(name),
                display_name: name.to_string(),
                owner_id: "user-1".to_string(),
            })
            .unwrap()
    }

    #[test]
    fn test_zero_workers_rejected() {
        let f = fixture();
        let result =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(0));
        assert!(matches!(result, Err(WorkerError::SpawnFailed(_))));
    }

    #[test]
    fn test_worker_pool_start_and_shutdown() {
        let f = fixture();
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(2))
                .unwrap();

        assert!(!pool.is_shutdown());
        pool.shutdown();
        assert!(pool.is_shutdown());
        pool.wait();
    }

    #[test]
    fn test_enqueued_job_completes() {
        let f = fixture();
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(2))
                .unwrap();

        let job_id = enqueue(&f.queue, "gazette.pdf");
        pool.waker().wake();

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result.job_id, job_id);
        assert!(result.success(), "Job failed: {:?}", result.error);
        assert_eq!(result.attempt, 1);

        let record = f.tracker.get(&job_id);
        assert_eq!(record.state, ProgressState::Completed);
        assert_eq!(record.percent, 100);
        assert_eq!(f.queue.get(&job_id).unwrap().unwrap().state, JobState::Completed);

        pool.wait();
    }

    #[test]
    fn test_permanent_failure_dead_letters() {
        let f = fixture();
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(1))
                .unwrap();

        let job_id = enqueue(&f.queue, "broken.pdf");
        pool.waker().wake();

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result.disposition, JobDisposition::DeadLettered);
        assert!(result.error.unwrap().contains("truncated"));

        let job = f.queue.get(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.dead_lettered);
        assert_eq!(f.tracker.get(&job_id).state, ProgressState::Failed);

        pool.wait();
    }

    fn short_leases(max_attempts: u32) -> QueueSettings {
        QueueSettings {
            max_attempts,
            lease_timeout: Duration::from_millis(100),
            ..QueueSettings::default()
        }
    }

    #[test]
    fn test_expired_final_lease_finishes_progress() {
        let f = fixture_with(
            Arc::new(SlowExtractor {
                delay: Duration::from_millis(400),
            }),
            short_leases(1),
        );
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(2))
                .unwrap();

        let job_id = enqueue(&f.queue, "late.pdf");
        pool.waker().wake();

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result.job_id, job_id);
        assert_eq!(result.disposition, JobDisposition::Abandoned);

        let job = f.queue.get(&job_id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Failed);
        assert!(job.dead_lettered);

        let record = f.tracker.get(&job_id);
        assert_eq!(record.state, ProgressState::Failed);
        assert_eq!(record.percent, 100);
        assert!(f.tracker.unsettled().is_empty());

        pool.wait();
    }

    #[test]
    fn test_stale_run_does_not_cause_release_storm() {
        let f = fixture_with(
            Arc::new(SlowExtractor {
                delay: Duration::from_millis(400),
            }),
            short_leases(3),
        );
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(2))
                .unwrap();

        let job_id = enqueue(&f.queue, "late.pdf");
        pool.waker().wake();

        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut results = Vec::new();
        while std::time::Instant::now() < deadline {
            if let Some(result) = pool.recv_result_timeout(Duration::from_millis(20)) {
                results.push(result);
            }
            let settled = f.queue.get(&job_id).unwrap().unwrap().state.is_terminal()
                && f.tracker.get(&job_id).state.is_terminal();
            if settled {
                break;
            }
        }

        assert!(f.queue.get(&job_id).unwrap().unwrap().state.is_terminal());
        assert_eq!(f.tracker.get(&job_id).percent, 100);
        assert!(
            results.len() < 10,
            "{} results for a single job",
            results.len()
        );
        assert!(results
            .iter()
            .all(|r| r.disposition != JobDisposition::Released));

        pool.wait();
    }

    #[test]
    fn test_cancel_unknown_job() {
        let f = fixture();
        let pool =
            WorkerPool::start(f.pipeline.clone(), f.queue.clone(), f.tracker.clone(), settings(1))
                .unwrap();

        assert!(matches!(
            pool.cancel("nope"),
            Err(WorkerError::UnknownJob(id)) if id == "nope"
        ));
        assert!(pool.running_jobs().is_empty());
        pool.wait();
    }
}
