//! Intake and progress queries.
//!
//! `JobService` is the surface an outer layer (HTTP routes, CLI) talks to:
//! it enqueues work, hands back a handle for following one job, and answers
//! progress polls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast::{self, error::RecvError};

use crate::broadcast::{JobPhase, JobProgressEvent, ProgressRecord, ProgressState, ProgressTracker};
use crate::error::QueueError;
use crate::queue::{Job, JobQueue, JobState, NewJob, QueueCounts};
use crate::sanitize;
use crate::worker::WorkerWaker;

/// Returned by [`JobService::enqueue`]: the job id plus a progress stream
/// filtered to that job.
pub struct JobHandle {
    pub job_id: String,
    events: broadcast::Receiver<JobProgressEvent>,
}

impl JobHandle {
    /// Next progress event for this job, or `None` once the stream closed.
    /// Events missed because the subscriber lagged are skipped.
    pub async fn next_event(&mut self) -> Option<JobProgressEvent> {
        loop {
            match self.events.recv().await {
                Ok(event) if event.job_id == self.job_id => return Some(event),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    log::debug!("Progress subscriber for {} lagged by {}", self.job_id, skipped);
                    continue;
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant of [`JobHandle::next_event`].
    pub fn try_next_event(&mut self) -> Option<JobProgressEvent> {
        use tokio::sync::broadcast::error::TryRecvError;
        loop {
            match self.events.try_recv() {
                Ok(event) if event.job_id == self.job_id => return Some(event),
                Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Clone)]
pub struct JobService {
    queue: Arc<dyn JobQueue>,
    tracker: ProgressTracker,
    waker: Option<WorkerWaker>,
}

impl JobService {
    pub fn new(queue: Arc<dyn JobQueue>, tracker: ProgressTracker) -> Self {
        Self {
            queue,
            tracker,
            waker: None,
        }
    }

    /// Wakes idle workers of `waker`'s pool whenever work is enqueued.
    pub fn with_waker(mut self, waker: WorkerWaker) -> Self {
        self.waker = Some(waker);
        self
    }

    /// Enqueues a document and returns immediately; processing is
    /// asynchronous from here on.
    pub fn enqueue(
        &self,
        source_ref: impl Into<PathBuf>,
        display_name: &str,
        owner_id: &str,
    ) -> Result<JobHandle, QueueError> {
        // Subscribe first so the Queued event is not missed.
        let events = self.tracker.subscribe();
        let job_id = self.queue.enqueue(NewJob {
            source_ref: source_ref.into(),
            display_name: display_name.to_string(),
            owner_id: owner_id.to_string(),
        })?;

        self.tracker
            .register_queued(&job_id, &sanitize::redact_path(Path::new(display_name)));
        log::info!("Enqueued job {}", job_id);
        self.wake();

        Ok(JobHandle { job_id, events })
    }

    /// `{state, percent}` for polling callers. Never fails: unknown ids are
    /// idle, and a record the tracker no longer holds is rebuilt from the
    /// queue's durable state. A terminal queue state wins over a tracker
    /// record that has not caught up yet.
    pub fn get_progress(&self, job_id: &str) -> ProgressRecord {
        if let Some(record) = self.tracker.lookup(job_id) {
            if record.state.is_terminal() {
                return record;
            }
            return match self.queue.get(job_id) {
                Ok(Some(job)) if job.state.is_terminal() => record_from_job(&job),
                Ok(_) => record,
                Err(e) => {
                    log::warn!("Queue lookup for job {} failed: {}", job_id, e);
                    record
                }
            };
        }
        match self.queue.get(job_id) {
            Ok(Some(job)) => record_from_job(&job),
            Ok(None) => ProgressRecord::idle(job_id),
            Err(e) => {
                log::warn!("Progress fallback for job {} failed: {}", job_id, e);
                ProgressRecord::idle(job_id)
            }
        }
    }

    pub fn get_job(&self, job_id: &str) -> Result<Option<Job>, QueueError> {
        self.queue.get(job_id)
    }

    pub fn list_dead_letters(&self) -> Result<Vec<Job>, QueueError> {
        self.queue.list_dead_letters()
    }

    /// Manual intervention for a dead-lettered job.
    pub fn retry_dead_letter(&self, job_id: &str) -> Result<(), QueueError> {
        self.queue.retry_dead_letter(job_id)?;
        let display_name = self
            .queue
            .get(job_id)?
            .map(|job| job.display_name)
            .unwrap_or_default();
        self.tracker
            .register_queued(job_id, &sanitize::redact_path(Path::new(&display_name)));
        log::info!("Re-queued dead-lettered job {}", job_id);
        self.wake();
        Ok(())
    }

    pub fn counts(&self) -> Result<QueueCounts, QueueError> {
        self.queue.counts()
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.tracker
    }

    fn wake(&self) {
        if let Some(waker) = &self.waker {
            waker.wake();
        }
    }
}

fn record_from_job(job: &Job) -> ProgressRecord {
    let (state, percent, phase) = match job.state {
        JobState::Queued => (ProgressState::Queued, 0, JobPhase::Queued),
        JobState::Active if job.lease.is_none() => (ProgressState::Active, 0, JobPhase::Retrying),
        JobState::Active => (ProgressState::Active, 0, JobPhase::Extracting),
        JobState::Completed => (ProgressState::Completed, 100, JobPhase::Completed),
        JobState::Failed => (ProgressState::Failed, 100, JobPhase::Failed),
    };
    ProgressRecord {
        job_id: job.id.clone(),
        state,
        percent,
        stage_label: phase.to_string(),
        updated_at: Utc::now(),
    }
}
