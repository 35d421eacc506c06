//! Per-job progress records.
//!
//! Readers only ever see copies of a record. Writing goes through a
//! [`JobProgressHandle`], and at most one handle per job exists at a time.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::broadcast::job_progress::{
    JobPhase, JobProgressBroadcaster, JobProgressEvent, ProgressState,
};
use crate::error::ProgressError;

/// Immutable snapshot of a job's progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressRecord {
    pub job_id: String,
    pub state: ProgressState,
    pub percent: u8,
    pub stage_label: String,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Answer for ids the tracker knows nothing about.
    pub fn idle(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: ProgressState::Idle,
            percent: 0,
            stage_label: "Idle".to_string(),
            updated_at: Utc::now(),
        }
    }

    fn queued(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            state: ProgressState::Queued,
            percent: 0,
            stage_label: JobPhase::Queued.to_string(),
            updated_at: Utc::now(),
        }
    }
}

struct Entry {
    record: ProgressRecord,
    filename: String,
    owned: bool,
    finished_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, retention: Duration) -> bool {
        !self.owned
            && self
                .finished_at
                .is_some_and(|finished| finished.elapsed() >= retention)
    }
}

/// Process-wide progress store.
#[derive(Clone)]
pub struct ProgressTracker {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    broadcaster: JobProgressBroadcaster,
    retention: Duration,
}

impl ProgressTracker {
    pub fn new(retention: Duration) -> Self {
        Self::with_broadcaster(JobProgressBroadcaster::default(), retention)
    }

    pub fn with_broadcaster(broadcaster: JobProgressBroadcaster, retention: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            broadcaster,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Progress store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("Progress store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    /// Creates the `Queued` record for a freshly enqueued (or manually
    /// retried) job. A record currently owned by a worker is left alone.
    pub fn register_queued(&self, job_id: &str, filename: &str) {
        let mut entries = self.write_entries();
        if entries.get(job_id).is_some_and(|e| e.owned) {
            log::debug!("Progress for job {} is owned by a worker, not resetting", job_id);
            return;
        }
        entries.insert(
            job_id.to_string(),
            Entry {
                record: ProgressRecord::queued(job_id),
                filename: filename.to_string(),
                owned: false,
                finished_at: None,
            },
        );
        self.broadcaster.send(JobProgressEvent::new(
            job_id,
            filename,
            JobPhase::Queued,
            0,
            "Job queued for processing",
        ));
    }

    /// Takes exclusive write ownership of a job's record.
    pub fn claim(&self, job_id: &str, filename: &str) -> Result<JobProgressHandle, ProgressError> {
        let mut entries = self.write_entries();
        let entry = entries.entry(job_id.to_string()).or_insert_with(|| Entry {
            record: ProgressRecord::queued(job_id),
            filename: filename.to_string(),
            owned: false,
            finished_at: None,
        });
        if entry.owned {
            return Err(ProgressError::AlreadyClaimed(job_id.to_string()));
        }
        if entry.record.state.is_terminal() {
            // Leased again after a terminal record: a new lifetime starts.
            entry.record = ProgressRecord::queued(job_id);
            entry.finished_at = None;
        }
        entry.owned = true;

        Ok(JobProgressHandle {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            tracker: self.clone(),
        })
    }

    /// Current record, or an idle record for unknown and expired ids.
    pub fn get(&self, job_id: &str) -> ProgressRecord {
        self.lookup(job_id)
            .unwrap_or_else(|| ProgressRecord::idle(job_id))
    }

    /// Current record if the tracker still holds one.
    pub fn lookup(&self, job_id: &str) -> Option<ProgressRecord> {
        let entries = self.read_entries();
        entries
            .get(job_id)
            .filter(|e| !e.is_expired(self.retention))
            .map(|e| e.record.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    /// Drops terminal records older than the retention window.
    pub fn prune_expired(&self) -> usize {
        let mut entries = self.write_entries();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(self.retention));
        before - entries.len()
    }

    /// Ids of records no worker owns that have not reached a terminal state.
    pub fn unsettled(&self) -> Vec<String> {
        self.read_entries()
            .iter()
            .filter(|(_, e)| !e.owned && !e.record.state.is_terminal())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Finishes a record whose job the queue already settled without its
    /// writer. Owned, terminal and unknown records are left alone.
    pub fn settle(&self, job_id: &str, state: ProgressState, error: Option<&str>) -> bool {
        if !state.is_terminal() {
            return false;
        }
        let mut entries = self.write_entries();
        let Some(entry) = entries.get_mut(job_id) else {
            return false;
        };
        if entry.owned || entry.record.state.is_terminal() {
            return false;
        }

        let event = match state {
            ProgressState::Completed => JobProgressEvent::new(
                job_id,
                &entry.filename,
                JobPhase::Completed,
                100,
                "Summary ready",
            ),
            _ => JobProgressEvent::failed(
                job_id,
                &entry.filename,
                error.unwrap_or("Processing failed"),
            ),
        };
        entry.record.state = state;
        entry.record.percent = 100;
        entry.record.stage_label = event.phase.to_string();
        entry.record.updated_at = event.timestamp;
        entry.finished_at = Some(Instant::now());
        self.broadcaster.send(event);
        true
    }

    fn update<F>(&self, job_id: &str, apply: F)
    where
        F: FnOnce(&mut Entry) -> Option<JobProgressEvent>,
    {
        let mut entries = self.write_entries();
        let Some(entry) = entries.get_mut(job_id) else {
            log::warn!("Progress record for job {} vanished while owned", job_id);
            return;
        };
        if let Some(event) = apply(entry) {
            entry.record.updated_at = event.timestamp;
            // Sent under the lock so subscribers see updates in write order.
            self.broadcaster.send(event);
        }
    }

    fn release(&self, job_id: &str) {
        let mut entries = self.write_entries();
        if let Some(entry) = entries.get_mut(job_id) {
            entry.owned = false;
        }
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(3600))
    }
}

/// Exclusive writer for one job's progress. Ownership ends on drop.
pub struct JobProgressHandle {
    job_id: String,
    filename: String,
    tracker: ProgressTracker,
}

impl JobProgressHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Records progress inside `phase`. Percent never goes down and stays
    /// below 100 until the job is terminal.
    pub fn report(&self, phase: JobPhase, percent: u8, message: &str) {
        self.tracker.update(&self.job_id, |entry| {
            let percent = entry.record.percent.max(percent.min(99));
            entry.record.state = ProgressState::Active;
            entry.record.percent = percent;
            entry.record.stage_label = phase.to_string();
            Some(JobProgressEvent::new(
                &self.job_id,
                &entry.filename,
                phase,
                percent,
                message,
            ))
        });
    }

    /// Marks the start of `phase`.
    pub fn enter(&self, phase: JobPhase) {
        let (start, _) = phase.percent_range();
        self.report(phase, start, &phase.to_string());
    }

    /// Records `done` of `total` units of work finished in `phase`.
    pub fn advance(&self, phase: JobPhase, done: usize, total: usize) {
        let message = format!("{} ({}/{})", phase, done, total);
        self.report(phase, phase.percent_at(done, total), &message);
    }

    /// Records that the attempt failed and another one is scheduled.
    pub fn retrying(&self, attempt: u32, retry_at: DateTime<Utc>) {
        self.tracker.update(&self.job_id, |entry| {
            entry.record.state = ProgressState::Active;
            entry.record.stage_label = format!("{} (attempt {})", JobPhase::Retrying, attempt + 1);
            let message = format!("Retrying at {}", retry_at.to_rfc3339());
            Some(JobProgressEvent::new(
                &self.job_id,
                &entry.filename,
                JobPhase::Retrying,
                entry.record.percent,
                &message,
            ))
        });
    }

    /// Marks the job completed.
    pub fn complete(self, artifact_locator: &str) {
        self.tracker.update(&self.job_id, |entry| {
            entry.record.state = ProgressState::Completed;
            entry.record.percent = 100;
            entry.record.stage_label = JobPhase::Completed.to_string();
            entry.finished_at = Some(Instant::now());
            Some(JobProgressEvent::completed(
                &self.job_id,
                &entry.filename,
                artifact_locator,
            ))
        });
    }

    /// Marks the job terminally failed.
    pub fn fail(self, error: &str) {
        self.tracker.update(&self.job_id, |entry| {
            entry.record.state = ProgressState::Failed;
            entry.record.percent = 100;
            entry.record.stage_label = JobPhase::Failed.to_string();
            entry.finished_at = Some(Instant::now());
            Some(JobProgressEvent::failed(&self.job_id, &entry.filename, error))
        });
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }
}

impl Drop for JobProgressHandle {
    fn drop(&mut self) {
        self.tracker.release(&self.job_id);
    }
}
