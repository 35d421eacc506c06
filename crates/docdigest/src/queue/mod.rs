//! Durable job queue.
//!
//! The queue hands out time-bounded, exclusive leases. A job whose lease
//! expires without a `complete`/`fail` becomes leasable again, which gives
//! at-least-once execution; pipeline side effects are idempotent per job id.

mod sqlite;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::QueueConfig;
use crate::error::QueueError;

pub use sqlite::SqliteJobQueue;

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobState::Queued),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Transient,
    Permanent,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Permanent => "permanent",
        }
    }
}

/// A job submitted by intake.
#[derive(Debug, Clone)]
pub struct NewJob {
    pub source_ref: PathBuf,
    pub display_name: String,
    pub owner_id: String,
}

/// The lease currently held on an active job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub worker_id: String,
    pub expires_at: DateTime<Utc>,
}

/// Snapshot of a job as stored by the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: String,
    pub source_ref: PathBuf,
    pub display_name: String,
    pub owner_id: String,
    pub state: JobState,
    pub attempt: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub lease: Option<Lease>,
    pub dead_lettered: bool,
    pub last_error: Option<String>,
}

/// What the queue did with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Requeued {
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    DeadLettered,
}

/// Number of jobs per state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub queued: u64,
    pub active: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Exponential backoff between attempts, capped at `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    /// Delay before the attempt following `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let factor = 1u32 << exponent;
        self.base.saturating_mul(factor).min(self.max)
    }
}

/// Queue tuning.
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_attempts: u32,
    pub backoff: BackoffPolicy,
    pub lease_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffPolicy {
                base: Duration::from_millis(1000),
                max: Duration::from_millis(60_000),
            },
            lease_timeout: Duration::from_secs(600),
        }
    }
}

impl QueueSettings {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: BackoffPolicy {
                base: Duration::from_millis(config.backoff_base_ms),
                max: Duration::from_millis(config.backoff_max_ms),
            },
            lease_timeout: Duration::from_secs(config.lease_timeout_secs),
        }
    }
}

/// Work distribution contract used by intake and the worker pool.
pub trait JobQueue: Send + Sync {
    /// Stores a new `Queued` job and returns its id.
    fn enqueue(&self, job: NewJob) -> Result<String, QueueError>;

    /// Claims the oldest available job for `worker_id`, if any.
    ///
    /// At most one lease per job id is live at any time.
    fn lease(&self, worker_id: &str) -> Result<Option<Job>, QueueError>;

    /// Extends the lease held by `worker_id`.
    fn renew_lease(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError>;

    fn complete(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError>;

    /// Records a failed attempt and lets the retry policy decide between
    /// [`JobQueue::requeue`] and [`JobQueue::dead_letter`].
    fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<FailureDisposition, QueueError>;

    /// Schedules another attempt after backoff. Only valid while
    /// `attempt < max_attempts`.
    fn requeue(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<DateTime<Utc>, QueueError>;

    /// Moves the job to the terminal dead-letter state.
    fn dead_letter(
        &self,
        job_id: &str,
        worker_id: &str,
        class: ErrorClass,
        error: &str,
    ) -> Result<(), QueueError>;

    /// Gives the lease back without consuming the attempt.
    fn release(&self, job_id: &str, worker_id: &str) -> Result<(), QueueError>;

    fn get(&self, job_id: &str) -> Result<Option<Job>, QueueError>;

    fn list_dead_letters(&self) -> Result<Vec<Job>, QueueError>;

    /// Manual intervention: resets a dead-lettered job to `Queued`.
    fn retry_dead_letter(&self, job_id: &str) -> Result<(), QueueError>;

    fn counts(&self) -> Result<QueueCounts, QueueError>;
}
