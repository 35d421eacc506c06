use chrono::{DateTime, Utc};
use serde::Serialize;

/// How a single attempt ended, as settled with the queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum JobDisposition {
    Completed {
        artifact_locator: String,
        document_id: String,
    },
    /// Transient failure; the queue schedules another attempt.
    Requeued {
        attempt: u32,
        retry_at: DateTime<Utc>,
    },
    /// Permanent failure or attempts exhausted.
    DeadLettered,
    /// Cancelled on request; the job is dead-lettered.
    Cancelled,
    /// Interrupted by pool shutdown; the lease went back to the queue
    /// without consuming the attempt.
    Released,
    /// The worker lost its lease; whoever holds it now settles the job.
    Abandoned,
}

impl JobDisposition {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobDisposition::Completed { .. }
                | JobDisposition::DeadLettered
                | JobDisposition::Cancelled
        )
    }
}

/// Result of one attempt, delivered on the pool's result channel.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job_id: String,
    pub worker_id: String,
    pub attempt: u32,
    pub disposition: JobDisposition,
    pub error: Option<String>,
    /// Chunks rendered with the placeholder text.
    pub degraded_chunks: Vec<usize>,
    pub used_ocr: bool,
}

impl JobResult {
    pub fn new(job_id: &str, worker_id: &str, attempt: u32, disposition: JobDisposition) -> Self {
        Self {
            job_id: job_id.to_string(),
            worker_id: worker_id.to_string(),
            attempt,
            disposition,
            error: None,
            degraded_chunks: Vec::new(),
            used_ocr: false,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn success(&self) -> bool {
        matches!(self.disposition, JobDisposition::Completed { .. })
    }
}
