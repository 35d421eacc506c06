//! Job progress events for real-time status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Stage of the pipeline a job is in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobPhase {
    Queued,
    Extracting,
    Summarizing,
    Rendering,
    Persisting,
    Retrying,
    Completed,
    Failed,
}

impl JobPhase {
    /// Percent range the stage covers in the overall job progress.
    pub fn percent_range(&self) -> (u8, u8) {
        match self {
            JobPhase::Queued | JobPhase::Retrying => (0, 0),
            JobPhase::Extracting => (0, 30),
            JobPhase::Summarizing => (30, 80),
            JobPhase::Rendering => (80, 95),
            JobPhase::Persisting => (95, 100),
            JobPhase::Completed | JobPhase::Failed => (100, 100),
        }
    }

    /// Percent reached after `done` of `total` units of work in this stage.
    pub fn percent_at(&self, done: usize, total: usize) -> u8 {
        let (start, end) = self.percent_range();
        if total == 0 || done >= total {
            return end;
        }
        let span = (end - start) as usize;
        start + (span * done / total) as u8
    }
}

impl std::fmt::Display for JobPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobPhase::Queued => write!(f, "Queued"),
            JobPhase::Extracting => write!(f, "Extracting text"),
            JobPhase::Summarizing => write!(f, "Summarizing"),
            JobPhase::Rendering => write!(f, "Rendering"),
            JobPhase::Persisting => write!(f, "Saving"),
            JobPhase::Retrying => write!(f, "Waiting to retry"),
            JobPhase::Completed => write!(f, "Completed"),
            JobPhase::Failed => write!(f, "Failed"),
        }
    }
}

/// State reported to polling callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProgressState {
    /// Unknown or expired job id.
    Idle,
    Queued,
    Active,
    Completed,
    Failed,
}

impl ProgressState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressState::Completed | ProgressState::Failed)
    }
}

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Redacted display name of the document.
    pub filename: String,
    pub phase: JobPhase,
    pub state: ProgressState,
    pub percent: u8,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Artifact locator (set on completion).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_locator: Option<String>,
    /// Error message (set on failure).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    /// Creates a new progress event.
    pub fn new(job_id: &str, filename: &str, phase: JobPhase, percent: u8, message: &str) -> Self {
        let state = match phase {
            JobPhase::Queued => ProgressState::Queued,
            JobPhase::Completed => ProgressState::Completed,
            JobPhase::Failed => ProgressState::Failed,
            _ => ProgressState::Active,
        };

        Self {
            job_id: job_id.to_string(),
            filename: filename.to_string(),
            phase,
            state,
            percent,
            message: message.to_string(),
            timestamp: Utc::now(),
            artifact_locator: None,
            error: None,
        }
    }

    /// Creates a completion event.
    pub fn completed(job_id: &str, filename: &str, artifact_locator: &str) -> Self {
        let mut event = Self::new(
            job_id,
            filename,
            JobPhase::Completed,
            100,
            "Summary ready",
        );
        event.artifact_locator = Some(artifact_locator.to_string());
        event
    }

    /// Creates a failure event.
    pub fn failed(job_id: &str, filename: &str, error: &str) -> Self {
        let mut event = Self::new(job_id, filename, JobPhase::Failed, 100, "Processing failed");
        event.error = Some(error.to_string());
        event
    }
}

/// Broadcasts job progress events for streaming.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // Ignore errors - no active receivers is fine
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
