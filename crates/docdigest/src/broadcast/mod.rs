//! Job progress: event broadcasting and the per-job progress store.

pub mod job_progress;
pub mod progress_store;

pub use job_progress::{JobPhase, JobProgressBroadcaster, JobProgressEvent, ProgressState};
pub use progress_store::{JobProgressHandle, ProgressRecord, ProgressTracker};
