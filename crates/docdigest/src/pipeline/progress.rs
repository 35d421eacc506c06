use crate::broadcast::{JobPhase, JobProgressHandle};

/// Progress emitted by the pipeline at stage boundaries. Terminal states are
/// reported by the worker once the queue has settled the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    Stage(JobPhase),
    Advance {
        phase: JobPhase,
        done: usize,
        total: usize,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: ProgressEvent) {}
}

impl ProgressReporter for JobProgressHandle {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Stage(phase) => self.enter(phase),
            ProgressEvent::Advance { phase, done, total } => self.advance(phase, done, total),
        }
    }
}
