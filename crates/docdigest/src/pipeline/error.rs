use thiserror::Error;

use crate::broadcast::JobPhase;
use crate::error::{ExtractionError, PersistenceError, QueueError, RenderError};
use crate::queue::ErrorClass;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Text extraction failed: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Rendering failed: {0}")]
    Render(#[from] RenderError),

    #[error("Persistence failed: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Lease check failed: {0}")]
    Lease(#[from] QueueError),

    #[error("Cancelled before {stage}")]
    Cancelled { stage: JobPhase },
}

impl PipelineError {
    /// How the queue should treat this failure.
    pub fn class(&self) -> ErrorClass {
        match self {
            PipelineError::Extraction(e) => match e {
                ExtractionError::Read { .. }
                | ExtractionError::Corrupt { .. }
                | ExtractionError::InsufficientText { .. } => ErrorClass::Permanent,
                ExtractionError::Rasterize { .. }
                | ExtractionError::Ocr { .. }
                | ExtractionError::Scratch(_) => ErrorClass::Transient,
            },
            PipelineError::Render(RenderError::Encode(_)) => ErrorClass::Permanent,
            PipelineError::Render(_) => ErrorClass::Transient,
            PipelineError::Persistence(_) => ErrorClass::Transient,
            PipelineError::Lease(_) => ErrorClass::Transient,
            PipelineError::Cancelled { .. } => ErrorClass::Transient,
        }
    }

    /// Whether the worker lost ownership of the job and must not touch its
    /// queue state any more.
    pub fn is_lease_lost(&self) -> bool {
        matches!(self, PipelineError::Lease(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    /// The chunk at `index` carries the placeholder instead of a summary.
    DegradedChunk { index: usize },
    /// A rendered artifact could not be removed after a failed run.
    DiscardFailed { locator: String, error: String },
}
