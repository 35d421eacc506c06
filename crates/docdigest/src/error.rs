use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DocdigestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extraction(#[from] ExtractionError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Progress error: {0}")]
    Progress(#[from] ProgressError),

    #[error("Summarization service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },
}

#[derive(Error, Debug)]
pub enum ExtractionError {
    #[error("Failed to read document '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Document '{path}' is corrupt or not a PDF: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Document has no usable text ({chars} characters after OCR, need {required})")]
    InsufficientText { chars: usize, required: usize },

    #[error("Failed to rasterize page {page}: {reason}")]
    Rasterize { page: u32, reason: String },

    #[error("OCR failed on page {page}: {reason}")]
    Ocr { page: u32, reason: String },

    #[error("Failed to allocate scratch space: {0}")]
    Scratch(#[source] std::io::Error),
}

/// Failure reported by the summarization provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error("Provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider request timed out")]
    Timeout,

    #[error("Provider transport error: {0}")]
    Transport(String),

    #[error("Malformed provider response: {0}")]
    Malformed(String),
}

impl ServiceError {
    /// Timeouts, rate limiting, server errors and transport failures are
    /// worth retrying; anything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            ServiceError::Status { status, .. } => {
                *status == 408 || *status == 429 || *status >= 500
            }
            ServiceError::Timeout | ServiceError::Transport(_) => true,
            ServiceError::Malformed(_) => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("Failed to create directory '{path}': {source}")]
    CreateDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write artifact '{path}': {source}")]
    WriteFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to encode artifact: {0}")]
    Encode(String),
}

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Failed to create document record: {0}")]
    Document(String),

    #[error("Failed to create summary record: {0}")]
    Summary(String),

    #[error("Persistence backend unavailable: {0}")]
    Unavailable(String),
}

impl From<crate::db::DatabaseError> for PersistenceError {
    fn from(err: crate::db::DatabaseError) -> Self {
        PersistenceError::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Job queue unavailable: {0}")]
    Unavailable(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Worker {worker_id} does not hold the lease for job {job_id}")]
    LeaseLost { job_id: String, worker_id: String },

    #[error("Invalid transition for job {job_id}: {reason}")]
    InvalidTransition { job_id: String, reason: String },
}

impl From<crate::db::DatabaseError> for QueueError {
    fn from(err: crate::db::DatabaseError) -> Self {
        QueueError::Unavailable(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Job {0} is not running on this pool")]
    UnknownJob(String),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProgressError {
    #[error("Progress for job {0} is already owned by another worker")]
    AlreadyClaimed(String),
}

pub type Result<T> = std::result::Result<T, DocdigestError>;
