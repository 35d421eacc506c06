pub mod broadcast;
pub mod chunker;
pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod merge;
pub mod persistence;
pub mod pipeline;
pub mod processor;
pub mod queue;
pub mod sanitize;
pub mod secrets;
pub mod service;
pub mod storage;
pub mod summarize;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, ProgressRecord, ProgressState, ProgressTracker};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, DocdigestError, ExtractionError, PersistenceError, ProgressError, QueueError,
    RenderError, Result, ServiceError, WorkerError,
};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext};
pub use queue::{JobQueue, SqliteJobQueue};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError};
pub use service::{JobHandle, JobService};
pub use worker::{JobDisposition, JobResult, WorkerPool};
