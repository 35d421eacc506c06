pub mod job;
pub mod pool;

pub use job::{JobDisposition, JobResult};
pub use pool::{PoolSettings, WorkerPool, WorkerWaker};

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
