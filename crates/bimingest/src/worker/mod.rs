pub mod executor;
pub mod job;
pub mod pool;
pub mod queue;
pub mod retry;
pub mod submitter;

pub use executor::{ExecutionOutcome, JobExecutor};
pub use job::{Job, JobState};
pub use pool::{JobResult, PoolOptions, WorkerPool};
pub use queue::{JobQueue, Settlement};
pub use retry::{FailureKind, JobFailure, RetryPolicy};
pub use submitter::JobSubmitter;

// Re-export crossbeam_channel for use in main
pub use crossbeam_channel;
