pub mod cancel;
pub mod context;
pub mod error;
pub mod progress;
pub mod runner;
pub mod stages;

pub use cancel::{CancelReason, CancelToken};
pub use context::{JobContext, PipelineContext};
pub use error::{ElementFailure, PipelineError};
pub use progress::{NoopProgress, ProgressEvent, ProgressReporter};
pub use runner::Pipeline;
pub use stages::{Stage, StageTally};
