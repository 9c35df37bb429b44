pub mod broadcast;
pub mod config;
pub mod db;
pub mod error;
pub mod geometry;
pub mod logging;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod report;
pub mod service;
pub mod status;
pub mod storage;
pub mod worker;

pub use broadcast::{JobProgressBroadcaster, JobProgressEvent};
pub use config::{load_config, Config};
pub use error::{ConfigError, IngestError, Result, StorageError, WorkerError};
pub use geometry::{decimate, LodLevel, LodPolicy};
pub use model::{Outcome, PropertyValue, Severity, StageName};
pub use parser::{JsonModelParser, ModelParser, ParseContext, ParseError};
pub use pipeline::{CancelToken, Pipeline, PipelineContext};
pub use report::{ElementError, ProcessingReport, ReportBuilder, StageGating, StageResult};
pub use service::IngestService;
pub use status::{StatusProjector, StatusView};
pub use worker::{Job, JobState, JobSubmitter, WorkerPool};
