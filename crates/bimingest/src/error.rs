//! Error types shared across the crate.
//!
//! Per-element and per-stage failures never reach these types: they are
//! recorded in the processing report. What surfaces here is a caller-facing
//! failure of the service itself.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Job rejected: {0}")]
    Worker(#[from] WorkerError),

    #[error("Extraction storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Model could not be opened: {0}")]
    Parse(#[from] crate::parser::ParseError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    /// Unknown target, job or report id.
    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },
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

    /// Semantic check failed after the schema accepted the document.
    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Config does not match schema v1: {errors}")]
    SchemaValidation { errors: String },
}

/// Failure writing stage output to the extraction sink.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to upsert extracted entity: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Failed to encode extracted entity: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum WorkerError {
    /// The pool could not be started (zero workers or thread spawn failure).
    #[error("Failed to start worker pool: {0}")]
    SpawnFailed(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),

    #[error("Job queue error: {0}")]
    Queue(#[from] crate::db::DatabaseError),
}

pub type Result<T> = std::result::Result<T, IngestError>;
