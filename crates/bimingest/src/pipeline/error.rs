use thiserror::Error;

use crate::error::StorageError;
use crate::geometry::MeshError;
use crate::model::{Severity, StageName};
use crate::parser::{EntityError, EntityErrorKind, ParseError};
use crate::report::ReportError;

use super::cancel::CancelReason;

/// Failures that abort the pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Stage '{stage}' could not read its source: {source}")]
    Unreadable {
        stage: StageName,
        #[source]
        source: ParseError,
    },

    #[error("Stage '{stage}' requires the {lookup} lookup, which was never built")]
    MissingLookup {
        stage: StageName,
        lookup: &'static str,
    },

    #[error("Stage '{stage}' failed to persist extracted records: {source}")]
    Persistence {
        stage: StageName,
        #[source]
        source: StorageError,
    },

    #[error("Stage '{stage}' stopped: {reason}")]
    Cancelled {
        stage: StageName,
        reason: CancelReason,
    },

    #[error(transparent)]
    Report(#[from] ReportError),
}

impl PipelineError {
    pub fn stage(&self) -> Option<StageName> {
        match self {
            PipelineError::Unreadable { stage, .. }
            | PipelineError::MissingLookup { stage, .. }
            | PipelineError::Persistence { stage, .. }
            | PipelineError::Cancelled { stage, .. } => Some(*stage),
            PipelineError::Report(_) => None,
        }
    }

    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            PipelineError::Cancelled { reason, .. } => Some(*reason),
            _ => None,
        }
    }
}

/// Why a single entity could not be extracted. Never leaves its stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ElementFailure {
    #[error("corrupt entity: {0}")]
    Corrupt(String),

    #[error("missing data: {0}")]
    MissingData(String),

    #[error("invalid geometry: {0}")]
    Geometry(MeshError),

    #[error("decimation rejected: {0}")]
    Decimation(MeshError),
}

impl ElementFailure {
    pub fn severity(&self) -> Severity {
        match self {
            ElementFailure::MissingData(_) => Severity::Warning,
            ElementFailure::Corrupt(_)
            | ElementFailure::Geometry(_)
            | ElementFailure::Decimation(_) => Severity::Error,
        }
    }
}

impl From<&EntityError> for ElementFailure {
    fn from(err: &EntityError) -> Self {
        match err.kind {
            EntityErrorKind::Corrupt => ElementFailure::Corrupt(err.message.clone()),
            EntityErrorKind::MissingData => ElementFailure::MissingData(err.message.clone()),
        }
    }
}
