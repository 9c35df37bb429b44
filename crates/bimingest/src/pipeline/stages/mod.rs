//! The six extraction stages and their shared per-entity loop.

mod elements;
mod materials;
mod properties;
mod spatial;
mod systems;
mod types;

use std::fmt::Display;

use crate::model::{Severity, StageName};
use crate::parser::{EntityError, EntityIter};
use crate::report::{ElementError, StageCounts, StageResult};
use crate::storage::{ExtractedRecord, ExtractionSink};

use super::cancel::CancelToken;
use super::context::PipelineContext;
use super::error::{ElementFailure, PipelineError};

pub use elements::ElementsAndGeometryStage;
pub use materials::MaterialsStage;
pub use properties::PropertiesStage;
pub use spatial::SpatialHierarchyStage;
pub use systems::SystemsStage;
pub use types::TypesStage;

pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Processes every entity of the stage. Per-entity problems go into
    /// `tally`; only structural failures are returned as errors.
    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError>;
}

/// All stages in pipeline order.
pub fn standard_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(SpatialHierarchyStage),
        Box::new(MaterialsStage),
        Box::new(TypesStage),
        Box::new(SystemsStage),
        Box::new(ElementsAndGeometryStage),
        Box::new(PropertiesStage),
    ]
}

/// Per-stage counters and diagnostics.
#[derive(Debug)]
pub struct StageTally {
    stage: StageName,
    counts: StageCounts,
    errors: Vec<ElementError>,
}

impl StageTally {
    pub fn new(stage: StageName) -> Self {
        Self {
            stage,
            counts: StageCounts::default(),
            errors: Vec::new(),
        }
    }

    pub fn counts(&self) -> StageCounts {
        self.counts
    }

    pub fn errors(&self) -> &[ElementError] {
        &self.errors
    }

    pub fn processed(&mut self) {
        self.counts.processed += 1;
    }

    /// Skips an entity without a diagnostic.
    pub fn skip_silently(&mut self) {
        self.counts.skipped += 1;
    }

    /// Attaches a warning to an entity that is still processed.
    pub fn warn(&mut self, global_id: Option<&str>, entity_type: Option<&str>, message: impl Display) {
        self.push(Severity::Warning, global_id, entity_type, message.to_string());
    }

    /// Records an entity that could not be extracted. Warning-level
    /// failures count as skipped, the rest as failed.
    pub fn fail(&mut self, global_id: Option<&str>, entity_type: Option<&str>, failure: ElementFailure) {
        let severity = failure.severity();
        if severity >= Severity::Error {
            self.counts.failed += 1;
        } else {
            self.counts.skipped += 1;
        }
        self.push(severity, global_id, entity_type, failure.to_string());
    }

    pub fn entity_error(&mut self, err: &EntityError) {
        self.fail(
            err.global_id.as_deref(),
            err.entity_type.as_deref(),
            ElementFailure::from(err),
        );
    }

    fn push(&mut self, severity: Severity, global_id: Option<&str>, entity_type: Option<&str>, message: String) {
        self.errors.push(
            ElementError::new(severity, Some(self.stage), message)
                .with_element(global_id.map(str::to_string), entity_type.map(str::to_string)),
        );
    }

    pub fn finish(self, duration_ms: u64) -> StageResult {
        StageResult::from_counts(self.stage, self.counts, self.errors, duration_ms)
    }

    pub fn abort(self, duration_ms: u64, message: impl Into<String>) -> StageResult {
        StageResult::aborted(self.stage, self.counts, self.errors, duration_ms, message)
    }
}

/// What the entity loop does with an entity the parser could not decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OnEntityError {
    Report,
    /// Already reported by an earlier stage.
    Skip,
}

/// Drives `f` over every decoded entity, checking for cancellation every
/// `interval` entities.
pub(crate) fn for_each_entity<T, F>(
    stage: StageName,
    cancel: &CancelToken,
    interval: usize,
    entities: EntityIter<'_, T>,
    tally: &mut StageTally,
    on_error: OnEntityError,
    mut f: F,
) -> Result<(), PipelineError>
where
    F: FnMut(T, &mut StageTally) -> Result<(), PipelineError>,
{
    let interval = interval.max(1);
    for (seen, entity) in entities.enumerate() {
        if seen % interval == 0 {
            cancel
                .check()
                .map_err(|reason| PipelineError::Cancelled { stage, reason })?;
        }

        match entity {
            Ok(entity) => f(entity, tally)?,
            Err(err) => match on_error {
                OnEntityError::Report => tally.entity_error(&err),
                OnEntityError::Skip => tally.skip_silently(),
            },
        }
    }
    Ok(())
}

pub(crate) fn persist(
    sink: &dyn ExtractionSink,
    ctx: &PipelineContext,
    stage: StageName,
    entity_key: &str,
    entity_type: &str,
    payload: serde_json::Value,
) -> Result<(), PipelineError> {
    sink.upsert(ExtractedRecord {
        target_id: ctx.job.target_id.clone(),
        stage,
        entity_key: entity_key.to_string(),
        entity_type: entity_type.to_string(),
        job_id: ctx.job.job_id.clone(),
        payload,
    })
    .map_err(|source| PipelineError::Persistence { stage, source })
}

pub(crate) fn unreadable(stage: StageName) -> impl FnOnce(crate::parser::ParseError) -> PipelineError {
    move |source| PipelineError::Unreadable { stage, source }
}
