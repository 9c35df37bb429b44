use std::time::Instant;

use tracing::{error, info, info_span, warn};

use crate::model::{Outcome, StageName};
use crate::report::ReportBuilder;
use crate::storage::ExtractionSink;

use super::context::PipelineContext;
use super::error::PipelineError;
use super::progress::{ProgressEvent, ProgressReporter};
use super::stages::{standard_stages, Stage, StageTally};

pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    /// The six extraction stages in order.
    pub fn new() -> Self {
        Self {
            stages: standard_stages(),
        }
    }

    /// Test constructor with an explicit stage list.
    pub fn with_stages(stages: Vec<Box<dyn Stage>>) -> Self {
        Self { stages }
    }

    pub fn stage_names(&self) -> Vec<StageName> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Runs every stage in order and finalizes the report.
    ///
    /// A required stage ending `failed` halts the pipeline with a `failed`
    /// verdict. A structural failure additionally marks the report
    /// catastrophic and is returned as an error after finalization.
    pub fn run(
        &self,
        ctx: &mut PipelineContext,
        report: &mut ReportBuilder,
        sink: &dyn ExtractionSink,
        progress: &dyn ProgressReporter,
    ) -> Result<Outcome, PipelineError> {
        let _pipeline_span = info_span!("pipeline",
            job_id = %ctx.job.job_id,
            target_id = %ctx.job.target_id,
            attempt = ctx.job.attempt,
        )
        .entered();

        let total = self.stages.len();
        for (index, stage) in self.stages.iter().enumerate() {
            let name = stage.name();
            let _stage_span = info_span!("stage", stage = %name).entered();

            // A stage that never started leaves no result behind, so its
            // status projection keeps the previous value.
            if let Err(reason) = ctx.cancel.check() {
                let err = PipelineError::Cancelled { stage: name, reason };
                warn!("Stopping before stage {}: {}", name, err);
                report.record_catastrophic(Some(name), err.to_string(), error_trace(&err))?;
                let status = report.finalize();
                progress.report(ProgressEvent::Finished { status });
                return Err(err);
            }

            progress.report(ProgressEvent::StageStarted {
                stage: name,
                index,
                total,
            });

            let started = Instant::now();
            let mut tally = StageTally::new(name);
            let outcome = stage.run(ctx, &mut tally, sink);
            let duration_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(()) => {
                    let result = tally.finish(duration_ms);
                    let status = result.status;
                    info!(
                        processed = result.counts.processed,
                        skipped = result.counts.skipped,
                        failed = result.counts.failed,
                        duration_ms,
                        "Stage {} finished: {}",
                        name,
                        status
                    );
                    report.record_stage(result)?;
                    progress.report(ProgressEvent::StageCompleted {
                        stage: name,
                        status,
                    });

                    if status == Outcome::Failed && report.gating().is_required(name) {
                        warn!("Required stage {} failed, halting pipeline", name);
                        break;
                    }
                }
                Err(err) => {
                    error!("Stage {} aborted: {}", name, err);
                    let summary = err.to_string();
                    report.record_stage(tally.abort(duration_ms, summary.clone()))?;
                    report.record_catastrophic(Some(name), summary, error_trace(&err))?;
                    let status = report.finalize();
                    progress.report(ProgressEvent::StageCompleted {
                        stage: name,
                        status: Outcome::Failed,
                    });
                    progress.report(ProgressEvent::Finished { status });
                    return Err(err);
                }
            }
        }

        let status = report.finalize();
        info!("Pipeline finished: {}", status);
        progress.report(ProgressEvent::Finished { status });
        Ok(status)
    }
}

/// Renders an error and its source chain, one cause per line.
pub(crate) fn error_trace(err: &dyn std::error::Error) -> String {
    let mut trace = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LodPolicy;
    use crate::model::Severity;
    use crate::parser::{
        Collection, ElementRecord, EntityError, InMemoryModel, SpatialNode, TypeRecord,
    };
    use crate::pipeline::{CancelToken, JobContext, NoopProgress};
    use crate::report::StageGating;
    use crate::storage::MemorySink;

    fn model(elements: usize) -> InMemoryModel {
        let mut model = InMemoryModel::new()
            .with_spatial(SpatialNode {
                global_id: "P".into(),
                entity_type: "Project".into(),
                name: None,
                parent: None,
            })
            .with_type(TypeRecord {
                global_id: "T".into(),
                entity_type: "WallType".into(),
                name: None,
                material: None,
            });
        for i in 0..elements {
            let mut element = ElementRecord::new(format!("E{}", i), "Wall");
            element.container = Some("P".into());
            element.type_ref = Some("T".into());
            model = model.with_element(element);
        }
        model
    }

    fn context(model: InMemoryModel) -> PipelineContext {
        PipelineContext::new(
            JobContext {
                job_id: "job".into(),
                target_id: "target".into(),
                attempt: 1,
                lod: LodPolicy::low(),
            },
            Box::new(model),
            CancelToken::new(),
        )
    }

    fn run(model: InMemoryModel) -> (Result<Outcome, PipelineError>, ReportBuilder) {
        let mut ctx = context(model);
        let mut report = ReportBuilder::start("job", "target", 1, StageGating::default());
        let result = Pipeline::new().run(&mut ctx, &mut report, &MemorySink::new(), &NoopProgress);
        (result, report)
    }

    #[test]
    fn test_clean_model_succeeds() {
        let (result, report) = run(model(3));
        assert_eq!(result.unwrap(), Outcome::Success);
        assert_eq!(report.report().stages.len(), 6);
        assert!(report.report().errors.is_empty());
    }

    #[test]
    fn test_unreadable_collection_is_catastrophic() {
        let (result, report) = run(model(3).unreadable(Collection::Systems));
        let err = result.unwrap_err();
        assert!(matches!(err, PipelineError::Unreadable { stage: StageName::Systems, .. }));

        let report = report.report();
        assert!(report.catastrophic_failure);
        assert_eq!(report.overall_status, Some(Outcome::Failed));
        assert_eq!(report.stages.len(), 4);
        assert_eq!(report.stages[3].status, Outcome::Failed);
        let failure = report.failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(StageName::Systems));
        assert!(failure.trace.contains("caused by"));
    }

    #[test]
    fn test_missing_lookup_is_catastrophic() {
        let pipeline = Pipeline::with_stages(vec![Box::new(
            crate::pipeline::stages::ElementsAndGeometryStage,
        )]);
        let mut ctx = context(model(1));
        let mut report = ReportBuilder::start("job", "target", 1, StageGating::default());
        let err = pipeline
            .run(&mut ctx, &mut report, &MemorySink::new(), &NoopProgress)
            .unwrap_err();
        assert!(matches!(err, PipelineError::MissingLookup { lookup: "spatial", .. }));
        assert!(report.report().catastrophic_failure);
    }

    #[test]
    fn test_required_stage_failure_halts_without_catastrophe() {
        let model = InMemoryModel::new()
            .with_spatial(SpatialNode {
                global_id: "P".into(),
                entity_type: "Project".into(),
                name: None,
                parent: None,
            })
            .with_corrupt_type(EntityError::corrupt("bad").with_id("T1"))
            .with_corrupt_type(EntityError::corrupt("bad").with_id("T2"));
        let (result, report) = run(model);
        assert_eq!(result.unwrap(), Outcome::Failed);

        let report = report.report();
        assert!(!report.catastrophic_failure);
        assert_eq!(report.stages.len(), 3);
        assert_eq!(report.stages[2].stage, StageName::Types);
        assert_eq!(report.stages[2].status, Outcome::Failed);
        assert_eq!(report.errors.len(), 2);
        assert_eq!(report.errors[0].severity, Severity::Error);
    }

    #[test]
    fn test_cancelled_before_first_stage() {
        let mut ctx = context(model(1));
        ctx.cancel.cancel();
        let mut report = ReportBuilder::start("job", "target", 1, StageGating::default());
        let err = Pipeline::new()
            .run(&mut ctx, &mut report, &MemorySink::new(), &NoopProgress)
            .unwrap_err();
        assert!(err.cancel_reason().is_some());
        assert!(report.report().stages.is_empty());
        assert_eq!(report.report().overall_status, Some(Outcome::Failed));
        let failure = report.report().failure.as_ref().unwrap();
        assert_eq!(failure.stage, Some(StageName::SpatialHierarchy));
    }

    /// Runs the systems stage, then cancels the job.
    struct CancelAfterSystems;

    impl Stage for CancelAfterSystems {
        fn name(&self) -> StageName {
            StageName::Systems
        }

        fn run(
            &self,
            ctx: &mut PipelineContext,
            tally: &mut StageTally,
            sink: &dyn ExtractionSink,
        ) -> Result<(), PipelineError> {
            crate::pipeline::stages::SystemsStage.run(ctx, tally, sink)?;
            ctx.cancel.cancel();
            Ok(())
        }
    }

    #[test]
    fn test_cancel_at_stage_boundary_leaves_next_stage_unrecorded() {
        use crate::pipeline::stages::{
            ElementsAndGeometryStage, MaterialsStage, PropertiesStage, SpatialHierarchyStage,
            TypesStage,
        };

        let pipeline = Pipeline::with_stages(vec![
            Box::new(SpatialHierarchyStage),
            Box::new(MaterialsStage),
            Box::new(TypesStage),
            Box::new(CancelAfterSystems),
            Box::new(ElementsAndGeometryStage),
            Box::new(PropertiesStage),
        ]);
        let mut ctx = context(model(3));
        let mut report = ReportBuilder::start("job", "target", 1, StageGating::default());
        let err = pipeline
            .run(&mut ctx, &mut report, &MemorySink::new(), &NoopProgress)
            .unwrap_err();

        assert!(matches!(
            err,
            PipelineError::Cancelled { stage: StageName::ElementsAndGeometry, .. }
        ));
        let report = report.report();
        assert_eq!(report.stages.len(), 4);
        assert!(report.stage(StageName::ElementsAndGeometry).is_none());
        assert!(report.catastrophic_failure);
        assert_eq!(
            report.failure.as_ref().unwrap().stage,
            Some(StageName::ElementsAndGeometry)
        );
    }
}
