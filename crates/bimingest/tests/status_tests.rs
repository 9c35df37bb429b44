//! Status projection across successive jobs for one target.

mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use bimingest::parser::{Collection, InMemoryParser};
use bimingest::pipeline::stages::{
    ElementsAndGeometryStage, MaterialsStage, PropertiesStage, SpatialHierarchyStage,
    SystemsStage, TypesStage,
};
use bimingest::pipeline::{PipelineError, Stage, StageTally};
use bimingest::status::StatusProjector;
use bimingest::storage::ExtractionSink;
use bimingest::worker::retry::FailureKind;
use bimingest::worker::ExecutionOutcome;
use bimingest::{CancelToken, JobState, LodPolicy, Outcome, Pipeline, PipelineContext, StageName};

use common::{ModelBuilder, TestHarness};

fn run_once(harness: &TestHarness, target_id: &str, parser: InMemoryParser) {
    let executor = harness.executor(Arc::new(parser));
    let file = harness.write_placeholder("model.json");
    executor
        .queue()
        .enqueue(target_id, &file, LodPolicy::low(), 1)
        .unwrap();
    assert_eq!(harness.drain(&executor).len(), 1);
}

#[test]
fn test_geometry_status_survives_early_failure() {
    let harness = TestHarness::new();
    let projector = StatusProjector::new(harness.database());

    let good = ModelBuilder::new().elements(10).build();
    run_once(&harness, "target-1", InMemoryParser::new(good));

    let first = projector.status("target-1").unwrap().unwrap();
    assert_eq!(first.overall_status, Some(Outcome::Success));
    assert_eq!(first.geometry_status, Some(Outcome::Success));
    assert_eq!(first.validation_status, Some(Outcome::Success));
    let first_job = first.job_id.clone();

    // Fails in the materials stage, before geometry runs.
    let broken = ModelBuilder::new()
        .elements(10)
        .build()
        .unreadable(Collection::Materials);
    run_once(&harness, "target-1", InMemoryParser::new(broken));

    let second = projector.status("target-1").unwrap().unwrap();
    assert_ne!(second.job_id, first_job);
    assert_eq!(second.job_state, Some(JobState::Failure));
    assert_eq!(second.overall_status, Some(Outcome::Failed));
    assert_eq!(second.parsing_status, Some(Outcome::Failed));
    assert_eq!(second.geometry_status, Some(Outcome::Success));
    assert_eq!(second.validation_status, Some(Outcome::Success));
}

/// Systems stage that outlives the job deadline before returning.
struct SlowSystems(Duration);

impl Stage for SlowSystems {
    fn name(&self) -> StageName {
        StageName::Systems
    }

    fn run(
        &self,
        ctx: &mut PipelineContext,
        tally: &mut StageTally,
        sink: &dyn ExtractionSink,
    ) -> Result<(), PipelineError> {
        SystemsStage.run(ctx, tally, sink)?;
        thread::sleep(self.0);
        Ok(())
    }
}

#[test]
fn test_timeout_before_geometry_keeps_prior_geometry() {
    let harness = TestHarness::new();
    let projector = StatusProjector::new(harness.database());

    run_once(
        &harness,
        "target-1",
        InMemoryParser::new(ModelBuilder::new().elements(5).build()),
    );

    let executor = harness
        .executor(Arc::new(InMemoryParser::new(
            ModelBuilder::new().elements(5).build(),
        )))
        .with_pipeline(Pipeline::with_stages(vec![
            Box::new(SpatialHierarchyStage),
            Box::new(MaterialsStage),
            Box::new(TypesStage),
            Box::new(SlowSystems(Duration::from_millis(400))),
            Box::new(ElementsAndGeometryStage),
            Box::new(PropertiesStage),
        ]));
    let file = harness.write_placeholder("model.json");
    executor
        .queue()
        .enqueue("target-1", &file, LodPolicy::low(), 1)
        .unwrap();
    let outcome = harness
        .run_next(&executor, CancelToken::with_timeout(Duration::from_millis(200)))
        .unwrap();
    match outcome {
        ExecutionOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Timeout),
        other => panic!("unexpected outcome {:?}", other),
    }

    let status = projector.status("target-1").unwrap().unwrap();
    assert_eq!(status.job_state, Some(JobState::Failure));
    assert_eq!(status.overall_status, Some(Outcome::Failed));
    assert_eq!(status.parsing_status, Some(Outcome::Success));
    assert_eq!(status.geometry_status, Some(Outcome::Success));
}

#[test]
fn test_geometry_status_follows_element_stage() {
    let harness = TestHarness::new();
    let projector = StatusProjector::new(harness.database());

    let partial = ModelBuilder::new().elements(10).corrupt_at(3).build();
    run_once(&harness, "target-1", InMemoryParser::new(partial));

    let status = projector.status("target-1").unwrap().unwrap();
    assert_eq!(status.overall_status, Some(Outcome::Partial));
    assert_eq!(status.parsing_status, Some(Outcome::Success));
    assert_eq!(status.geometry_status, Some(Outcome::Partial));
    assert_eq!(status.job_state, Some(JobState::Success));
}

#[test]
fn test_open_failure_keeps_prior_geometry() {
    let harness = TestHarness::new();
    let projector = StatusProjector::new(harness.database());

    run_once(
        &harness,
        "target-1",
        InMemoryParser::new(ModelBuilder::new().elements(2).build()),
    );
    run_once(
        &harness,
        "target-1",
        InMemoryParser::new(ModelBuilder::new().build()).reject_as_malformed(),
    );

    let status = projector.status("target-1").unwrap().unwrap();
    assert_eq!(status.overall_status, Some(Outcome::Failed));
    assert_eq!(status.parsing_status, Some(Outcome::Failed));
    assert_eq!(status.geometry_status, Some(Outcome::Success));
    assert!(status.last_error.unwrap().contains("model rejected"));
}

#[test]
fn test_progress_version_distinguishes_no_update() {
    let harness = TestHarness::new();
    let queue = harness.queue();
    let file = harness.write_placeholder("model.json");
    queue.enqueue("target-1", &file, LodPolicy::low(), 3).unwrap();

    let projector = StatusProjector::new(harness.database());
    let queued = projector.status("target-1").unwrap().unwrap();
    assert_eq!(queued.job_state, Some(JobState::Pending));
    assert_eq!(queued.progress_version, 0);
    assert_eq!(queued.current_stage, None);

    let executor = harness.executor(Arc::new(InMemoryParser::new(
        ModelBuilder::new().elements(1).build(),
    )));
    harness.drain(&executor);

    let done = projector.status("target-1").unwrap().unwrap();
    assert_eq!(done.job_state, Some(JobState::Success));
    // claim, six stage updates and completion
    assert!(done.progress_version >= 8);
    assert_eq!(done.stage_total, Some(6));
}
