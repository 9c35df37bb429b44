//! Test harness for isolated test execution.
//!
//! Each `TestHarness` owns a temporary directory holding the SQLite database
//! and any model files a test writes.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tempfile::TempDir;

use bimingest::db::Database;
use bimingest::parser::{InMemoryModel, ModelParser};
use bimingest::pipeline::{CancelToken, JobContext, NoopProgress, PipelineError};
use bimingest::report::StageGating;
use bimingest::storage::MemorySink;
use bimingest::worker::{ExecutionOutcome, JobExecutor, JobQueue, RetryPolicy};
use bimingest::{LodPolicy, Outcome, Pipeline, PipelineContext, ProcessingReport, ReportBuilder};

/// Result of running a model straight through the pipeline.
pub struct PipelineRun {
    pub result: Result<Outcome, PipelineError>,
    pub report: ProcessingReport,
    pub sink: MemorySink,
}

/// Runs the standard pipeline over `model` without a database.
pub fn run_pipeline(model: InMemoryModel, lod: LodPolicy) -> PipelineRun {
    run_pipeline_with(model, lod, StageGating::default(), CancelToken::new(), 64)
}

pub fn run_pipeline_with(
    model: InMemoryModel,
    lod: LodPolicy,
    gating: StageGating,
    cancel: CancelToken,
    cancel_check_interval: usize,
) -> PipelineRun {
    let job = JobContext {
        job_id: "job-test".to_string(),
        target_id: "target-test".to_string(),
        attempt: 1,
        lod,
    };
    let mut ctx = PipelineContext::new(job, Box::new(model), cancel)
        .with_cancel_check_interval(cancel_check_interval);
    let mut builder = ReportBuilder::start("job-test", "target-test", 1, gating);
    let sink = MemorySink::new();

    let result = Pipeline::new().run(&mut ctx, &mut builder, &sink, &NoopProgress);

    PipelineRun {
        result,
        report: builder.into_report(),
        sink,
    }
}

/// Test harness providing an isolated database and model directory.
pub struct TestHarness {
    temp_dir: TempDir,
    pub db_path: PathBuf,
    db: Database,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let db_path = temp_dir.path().join("data").join("bimingest.db");
        let db = Database::open(&db_path).expect("Failed to open test database");
        Self {
            temp_dir,
            db_path,
            db,
        }
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn database(&self) -> Database {
        self.db.clone()
    }

    pub fn queue(&self) -> JobQueue {
        JobQueue::new(self.db.clone())
    }

    /// Writes a JSON model document and returns its path.
    pub fn write_model(&self, name: &str, model: &Value) -> String {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, serde_json::to_vec(model).expect("Failed to encode model"))
            .expect("Failed to write model");
        path.to_string_lossy().to_string()
    }

    /// Writes a placeholder file for parsers that ignore the bytes.
    pub fn write_placeholder(&self, name: &str) -> String {
        let path = self.temp_dir.path().join(name);
        std::fs::write(&path, b"{}").expect("Failed to write placeholder");
        path.to_string_lossy().to_string()
    }

    /// Executor over this harness' database with no retry delay.
    pub fn executor(&self, parser: Arc<dyn ModelParser>) -> JobExecutor {
        JobExecutor::new(self.db.clone(), parser).with_retry_policy(RetryPolicy {
            base_delay: std::time::Duration::ZERO,
            max_delay: std::time::Duration::ZERO,
            jitter: std::time::Duration::ZERO,
        })
    }

    /// Claims and executes the next due job, if any.
    pub fn run_next(&self, executor: &JobExecutor, cancel: CancelToken) -> Option<ExecutionOutcome> {
        let job = executor.queue().claim_next().expect("Failed to claim job")?;
        Some(executor.execute(&job, cancel).expect("Failed to settle job"))
    }

    /// Runs jobs until the queue has nothing due, returning every outcome.
    pub fn drain(&self, executor: &JobExecutor) -> Vec<ExecutionOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self.run_next(executor, CancelToken::new()) {
            outcomes.push(outcome);
        }
        outcomes
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
