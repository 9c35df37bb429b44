//! Runs one claimed job attempt end to end: open the model, run the
//! pipeline, then settle the queue row together with the report and the
//! status projection.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::db::{report_repo, Database, DatabaseError};
use crate::model::Outcome;
use crate::parser::{read_source, ModelParser, ParseContext};
use crate::pipeline::{
    CancelToken, JobContext, Pipeline, PipelineContext, ProgressEvent, ProgressReporter,
};
use crate::report::{ProcessingReport, ReportBuilder, StageGating};
use crate::status::StatusProjector;
use crate::storage::DatabaseSink;

use super::job::Job;
use super::queue::{JobQueue, Settlement};
use super::retry::{FailureKind, JobFailure, RetryPolicy};

/// How a job attempt was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// The job reached `success` with this verdict.
    Succeeded(Outcome),
    /// The attempt failed transiently and was requeued.
    Retrying { failure: JobFailure, delay: Duration },
    /// The job reached terminal `failure`.
    Failed(JobFailure),
    /// The queue row moved on without us (stale attempt).
    Superseded,
}

pub struct JobExecutor {
    db: Database,
    queue: JobQueue,
    parser: Arc<dyn ModelParser>,
    pipeline: Arc<Pipeline>,
    gating: StageGating,
    retry: RetryPolicy,
    cancel_check_interval: usize,
    broadcaster: Option<JobProgressBroadcaster>,
}

impl JobExecutor {
    pub fn new(db: Database, parser: Arc<dyn ModelParser>) -> Self {
        Self {
            queue: JobQueue::new(db.clone()),
            db,
            parser,
            pipeline: Arc::new(Pipeline::new()),
            gating: StageGating::default(),
            retry: RetryPolicy::default(),
            cancel_check_interval: 64,
            broadcaster: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Arc::new(pipeline);
        self
    }

    pub fn with_gating(mut self, gating: StageGating) -> Self {
        self.gating = gating;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_cancel_check_interval(mut self, interval: usize) -> Self {
        self.cancel_check_interval = interval.max(1);
        self
    }

    pub fn with_broadcaster(mut self, broadcaster: JobProgressBroadcaster) -> Self {
        self.broadcaster = Some(broadcaster);
        self
    }

    pub fn queue(&self) -> &JobQueue {
        &self.queue
    }

    /// Executes one claimed attempt of `job`. Only database failures while
    /// settling the job are returned as errors; everything else is recorded
    /// in the report and the job row.
    pub fn execute(&self, job: &Job, cancel: CancelToken) -> Result<ExecutionOutcome, DatabaseError> {
        info!(
            "Running job {} for target {} (attempt {}/{})",
            job.id, job.target_id, job.attempt_count, job.max_attempts
        );
        self.broadcast(JobProgressEvent::started(job));

        let mut builder = ReportBuilder::start(
            job.id.clone(),
            job.target_id.clone(),
            job.attempt_count,
            self.gating.clone(),
        );

        let result = match self.open(job) {
            Ok(source) => match cancel.check() {
                Ok(()) => self.run_pipeline(job, source, cancel, &mut builder),
                Err(reason) => {
                    let failure = JobFailure::from_cancel(reason);
                    warn!("Job {} stopped after opening its model: {}", job.id, failure);
                    if let Err(e) = builder.record_catastrophic(None, failure.message.clone(), "") {
                        warn!("Could not record cancellation for job {}: {}", job.id, e);
                    }
                    Err(failure)
                }
            },
            Err(failure) => {
                if let Err(e) = builder.record_catastrophic(None, failure.message.clone(), "") {
                    warn!("Could not record open failure for job {}: {}", job.id, e);
                }
                Err(failure)
            }
        };
        let verdict = builder.finalize();

        self.settle(job, result, verdict, &builder.into_report())
    }

    fn open(&self, job: &Job) -> Result<Box<dyn ParseContext>, JobFailure> {
        let bytes = read_source(Path::new(&job.file_reference))
            .map_err(|e| JobFailure::from_open(&e))?;
        self.parser.open(&bytes).map_err(|e| JobFailure::from_open(&e))
    }

    fn run_pipeline(
        &self,
        job: &Job,
        source: Box<dyn ParseContext>,
        cancel: CancelToken,
        builder: &mut ReportBuilder,
    ) -> Result<Outcome, JobFailure> {
        let job_ctx = JobContext {
            job_id: job.id.clone(),
            target_id: job.target_id.clone(),
            attempt: job.attempt_count,
            lod: job.lod,
        };
        let mut ctx = PipelineContext::new(job_ctx, source, cancel)
            .with_cancel_check_interval(self.cancel_check_interval);
        let sink = DatabaseSink::new(self.db.clone());
        let progress = TrackedProgress {
            queue: &self.queue,
            job,
            broadcaster: self.broadcaster.as_ref(),
        };

        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            self.pipeline.run(&mut ctx, builder, &sink, &progress)
        }));

        match run {
            Ok(Ok(Outcome::Failed)) => Err(JobFailure::new(
                FailureKind::RequiredStageFailed,
                "a required stage failed",
            )),
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(err)) => Err(JobFailure::from_pipeline(&err)),
            Err(payload) => {
                let message = format!("pipeline panicked: {}", panic_message(payload.as_ref()));
                error!("Job {}: {}", job.id, message);
                if let Err(e) = builder.record_catastrophic(None, message.clone(), "") {
                    warn!("Could not record panic for job {}: {}", job.id, e);
                }
                Err(JobFailure::new(FailureKind::Internal, message))
            }
        }
    }

    fn settle(
        &self,
        job: &Job,
        result: Result<Outcome, JobFailure>,
        verdict: Outcome,
        report: &ProcessingReport,
    ) -> Result<ExecutionOutcome, DatabaseError> {
        let failure = match result {
            Ok(status) => {
                if !self.commit(job, &Settlement::Complete, report)? {
                    return Ok(ExecutionOutcome::Superseded);
                }
                info!("Job {} finished: {}", job.id, status);
                self.broadcast(JobProgressEvent::completed(job, status));
                return Ok(ExecutionOutcome::Succeeded(status));
            }
            Err(failure) => failure,
        };

        if self.retry.should_retry(&failure, job) {
            let delay = self.retry.backoff(job.attempt_count);
            let settlement = Settlement::Retry {
                failure: &failure,
                delay,
            };
            if !self.commit(job, &settlement, report)? {
                return Ok(ExecutionOutcome::Superseded);
            }
            warn!(
                "Job {} attempt {} failed ({}), retrying in {:?}",
                job.id, job.attempt_count, failure, delay
            );
            self.broadcast(JobProgressEvent::retrying(job, &failure.message, Some(verdict)));
            return Ok(ExecutionOutcome::Retrying { failure, delay });
        }

        let failure = if failure.is_retryable() {
            JobFailure::new(
                failure.kind,
                format!("retry budget exhausted: {}", failure.message),
            )
        } else {
            failure
        };
        if !self.commit(job, &Settlement::Fail(&failure), report)? {
            return Ok(ExecutionOutcome::Superseded);
        }
        error!("Job {} failed: {}", job.id, failure);
        self.broadcast(JobProgressEvent::failed(job, &failure.message, Some(verdict)));
        Ok(ExecutionOutcome::Failed(failure))
    }

    /// Settles the queue row and stores the report and status projection in
    /// one transaction. Nothing is written once the attempt is superseded.
    fn commit(
        &self,
        job: &Job,
        settlement: &Settlement<'_>,
        report: &ProcessingReport,
    ) -> Result<bool, DatabaseError> {
        self.db.with_transaction(|tx| {
            if !self.queue.settle_in(tx, job, settlement)? {
                return Ok(false);
            }
            report_repo::upsert(tx, report)?;
            StatusProjector::apply_in(tx, report)?;
            Ok(true)
        })
    }

    fn broadcast(&self, event: JobProgressEvent) {
        if let Some(broadcaster) = &self.broadcaster {
            broadcaster.send(event);
        }
    }
}

/// Mirrors pipeline progress into the job row and the broadcaster.
struct TrackedProgress<'a> {
    queue: &'a JobQueue,
    job: &'a Job,
    broadcaster: Option<&'a JobProgressBroadcaster>,
}

impl ProgressReporter for TrackedProgress<'_> {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::StageStarted { stage, index, total } => {
                if let Err(e) =
                    self.queue
                        .record_progress(self.job, stage, index as u32, total as u32)
                {
                    warn!("Failed to record progress for job {}: {}", self.job.id, e);
                }
                if let Some(broadcaster) = self.broadcaster {
                    broadcaster.send(JobProgressEvent::stage(self.job, stage, index, total));
                }
            }
            ProgressEvent::StageCompleted { stage, status } => {
                debug!("Job {} stage {} completed: {}", self.job.id, stage, status);
            }
            ProgressEvent::Finished { .. } => {}
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::LodPolicy;
    use crate::parser::{InMemoryModel, InMemoryParser, SpatialNode};
    use crate::worker::job::JobState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn model_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();
        file
    }

    fn quick_retry() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn setup(parser: InMemoryParser, file: &NamedTempFile) -> (JobExecutor, Job) {
        let db = Database::open_in_memory().unwrap();
        let executor = JobExecutor::new(db, Arc::new(parser)).with_retry_policy(quick_retry());
        executor
            .queue()
            .enqueue("target-1", &file.path().to_string_lossy(), LodPolicy::low(), 3)
            .unwrap();
        let job = executor.queue().claim_next().unwrap().unwrap();
        (executor, job)
    }

    #[test]
    fn test_successful_job() {
        let file = model_file();
        let model = InMemoryModel::new().with_spatial(SpatialNode {
            global_id: "site".to_string(),
            entity_type: "IfcSite".to_string(),
            name: None,
            parent: None,
        });
        let (executor, job) = setup(InMemoryParser::new(model), &file);

        let outcome = executor.execute(&job, CancelToken::new()).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Succeeded(Outcome::Success));

        let stored = executor.queue().find(&job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Success);
        let report = report_repo::find_by_job(&executor.db, &job.id).unwrap().unwrap();
        assert_eq!(report.stages.len(), 6);
    }

    #[test]
    fn test_malformed_input_is_terminal() {
        let file = model_file();
        let parser = InMemoryParser::new(InMemoryModel::new()).reject_as_malformed();
        let (executor, job) = setup(parser, &file);

        let outcome = executor.execute(&job, CancelToken::new()).unwrap();
        match outcome {
            ExecutionOutcome::Failed(failure) => {
                assert_eq!(failure.kind, FailureKind::MalformedInput)
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let report = report_repo::find_by_job(&executor.db, &job.id).unwrap().unwrap();
        assert!(report.catastrophic_failure);
        assert_eq!(report.failure.unwrap().stage, None);
    }

    #[test]
    fn test_transient_open_failure_is_retried() {
        let file = model_file();
        let parser = InMemoryParser::new(InMemoryModel::new()).fail_open_transiently(1);
        let (executor, job) = setup(parser, &file);

        let outcome = executor.execute(&job, CancelToken::new()).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Retrying { .. }));
        assert_eq!(
            executor.queue().find(&job.id).unwrap().unwrap().state,
            JobState::Pending
        );

        let retry = executor.queue().claim_next().unwrap().unwrap();
        assert_eq!(retry.attempt_count, 2);
        let outcome = executor.execute(&retry, CancelToken::new()).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Succeeded(Outcome::Success));
    }

    #[test]
    fn test_cancelled_job_is_terminal() {
        let file = model_file();
        let (executor, job) = setup(InMemoryParser::new(InMemoryModel::new()), &file);
        let cancel = CancelToken::new();
        cancel.cancel();

        let outcome = executor.execute(&job, cancel).unwrap();
        match outcome {
            ExecutionOutcome::Failed(failure) => assert_eq!(failure.kind, FailureKind::Cancelled),
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[test]
    fn test_missing_file_fails_parsing() {
        let db = Database::open_in_memory().unwrap();
        let executor = JobExecutor::new(db, Arc::new(InMemoryParser::new(InMemoryModel::new())));
        executor
            .queue()
            .enqueue("target-9", "/nonexistent/model.json", LodPolicy::low(), 3)
            .unwrap();
        let job = executor.queue().claim_next().unwrap().unwrap();

        let outcome = executor.execute(&job, CancelToken::new()).unwrap();
        assert!(matches!(outcome, ExecutionOutcome::Failed(_)));

        let view = StatusProjector::new(executor.db.clone())
            .status("target-9").unwrap().unwrap();
        assert_eq!(view.parsing_status, Some(Outcome::Failed));
        assert_eq!(view.geometry_status, None);
    }

    #[test]
    fn test_timeout_after_open_has_no_stage() {
        let file = model_file();
        let (executor, job) = setup(InMemoryParser::new(InMemoryModel::new()), &file);

        let outcome = executor
            .execute(&job, CancelToken::with_timeout(Duration::ZERO))
            .unwrap();
        match outcome {
            ExecutionOutcome::Retrying { failure, .. } => {
                assert_eq!(failure.kind, FailureKind::Timeout)
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let report = report_repo::find_by_job(&executor.db, &job.id).unwrap().unwrap();
        assert!(report.stages.is_empty());
        assert!(report.catastrophic_failure);
        assert_eq!(report.failure.unwrap().stage, None);
    }

    #[test]
    fn test_superseded_attempt_leaves_report_and_status_alone() {
        let file = model_file();
        let (executor, stale) = setup(InMemoryParser::new(InMemoryModel::new()), &file);

        assert_eq!(executor.queue().recover_stale().unwrap(), 1);
        let current = executor.queue().claim_next().unwrap().unwrap();
        assert_eq!(current.attempt_count, 2);
        let outcome = executor.execute(&current, CancelToken::new()).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Succeeded(Outcome::Success));

        let cancel = CancelToken::new();
        cancel.cancel();
        let outcome = executor.execute(&stale, cancel).unwrap();
        assert_eq!(outcome, ExecutionOutcome::Superseded);

        let report = report_repo::find_by_job(&executor.db, &stale.id).unwrap().unwrap();
        assert_eq!(report.attempt, 2);
        assert!(!report.catastrophic_failure);

        let view = StatusProjector::new(executor.db.clone())
            .status("target-1")
            .unwrap()
            .unwrap();
        assert_eq!(view.overall_status, Some(Outcome::Success));
        assert_eq!(view.job_state, Some(JobState::Success));
    }
}
