//! Caller-facing entry point wiring the queue, workers, reports and status
//! projections over one database.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use log::info;
use tokio::sync::broadcast;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};
use crate::config::Config;
use crate::db::job_repo::JobFilter;
use crate::db::{report_repo, Database};
use crate::error::{ConfigError, IngestError, Result};
use crate::geometry::LodPolicy;
use crate::parser::ModelParser;
use crate::report::{ProcessingReport, StageGating};
use crate::status::{StatusProjector, StatusView};
use crate::worker::{Job, JobExecutor, JobQueue, JobState, JobSubmitter, PoolOptions, RetryPolicy, WorkerPool};

pub struct IngestService {
    config: Config,
    db: Database,
    queue: JobQueue,
    executor: Arc<JobExecutor>,
    submitter: RwLock<JobSubmitter>,
    projector: StatusProjector,
    broadcaster: JobProgressBroadcaster,
    pool: Mutex<Option<WorkerPool>>,
}

impl IngestService {
    /// Opens the configured database and builds the service. Workers are not
    /// started until [`IngestService::start`].
    pub fn new(config: Config, parser: Arc<dyn ModelParser>) -> Result<Self> {
        let path = config
            .resolved_database_path()
            .ok_or_else(|| ConfigError::Validation {
                message: "could not determine a database path".to_string(),
            })?;
        let db = Database::open(&path)?;
        Ok(Self::with_database(config, db, parser))
    }

    pub fn with_database(config: Config, db: Database, parser: Arc<dyn ModelParser>) -> Self {
        let broadcaster = JobProgressBroadcaster::default();
        let executor = JobExecutor::new(db.clone(), parser)
            .with_gating(StageGating::new(config.required_stages.iter().copied()))
            .with_retry_policy(RetryPolicy::from_config(&config))
            .with_cancel_check_interval(config.cancel_check_interval)
            .with_broadcaster(broadcaster.clone());
        let queue = JobQueue::new(db.clone());
        let submitter = JobSubmitter::new(queue.clone(), config.max_attempts, config.lod);

        Self {
            projector: StatusProjector::new(db.clone()),
            executor: Arc::new(executor),
            submitter: RwLock::new(submitter),
            queue,
            db,
            config,
            broadcaster,
            pool: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Starts the worker pool. Does nothing when it is already running.
    pub fn start(&self) -> Result<()> {
        let mut pool = self.pool_guard();
        if pool.is_some() {
            return Ok(());
        }

        let started = WorkerPool::start(
            Arc::clone(&self.executor),
            PoolOptions {
                worker_count: self.config.worker_count,
                poll_interval: self.config.poll_interval(),
                job_timeout: self.config.job_timeout(),
            },
        )?;

        let mut submitter = match self.submitter.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *submitter = submitter.clone().with_waker(started.waker());
        *pool = Some(started);
        Ok(())
    }

    /// Stops the workers after their current job and waits for them.
    pub fn shutdown(&self) {
        let pool = self.pool_guard().take();
        if let Some(pool) = pool {
            pool.shutdown();
            pool.wait();
        }
    }

    pub fn is_running(&self) -> bool {
        self.pool_guard().is_some()
    }

    pub fn submit(
        &self,
        target_id: &str,
        file_reference: &str,
        lod: Option<LodPolicy>,
    ) -> Result<String> {
        let submitter = match self.submitter.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(submitter.submit(target_id, file_reference, lod)?)
    }

    pub fn get_status(&self, target_id: &str) -> Result<StatusView> {
        self.projector
            .status(target_id)?
            .ok_or_else(|| IngestError::NotFound {
                kind: "target",
                id: target_id.to_string(),
            })
    }

    /// The latest report of a job. Available after terminal failure too.
    pub fn get_report(&self, job_id: &str) -> Result<ProcessingReport> {
        report_repo::find_by_job(&self.db, job_id)?.ok_or_else(|| IngestError::NotFound {
            kind: "report",
            id: job_id.to_string(),
        })
    }

    pub fn get_job(&self, job_id: &str) -> Result<Job> {
        self.queue.find(job_id)?.ok_or_else(|| IngestError::NotFound {
            kind: "job",
            id: job_id.to_string(),
        })
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64)> {
        Ok(self.queue.list(filter)?)
    }

    /// Cancels a job. A pending job fails immediately; a running one is
    /// signalled and fails at its next cancellation check. Returns `false`
    /// for jobs that already finished.
    pub fn cancel(&self, job_id: &str) -> Result<bool> {
        let job = self.get_job(job_id)?;
        match job.state {
            JobState::Pending => {
                let cancelled = self.queue.cancel_pending(job_id)?;
                if cancelled {
                    info!("Cancelled pending job {}", job_id);
                }
                Ok(cancelled)
            }
            state if state.is_running() => Ok(self
                .pool_guard()
                .as_ref()
                .map_or(false, |pool| pool.cancel(job_id))),
            _ => Ok(false),
        }
    }

    /// Push-style progress events, in addition to polling `get_status`.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.broadcaster.subscribe()
    }

    fn pool_guard(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        match self.pool.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for IngestService {
    fn drop(&mut self) {
        self.shutdown();
    }
}
