use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use log::{debug, error, info, warn};

use crate::error::WorkerError;
use crate::pipeline::CancelToken;

use super::executor::{ExecutionOutcome, JobExecutor};
use super::queue::JobQueue;

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub worker_count: usize,
    /// How long an idle worker sleeps before polling the queue again.
    pub poll_interval: Duration,
    /// Wall-clock budget of a single attempt.
    pub job_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            worker_count: 2,
            poll_interval: Duration::from_millis(250),
            job_timeout: Duration::from_secs(600),
        }
    }
}

/// Settled attempt as seen by the pool owner.
#[derive(Debug, Clone)]
pub struct JobResult {
    pub job_id: String,
    pub target_id: String,
    pub attempt: u32,
    pub outcome: ExecutionOutcome,
}

type RunningJobs = Arc<Mutex<HashMap<String, CancelToken>>>;

/// Fixed-size pool of worker threads pulling from the durable queue.
pub struct WorkerPool {
    wake_sender: Sender<()>,
    result_receiver: Receiver<JobResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    running: RunningJobs,
}

impl WorkerPool {
    /// Requeues jobs interrupted by a previous process, then spawns the
    /// workers.
    pub fn start(executor: Arc<JobExecutor>, options: PoolOptions) -> Result<Self, WorkerError> {
        if options.worker_count == 0 {
            return Err(WorkerError::SpawnFailed(
                "worker_count must be > 0".to_string(),
            ));
        }

        let queue = executor.queue().clone();
        queue.recover_stale()?;

        let (wake_sender, wake_receiver) = bounded::<()>(options.worker_count * 2);
        let (result_sender, result_receiver) = bounded::<JobResult>(options.worker_count * 16);
        let shutdown = Arc::new(AtomicBool::new(false));
        let running: RunningJobs = Arc::new(Mutex::new(HashMap::new()));

        let mut workers = Vec::with_capacity(options.worker_count);

        for worker_id in 0..options.worker_count {
            let worker = Worker {
                id: worker_id,
                queue: queue.clone(),
                executor: Arc::clone(&executor),
                wake: wake_receiver.clone(),
                results: result_sender.clone(),
                shutdown: Arc::clone(&shutdown),
                running: Arc::clone(&running),
                poll_interval: options.poll_interval,
                job_timeout: options.job_timeout,
            };

            let handle = thread::Builder::new()
                .name(format!("bimingest-worker-{}", worker_id))
                .spawn(move || worker.run())
                .map_err(|e| WorkerError::SpawnFailed(e.to_string()))?;

            workers.push(handle);
        }

        info!("Started {} workers", options.worker_count);

        Ok(Self {
            wake_sender,
            result_receiver,
            workers,
            shutdown,
            running,
        })
    }

    /// Sender that nudges an idle worker to poll the queue immediately.
    pub fn waker(&self) -> Sender<()> {
        self.wake_sender.clone()
    }

    /// Signals the cancel token of a running job. Returns `false` when the
    /// job is not running in this pool.
    pub fn cancel(&self, job_id: &str) -> bool {
        let running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match running.get(job_id) {
            Some(token) => {
                info!("Cancelling running job {}", job_id);
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn running_count(&self) -> usize {
        self.running.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn try_recv_result(&self) -> Option<JobResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result_timeout(&self, timeout: Duration) -> Option<JobResult> {
        self.result_receiver.recv_timeout(timeout).ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.wake_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

struct Worker {
    id: usize,
    queue: JobQueue,
    executor: Arc<JobExecutor>,
    wake: Receiver<()>,
    results: Sender<JobResult>,
    shutdown: Arc<AtomicBool>,
    running: RunningJobs,
    poll_interval: Duration,
    job_timeout: Duration,
}

impl Worker {
    fn run(self) {
        debug!("Worker {} started", self.id);

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                debug!("Worker {} received shutdown signal", self.id);
                break;
            }

            match self.queue.claim_next() {
                Ok(Some(job)) => {
                    debug!("Worker {} claimed job {}", self.id, job.id);
                    let cancel = CancelToken::with_timeout(self.job_timeout);
                    self.track(&job.id, Some(cancel.clone()));

                    let outcome = self.executor.execute(&job, cancel);
                    self.track(&job.id, None);

                    match outcome {
                        Ok(outcome) => self.publish(JobResult {
                            job_id: job.id.clone(),
                            target_id: job.target_id.clone(),
                            attempt: job.attempt_count,
                            outcome,
                        }),
                        // Left in a running state; recovered on next start.
                        Err(e) => error!("Worker {} could not settle job {}: {}", self.id, job.id, e),
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!("Worker {} failed to poll the queue: {}", self.id, e),
            }

            match self.wake.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Worker {} wake channel disconnected", self.id);
                    break;
                }
            }
        }

        debug!("Worker {} stopped", self.id);
    }

    fn track(&self, job_id: &str, token: Option<CancelToken>) {
        let mut running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match token {
            Some(token) => {
                running.insert(job_id.to_string(), token);
            }
            None => {
                running.remove(job_id);
            }
        }
    }

    fn publish(&self, result: JobResult) {
        match self.results.try_send(result) {
            Ok(()) => {}
            // Nobody is draining results; the queue row is authoritative.
            Err(TrySendError::Full(result)) => {
                debug!("Result channel full, dropping result for job {}", result.job_id)
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geometry::LodPolicy;
    use crate::model::Outcome;
    use crate::parser::{InMemoryModel, InMemoryParser};
    use crate::worker::job::JobState;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn options(worker_count: usize) -> PoolOptions {
        PoolOptions {
            worker_count,
            poll_interval: Duration::from_millis(20),
            job_timeout: Duration::from_secs(30),
        }
    }

    fn executor(db: &Database) -> Arc<JobExecutor> {
        Arc::new(JobExecutor::new(
            db.clone(),
            Arc::new(InMemoryParser::new(InMemoryModel::new())),
        ))
    }

    #[test]
    fn test_zero_workers_rejected() {
        let db = Database::open_in_memory().unwrap();
        let result = WorkerPool::start(executor(&db), options(0));
        assert!(matches!(result, Err(WorkerError::SpawnFailed(_))));
    }

    #[test]
    fn test_worker_pool_creation() {
        let db = Database::open_in_memory().unwrap();
        let pool = WorkerPool::start(executor(&db), options(2)).unwrap();

        assert!(!pool.is_shutdown());
        assert_eq!(pool.running_count(), 0);
        assert!(!pool.cancel("missing"));

        pool.shutdown();
        assert!(pool.is_shutdown());

        pool.wait();
    }

    #[test]
    fn test_pool_processes_queued_job() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{{}}").unwrap();

        let db = Database::open_in_memory().unwrap();
        let executor = executor(&db);
        let job = executor
            .queue()
            .enqueue("target-1", &file.path().to_string_lossy(), LodPolicy::low(), 3)
            .unwrap();

        let pool = WorkerPool::start(Arc::clone(&executor), options(2)).unwrap();
        let _ = pool.waker().try_send(());

        let result = pool.recv_result_timeout(Duration::from_secs(10)).unwrap();
        assert_eq!(result.job_id, job.id);
        assert!(matches!(
            result.outcome,
            ExecutionOutcome::Succeeded(Outcome::Success)
        ));

        let stored = executor.queue().find(&job.id).unwrap().unwrap();
        assert_eq!(stored.state, JobState::Success);

        pool.shutdown();
        pool.wait();
    }
}
