use crossbeam_channel::Sender;
use log::info;

use crate::error::WorkerError;
use crate::geometry::LodPolicy;

use super::queue::JobQueue;

/// Validates submissions and writes them to the durable queue.
#[derive(Clone)]
pub struct JobSubmitter {
    queue: JobQueue,
    max_attempts: u32,
    default_lod: LodPolicy,
    waker: Option<Sender<()>>,
}

impl JobSubmitter {
    pub fn new(queue: JobQueue, max_attempts: u32, default_lod: LodPolicy) -> Self {
        Self {
            queue,
            max_attempts: max_attempts.max(1),
            default_lod,
            waker: None,
        }
    }

    /// Nudges an idle worker whenever a job is submitted.
    pub fn with_waker(mut self, waker: Sender<()>) -> Self {
        self.waker = Some(waker);
        self
    }

    /// Queues a job and returns its id. `lod` falls back to the configured
    /// default policy.
    pub fn submit(
        &self,
        target_id: &str,
        file_reference: &str,
        lod: Option<LodPolicy>,
    ) -> Result<String, WorkerError> {
        if target_id.trim().is_empty() {
            return Err(WorkerError::InvalidJob("target id is empty".to_string()));
        }
        if file_reference.trim().is_empty() {
            return Err(WorkerError::InvalidJob(
                "file reference is empty".to_string(),
            ));
        }

        let lod = lod.unwrap_or(self.default_lod);
        if lod.target_triangles == 0 {
            return Err(WorkerError::InvalidJob(
                "target triangle count must be at least 1".to_string(),
            ));
        }

        let job = self
            .queue
            .enqueue(target_id, file_reference, lod, self.max_attempts)?;
        info!(
            "Submitted job {} for target {} ({} lod)",
            job.id, job.target_id, lod.level
        );

        if let Some(waker) = &self.waker {
            // Full means workers are already awake.
            let _ = waker.try_send(());
        }

        Ok(job.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geometry::LodLevel;
    use crate::worker::job::JobState;

    fn submitter() -> JobSubmitter {
        let queue = JobQueue::new(Database::open_in_memory().unwrap());
        JobSubmitter::new(queue, 3, LodPolicy::low())
    }

    #[test]
    fn test_submit_uses_default_lod() {
        let submitter = submitter();
        let id = submitter.submit("target-1", "/models/a.json", None).unwrap();

        let job = submitter.queue.find(&id).unwrap().unwrap();
        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.lod, LodPolicy::low());
        assert_eq!(job.max_attempts, 3);
    }

    #[test]
    fn test_submit_explicit_lod() {
        let submitter = submitter();
        let id = submitter
            .submit("target-1", "/models/a.json", Some(LodPolicy::high()))
            .unwrap();
        let job = submitter.queue.find(&id).unwrap().unwrap();
        assert_eq!(job.lod.level, LodLevel::High);
    }

    #[test]
    fn test_submit_rejects_invalid_input() {
        let submitter = submitter();
        assert!(matches!(
            submitter.submit("", "/models/a.json", None),
            Err(WorkerError::InvalidJob(_))
        ));
        assert!(matches!(
            submitter.submit("target-1", "  ", None),
            Err(WorkerError::InvalidJob(_))
        ));
        assert!(matches!(
            submitter.submit("target-1", "/m.json", Some(LodPolicy::low().with_target(0))),
            Err(WorkerError::InvalidJob(_))
        ));
    }

    #[test]
    fn test_submit_wakes_workers() {
        let (tx, rx) = crossbeam_channel::bounded(1);
        let submitter = submitter().with_waker(tx);
        submitter.submit("target-1", "/m.json", None).unwrap();
        submitter.submit("target-2", "/m.json", None).unwrap();
        assert!(rx.try_recv().is_ok());
    }
}
