//! Job progress broadcaster for push-style status streaming.
//!
//! The job row stays the source of truth; these events mirror its
//! transitions for subscribers that prefer not to poll.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::model::{Outcome, StageName};
use crate::worker::job::{Job, JobState};

/// Progress event for a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    pub target_id: String,
    pub attempt: u32,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_total: Option<u32>,
    /// Human-readable message describing current activity.
    pub message: String,
    pub timestamp: DateTime<Utc>,
    /// Verdict of the finalized report (set once the attempt ends).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub overall_status: Option<Outcome>,
    /// Error message (set on failure or retry).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job: &Job, state: JobState, message: impl Into<String>) -> Self {
        Self {
            job_id: job.id.clone(),
            target_id: job.target_id.clone(),
            attempt: job.attempt_count,
            state,
            stage: None,
            stage_index: None,
            stage_total: None,
            message: message.into(),
            timestamp: Utc::now(),
            overall_status: None,
            error: None,
        }
    }

    pub fn started(job: &Job) -> Self {
        Self::new(
            job,
            JobState::Started,
            format!("Attempt {} of {} started", job.attempt_count, job.max_attempts),
        )
    }

    pub fn stage(job: &Job, stage: StageName, index: usize, total: usize) -> Self {
        Self {
            stage: Some(stage),
            stage_index: Some(index as u32),
            stage_total: Some(total as u32),
            ..Self::new(job, JobState::Progress, format!("Running stage {}", stage))
        }
    }

    pub fn completed(job: &Job, status: Outcome) -> Self {
        Self {
            overall_status: Some(status),
            ..Self::new(job, JobState::Success, format!("Ingest finished: {}", status))
        }
    }

    pub fn retrying(job: &Job, error: &str, status: Option<Outcome>) -> Self {
        Self {
            overall_status: status,
            error: Some(error.to_string()),
            ..Self::new(job, JobState::Pending, "Attempt failed, retry scheduled")
        }
    }

    pub fn failed(job: &Job, error: &str, status: Option<Outcome>) -> Self {
        Self {
            overall_status: status,
            error: Some(error.to_string()),
            ..Self::new(job, JobState::Failure, "Ingest failed")
        }
    }
}

/// Broadcasts job progress events to subscribers.
#[derive(Clone)]
pub struct JobProgressBroadcaster {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl JobProgressBroadcaster {
    /// Creates a new job progress broadcaster with the specified channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Sends a progress event to all subscribers.
    pub fn send(&self, event: JobProgressEvent) {
        // No active receivers is fine.
        let _ = self.sender.send(event);
    }

    /// Creates a new subscriber for progress events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobProgressEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for JobProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::geometry::LodPolicy;
    use crate::worker::queue::JobQueue;

    fn job() -> Job {
        JobQueue::new(Database::open_in_memory().unwrap())
            .enqueue("target-1", "/m.json", LodPolicy::low(), 3)
            .unwrap()
    }

    #[test]
    fn test_subscribers_receive_events() {
        let broadcaster = JobProgressBroadcaster::new(16);
        let mut rx = broadcaster.subscribe();
        let job = job();

        broadcaster.send(JobProgressEvent::stage(&job, StageName::Types, 2, 6));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.job_id, job.id);
        assert_eq!(event.state, JobState::Progress);
        assert_eq!(event.stage, Some(StageName::Types));
        assert_eq!(event.stage_total, Some(6));
    }

    #[test]
    fn test_send_without_subscribers() {
        let broadcaster = JobProgressBroadcaster::new(4);
        broadcaster.send(JobProgressEvent::started(&job()));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn test_serializes_camel_case() {
        let event = JobProgressEvent::failed(&job(), "boom", Some(Outcome::Failed));
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["targetId"], "target-1");
        assert_eq!(json["overallStatus"], "failed");
        assert!(json.get("stage").is_none());
    }
}
