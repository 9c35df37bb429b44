//! Durable job queue over the `jobs` table.
//!
//! Delivery is at-least-once: a claimed job whose worker dies is returned
//! to `pending` by [`JobQueue::recover_stale`] on the next pool start, as
//! long as it has attempts left.

use std::time::Duration;

use chrono::Utc;
use log::{debug, warn};
use rusqlite::Connection;
use uuid::Uuid;

use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{format_timestamp, now_timestamp, Database, DatabaseError};
use crate::geometry::LodPolicy;
use crate::model::StageName;

use super::job::{Job, JobState};
use super::retry::JobFailure;

#[derive(Clone)]
pub struct JobQueue {
    db: Database,
}

impl JobQueue {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn enqueue(
        &self,
        target_id: &str,
        file_reference: &str,
        lod: LodPolicy,
        max_attempts: u32,
    ) -> Result<Job, DatabaseError> {
        let now = now_timestamp();
        let row = JobRow {
            id: Uuid::new_v4().to_string(),
            target_id: target_id.to_string(),
            file_reference: file_reference.to_string(),
            lod_level: lod.level.as_str().to_string(),
            lod_target_triangles: lod.target_triangles as i64,
            state: JobState::Pending.as_str().to_string(),
            attempt_count: 0,
            max_attempts,
            current_stage: None,
            stage_index: None,
            stage_total: None,
            progress_version: 0,
            last_error: None,
            error_kind: None,
            created_at: now.clone(),
            updated_at: now.clone(),
            started_at: None,
            finished_at: None,
            next_attempt_at: now,
        };
        job_repo::insert(&self.db, &row)?;
        debug!("Enqueued job {} for target {}", row.id, row.target_id);
        Job::try_from(row)
    }

    /// Claims the next due job for this worker, if any.
    pub fn claim_next(&self) -> Result<Option<Job>, DatabaseError> {
        job_repo::claim_next(&self.db, &now_timestamp())?
            .map(Job::try_from)
            .transpose()
    }

    pub fn record_progress(
        &self,
        job: &Job,
        stage: StageName,
        index: u32,
        total: u32,
    ) -> Result<bool, DatabaseError> {
        job_repo::record_progress(
            &self.db,
            &job.id,
            job.attempt_count,
            stage.as_str(),
            index,
            total,
            &now_timestamp(),
        )
    }

    pub fn complete(&self, job: &Job) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| self.settle_in(conn, job, &Settlement::Complete))
    }

    pub fn fail(&self, job: &Job, failure: &JobFailure) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| self.settle_in(conn, job, &Settlement::Fail(failure)))
    }

    /// Records the failed attempt and requeues the job after `delay`.
    pub fn schedule_retry(
        &self,
        job: &Job,
        failure: &JobFailure,
        delay: Duration,
    ) -> Result<bool, DatabaseError> {
        self.db
            .with_conn(|conn| self.settle_in(conn, job, &Settlement::Retry { failure, delay }))
    }

    /// Ends the running attempt of `job` on `conn`, which may be an open
    /// transaction. Returns `false` when the attempt is no longer current.
    pub fn settle_in(
        &self,
        conn: &Connection,
        job: &Job,
        settlement: &Settlement<'_>,
    ) -> Result<bool, DatabaseError> {
        if !permits(job, settlement.target_state()) {
            return Ok(false);
        }
        let now = Utc::now();
        let done = match settlement {
            Settlement::Complete => {
                job_repo::mark_success(conn, &job.id, job.attempt_count, &format_timestamp(now))?
            }
            Settlement::Fail(failure) => job_repo::mark_failure(
                conn,
                &job.id,
                job.attempt_count,
                &failure.message,
                failure.kind.as_str(),
                &format_timestamp(now),
            )?,
            Settlement::Retry { failure, delay } => {
                let due = chrono::Duration::from_std(*delay)
                    .ok()
                    .and_then(|d| now.checked_add_signed(d))
                    .unwrap_or(now);
                job_repo::schedule_retry(
                    conn,
                    &job.id,
                    job.attempt_count,
                    &failure.message,
                    failure.kind.as_str(),
                    &format_timestamp(due),
                    &format_timestamp(now),
                )?
            }
        };
        if !done {
            warn!("Job {} attempt {} is no longer current", job.id, job.attempt_count);
        }
        Ok(done)
    }

    /// Fails a job that has not been claimed yet.
    pub fn cancel_pending(&self, job_id: &str) -> Result<bool, DatabaseError> {
        job_repo::cancel_pending(&self.db, job_id, &now_timestamp())
    }

    /// Settles jobs interrupted by a previous shutdown and returns how many
    /// were requeued. Jobs interrupted on their last attempt fail instead.
    pub fn recover_stale(&self) -> Result<usize, DatabaseError> {
        let reset = job_repo::reset_stale(&self.db, &now_timestamp())?;
        if reset.requeued > 0 {
            warn!("Requeued {} job(s) interrupted by a previous shutdown", reset.requeued);
        }
        if reset.exhausted > 0 {
            warn!(
                "Failed {} interrupted job(s) that had no attempts left",
                reset.exhausted
            );
        }
        Ok(reset.requeued)
    }

    pub fn find(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, job_id)?
            .map(Job::try_from)
            .transpose()
    }

    pub fn latest_for_target(&self, target_id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::latest_for_target(&self.db, target_id)?
            .map(Job::try_from)
            .transpose()
    }

    pub fn list(&self, filter: &JobFilter) -> Result<(Vec<Job>, u64), DatabaseError> {
        let (rows, total) = job_repo::query(&self.db, filter)?;
        let jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((jobs, total))
    }
}

/// How a finished attempt leaves the running state.
#[derive(Debug, Clone, Copy)]
pub enum Settlement<'a> {
    Complete,
    Retry {
        failure: &'a JobFailure,
        delay: Duration,
    },
    Fail(&'a JobFailure),
}

impl Settlement<'_> {
    fn target_state(&self) -> JobState {
        match self {
            Settlement::Complete => JobState::Success,
            Settlement::Retry { .. } | Settlement::Fail(_) => JobState::Failure,
        }
    }
}

fn permits(job: &Job, next: JobState) -> bool {
    let allowed = job.state.can_transition_to(next);
    if !allowed {
        warn!("Job {} cannot move from {} to {}", job.id, job.state, next);
    }
    allowed
}
