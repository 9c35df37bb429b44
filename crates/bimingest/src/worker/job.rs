use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::job_repo::JobRow;
use crate::db::DatabaseError;
use crate::geometry::{LodLevel, LodPolicy};
use crate::model::StageName;

/// Lifecycle of a queued ingest job.
///
/// `pending -> started -> progress* -> success | failure`, with
/// `failure -> pending` for a retry and `pending -> failure` for a job
/// cancelled before it ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Started,
    Progress,
    Success,
    Failure,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Started => "started",
            JobState::Progress => "progress",
            JobState::Success => "success",
            JobState::Failure => "failure",
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, JobState::Started | JobState::Progress)
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        use JobState::*;
        matches!(
            (self, next),
            (Pending, Started)
                | (Pending, Failure)
                | (Started, Progress)
                | (Started, Success)
                | (Started, Failure)
                | (Progress, Progress)
                | (Progress, Success)
                | (Progress, Failure)
                | (Failure, Pending)
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobState::Pending),
            "started" => Ok(JobState::Started),
            "progress" => Ok(JobState::Progress),
            "success" => Ok(JobState::Success),
            "failure" => Ok(JobState::Failure),
            other => Err(format!("unknown job state '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub target_id: String,
    pub file_reference: String,
    pub lod: LodPolicy,
    pub state: JobState,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub current_stage: Option<StageName>,
    pub stage_index: Option<u32>,
    pub stage_total: Option<u32>,
    /// Bumped on every state or progress change.
    pub progress_version: u64,
    pub last_error: Option<String>,
    pub error_kind: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub next_attempt_at: DateTime<Utc>,
}

impl Job {
    /// A terminal job never runs again.
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, JobState::Success | JobState::Failure)
    }

    pub fn attempts_remaining(&self) -> u32 {
        self.max_attempts.saturating_sub(self.attempt_count)
    }
}

fn parse_column<T: FromStr>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    value.parse().map_err(|_| DatabaseError::InvalidValue {
        column,
        value: value.to_string(),
    })
}

fn parse_time(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| DatabaseError::InvalidValue {
            column,
            value: value.to_string(),
        })
}

fn parse_optional_time(
    column: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_time(column, v)).transpose()
}

impl TryFrom<JobRow> for Job {
    type Error = DatabaseError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let level: LodLevel = parse_column("lod_level", &row.lod_level)?;
        let current_stage = row
            .current_stage
            .as_deref()
            .map(|s| parse_column::<StageName>("current_stage", s))
            .transpose()?;

        Ok(Self {
            lod: LodPolicy {
                level,
                target_triangles: row.lod_target_triangles.max(0) as usize,
            },
            state: parse_column("state", &row.state)?,
            current_stage,
            created_at: parse_time("created_at", &row.created_at)?,
            started_at: parse_optional_time("started_at", row.started_at.as_deref())?,
            finished_at: parse_optional_time("finished_at", row.finished_at.as_deref())?,
            next_attempt_at: parse_time("next_attempt_at", &row.next_attempt_at)?,
            id: row.id,
            target_id: row.target_id,
            file_reference: row.file_reference,
            attempt_count: row.attempt_count,
            max_attempts: row.max_attempts,
            stage_index: row.stage_index,
            stage_total: row.stage_total,
            progress_version: row.progress_version,
            last_error: row.last_error,
            error_kind: row.error_kind,
        })
    }
}
