//! Projects finalized reports onto target records and assembles the
//! status view callers poll.

use chrono::Utc;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use crate::db::target_repo::{self, TargetRow};
use crate::db::{format_timestamp, job_repo, Database, DatabaseError};
use crate::model::{Outcome, Severity, StageName};
use crate::report::ProcessingReport;
use crate::worker::job::{Job, JobState};

const STRUCTURAL_STAGES: [StageName; 4] = [
    StageName::SpatialHierarchy,
    StageName::Materials,
    StageName::Types,
    StageName::Systems,
];

/// Target status derived from one finalized report. `None` fields leave the
/// stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusProjection {
    pub target_id: String,
    pub job_id: String,
    pub overall: Outcome,
    pub parsing: Option<Outcome>,
    pub geometry: Option<Outcome>,
    pub validation: Option<Outcome>,
}

#[derive(Clone)]
pub struct StatusProjector {
    db: Database,
}

impl StatusProjector {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Derives the projection, or `None` for a report still being built.
    ///
    /// - parsing: failed when the model could not be opened, else the worst
    ///   structural stage that ran
    /// - geometry: the elements-and-geometry stage only
    /// - validation: only once every stage ran; failed on a critical
    ///   diagnostic, partial on any error-level one
    pub fn project(report: &ProcessingReport) -> Option<StatusProjection> {
        let overall = report.overall_status?;

        let opened = report
            .failure
            .as_ref()
            .map_or(true, |failure| failure.stage.is_some());
        let parsing = if opened {
            STRUCTURAL_STAGES
                .iter()
                .filter_map(|stage| report.stage(*stage))
                .map(|result| result.status)
                .max()
        } else {
            Some(Outcome::Failed)
        };

        let geometry = report
            .stage(StageName::ElementsAndGeometry)
            .map(|result| result.status);

        let validation = report.ran_all_stages().then(|| {
            if report.has_critical() {
                Outcome::Failed
            } else if report.errors.iter().any(|e| e.severity >= Severity::Error) {
                Outcome::Partial
            } else {
                Outcome::Success
            }
        });

        Some(StatusProjection {
            target_id: report.target_id.clone(),
            job_id: report.job_id.clone(),
            overall,
            parsing,
            geometry,
            validation,
        })
    }

    /// Writes the projection of a finalized report in a single statement.
    pub fn apply(&self, report: &ProcessingReport) -> Result<Option<StatusProjection>, DatabaseError> {
        self.db.with_conn(|conn| Self::apply_in(conn, report))
    }

    /// [`StatusProjector::apply`] on `conn`, which may be an open
    /// transaction.
    pub fn apply_in(
        conn: &Connection,
        report: &ProcessingReport,
    ) -> Result<Option<StatusProjection>, DatabaseError> {
        let Some(projection) = Self::project(report) else {
            log::warn!(
                "Report for job {} is not finalized, skipping status projection",
                report.job_id
            );
            return Ok(None);
        };

        target_repo::apply_projection(
            conn,
            &TargetRow {
                id: projection.target_id.clone(),
                overall_status: Some(projection.overall.as_str().to_string()),
                parsing_status: projection.parsing.map(|s| s.as_str().to_string()),
                geometry_status: projection.geometry.map(|s| s.as_str().to_string()),
                validation_status: projection.validation.map(|s| s.as_str().to_string()),
                job_id: Some(projection.job_id.clone()),
                updated_at: format_timestamp(Utc::now()),
            },
        )?;

        log::debug!(
            "Projected job {} onto target {}: {}",
            projection.job_id,
            projection.target_id,
            projection.overall
        );
        Ok(Some(projection))
    }

    /// Current status of a target, combining its projected record with its
    /// latest job. `None` when the target is unknown.
    pub fn status(&self, target_id: &str) -> Result<Option<StatusView>, DatabaseError> {
        let target = target_repo::find_by_id(&self.db, target_id)?;
        let job = job_repo::latest_for_target(&self.db, target_id)?
            .map(Job::try_from)
            .transpose()?;

        if target.is_none() && job.is_none() {
            return Ok(None);
        }

        let target = target.unwrap_or_default();
        Ok(Some(StatusView {
            target_id: target_id.to_string(),
            overall_status: parse_status("overall_status", target.overall_status)?,
            parsing_status: parse_status("parsing_status", target.parsing_status)?,
            geometry_status: parse_status("geometry_status", target.geometry_status)?,
            validation_status: parse_status("validation_status", target.validation_status)?,
            job_id: job.as_ref().map(|j| j.id.clone()).or(target.job_id),
            job_state: job.as_ref().map(|j| j.state),
            current_stage: job.as_ref().and_then(|j| j.current_stage),
            stage_index: job.as_ref().and_then(|j| j.stage_index),
            stage_total: job.as_ref().and_then(|j| j.stage_total),
            progress_version: job.as_ref().map_or(0, |j| j.progress_version),
            attempt_count: job.as_ref().map_or(0, |j| j.attempt_count),
            last_error: job.and_then(|j| j.last_error),
        }))
    }
}

fn parse_status(column: &'static str, value: Option<String>) -> Result<Option<Outcome>, DatabaseError> {
    value
        .map(|v| {
            v.parse().map_err(|_| DatabaseError::InvalidValue {
                column,
                value: v.clone(),
            })
        })
        .transpose()
}

/// What `get_status` returns for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusView {
    pub target_id: String,
    pub overall_status: Option<Outcome>,
    pub parsing_status: Option<Outcome>,
    pub geometry_status: Option<Outcome>,
    pub validation_status: Option<Outcome>,
    /// Latest job for the target, falling back to the last projected one.
    pub job_id: Option<String>,
    pub job_state: Option<JobState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_stage: Option<StageName>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_index: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_total: Option<u32>,
    /// Zero until the job has changed state at least once.
    pub progress_version: u64,
    pub attempt_count: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}
