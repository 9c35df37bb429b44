//! Report repository: one stored report per job, replaced by each attempt.

use rusqlite::{params, Connection, OptionalExtension};

use super::{now_timestamp, Database, DatabaseError};
use crate::report::ProcessingReport;

/// Inserts or replaces the report for its job.
pub fn upsert(conn: &Connection, report: &ProcessingReport) -> Result<(), DatabaseError> {
    let body = serde_json::to_string(report)?;
    let overall = report.overall_status.map(|s| s.as_str());
    let completed_at = report.completed_at.map(super::format_timestamp);

    conn.execute(
        "INSERT INTO reports (job_id, target_id, attempt, overall_status, catastrophic,
         started_at, completed_at, body, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
         ON CONFLICT(job_id) DO UPDATE SET
            target_id = excluded.target_id,
            attempt = excluded.attempt,
            overall_status = excluded.overall_status,
            catastrophic = excluded.catastrophic,
            started_at = excluded.started_at,
            completed_at = excluded.completed_at,
            body = excluded.body,
            updated_at = excluded.updated_at",
        params![
            report.job_id,
            report.target_id,
            report.attempt,
            overall,
            report.catastrophic_failure,
            super::format_timestamp(report.started_at),
            completed_at,
            body,
            now_timestamp(),
        ],
    )?;
    Ok(())
}

pub fn find_by_job(db: &Database, job_id: &str) -> Result<Option<ProcessingReport>, DatabaseError> {
    let body: Option<String> = db.with_conn(|conn| {
        let body = conn
            .query_row(
                "SELECT body FROM reports WHERE job_id = ?1",
                params![job_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(body)
    })?;

    match body {
        Some(body) => Ok(Some(serde_json::from_str(&body)?)),
        None => Ok(None),
    }
}

/// Job ids with a stored report for a target, newest first.
pub fn job_ids_for_target(db: &Database, target_id: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT job_id FROM reports WHERE target_id = ?1 ORDER BY started_at DESC",
        )?;
        let ids = stmt
            .query_map(params![target_id], |r| r.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}
