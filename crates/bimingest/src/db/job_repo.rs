//! Job repository: the durable queue behind the worker pool.
//!
//! State-changing updates are guarded by the expected state and attempt
//! number, so a stale worker can never overwrite a newer attempt.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub target_id: String,
    pub file_reference: String,
    pub lod_level: String,
    pub lod_target_triangles: i64,
    pub state: String,
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub current_stage: Option<String>,
    pub stage_index: Option<u32>,
    pub stage_total: Option<u32>,
    pub progress_version: u64,
    pub last_error: Option<String>,
    pub error_kind: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub next_attempt_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            target_id: row.get("target_id")?,
            file_reference: row.get("file_reference")?,
            lod_level: row.get("lod_level")?,
            lod_target_triangles: row.get("lod_target_triangles")?,
            state: row.get("state")?,
            attempt_count: row.get("attempt_count")?,
            max_attempts: row.get("max_attempts")?,
            current_stage: row.get("current_stage")?,
            stage_index: row.get("stage_index")?,
            stage_total: row.get("stage_total")?,
            progress_version: row.get("progress_version")?,
            last_error: row.get("last_error")?,
            error_kind: row.get("error_kind")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            started_at: row.get("started_at")?,
            finished_at: row.get("finished_at")?,
            next_attempt_at: row.get("next_attempt_at")?,
        })
    }
}

/// Query filter parameters for job listing.
#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub state: Option<String>,
    pub target_id: Option<String>,
    pub from_date: Option<String>,
    pub to_date: Option<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, target_id, file_reference, lod_level, lod_target_triangles,
             state, attempt_count, max_attempts, current_stage, stage_index, stage_total,
             progress_version, last_error, error_kind, created_at, updated_at, started_at,
             finished_at, next_attempt_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
             ?17, ?18, ?19)",
            params![
                job.id,
                job.target_id,
                job.file_reference,
                job.lod_level,
                job.lod_target_triangles,
                job.state,
                job.attempt_count,
                job.max_attempts,
                job.current_stage,
                job.stage_index,
                job.stage_total,
                job.progress_version,
                job.last_error,
                job.error_kind,
                job.created_at,
                job.updated_at,
                job.started_at,
                job.finished_at,
                job.next_attempt_at,
            ],
        )?;
        Ok(())
    })
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Most recently submitted job for a target.
pub fn latest_for_target(db: &Database, target_id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM jobs WHERE target_id = ?1
                 ORDER BY created_at DESC, rowid DESC LIMIT 1",
                params![target_id],
                JobRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

/// Queries jobs with filters, returning (rows, total_count).
pub fn query(db: &Database, filter: &JobFilter) -> Result<(Vec<JobRow>, u64), DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(ref state) = filter.state {
            conditions.push(format!("state = ?{}", param_values.len() + 1));
            param_values.push(Box::new(state.clone()));
        }
        if let Some(ref target_id) = filter.target_id {
            conditions.push(format!("target_id = ?{}", param_values.len() + 1));
            param_values.push(Box::new(target_id.clone()));
        }
        if let Some(ref from_date) = filter.from_date {
            conditions.push(format!("created_at >= ?{}", param_values.len() + 1));
            param_values.push(Box::new(from_date.clone()));
        }
        if let Some(ref to_date) = filter.to_date {
            conditions.push(format!("created_at <= ?{}", param_values.len() + 1));
            param_values.push(Box::new(to_date.clone()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM jobs {}", where_clause);
        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let total: u64 = conn.query_row(&count_sql, params_ref.as_slice(), |r| r.get(0))?;

        let limit = filter.limit.unwrap_or(100) as i64;
        let offset = filter.offset.unwrap_or(0) as i64;
        param_values.push(Box::new(limit));
        param_values.push(Box::new(offset));
        let query_sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC, rowid DESC LIMIT ?{} OFFSET ?{}",
            where_clause,
            param_values.len() - 1,
            param_values.len()
        );

        let params_ref: Vec<&dyn rusqlite::types::ToSql> =
            param_values.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&query_sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params_ref.as_slice(), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok((rows, total))
    })
}

/// Moves the oldest due pending job to `started`, bumping its attempt
/// count. Returns the claimed row.
pub fn claim_next(db: &Database, now: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_transaction(|tx| {
        let id: Option<String> = tx
            .query_row(
                "SELECT id FROM jobs WHERE state = 'pending' AND next_attempt_at <= ?1
                 AND attempt_count < max_attempts
                 ORDER BY next_attempt_at ASC, created_at ASC, rowid ASC LIMIT 1",
                params![now],
                |r| r.get(0),
            )
            .optional()?;

        let Some(id) = id else {
            return Ok(None);
        };

        let changed = tx.execute(
            "UPDATE jobs SET state = 'started', attempt_count = attempt_count + 1,
             started_at = ?2, updated_at = ?2, finished_at = NULL, current_stage = NULL,
             stage_index = NULL, stage_total = NULL, progress_version = progress_version + 1
             WHERE id = ?1 AND state = 'pending'",
            params![id, now],
        )?;
        if changed == 0 {
            return Ok(None);
        }

        find_in(tx, &id)
    })
}

/// Records stage progress for a running attempt. Returns `false` when the
/// attempt is no longer current or the job already finished.
pub fn record_progress(
    db: &Database,
    id: &str,
    attempt: u32,
    stage: &str,
    stage_index: u32,
    stage_total: u32,
    now: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'progress', current_stage = ?3, stage_index = ?4,
             stage_total = ?5, progress_version = progress_version + 1, updated_at = ?6
             WHERE id = ?1 AND attempt_count = ?2 AND state IN ('started', 'progress')",
            params![id, attempt, stage, stage_index, stage_total, now],
        )?;
        Ok(changed == 1)
    })
}

// The three settling updates take a connection so callers can commit them
// together with the attempt's report.

/// Terminal success for a running attempt.
pub fn mark_success(
    conn: &Connection,
    id: &str,
    attempt: u32,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'success', finished_at = ?3, updated_at = ?3,
         last_error = NULL, error_kind = NULL, progress_version = progress_version + 1
         WHERE id = ?1 AND attempt_count = ?2 AND state IN ('started', 'progress')",
        params![id, attempt, now],
    )?;
    Ok(changed == 1)
}

/// Terminal failure for a running attempt.
pub fn mark_failure(
    conn: &Connection,
    id: &str,
    attempt: u32,
    error: &str,
    error_kind: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'failure', finished_at = ?5, updated_at = ?5,
         last_error = ?3, error_kind = ?4, progress_version = progress_version + 1
         WHERE id = ?1 AND attempt_count = ?2 AND state IN ('started', 'progress')",
        params![id, attempt, error, error_kind, now],
    )?;
    Ok(changed == 1)
}

/// Returns a failed running attempt to `pending`, due at `next_attempt_at`.
pub fn schedule_retry(
    conn: &Connection,
    id: &str,
    attempt: u32,
    error: &str,
    error_kind: &str,
    next_attempt_at: &str,
    now: &str,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE jobs SET state = 'pending', last_error = ?3, error_kind = ?4,
         next_attempt_at = ?5, updated_at = ?6, current_stage = NULL, stage_index = NULL,
         stage_total = NULL, progress_version = progress_version + 1
         WHERE id = ?1 AND attempt_count = ?2 AND state IN ('started', 'progress')",
        params![id, attempt, error, error_kind, next_attempt_at, now],
    )?;
    Ok(changed == 1)
}

/// Fails a job that has not started yet.
pub fn cancel_pending(db: &Database, id: &str, now: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE jobs SET state = 'failure', finished_at = ?2, updated_at = ?2,
             last_error = 'cancelled before start', error_kind = 'cancelled',
             progress_version = progress_version + 1
             WHERE id = ?1 AND state = 'pending'",
            params![id, now],
        )?;
        Ok(changed == 1)
    })
}

/// Outcome of [`reset_stale`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StaleReset {
    /// Returned to `pending` for another attempt.
    pub requeued: usize,
    /// Interrupted on their last attempt and failed terminally.
    pub exhausted: usize,
}

/// Settles jobs stranded in `started`/`progress` by a dead process. The
/// interrupted attempt counts against the budget: jobs with attempts left
/// go back to `pending`, the rest fail with error kind `interrupted`.
pub fn reset_stale(db: &Database, now: &str) -> Result<StaleReset, DatabaseError> {
    db.with_transaction(|tx| {
        let exhausted = tx.execute(
            "UPDATE jobs SET state = 'failure', finished_at = ?1, updated_at = ?1,
             last_error = 'worker interrupted on final attempt', error_kind = 'interrupted',
             progress_version = progress_version + 1
             WHERE state IN ('started', 'progress') AND attempt_count >= max_attempts",
            params![now],
        )?;
        let requeued = tx.execute(
            "UPDATE jobs SET state = 'pending', next_attempt_at = ?1, updated_at = ?1,
             current_stage = NULL, stage_index = NULL, stage_total = NULL,
             last_error = 'worker interrupted', error_kind = 'interrupted',
             progress_version = progress_version + 1
             WHERE state IN ('started', 'progress')",
            params![now],
        )?;
        Ok(StaleReset {
            requeued,
            exhausted,
        })
    })
}

/// Counts jobs in the given state.
pub fn count_by_state(db: &Database, state: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE state = ?1",
            params![state],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}
