//! Target record repository. Only the status projector writes here.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetRow {
    pub id: String,
    pub overall_status: Option<String>,
    pub parsing_status: Option<String>,
    pub geometry_status: Option<String>,
    pub validation_status: Option<String>,
    pub job_id: Option<String>,
    pub updated_at: String,
}

impl TargetRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            overall_status: row.get("overall_status")?,
            parsing_status: row.get("parsing_status")?,
            geometry_status: row.get("geometry_status")?,
            validation_status: row.get("validation_status")?,
            job_id: row.get("job_id")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Writes a projection in one statement. `None` status fields keep the
/// stored value.
pub fn apply_projection(conn: &Connection, row: &TargetRow) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO target_records (id, overall_status, parsing_status, geometry_status,
         validation_status, job_id, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
            overall_status = COALESCE(excluded.overall_status, target_records.overall_status),
            parsing_status = COALESCE(excluded.parsing_status, target_records.parsing_status),
            geometry_status = COALESCE(excluded.geometry_status, target_records.geometry_status),
            validation_status = COALESCE(excluded.validation_status, target_records.validation_status),
            job_id = COALESCE(excluded.job_id, target_records.job_id),
            updated_at = excluded.updated_at",
        params![
            row.id,
            row.overall_status,
            row.parsing_status,
            row.geometry_status,
            row.validation_status,
            row.job_id,
            row.updated_at,
        ],
    )?;
    Ok(())
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<TargetRow>, DatabaseError> {
    db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT * FROM target_records WHERE id = ?1",
                params![id],
                TargetRow::from_row,
            )
            .optional()?;
        Ok(row)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(geometry: Option<&str>, parsing: Option<&str>) -> TargetRow {
        TargetRow {
            id: "t1".to_string(),
            overall_status: Some("success".to_string()),
            parsing_status: parsing.map(str::to_string),
            geometry_status: geometry.map(str::to_string),
            validation_status: None,
            job_id: Some("j1".to_string()),
            updated_at: "2026-01-01T00:00:00.000Z".to_string(),
        }
    }

    #[test]
    fn test_none_fields_keep_previous_value() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| apply_projection(conn, &row(Some("partial"), Some("success"))))
            .unwrap();
        db.with_conn(|conn| apply_projection(conn, &row(None, Some("failed"))))
            .unwrap();

        let stored = find_by_id(&db, "t1").unwrap().unwrap();
        assert_eq!(stored.geometry_status.as_deref(), Some("partial"));
        assert_eq!(stored.parsing_status.as_deref(), Some("failed"));
    }

    #[test]
    fn test_unknown_target() {
        let db = Database::open_in_memory().unwrap();
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }
}
