//! Extracted entity rows, upserted by (target id, stage, entity key).

use rusqlite::{params, OptionalExtension};

use super::{now_timestamp, Database, DatabaseError};
use crate::model::StageName;
use crate::storage::ExtractedRecord;

pub fn upsert(db: &Database, record: &ExtractedRecord) -> Result<(), DatabaseError> {
    let payload = serde_json::to_string(&record.payload)?;
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO extracted_entities (target_id, stage, entity_key, entity_type, job_id,
             payload, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(target_id, stage, entity_key) DO UPDATE SET
                entity_type = excluded.entity_type,
                job_id = excluded.job_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at",
            params![
                record.target_id,
                record.stage.as_str(),
                record.entity_key,
                record.entity_type,
                record.job_id,
                payload,
                now_timestamp(),
            ],
        )?;
        Ok(())
    })
}

pub fn find(
    db: &Database,
    target_id: &str,
    stage: StageName,
    entity_key: &str,
) -> Result<Option<ExtractedRecord>, DatabaseError> {
    let row: Option<(String, String, String)> = db.with_conn(|conn| {
        let row = conn
            .query_row(
                "SELECT entity_type, job_id, payload FROM extracted_entities
                 WHERE target_id = ?1 AND stage = ?2 AND entity_key = ?3",
                params![target_id, stage.as_str(), entity_key],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .optional()?;
        Ok(row)
    })?;

    match row {
        Some((entity_type, job_id, payload)) => Ok(Some(ExtractedRecord {
            target_id: target_id.to_string(),
            stage,
            entity_key: entity_key.to_string(),
            entity_type,
            job_id,
            payload: serde_json::from_str(&payload)?,
        })),
        None => Ok(None),
    }
}

/// Number of stored rows for a target, optionally restricted to one stage.
pub fn count(db: &Database, target_id: &str, stage: Option<StageName>) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = match stage {
            Some(stage) => conn.query_row(
                "SELECT COUNT(*) FROM extracted_entities WHERE target_id = ?1 AND stage = ?2",
                params![target_id, stage.as_str()],
                |r| r.get(0),
            )?,
            None => conn.query_row(
                "SELECT COUNT(*) FROM extracted_entities WHERE target_id = ?1",
                params![target_id],
                |r| r.get(0),
            )?,
        };
        Ok(count)
    })
}
