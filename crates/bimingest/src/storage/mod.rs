//! Destinations for extracted entity records.
//!
//! Every write is an upsert keyed by (target id, stage, entity key), so a
//! re-delivered job overwrites its previous rows instead of duplicating
//! them.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::db::{extraction_repo, Database};
use crate::error::StorageError;
use crate::model::StageName;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub target_id: String,
    pub stage: StageName,
    pub entity_key: String,
    pub entity_type: String,
    pub job_id: String,
    pub payload: Value,
}

pub type RecordKey = (String, StageName, String);

impl ExtractedRecord {
    pub fn key(&self) -> RecordKey {
        (
            self.target_id.clone(),
            self.stage,
            self.entity_key.clone(),
        )
    }
}

pub trait ExtractionSink: Send + Sync {
    fn upsert(&self, record: ExtractedRecord) -> Result<(), StorageError>;
}

/// Sink holding records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<BTreeMap<RecordKey, ExtractedRecord>>,
    writes: AtomicUsize,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Distinct records currently stored.
    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total upserts received, including overwrites.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn get(&self, target_id: &str, stage: StageName, entity_key: &str) -> Option<ExtractedRecord> {
        let key = (target_id.to_string(), stage, entity_key.to_string());
        self.records.lock().ok()?.get(&key).cloned()
    }

    pub fn records_for_stage(&self, stage: StageName) -> Vec<ExtractedRecord> {
        self.records
            .lock()
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.stage == stage)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl ExtractionSink for MemorySink {
    fn upsert(&self, record: ExtractedRecord) -> Result<(), StorageError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut records) = self.records.lock() {
            records.insert(record.key(), record);
        }
        Ok(())
    }
}

/// Sink writing to the `extracted_entities` table.
#[derive(Clone)]
pub struct DatabaseSink {
    db: Database,
}

impl DatabaseSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl ExtractionSink for DatabaseSink {
    fn upsert(&self, record: ExtractedRecord) -> Result<(), StorageError> {
        extraction_repo::upsert(&self.db, &record)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(key: &str, payload: Value) -> ExtractedRecord {
        ExtractedRecord {
            target_id: "t1".to_string(),
            stage: StageName::Materials,
            entity_key: key.to_string(),
            entity_type: "Material".to_string(),
            job_id: "j1".to_string(),
            payload,
        }
    }

    #[test]
    fn test_memory_sink_upserts() {
        let sink = MemorySink::new();
        sink.upsert(record("M1", json!({"v": 1}))).unwrap();
        sink.upsert(record("M1", json!({"v": 2}))).unwrap();
        sink.upsert(record("M2", json!({"v": 1}))).unwrap();

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.writes(), 3);
        assert_eq!(
            sink.get("t1", StageName::Materials, "M1").unwrap().payload,
            json!({"v": 2})
        );
    }
}
