//! Durable store adapter backed by SQLite

use super::traits::{SourceAdapter, SourceError};
use crate::record::{CaseId, EntityKind, SourceId, SourceKind, SourceRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// Errors from the durable store's own API
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Connection lock poisoned")]
    LockPoisoned,
}

/// One row of the durable store, as written by the import path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub case_id: CaseId,
    pub kind: EntityKind,
    /// Row key within (case, kind)
    #[serde(alias = "id")]
    pub record_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// SQLite-backed durable record store.
///
/// One table keyed by (case, kind, record id). Reads run on the blocking
/// pool so a slow disk never stalls the async runtime.
pub struct DurableStoreAdapter {
    id: SourceId,
    conn: Arc<Mutex<Connection>>,
}

impl DurableStoreAdapter {
    pub const DEFAULT_ID: &'static str = "durable";

    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            id: SourceId::from(Self::DEFAULT_ID),
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Override the source id recorded in provenance.
    pub fn with_id(mut self, id: impl Into<SourceId>) -> Self {
        self.id = id.into();
        self
    }

    fn init_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                case_id TEXT NOT NULL,
                kind TEXT NOT NULL,
                record_id TEXT NOT NULL,
                external_id TEXT,
                natural_key TEXT,
                fields_json TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (case_id, kind, record_id)
            );

            CREATE INDEX IF NOT EXISTS idx_records_external
                ON records(case_id, kind, external_id);

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    /// Insert or replace one record.
    pub fn put_record(&self, record: &DurableRecord) -> Result<(), StoreError> {
        let fields_json = serde_json::to_string(&record.fields)?;
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute(
            r#"
            INSERT INTO records (case_id, kind, record_id, external_id, natural_key, fields_json, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(case_id, kind, record_id) DO UPDATE SET
                external_id = excluded.external_id,
                natural_key = excluded.natural_key,
                fields_json = excluded.fields_json,
                updated_at = excluded.updated_at
            "#,
            params![
                record.case_id.as_str(),
                record.kind.as_str(),
                record.record_id,
                record.external_id,
                record.natural_key,
                fields_json,
                record.updated_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Delete one record. Returns whether a row existed.
    pub fn retract_record(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        record_id: &str,
    ) -> Result<bool, StoreError> {
        let conn = self.conn.lock().map_err(|_| StoreError::LockPoisoned)?;
        let deleted = conn.execute(
            "DELETE FROM records WHERE case_id = ?1 AND kind = ?2 AND record_id = ?3",
            params![case_id.as_str(), kind.as_str(), record_id],
        )?;
        Ok(deleted > 0)
    }

    fn query(
        conn: &Connection,
        source_id: &SourceId,
        case_id: &CaseId,
        kind: EntityKind,
    ) -> Result<Vec<SourceRecord>, StoreError> {
        let mut stmt = conn.prepare(
            "SELECT record_id, external_id, natural_key, fields_json, updated_at
             FROM records WHERE case_id = ?1 AND kind = ?2
             ORDER BY record_id",
        )?;

        let rows = stmt
            .query_map(params![case_id.as_str(), kind.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut records = Vec::with_capacity(rows.len());
        for (record_id, external_id, natural_key, fields_json, updated_at) in rows {
            let fields: BTreeMap<String, Value> = match serde_json::from_str(&fields_json) {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::warn!(source = %source_id, record_id = %record_id, error = %e, "skipping row with malformed fields");
                    continue;
                }
            };
            let last_updated = match DateTime::parse_from_rfc3339(&updated_at) {
                Ok(at) => at.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(source = %source_id, record_id = %record_id, error = %e, "skipping row with malformed timestamp");
                    continue;
                }
            };
            records.push(SourceRecord {
                source_id: source_id.clone(),
                source_kind: SourceKind::Durable,
                external_id,
                natural_key,
                fields,
                last_updated,
            });
        }
        Ok(records)
    }
}

#[async_trait]
impl SourceAdapter for DurableStoreAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Durable
    }

    async fn list(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        timeout: Duration,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let conn = Arc::clone(&self.conn);
        let source_id = self.id.clone();
        let case_id = case_id.clone();

        let task = tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StoreError::LockPoisoned)?;
            conn.busy_timeout(timeout)?;
            Self::query(&conn, &source_id, &case_id, kind)
        });

        match task.await {
            Ok(Ok(records)) => Ok(records),
            Ok(Err(StoreError::Database(e)))
                if e.sqlite_error_code() == Some(rusqlite::ErrorCode::DatabaseBusy) =>
            {
                Err(SourceError::Unavailable(e.to_string()))
            }
            Ok(Err(e)) => Err(SourceError::Storage(e.to_string())),
            Err(e) => Err(SourceError::Unavailable(e.to_string())),
        }
    }
}
