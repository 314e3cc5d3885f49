//! Snapshot importer: reads exported case snapshots from disk
//!
//! Layout: `<root>/<case id>/<kind>.json` (or `.yaml` / `.yml`), each file a
//! list of flat entries. `id` becomes the external id, `updated_at` the
//! observation time; every other key is a field. The natural key is the
//! first non-blank natural-key field for the kind (`filename`, `name`, ...).

use super::traits::{SourceAdapter, SourceError};
use crate::record::{CaseId, EntityKind, SourceId, SourceKind, SourceRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;

const EXTENSIONS: [&str; 3] = ["json", "yaml", "yml"];

/// Reads snapshot files under a root directory.
#[derive(Debug, Clone)]
pub struct SnapshotImporter {
    id: SourceId,
    root: PathBuf,
}

impl SnapshotImporter {
    pub const DEFAULT_ID: &'static str = "snapshot";

    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            id: SourceId::from(Self::DEFAULT_ID),
            root: root.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<SourceId>) -> Self {
        self.id = id.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// First existing snapshot file for (case, kind).
    async fn locate(&self, case_id: &CaseId, kind: EntityKind) -> Option<PathBuf> {
        let dir = self.root.join(case_id.as_str());
        for ext in EXTENSIONS {
            let path = dir.join(format!("{}.{}", kind.as_str(), ext));
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return Some(path);
            }
        }
        None
    }

    fn parse_entries(path: &Path, raw: &str) -> Result<Vec<Value>, SourceError> {
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == "yaml" || e == "yml");

        let parsed: Result<Vec<Value>, String> = if is_yaml {
            serde_yaml::from_str(raw).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(raw).map_err(|e| e.to_string())
        };
        parsed.map_err(|e| SourceError::Malformed(format!("{}: {}", path.display(), e)))
    }

    fn to_record(&self, kind: EntityKind, entry: Value, file_time: DateTime<Utc>) -> Option<SourceRecord> {
        let Value::Object(mut map) = entry else {
            return None;
        };

        let external_id = match map.remove("id") {
            Some(Value::String(s)) => Some(s),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        let last_updated = map
            .remove("updated_at")
            .as_ref()
            .and_then(Value::as_str)
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|at| at.with_timezone(&Utc))
            .unwrap_or(file_time);

        let natural_key = kind
            .natural_key_fields()
            .iter()
            .filter_map(|name| map.get(*name).and_then(Value::as_str))
            .find(|s| !s.trim().is_empty())
            .map(str::to_string);

        Some(SourceRecord {
            source_id: self.id.clone(),
            source_kind: SourceKind::Snapshot,
            external_id,
            natural_key,
            fields: map.into_iter().collect(),
            last_updated,
        })
    }
}

#[async_trait]
impl SourceAdapter for SnapshotImporter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Snapshot
    }

    async fn list(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        _timeout: Duration,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let Some(path) = self.locate(case_id, kind).await else {
            return Ok(Vec::new());
        };

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| SourceError::Unavailable(format!("{}: {}", path.display(), e)))?;
        let file_time = tokio::fs::metadata(&path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .unwrap_or_default();

        let entries = Self::parse_entries(&path, &raw)?;
        let mut records = Vec::with_capacity(entries.len());
        for (index, entry) in entries.into_iter().enumerate() {
            match self.to_record(kind, entry, file_time) {
                Some(record) => records.push(record),
                None => tracing::warn!(
                    path = %path.display(),
                    index,
                    "skipping snapshot entry that is not an object"
                ),
            }
        }
        Ok(records)
    }
}
