//! Embedded cache adapter: an in-process store of recently seen records

use super::durable::StoreError;
use super::traits::{SourceAdapter, SourceError};
use crate::record::{CaseId, EntityKind, SourceId, SourceKind, SourceRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// One cached record. The name doubles as its natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub payload: BTreeMap<String, Value>,
    #[serde(default)]
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            payload: BTreeMap::new(),
            cached_at: DateTime::<Utc>::default(),
        }
    }

    pub fn with_payload(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.payload.insert(key.into(), value.into());
        self
    }
}

/// Cache file layout: `{ "<case>": { "<kind>": [entries] } }`
type CacheFile = BTreeMap<String, BTreeMap<String, Vec<CacheEntry>>>;

/// In-memory cache keyed by (case, kind).
#[derive(Debug)]
pub struct EmbeddedCacheAdapter {
    id: SourceId,
    entries: DashMap<(CaseId, EntityKind), Vec<CacheEntry>>,
}

impl Default for EmbeddedCacheAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl EmbeddedCacheAdapter {
    pub const DEFAULT_ID: &'static str = "cache";

    pub fn new() -> Self {
        Self {
            id: SourceId::from(Self::DEFAULT_ID),
            entries: DashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<SourceId>) -> Self {
        self.id = id.into();
        self
    }

    /// Add an entry, replacing any entry of the same name.
    pub fn put(&self, case_id: &CaseId, kind: EntityKind, entry: CacheEntry) {
        let mut slot = self.entries.entry((case_id.clone(), kind)).or_default();
        slot.retain(|e| e.name != entry.name);
        slot.push(entry);
    }

    /// Drop every entry for a case.
    pub fn clear(&self, case_id: &CaseId) {
        self.entries.retain(|(case, _), _| case != case_id);
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|e| e.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed the cache from a JSON file. Returns the number of entries loaded.
    ///
    /// Unknown kinds are skipped with a warning.
    pub fn load_json(&self, path: impl AsRef<Path>) -> Result<usize, StoreError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: CacheFile = serde_json::from_str(&raw)?;

        let mut loaded = 0;
        for (case, kinds) in file {
            let case_id = CaseId::from(case);
            for (kind, entries) in kinds {
                let Ok(kind) = kind.parse::<EntityKind>() else {
                    tracing::warn!(case = %case_id, kind = %kind, "skipping unknown entity kind in cache file");
                    continue;
                };
                for entry in entries {
                    self.put(&case_id, kind, entry);
                    loaded += 1;
                }
            }
        }
        tracing::debug!(path = %path.as_ref().display(), loaded, "loaded cache file");
        Ok(loaded)
    }

    fn to_record(&self, entry: &CacheEntry) -> SourceRecord {
        SourceRecord {
            source_id: self.id.clone(),
            source_kind: SourceKind::Cache,
            external_id: entry.id.clone(),
            natural_key: Some(entry.name.clone()),
            fields: entry.payload.clone(),
            last_updated: entry.cached_at,
        }
    }
}

#[async_trait]
impl SourceAdapter for EmbeddedCacheAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Cache
    }

    async fn list(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        _timeout: Duration,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        let records: Vec<SourceRecord> = self
            .entries
            .get(&(case_id.clone(), kind))
            .map(|slot| slot.iter().map(|e| self.to_record(e)).collect())
            .unwrap_or_default();
        Ok(records)
    }
}
