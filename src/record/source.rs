//! Records as a source adapter reports them, before identity resolution

use super::ids::{SourceId, SourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Reserved field carrying a per-record confidence override.
pub const CONFIDENCE_FIELD: &str = "confidence";

/// One record from one source.
///
/// Owned by its adapter until the repository ingests it. `fields` stays raw
/// JSON: parsing happens in the merge engine so one bad field never costs
/// the whole record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source_id: SourceId,
    pub source_kind: SourceKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub natural_key: Option<String>,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
    pub last_updated: DateTime<Utc>,
}

impl SourceRecord {
    pub fn new(source_id: impl Into<SourceId>, source_kind: SourceKind) -> Self {
        Self {
            source_id: source_id.into(),
            source_kind,
            external_id: None,
            natural_key: None,
            fields: BTreeMap::new(),
            last_updated: DateTime::<Utc>::default(),
        }
    }

    pub fn with_external_id(mut self, id: impl Into<String>) -> Self {
        self.external_id = Some(id.into());
        self
    }

    pub fn with_natural_key(mut self, key: impl Into<String>) -> Self {
        self.natural_key = Some(key.into());
        self
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = at;
        self
    }

    /// The trimmed external id, if the record carries a non-blank one.
    pub fn durable_id(&self) -> Option<&str> {
        self.external_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }

    /// Confidence declared on the record itself, if any and in range.
    pub fn declared_confidence(&self) -> Option<f64> {
        self.fields
            .get(CONFIDENCE_FIELD)
            .and_then(Value::as_f64)
            .filter(|c| (0.0..=1.0).contains(c))
    }
}
