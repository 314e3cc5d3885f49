//! The merged, consumer-facing record

use super::ids::{CaseId, EntityKind, SourceId, SourceKind, StableKey};
use super::value::FieldValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How a field value entered the canonical record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Scalar chosen from a source adapter's record
    Source(SourceKind),
    /// Scalar chosen from an AI extraction (SyncEvent)
    Extraction,
    /// Set-valued field: union across every contributor
    Union,
}

/// Where a field's current value came from, and how sure we are of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOrigin {
    pub origin: Origin,
    pub source_id: SourceId,
    pub confidence: f64,
    pub observed_at: DateTime<Utc>,
}

/// The single merged representation of an entity.
///
/// Owned by the canonical repository and produced only by the merge engine;
/// consumers receive clones. Every map is ordered so two equal records
/// serialize to identical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub stable_key: StableKey,
    pub case_id: CaseId,
    pub kind: EntityKind,
    pub fields: BTreeMap<String, FieldValue>,
    /// Per-field origin, keyed like `fields`
    pub origins: BTreeMap<String, FieldOrigin>,
    /// Contributing sources in first-contribution order
    pub provenance: Vec<SourceId>,
    pub confidence: f64,
    pub last_merged_at: DateTime<Utc>,
}

impl CanonicalRecord {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    /// Text value of a scalar field.
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_text)
    }

    /// Members of a set-valued field (empty if absent).
    pub fn members(&self, name: &str) -> &[FieldValue] {
        match self.fields.get(name) {
            Some(FieldValue::List(items)) => items,
            _ => &[],
        }
    }

    /// Confidence of a single field's current value.
    pub fn field_confidence(&self, name: &str) -> Option<f64> {
        self.origins.get(name).map(|o| o.confidence)
    }

    pub fn has_source(&self, source_id: &SourceId) -> bool {
        self.provenance.contains(source_id)
    }
}
