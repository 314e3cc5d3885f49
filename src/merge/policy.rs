//! Field-level merge policy

use crate::record::FieldValue;
use chrono::{DateTime, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Expected type of a declared field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Number,
    Bool,
    /// ISO date (`2024-03-01`) or RFC 3339 timestamp
    Date,
}

/// Configuration of the merge engine.
///
/// Loaded from the `merge` section of the engine config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergePolicy {
    /// Confidence assigned to source records that don't declare one
    pub source_confidence: f64,
    /// Fields that are always set-valued, even when a source sends a scalar
    pub set_fields: BTreeSet<String>,
    /// Fields whose values must parse as a given type
    pub typed_fields: BTreeMap<String, FieldType>,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            source_confidence: 0.8,
            set_fields: ["document_refs", "tags", "aliases"]
                .into_iter()
                .map(String::from)
                .collect(),
            typed_fields: [("date".to_string(), FieldType::Date)].into_iter().collect(),
        }
    }
}

impl MergePolicy {
    pub fn is_set_field(&self, name: &str) -> bool {
        self.set_fields.contains(name)
    }

    /// Check a parsed value against the declared type of `name`, if any.
    pub fn check_type(&self, name: &str, value: &FieldValue) -> Result<(), String> {
        let Some(expected) = self.typed_fields.get(name) else {
            return Ok(());
        };
        let members: Vec<&FieldValue> = match value {
            FieldValue::List(items) => items.iter().collect(),
            scalar => vec![scalar],
        };
        for member in members {
            let ok = match (expected, member) {
                (FieldType::Text, FieldValue::Text(_)) => true,
                (FieldType::Number, FieldValue::Integer(_) | FieldValue::Float(_)) => true,
                (FieldType::Bool, FieldValue::Bool(_)) => true,
                (FieldType::Date, FieldValue::Text(s)) => is_date(s),
                _ => false,
            };
            if !ok {
                return Err(format!("expected {:?}, got {:?}", expected, member));
            }
        }
        Ok(())
    }
}

fn is_date(raw: &str) -> bool {
    let raw = raw.trim();
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").is_ok() || DateTime::parse_from_rfc3339(raw).is_ok()
}
