//! Sync events: AI extraction results published onto the bus

use crate::record::{CaseId, EntityKind, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;
use uuid::Uuid;

/// One extraction of one entity from one document.
///
/// Immutable once published. Replaying the same event has no further effect
/// on the canonical view, so the bus may redeliver freely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncEvent {
    /// Delivery id, for logging only. Merges never depend on it.
    #[serde(default = "Uuid::new_v4")]
    pub event_id: Uuid,
    pub case_id: CaseId,
    pub entity_kind: EntityKind,
    /// Stable key (or external id) of the entity, when the extractor knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stable_key_hint: Option<String>,
    #[serde(default)]
    pub extracted_fields: BTreeMap<String, Value>,
    pub confidence: f64,
    pub source_document_id: String,
    pub emitted_at: DateTime<Utc>,
}

impl SyncEvent {
    pub fn new(
        case_id: impl Into<CaseId>,
        entity_kind: EntityKind,
        source_document_id: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            case_id: case_id.into(),
            entity_kind,
            stable_key_hint: None,
            extracted_fields: BTreeMap::new(),
            confidence,
            source_document_id: source_document_id.into(),
            emitted_at: Utc::now(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extracted_fields.insert(name.into(), value.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.stable_key_hint = Some(hint.into());
        self
    }

    pub fn with_emitted_at(mut self, at: DateTime<Utc>) -> Self {
        self.emitted_at = at;
        self
    }

    /// The synthetic source this event contributes under.
    pub fn source_id(&self) -> SourceId {
        SourceId::for_document(&self.source_document_id)
    }

    /// First non-blank natural-key field for the event's kind.
    pub fn natural_key(&self) -> Option<&str> {
        self.entity_kind
            .natural_key_fields()
            .iter()
            .filter_map(|name| self.extracted_fields.get(*name))
            .filter_map(Value::as_str)
            .find(|s| !s.trim().is_empty())
    }

    /// Check the envelope before delivery.
    pub fn validate(&self) -> Result<(), SyncEventRejected> {
        if self.source_document_id.trim().is_empty() {
            return Err(SyncEventRejected::MissingDocumentId {
                event_id: self.event_id,
            });
        }
        if self.case_id.as_str().trim().is_empty() {
            return Err(SyncEventRejected::MissingCaseId {
                document_id: self.source_document_id.clone(),
            });
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(SyncEventRejected::InvalidConfidence {
                document_id: self.source_document_id.clone(),
                confidence: self.confidence,
            });
        }
        Ok(())
    }
}

/// Why the bus refused an event.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SyncEventRejected {
    #[error("event {event_id} has no source document id")]
    MissingDocumentId { event_id: Uuid },

    #[error("event from document {document_id} has no case id")]
    MissingCaseId { document_id: String },

    #[error("event from document {document_id} has confidence {confidence} outside [0, 1]")]
    InvalidConfidence { document_id: String, confidence: f64 },
}

impl SyncEventRejected {
    pub fn document_id(&self) -> Option<&str> {
        match self {
            Self::MissingDocumentId { .. } => None,
            Self::MissingCaseId { document_id } | Self::InvalidConfidence { document_id, .. } => {
                Some(document_id)
            }
        }
    }
}
