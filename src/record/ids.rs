//! Identifiers: cases, entity kinds, sources, and stable entity keys

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a case
///
/// Serializes as a plain string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CaseId(String);

impl CaseId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for CaseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for CaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The kinds of case records the engine reconciles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Document,
    Person,
    Issue,
    /// A timeline entry
    Chronology,
    /// A cited legal authority (statute, case law)
    Authority,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Document,
        EntityKind::Person,
        EntityKind::Issue,
        EntityKind::Chronology,
        EntityKind::Authority,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Person => "person",
            Self::Issue => "issue",
            Self::Chronology => "chronology",
            Self::Authority => "authority",
        }
    }

    /// Field names that carry the human-facing name of an entity, in lookup order.
    ///
    /// Used to derive a natural key from extracted payloads that have no
    /// adapter to name the key for them.
    pub fn natural_key_fields(&self) -> &'static [&'static str] {
        match self {
            Self::Document => &["filename", "name", "title"],
            Self::Person => &["name"],
            Self::Issue => &["title", "name"],
            Self::Chronology => &["description", "title"],
            Self::Authority => &["citation", "name"],
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EntityKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "document" | "documents" => Ok(Self::Document),
            "person" | "persons" | "people" => Ok(Self::Person),
            "issue" | "issues" => Ok(Self::Issue),
            "chronology" | "timeline" => Ok(Self::Chronology),
            "authority" | "authorities" => Ok(Self::Authority),
            other => Err(format!("unknown entity kind: {}", other)),
        }
    }
}

/// Which family of store a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Snapshot,
    Durable,
    Cache,
}

impl SourceKind {
    /// Scalar precedence: higher wins (Snapshot > Durable > Cache)
    pub fn priority(&self) -> u8 {
        match self {
            Self::Snapshot => 3,
            Self::Durable => 2,
            Self::Cache => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Snapshot => "snapshot",
            Self::Durable => "durable",
            Self::Cache => "cache",
        }
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "snapshot" => Ok(Self::Snapshot),
            "durable" => Ok(Self::Durable),
            "cache" => Ok(Self::Cache),
            _ => Err(format!("unknown source kind: {}", s)),
        }
    }
}

/// Identifier of a contributing source (an adapter, or an extracted document)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

const EXTRACTION_PREFIX: &str = "extraction:";

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The provenance id under which an AI extraction from `document_id` contributes.
    pub fn for_document(document_id: &str) -> Self {
        Self(format!("{}{}", EXTRACTION_PREFIX, document_id))
    }

    pub fn is_extraction(&self) -> bool {
        self.0.starts_with(EXTRACTION_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Case-scoped identity of an entity.
///
/// Three shapes, which never collide because normalized natural keys contain
/// only alphanumerics and single spaces:
/// - `ext:<id>` for records carrying a durable external id
/// - `<normalized natural key>` otherwise
/// - `anon:<uuid>` for records with neither (always a singleton)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StableKey(String);

impl StableKey {
    /// Wrap an already-derived key (e.g., a hint handed back by a consumer).
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn external(external_id: &str) -> Self {
        Self(format!("ext:{}", external_id))
    }

    pub fn natural(normalized: impl Into<String>) -> Self {
        Self(normalized.into())
    }

    pub fn singleton(id: Uuid) -> Self {
        Self(format!("anon:{}", id))
    }

    pub fn is_external(&self) -> bool {
        self.0.starts_with("ext:")
    }

    pub fn is_singleton(&self) -> bool {
        self.0.starts_with("anon:")
    }

    /// Keys derived from a natural key; the only ones an alias can rebind.
    pub fn is_natural(&self) -> bool {
        !self.is_external() && !self.is_singleton()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StableKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for StableKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
