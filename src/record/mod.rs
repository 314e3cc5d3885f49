//! Record data model shared by every component

mod canonical;
mod ids;
mod source;
mod value;

pub use canonical::{CanonicalRecord, FieldOrigin, Origin};
pub use ids::{CaseId, EntityKind, SourceId, SourceKind, StableKey};
pub use source::{SourceRecord, CONFIDENCE_FIELD};
pub use value::FieldValue;
