//! Field-level merge of reconciled records
//!
//! The engine is pure: given the same contributions and prior record it
//! always produces the same canonical record.

mod engine;
mod policy;

pub use engine::{Contribution, MalformedField, MergeEngine, MergeOutcome, DOCUMENT_REFS_FIELD};
pub use policy::{FieldType, MergePolicy};
