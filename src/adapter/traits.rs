//! SourceAdapter trait: the contract every record store implements
//!
//! An adapter hides one store's schema behind a uniform `list` call.
//! Adapters are pure readers; writes go through store-specific APIs.

use crate::record::{CaseId, EntityKind, SourceId, SourceKind, SourceRecord};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Why a source could not contribute to a reconcile pass.
///
/// Every variant means the same thing to the repository: exclude the source
/// and mark the pass degraded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SourceError {
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("malformed source data: {0}")]
    Malformed(String),
}

/// A record store the repository can reconcile from.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Unique identifier; appears in provenance
    fn id(&self) -> &SourceId;

    /// Which family of store this is (sets scalar precedence)
    fn kind(&self) -> SourceKind;

    /// All records of `kind` for `case_id`.
    ///
    /// "Nothing found" is an empty list, not an error. Must be safe to call
    /// concurrently. `timeout` is advisory; the repository enforces it anyway.
    async fn list(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        timeout: Duration,
    ) -> Result<Vec<SourceRecord>, SourceError>;
}
