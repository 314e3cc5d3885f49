//! Per-(case, kind) lifecycle and reconcile outcomes

use crate::record::{CaseId, EntityKind, SourceId};
use serde::Serialize;

/// Lifecycle of one (case, kind) slot.
///
/// `Empty -> Loading -> Ready | Degraded`, and back to `Ready` on the next
/// reconcile in which every adapter answers. A sync event reaching a slot
/// that was never reconciled moves it `Empty -> Provisional`; the first
/// reconcile then takes it through `Loading` as usual.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SlotState {
    Empty,
    /// Holds extracted records only; no reconcile pass has run
    Provisional,
    Loading,
    Ready,
    /// Last pass excluded these sources
    Degraded { unavailable: Vec<SourceId> },
}

impl SlotState {
    pub fn is_fully_reconciled(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

/// A source excluded from a pass, and why.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnavailableSource {
    pub source_id: SourceId,
    pub reason: String,
}

/// What one reconcile pass did.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileOutcome {
    pub case_id: CaseId,
    pub kind: EntityKind,
    pub fully_reconciled: bool,
    pub unavailable: Vec<UnavailableSource>,
    /// Records in the slot after the pass
    pub records: usize,
    /// Records created or modified by the pass
    pub changed: usize,
}
