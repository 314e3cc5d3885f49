//! Change notifications fired after each commit

use crate::record::{CanonicalRecord, CaseId, EntityKind, StableKey};
use std::sync::Arc;

/// A change to the canonical view.
///
/// Payloads are read-only snapshots taken at commit time.
#[derive(Debug, Clone)]
pub enum RepositoryEvent {
    /// A reconcile pass committed; `snapshot` is the whole slot
    Reconciled {
        case_id: CaseId,
        kind: EntityKind,
        snapshot: Arc<[CanonicalRecord]>,
        changed: Vec<StableKey>,
        fully_reconciled: bool,
    },
    /// One record was created or modified outside a reconcile pass
    RecordUpserted {
        case_id: CaseId,
        kind: EntityKind,
        record: Arc<CanonicalRecord>,
        fully_reconciled: bool,
    },
    /// Every contributing source retracted a record
    RecordRetracted {
        case_id: CaseId,
        kind: EntityKind,
        stable_key: StableKey,
        fully_reconciled: bool,
    },
    /// The case was deleted; every slot for it is gone
    CaseRemoved { case_id: CaseId },
}

impl RepositoryEvent {
    pub fn case_id(&self) -> &CaseId {
        match self {
            Self::Reconciled { case_id, .. }
            | Self::RecordUpserted { case_id, .. }
            | Self::RecordRetracted { case_id, .. }
            | Self::CaseRemoved { case_id } => case_id,
        }
    }

    /// `None` for case-wide events.
    pub fn kind(&self) -> Option<EntityKind> {
        match self {
            Self::Reconciled { kind, .. }
            | Self::RecordUpserted { kind, .. }
            | Self::RecordRetracted { kind, .. } => Some(*kind),
            Self::CaseRemoved { .. } => None,
        }
    }

    pub fn fully_reconciled(&self) -> bool {
        match self {
            Self::Reconciled { fully_reconciled, .. }
            | Self::RecordUpserted { fully_reconciled, .. }
            | Self::RecordRetracted { fully_reconciled, .. } => *fully_reconciled,
            Self::CaseRemoved { .. } => false,
        }
    }
}
