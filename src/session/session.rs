//! CaseSession: the repository and bus wiring for one open case

use super::debounce::Debouncer;
use crate::bus::{BusSubscription, EntitySyncBus, RepositorySyncHandler, SyncEvent, SyncEventRejected, SyncGate};
use crate::config::RepositoryConfig;
use crate::record::{CanonicalRecord, CaseId, EntityKind};
use crate::repository::{CanonicalRepository, ReconcileOutcome, RepositoryEvent, SlotState, Subscription};
use std::collections::HashMap;
use std::sync::Arc;

/// One open case.
///
/// Opening subscribes the repository to the bus for this case. Closing
/// cancels pending reconciles, unsubscribes, and drops the case from the
/// repository; events still queued on the bus at that point are discarded.
/// Dropping without `close` also discards queued events, but leaves the
/// case's records in place.
pub struct CaseSession {
    case_id: CaseId,
    repository: Arc<CanonicalRepository>,
    bus: EntitySyncBus,
    gate: Arc<SyncGate>,
    sync: Option<BusSubscription>,
    debouncers: HashMap<EntityKind, Debouncer>,
}

impl CaseSession {
    /// Must be called inside a tokio runtime.
    pub fn open(
        case_id: impl Into<CaseId>,
        repository: Arc<CanonicalRepository>,
        bus: EntitySyncBus,
        config: &RepositoryConfig,
    ) -> Self {
        let case_id = case_id.into();
        let gate = Arc::new(SyncGate::new());
        let handler = RepositorySyncHandler::for_case(Arc::clone(&repository), case_id.clone())
            .with_gate(Arc::clone(&gate));
        let sync = bus.subscribe(None, Arc::new(handler));
        let debouncers = EntityKind::ALL
            .iter()
            .map(|kind| (*kind, Debouncer::new(config.debounce())))
            .collect();

        tracing::info!(case = %case_id, "case session opened");
        Self {
            case_id,
            repository,
            bus,
            gate,
            sync: Some(sync),
            debouncers,
        }
    }

    pub fn case_id(&self) -> &CaseId {
        &self.case_id
    }

    pub fn repository(&self) -> &Arc<CanonicalRepository> {
        &self.repository
    }

    pub fn bus(&self) -> &EntitySyncBus {
        &self.bus
    }

    /// Reconcile one kind now.
    pub async fn reconcile(&self, kind: EntityKind) -> ReconcileOutcome {
        self.repository.reconcile(&self.case_id, kind).await
    }

    /// Reconcile every kind, in `EntityKind::ALL` order.
    pub async fn reconcile_all(&self) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::with_capacity(EntityKind::ALL.len());
        for kind in EntityKind::ALL {
            outcomes.push(self.repository.reconcile(&self.case_id, kind).await);
        }
        outcomes
    }

    /// Ask for a reconcile of `kind`; requests inside the debounce window
    /// coalesce into one pass.
    pub fn request_reconcile(&self, kind: EntityKind) {
        let Some(debouncer) = self.debouncers.get(&kind) else {
            return;
        };
        let repository = Arc::clone(&self.repository);
        let case_id = self.case_id.clone();
        debouncer.trigger(move || async move {
            repository.reconcile(&case_id, kind).await;
        });
    }

    pub fn has_pending_reconcile(&self) -> bool {
        self.debouncers.values().any(Debouncer::is_pending)
    }

    /// Publish an extraction for this case onto the shared bus.
    pub fn publish(&self, event: SyncEvent) -> Result<usize, SyncEventRejected> {
        if event.case_id != self.case_id {
            tracing::debug!(
                session = %self.case_id,
                event_case = %event.case_id,
                "publishing event for another case"
            );
        }
        self.bus.publish(event)
    }

    pub fn snapshot(&self, kind: EntityKind) -> Arc<[CanonicalRecord]> {
        self.repository.snapshot(&self.case_id, kind)
    }

    pub fn state(&self, kind: EntityKind) -> SlotState {
        self.repository.state(&self.case_id, kind)
    }

    pub fn subscribe<F>(&self, kind: EntityKind, callback: F) -> Subscription
    where
        F: Fn(&RepositoryEvent) + Send + Sync + 'static,
    {
        self.repository.subscribe(&self.case_id, kind, callback)
    }

    /// Tear the session down and remove the case from the repository.
    pub async fn close(mut self) {
        self.gate.close().await;
        self.detach();
        self.repository.remove_case(&self.case_id).await;
        tracing::info!(case = %self.case_id, "case session closed");
    }

    fn detach(&mut self) {
        self.gate.shut();
        for debouncer in self.debouncers.values() {
            debouncer.cancel();
        }
        self.sync.take();
    }
}

impl Drop for CaseSession {
    fn drop(&mut self) {
        self.detach();
    }
}
