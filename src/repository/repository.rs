//! CanonicalRepository: the merged view of every case, per entity kind

use super::events::RepositoryEvent;
use super::state::{ReconcileOutcome, SlotState, UnavailableSource};
use super::subscription::{Callback, SubscriberRegistry, Subscription};
use crate::adapter::{SourceAdapter, SourceError};
use crate::bus::{SyncEvent, SyncEventRejected};
use crate::config::RepositoryConfig;
use crate::identity::{IdentityIndex, IdentityResolver};
use crate::merge::{Contribution, MergeEngine, MergePolicy};
use crate::record::{CanonicalRecord, CaseId, EntityKind, SourceId, SourceRecord, StableKey};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinSet;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RepositoryError {
    #[error("no source adapters registered")]
    NoAdapters,

    #[error("source id registered twice: {0}")]
    DuplicateSource(SourceId),
}

type SlotKey = (CaseId, EntityKind);

/// Everything the repository knows about one (case, kind).
#[derive(Debug, Clone)]
struct Slot {
    state: SlotState,
    records: BTreeMap<StableKey, CanonicalRecord>,
    identity: IdentityIndex,
}

impl Slot {
    fn empty() -> Self {
        Self {
            state: SlotState::Empty,
            records: BTreeMap::new(),
            identity: IdentityIndex::new(),
        }
    }
}

/// Builder for [`CanonicalRepository`].
#[derive(Default)]
pub struct RepositoryBuilder {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    policy: MergePolicy,
    config: RepositoryConfig,
}

impl RepositoryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn adapter(self, adapter: impl SourceAdapter + 'static) -> Self {
        self.shared_adapter(Arc::new(adapter))
    }

    /// Register an adapter the caller keeps a handle to (e.g., to write to it).
    pub fn shared_adapter(mut self, adapter: Arc<dyn SourceAdapter>) -> Self {
        self.adapters.push(adapter);
        self
    }

    pub fn merge_policy(mut self, policy: MergePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn config(mut self, config: RepositoryConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<CanonicalRepository, RepositoryError> {
        if self.adapters.is_empty() {
            return Err(RepositoryError::NoAdapters);
        }
        let mut seen = HashSet::new();
        for adapter in &self.adapters {
            if !seen.insert(adapter.id().clone()) {
                return Err(RepositoryError::DuplicateSource(adapter.id().clone()));
            }
        }

        Ok(CanonicalRepository {
            adapters: self.adapters,
            resolver: IdentityResolver::new(),
            engine: MergeEngine::new(self.policy),
            config: self.config,
            slots: DashMap::new(),
            reconcile_locks: DashMap::new(),
            merge_lock: Mutex::new(()),
            subscribers: Arc::new(SubscriberRegistry::default()),
        })
    }
}

/// The canonical view of every open case.
///
/// Fetches run concurrently; every commit (reconcile, upsert, retraction,
/// case removal) runs under one async merge lock, so commits are totally
/// ordered and subscribers see them in that order. Reconciles of the same
/// slot also queue behind each other, fetch included, so a pass never
/// commits over a later one. Subscriber callbacks run on the commit path
/// after the slot is updated.
pub struct CanonicalRepository {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    resolver: IdentityResolver,
    engine: MergeEngine,
    config: RepositoryConfig,
    slots: DashMap<SlotKey, Slot>,
    reconcile_locks: DashMap<SlotKey, Arc<Mutex<()>>>,
    merge_lock: Mutex<()>,
    subscribers: Arc<SubscriberRegistry>,
}

impl CanonicalRepository {
    pub fn builder() -> RepositoryBuilder {
        RepositoryBuilder::new()
    }

    pub fn source_ids(&self) -> Vec<SourceId> {
        self.adapters.iter().map(|a| a.id().clone()).collect()
    }

    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    // === Reads ===

    /// Read-only snapshot of a slot, ordered by stable key.
    pub fn snapshot(&self, case_id: &CaseId, kind: EntityKind) -> Arc<[CanonicalRecord]> {
        self.slots
            .get(&(case_id.clone(), kind))
            .map(|slot| slot.records.values().cloned().collect())
            .unwrap_or_else(|| Arc::from(Vec::new()))
    }

    pub fn get(&self, case_id: &CaseId, kind: EntityKind, key: &StableKey) -> Option<CanonicalRecord> {
        self.slots
            .get(&(case_id.clone(), kind))
            .and_then(|slot| slot.records.get(key).cloned())
    }

    pub fn state(&self, case_id: &CaseId, kind: EntityKind) -> SlotState {
        self.slots
            .get(&(case_id.clone(), kind))
            .map(|slot| slot.state.clone())
            .unwrap_or(SlotState::Empty)
    }

    // === Subscriptions ===

    pub fn subscribe<F>(&self, case_id: &CaseId, kind: EntityKind, callback: F) -> Subscription
    where
        F: Fn(&RepositoryEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.subscribers.register(case_id.clone(), Some(kind), callback)
    }

    /// Subscribe to every kind for a case, including case removal.
    pub fn subscribe_case<F>(&self, case_id: &CaseId, callback: F) -> Subscription
    where
        F: Fn(&RepositoryEvent) + Send + Sync + 'static,
    {
        let callback: Callback = Arc::new(callback);
        self.subscribers.register(case_id.clone(), None, callback)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    // === Reconcile ===

    /// Full reconcile of one slot from every adapter.
    ///
    /// Adapters that fail or time out are excluded and the pass is marked
    /// degraded. Records a pass doesn't mention are kept. Overlapping calls
    /// for one slot run one after another, in call order.
    pub async fn reconcile(&self, case_id: &CaseId, kind: EntityKind) -> ReconcileOutcome {
        let slot_key = (case_id.clone(), kind);
        let slot_lock = self.reconcile_locks.entry(slot_key.clone()).or_default().clone();
        let _pass = slot_lock.lock().await;

        {
            let mut slot = self.slots.entry(slot_key.clone()).or_insert_with(Slot::empty);
            if matches!(slot.state, SlotState::Empty | SlotState::Provisional) {
                slot.state = SlotState::Loading;
            }
        }

        let fetched = self.fetch_all(case_id, kind).await;

        let mut records: Vec<SourceRecord> = Vec::new();
        let mut unavailable = Vec::new();
        for (source_id, result) in fetched {
            match result {
                Ok(batch) => records.extend(batch),
                Err(e) => {
                    tracing::warn!(
                        case = %case_id,
                        kind = %kind,
                        source = %source_id,
                        error = %e,
                        "source unavailable, excluding from pass"
                    );
                    unavailable.push(UnavailableSource {
                        source_id,
                        reason: e.to_string(),
                    });
                }
            }
        }

        let _guard = self.merge_lock.lock().await;

        let prior = self
            .slots
            .get(&slot_key)
            .map(|slot| slot.value().clone())
            .unwrap_or_else(Slot::empty);

        let (classes, identity) = self.resolver.partition(records, &prior.identity);

        let mut next = prior.records.clone();
        let mut changed: Vec<StableKey> = self.fold_aliases(&mut next, &identity);
        for class in classes {
            let contributions = self.engine.contributions(&class);
            let outcome = self.engine.merge(
                case_id,
                kind,
                &class.stable_key,
                next.get(&class.stable_key),
                contributions,
            );
            if outcome.changed && !changed.contains(&class.stable_key) {
                changed.push(class.stable_key.clone());
            }
            next.insert(class.stable_key, outcome.record);
        }

        let fully_reconciled = unavailable.is_empty();
        let state = if fully_reconciled {
            SlotState::Ready
        } else {
            SlotState::Degraded {
                unavailable: unavailable.iter().map(|u| u.source_id.clone()).collect(),
            }
        };

        let snapshot: Arc<[CanonicalRecord]> = next.values().cloned().collect();
        let outcome = ReconcileOutcome {
            case_id: case_id.clone(),
            kind,
            fully_reconciled,
            unavailable,
            records: next.len(),
            changed: changed.len(),
        };

        self.slots.insert(
            slot_key,
            Slot {
                state,
                records: next,
                identity,
            },
        );

        tracing::info!(
            case = %case_id,
            kind = %kind,
            records = outcome.records,
            changed = outcome.changed,
            fully_reconciled,
            "reconciled"
        );

        self.subscribers.dispatch(&RepositoryEvent::Reconciled {
            case_id: case_id.clone(),
            kind,
            snapshot,
            changed,
            fully_reconciled,
        });

        outcome
    }

    /// Query every adapter concurrently, each under the configured deadline.
    ///
    /// Results come back in adapter registration order.
    async fn fetch_all(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
    ) -> Vec<(SourceId, Result<Vec<SourceRecord>, SourceError>)> {
        let timeout = self.config.adapter_timeout();

        let mut results: Vec<(SourceId, Result<Vec<SourceRecord>, SourceError>)> = self
            .adapters
            .iter()
            .map(|a| {
                (
                    a.id().clone(),
                    Err(SourceError::Unavailable("adapter task aborted".to_string())),
                )
            })
            .collect();

        let mut tasks = JoinSet::new();
        for (index, adapter) in self.adapters.iter().enumerate() {
            let adapter = Arc::clone(adapter);
            let case_id = case_id.clone();
            tasks.spawn(async move {
                let result = match tokio::time::timeout(timeout, adapter.list(&case_id, kind, timeout)).await {
                    Ok(result) => result,
                    Err(_) => Err(SourceError::Timeout(timeout)),
                };
                (index, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index].1 = result,
                Err(e) => tracing::error!(case = %case_id, kind = %kind, error = %e, "adapter task failed"),
            }
        }

        results
    }

    /// Re-file records whose natural key is now an alias of an external id.
    ///
    /// Returns every key touched (the alias keys removed and their targets).
    fn fold_aliases(
        &self,
        records: &mut BTreeMap<StableKey, CanonicalRecord>,
        identity: &IdentityIndex,
    ) -> Vec<StableKey> {
        let aliased: Vec<(StableKey, StableKey)> = records
            .keys()
            .filter(|key| key.is_natural())
            .filter_map(|key| {
                identity
                    .external_for(key.as_str())
                    .map(|external| (key.clone(), StableKey::external(external)))
            })
            .collect();

        let mut touched = Vec::with_capacity(aliased.len() * 2);
        for (alias_key, target) in aliased {
            let Some(alias) = records.remove(&alias_key) else {
                continue;
            };
            let folded = match records.get(&target) {
                Some(primary) => self.engine.absorb(primary, &alias),
                None => CanonicalRecord {
                    stable_key: target.clone(),
                    ..alias
                },
            };
            tracing::debug!(from = %alias_key, to = %target, "folding aliased record");
            records.insert(target.clone(), folded);
            touched.push(alias_key);
            if !touched.contains(&target) {
                touched.push(target);
            }
        }
        touched
    }

    // === Incremental updates ===

    /// Fold one sync event into the view.
    ///
    /// The target is the event's hint if it names an existing record (or
    /// external id), else the StableKey of the extracted natural key. Fires
    /// `RecordUpserted` only if the record actually changed.
    pub async fn upsert(&self, event: &SyncEvent) -> Result<CanonicalRecord, SyncEventRejected> {
        if let Err(rejected) = event.validate() {
            tracing::warn!(
                document = rejected.document_id().unwrap_or("<none>"),
                error = %rejected,
                "rejecting sync event"
            );
            return Err(rejected);
        }

        let kind = event.entity_kind;
        let slot_key = (event.case_id.clone(), kind);

        let _guard = self.merge_lock.lock().await;

        let (stable_key, prior) = {
            let slot = self.slots.get(&slot_key);
            let slot = slot.as_ref().map(|s| s.value());
            let key = self.key_for_event(event, slot);
            let prior = slot.and_then(|s| s.records.get(&key).cloned());
            (key, prior)
        };

        let (contribution, malformed) = Contribution::from_event(event, self.engine.policy());
        for m in &malformed {
            tracing::warn!(
                document = %event.source_document_id,
                field = %m.field,
                reason = %m.reason,
                "dropping malformed extracted field"
            );
        }

        let outcome = self.engine.merge(
            &event.case_id,
            kind,
            &stable_key,
            prior.as_ref(),
            vec![contribution],
        );
        let record = outcome.record;

        let fully_reconciled = {
            let mut slot = self.slots.entry(slot_key).or_insert_with(Slot::empty);
            slot.records.insert(stable_key.clone(), record.clone());
            if slot.state == SlotState::Empty {
                slot.state = SlotState::Provisional;
            }
            slot.state.is_fully_reconciled()
        };

        if outcome.changed {
            self.subscribers.dispatch(&RepositoryEvent::RecordUpserted {
                case_id: event.case_id.clone(),
                kind,
                record: Arc::new(record.clone()),
                fully_reconciled,
            });
        } else {
            tracing::debug!(
                document = %event.source_document_id,
                stable_key = %stable_key,
                "sync event changed nothing"
            );
        }

        Ok(record)
    }

    fn key_for_event(&self, event: &SyncEvent, slot: Option<&Slot>) -> StableKey {
        let empty = IdentityIndex::new();
        let identity = slot.map(|s| &s.identity).unwrap_or(&empty);
        let known = |key: &StableKey| slot.is_some_and(|s| s.records.contains_key(key));

        if let Some(hint) = event
            .stable_key_hint
            .as_deref()
            .map(str::trim)
            .filter(|h| !h.is_empty())
        {
            let exact = StableKey::new(hint);
            if known(&exact) {
                return exact;
            }
            let external = StableKey::external(hint);
            if known(&external) {
                return external;
            }
            if let Some(key) = self.resolver.key_for_natural(hint, identity) {
                return key;
            }
        }

        if let Some(key) = event
            .natural_key()
            .and_then(|raw| self.resolver.key_for_natural(raw, identity))
        {
            return key;
        }

        let fields = serde_json::to_string(&event.extracted_fields).unwrap_or_default();
        IdentityResolver::singleton_for(&format!("{}\n{}", event.source_id(), fields))
    }

    /// Explicitly retract one source's contribution to a record.
    ///
    /// Returns `false` if the record doesn't exist or the source never
    /// contributed to it.
    pub async fn retract(
        &self,
        case_id: &CaseId,
        kind: EntityKind,
        stable_key: &StableKey,
        source_id: &SourceId,
    ) -> bool {
        let _guard = self.merge_lock.lock().await;
        let slot_key = (case_id.clone(), kind);

        let (event, retracted) = {
            let Some(mut slot) = self.slots.get_mut(&slot_key) else {
                return false;
            };
            let Some(record) = slot.records.get(stable_key) else {
                return false;
            };
            if !record.has_source(source_id) {
                return false;
            }
            let fully_reconciled = slot.state.is_fully_reconciled();
            match self.engine.retract(record, source_id) {
                Some(remaining) => {
                    slot.records.insert(stable_key.clone(), remaining.clone());
                    (
                        RepositoryEvent::RecordUpserted {
                            case_id: case_id.clone(),
                            kind,
                            record: Arc::new(remaining),
                            fully_reconciled,
                        },
                        false,
                    )
                }
                None => {
                    slot.records.remove(stable_key);
                    (
                        RepositoryEvent::RecordRetracted {
                            case_id: case_id.clone(),
                            kind,
                            stable_key: stable_key.clone(),
                            fully_reconciled,
                        },
                        true,
                    )
                }
            }
        };

        tracing::info!(
            case = %case_id,
            kind = %kind,
            stable_key = %stable_key,
            source = %source_id,
            removed = retracted,
            "source retracted"
        );
        self.subscribers.dispatch(&event);
        true
    }

    /// Drop every slot for a case. Returns how many slots existed.
    pub async fn remove_case(&self, case_id: &CaseId) -> usize {
        let _guard = self.merge_lock.lock().await;
        let before = self.slots.len();
        self.slots.retain(|(case, _), _| case != case_id);
        let removed = before - self.slots.len();
        // A lock still held belongs to a reconcile in flight
        self.reconcile_locks
            .retain(|(case, _), lock| case != case_id || Arc::strong_count(lock) > 1);

        tracing::info!(case = %case_id, slots = removed, "case removed");
        self.subscribers.dispatch(&RepositoryEvent::CaseRemoved {
            case_id: case_id.clone(),
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::SourceKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Fixed {
        id: SourceId,
        kind: SourceKind,
        records: Vec<SourceRecord>,
    }

    #[async_trait]
    impl SourceAdapter for Fixed {
        fn id(&self) -> &SourceId {
            &self.id
        }
        fn kind(&self) -> SourceKind {
            self.kind
        }
        async fn list(&self, _: &CaseId, _: EntityKind, _: Duration) -> Result<Vec<SourceRecord>, SourceError> {
            Ok(self.records.clone())
        }
    }

    fn fixed(id: &str, kind: SourceKind, records: Vec<SourceRecord>) -> Fixed {
        Fixed {
            id: SourceId::from(id),
            kind,
            records,
        }
    }

    #[test]
    fn build_without_adapters_fails() {
        assert_eq!(
            CanonicalRepository::builder().build().err(),
            Some(RepositoryError::NoAdapters)
        );
    }

    #[test]
    fn build_with_duplicate_source_fails() {
        let err = CanonicalRepository::builder()
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .build()
            .err();
        assert_eq!(err, Some(RepositoryError::DuplicateSource(SourceId::from("cache"))));
    }

    #[tokio::test]
    async fn reconcile_moves_slot_to_ready() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed(
                "cache",
                SourceKind::Cache,
                vec![SourceRecord::new("cache", SourceKind::Cache).with_natural_key("a.pdf")],
            ))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");
        assert_eq!(repo.state(&case, EntityKind::Document), SlotState::Empty);

        let outcome = repo.reconcile(&case, EntityKind::Document).await;
        assert!(outcome.fully_reconciled);
        assert_eq!(outcome.records, 1);
        assert_eq!(repo.state(&case, EntityKind::Document), SlotState::Ready);
    }

    #[tokio::test]
    async fn upsert_that_changes_nothing_is_silent() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        let _sub = repo.subscribe(&case, EntityKind::Person, move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        let event = SyncEvent::new("case-1", EntityKind::Person, "doc_1", 0.9).with_field("name", "John Smith");
        repo.upsert(&event).await.unwrap();
        repo.upsert(&event).await.unwrap();

        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(repo.snapshot(&case, EntityKind::Person).len(), 1);
    }

    #[tokio::test]
    async fn upsert_into_unreconciled_slot_is_provisional() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");

        let event = SyncEvent::new("case-1", EntityKind::Person, "doc_1", 0.9).with_field("name", "John Smith");
        repo.upsert(&event).await.unwrap();
        assert_eq!(repo.state(&case, EntityKind::Person), SlotState::Provisional);
        assert_eq!(repo.snapshot(&case, EntityKind::Person).len(), 1);

        repo.reconcile(&case, EntityKind::Person).await;
        assert_eq!(repo.state(&case, EntityKind::Person), SlotState::Ready);
        assert_eq!(repo.snapshot(&case, EntityKind::Person).len(), 1);

        // Later upserts leave a reconciled slot's state alone
        let event = SyncEvent::new("case-1", EntityKind::Person, "doc_2", 0.9).with_field("name", "Jane Roe");
        repo.upsert(&event).await.unwrap();
        assert_eq!(repo.state(&case, EntityKind::Person), SlotState::Ready);
    }

    #[tokio::test]
    async fn upsert_rejects_invalid_event() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .build()
            .unwrap();
        let event = SyncEvent::new("case-1", EntityKind::Person, "doc_1", 2.0);
        assert!(repo.upsert(&event).await.is_err());
        assert!(repo.snapshot(&CaseId::from("case-1"), EntityKind::Person).is_empty());
    }

    #[tokio::test]
    async fn hint_targets_existing_external_record() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed(
                "durable",
                SourceKind::Durable,
                vec![SourceRecord::new("durable", SourceKind::Durable)
                    .with_external_id("doc_1")
                    .with_natural_key("brief.docx")],
            ))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");
        repo.reconcile(&case, EntityKind::Document).await;

        let event = SyncEvent::new("case-1", EntityKind::Document, "doc_1", 0.7)
            .with_hint("doc_1")
            .with_field("summary", "Witness account");
        let record = repo.upsert(&event).await.unwrap();

        assert_eq!(record.stable_key, StableKey::external("doc_1"));
        assert_eq!(repo.snapshot(&case, EntityKind::Document).len(), 1);
    }

    #[tokio::test]
    async fn retract_last_source_removes_record() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed(
                "cache",
                SourceKind::Cache,
                vec![SourceRecord::new("cache", SourceKind::Cache).with_natural_key("a.pdf")],
            ))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");
        repo.reconcile(&case, EntityKind::Document).await;
        let key = StableKey::natural("apdf");

        assert!(!repo.retract(&case, EntityKind::Document, &key, &SourceId::from("other")).await);
        assert!(repo.retract(&case, EntityKind::Document, &key, &SourceId::from("cache")).await);
        assert!(repo.get(&case, EntityKind::Document, &key).is_none());
    }

    #[tokio::test]
    async fn remove_case_drops_all_slots() {
        let repo = CanonicalRepository::builder()
            .adapter(fixed("cache", SourceKind::Cache, vec![]))
            .build()
            .unwrap();
        let case = CaseId::from("case-1");
        repo.reconcile(&case, EntityKind::Document).await;
        repo.reconcile(&case, EntityKind::Person).await;
        repo.reconcile(&CaseId::from("case-2"), EntityKind::Person).await;

        let removed = Arc::new(AtomicUsize::new(0));
        let r = Arc::clone(&removed);
        let _sub = repo.subscribe_case(&case, move |event| {
            if matches!(event, RepositoryEvent::CaseRemoved { .. }) {
                r.fetch_add(1, Ordering::SeqCst);
            }
        });

        assert_eq!(repo.remove_case(&case).await, 2);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
        assert_eq!(repo.state(&case, EntityKind::Document), SlotState::Empty);
        assert_eq!(repo.state(&CaseId::from("case-2"), EntityKind::Person), SlotState::Ready);
    }
}
