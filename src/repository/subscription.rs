//! Subscriber registry and the handles that keep subscriptions alive

use super::events::RepositoryEvent;
use crate::record::{CaseId, EntityKind};
use dashmap::DashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Change callback. Runs synchronously on the commit path, so it should
/// copy what it needs and return.
pub type Callback = Arc<dyn Fn(&RepositoryEvent) + Send + Sync>;

struct Entry {
    case_id: CaseId,
    /// `None` = every kind for the case
    kind: Option<EntityKind>,
    callback: Callback,
}

impl Entry {
    fn matches(&self, event: &RepositoryEvent) -> bool {
        if &self.case_id != event.case_id() {
            return false;
        }
        match (self.kind, event.kind()) {
            (Some(wanted), Some(kind)) => wanted == kind,
            _ => true,
        }
    }
}

#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    next_id: AtomicU64,
    entries: DashMap<u64, Entry>,
}

impl SubscriberRegistry {
    pub(crate) fn register(
        self: &Arc<Self>,
        case_id: CaseId,
        kind: Option<EntityKind>,
        callback: Callback,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.insert(
            id,
            Entry {
                case_id,
                kind,
                callback,
            },
        );
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    fn remove(&self, id: u64) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Invoke every matching callback in registration order.
    ///
    /// Callbacks are cloned out first so none runs while the map is locked;
    /// a callback may subscribe or unsubscribe. A panicking callback is
    /// logged and does not affect the others.
    pub(crate) fn dispatch(&self, event: &RepositoryEvent) {
        let mut targets: Vec<(u64, Callback)> = self
            .entries
            .iter()
            .filter(|e| e.value().matches(event))
            .map(|e| (*e.key(), Arc::clone(&e.value().callback)))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        for (id, callback) in targets {
            if panic::catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                tracing::error!(
                    subscription = id,
                    case = %event.case_id(),
                    "repository subscriber panicked"
                );
            }
        }
    }
}

/// Handle for a repository subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Explicit form of dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
