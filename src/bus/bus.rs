//! EntitySyncBus: pub/sub of extraction events
//!
//! Each subscriber owns an unbounded queue drained by its own task, so
//! `publish` never waits on a slow handler and one subscriber's failure
//! never reaches another. Within a subscription, events are handled one at
//! a time in publish order.

use super::event::{SyncEvent, SyncEventRejected};
use super::handler::{FnHandler, HandlerError, SyncHandler};
use crate::record::EntityKind;
use dashmap::DashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, Notify};

/// Counts deliveries queued but not yet handled.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

struct Subscriber {
    kind: Option<EntityKind>,
    tx: mpsc::UnboundedSender<SyncEvent>,
}

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    subscribers: DashMap<u64, Subscriber>,
    in_flight: Arc<InFlight>,
}

/// Shared handle to the bus. Clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EntitySyncBus {
    inner: Arc<BusInner>,
}

impl EntitySyncBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one kind (or all kinds with `None`).
    ///
    /// Spawns the subscriber's drain task, so this must be called inside a
    /// tokio runtime.
    pub fn subscribe(&self, kind: Option<EntityKind>, handler: Arc<dyn SyncHandler>) -> BusSubscription {
        let (tx, mut rx) = mpsc::unbounded_channel::<SyncEvent>();
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.subscribers.insert(id, Subscriber { kind, tx });

        let in_flight = Arc::clone(&self.inner.in_flight);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let handler = Arc::clone(&handler);
                let document = event.source_document_id.clone();
                // Separate task so a panicking handler only loses this event
                let handled = tokio::spawn(async move { handler.handle(&event).await }).await;
                match handled {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        subscription = id,
                        document = %document,
                        error = %e,
                        "sync handler failed"
                    ),
                    Err(e) => tracing::error!(
                        subscription = id,
                        document = %document,
                        error = %e,
                        "sync handler panicked"
                    ),
                }
                in_flight.done();
            }
        });

        BusSubscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Subscribe an async closure.
    pub fn subscribe_fn<F, Fut>(&self, kind: Option<EntityKind>, f: F) -> BusSubscription
    where
        F: Fn(SyncEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.subscribe(kind, Arc::new(FnHandler(f)))
    }

    /// Validate and enqueue an event for every matching subscriber.
    ///
    /// Returns how many subscribers it was queued for. Invalid events are
    /// logged and rejected without reaching anyone.
    pub fn publish(&self, event: SyncEvent) -> Result<usize, SyncEventRejected> {
        if let Err(rejected) = event.validate() {
            tracing::warn!(
                document = rejected.document_id().unwrap_or("<none>"),
                event_id = %event.event_id,
                error = %rejected,
                "rejecting sync event"
            );
            return Err(rejected);
        }

        let mut targets: Vec<(u64, mpsc::UnboundedSender<SyncEvent>)> = self
            .inner
            .subscribers
            .iter()
            .filter(|s| s.value().kind.map_or(true, |k| k == event.entity_kind))
            .map(|s| (*s.key(), s.value().tx.clone()))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        let mut delivered = 0;
        for (_, tx) in targets {
            self.inner.in_flight.begin();
            if tx.send(event.clone()).is_ok() {
                delivered += 1;
            } else {
                self.inner.in_flight.done();
            }
        }

        tracing::debug!(
            document = %event.source_document_id,
            kind = %event.entity_kind,
            delivered,
            "published sync event"
        );
        Ok(delivered)
    }

    /// Wait until every queued delivery has been handled.
    pub async fn drain(&self) {
        loop {
            let idle = self.inner.in_flight.idle.notified();
            if self.inner.in_flight.current() == 0 {
                return;
            }
            idle.await;
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

/// Handle for a bus subscription. Dropping it unsubscribes; events already
/// queued for it are still handled.
#[must_use = "dropping a BusSubscription unsubscribes immediately"]
pub struct BusSubscription {
    id: u64,
    bus: Weak<BusInner>,
}

impl BusSubscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(self) {}
}

impl Drop for BusSubscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.subscribers.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for BusSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSubscription").field("id", &self.id).finish()
    }
}
