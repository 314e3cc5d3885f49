//! Sync event handlers

use super::event::{SyncEvent, SyncEventRejected};
use crate::record::CaseId;
use crate::repository::CanonicalRepository;
use async_trait::async_trait;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, RwLockReadGuard};

#[derive(Debug, Error)]
pub enum HandlerError {
    #[error(transparent)]
    Rejected(#[from] SyncEventRejected),

    #[error("handler failed: {0}")]
    Failed(String),
}

/// Receives events from the bus, one at a time per subscription, in publish order.
#[async_trait]
pub trait SyncHandler: Send + Sync {
    async fn handle(&self, event: &SyncEvent) -> Result<(), HandlerError>;
}

/// Adapts an async closure into a [`SyncHandler`].
pub struct FnHandler<F>(pub F);

#[async_trait]
impl<F, Fut> SyncHandler for FnHandler<F>
where
    F: Fn(SyncEvent) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, event: &SyncEvent) -> Result<(), HandlerError> {
        (self.0)(event.clone()).await
    }
}

/// Stops a handler from writing once its owner has shut down.
///
/// Writers hold a pass from [`SyncGate::enter`] for the duration of one
/// write. [`SyncGate::close`] returns only after every outstanding pass has
/// been released, so nothing lands after it.
#[derive(Debug, Default)]
pub struct SyncGate {
    closed: AtomicBool,
    passing: RwLock<()>,
}

impl SyncGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Refuse new passes without waiting for current ones.
    pub fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Refuse new passes and wait out the current ones.
    pub async fn close(&self) {
        self.shut();
        drop(self.passing.write().await);
    }

    /// `None` once the gate is shut.
    pub async fn enter(&self) -> Option<RwLockReadGuard<'_, ()>> {
        let pass = self.passing.read().await;
        if self.is_closed() {
            return None;
        }
        Some(pass)
    }
}

/// Routes sync events into the canonical repository.
pub struct RepositorySyncHandler {
    repository: Arc<CanonicalRepository>,
    case_id: Option<CaseId>,
    gate: Option<Arc<SyncGate>>,
}

impl RepositorySyncHandler {
    /// Accept events for every case.
    pub fn new(repository: Arc<CanonicalRepository>) -> Self {
        Self {
            repository,
            case_id: None,
            gate: None,
        }
    }

    /// Accept events for one case; others are ignored.
    pub fn for_case(repository: Arc<CanonicalRepository>, case_id: CaseId) -> Self {
        Self {
            repository,
            case_id: Some(case_id),
            gate: None,
        }
    }

    /// Drop events, including ones already queued, once `gate` is shut.
    pub fn with_gate(mut self, gate: Arc<SyncGate>) -> Self {
        self.gate = Some(gate);
        self
    }
}

#[async_trait]
impl SyncHandler for RepositorySyncHandler {
    async fn handle(&self, event: &SyncEvent) -> Result<(), HandlerError> {
        if self.case_id.as_ref().is_some_and(|case| case != &event.case_id) {
            return Ok(());
        }
        let _pass = match &self.gate {
            Some(gate) => match gate.enter().await {
                Some(pass) => Some(pass),
                None => {
                    tracing::debug!(case = %event.case_id, event_id = %event.event_id, "gate closed, event dropped");
                    return Ok(());
                }
            },
            None => None,
        };
        self.repository.upsert(event).await?;
        Ok(())
    }
}
