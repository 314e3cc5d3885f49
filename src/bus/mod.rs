//! Entity sync bus
//!
//! Extraction results arrive as [`SyncEvent`]s. The bus fans them out to
//! subscribers; [`RepositorySyncHandler`] is the subscriber that folds them
//! into the canonical view.

#[allow(clippy::module_inception)]
mod bus;
mod event;
mod handler;

pub use bus::{BusSubscription, EntitySyncBus};
pub use event::{SyncEvent, SyncEventRejected};
pub use handler::{FnHandler, HandlerError, RepositorySyncHandler, SyncGate, SyncHandler};
