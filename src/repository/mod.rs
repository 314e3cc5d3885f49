//! Canonical repository
//!
//! Owns the merged view per (case, kind), runs reconcile passes against the
//! source adapters, folds sync events in, and notifies subscribers after
//! every commit.

mod events;
#[allow(clippy::module_inception)]
mod repository;
mod state;
mod subscription;

pub use events::RepositoryEvent;
pub use repository::{CanonicalRepository, RepositoryBuilder, RepositoryError};
pub use state::{ReconcileOutcome, SlotState, UnavailableSource};
pub use subscription::{Callback, Subscription};
