//! casesync: multi-source record reconciliation for case management
//!
//! Case records live in several independently updated stores. casesync
//! decides which records from different stores denote the same entity,
//! merges them under a deterministic policy, and folds asynchronous AI
//! extractions into the merged view so every open view converges on the
//! same state.
//!
//! # Core Concepts
//!
//! - **Source adapters**: uniform `list(case, kind)` over each store
//! - **Identity resolver**: assigns every record a StableKey
//! - **Merge engine**: reduces one entity's records to a canonical record
//! - **Canonical repository**: the merged view, with change notifications
//! - **Entity sync bus**: pub/sub of extraction events
//!
//! # Example
//!
//! ```
//! use casesync::{CanonicalRepository, CaseId, EmbeddedCacheAdapter, EntityKind, CacheEntry};
//! use std::sync::Arc;
//!
//! # tokio_test_runtime(async {
//! let cache = Arc::new(EmbeddedCacheAdapter::new());
//! let case = CaseId::from("case-1");
//! cache.put(&case, EntityKind::Document, CacheEntry::new("witness_smith.pdf"));
//!
//! let repo = CanonicalRepository::builder()
//!     .shared_adapter(cache)
//!     .build()
//!     .unwrap();
//! let outcome = repo.reconcile(&case, EntityKind::Document).await;
//! assert!(outcome.fully_reconciled);
//! assert_eq!(repo.snapshot(&case, EntityKind::Document).len(), 1);
//! # });
//! # fn tokio_test_runtime(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

pub mod adapter;
pub mod bus;
pub mod config;
pub mod identity;
pub mod merge;
pub mod record;
pub mod repository;
pub mod session;

pub use adapter::{
    CacheEntry, DurableRecord, DurableStoreAdapter, EmbeddedCacheAdapter, SnapshotImporter,
    SourceAdapter, SourceError, StoreError,
};
pub use bus::{
    BusSubscription, EntitySyncBus, HandlerError, RepositorySyncHandler, SyncEvent,
    SyncEventRejected, SyncGate, SyncHandler,
};
pub use config::{ConfigError, EngineConfig, RepositoryConfig};
pub use identity::{IdentityIndex, IdentityResolver};
pub use merge::{MergeEngine, MergeOutcome, MergePolicy};
pub use record::{
    CanonicalRecord, CaseId, EntityKind, FieldValue, SourceId, SourceKind, SourceRecord, StableKey,
};
pub use repository::{
    CanonicalRepository, ReconcileOutcome, RepositoryError, RepositoryEvent, SlotState,
    Subscription,
};
pub use session::CaseSession;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
