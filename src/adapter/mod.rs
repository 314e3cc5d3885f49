//! Source adapters
//!
//! Three stores feed the canonical view, each behind [`SourceAdapter`]:
//! - [`SnapshotImporter`]: exported case snapshots on disk (highest precedence)
//! - [`DurableStoreAdapter`]: the SQLite record store
//! - [`EmbeddedCacheAdapter`]: the in-process cache (lowest precedence)

mod cache;
mod durable;
mod snapshot;
mod traits;

pub use cache::{CacheEntry, EmbeddedCacheAdapter};
pub use durable::{DurableRecord, DurableStoreAdapter, StoreError};
pub use snapshot::SnapshotImporter;
pub use traits::{SourceAdapter, SourceError};
