//! Shared fixtures for the integration scenarios
//!
//! Scripted adapters stand in for real stores so each scenario controls
//! exactly what every source returns, how long it takes, and whether it fails.

#![allow(dead_code)]

use async_trait::async_trait;
use casesync::{
    CanonicalRepository, CaseId, EntityKind, RepositoryConfig, SourceAdapter, SourceError, SourceId,
    SourceKind, SourceRecord,
};
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const CASE: &str = "case-42";

pub fn case() -> CaseId {
    CaseId::from(CASE)
}

/// A fixed instant, `secs` seconds into 2024-01-01.
pub fn at(secs: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + chrono::Duration::seconds(secs)
}

/// Returns whatever records were last scripted for a kind.
pub struct ScriptedAdapter {
    id: SourceId,
    kind: SourceKind,
    records: Mutex<HashMap<EntityKind, Vec<SourceRecord>>>,
    failing: Mutex<Option<SourceError>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
}

impl ScriptedAdapter {
    pub fn new(id: &str, kind: SourceKind) -> Arc<Self> {
        Arc::new(Self {
            id: SourceId::from(id),
            kind,
            records: Mutex::new(HashMap::new()),
            failing: Mutex::new(None),
            delay: Mutex::new(None),
            calls: AtomicUsize::new(0),
        })
    }

    /// Start a record stamped with this adapter's id and kind.
    pub fn record(&self) -> SourceRecord {
        SourceRecord::new(self.id.clone(), self.kind).with_last_updated(at(0))
    }

    pub fn set(&self, kind: EntityKind, records: Vec<SourceRecord>) {
        self.records.lock().unwrap().insert(kind, records);
    }

    pub fn fail_with(&self, error: Option<SourceError>) {
        *self.failing.lock().unwrap() = error;
    }

    pub fn delay_by(&self, delay: Option<Duration>) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for ScriptedAdapter {
    fn id(&self) -> &SourceId {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn list(
        &self,
        _case_id: &CaseId,
        kind: EntityKind,
        _timeout: Duration,
    ) -> Result<Vec<SourceRecord>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Answer with what the store held when asked, however long the reply takes
        let records = self
            .records
            .lock()
            .unwrap()
            .get(&kind)
            .cloned()
            .unwrap_or_default();
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failing.lock().unwrap().clone() {
            return Err(error);
        }
        Ok(records)
    }
}

/// The usual three-store setup: snapshot, durable, cache.
pub struct Sources {
    pub snapshot: Arc<ScriptedAdapter>,
    pub durable: Arc<ScriptedAdapter>,
    pub cache: Arc<ScriptedAdapter>,
}

impl Sources {
    pub fn new() -> Self {
        Self {
            snapshot: ScriptedAdapter::new("snapshot", SourceKind::Snapshot),
            durable: ScriptedAdapter::new("durable", SourceKind::Durable),
            cache: ScriptedAdapter::new("cache", SourceKind::Cache),
        }
    }

    pub fn repository(&self, config: RepositoryConfig) -> Arc<CanonicalRepository> {
        let snapshot: Arc<dyn SourceAdapter> = self.snapshot.clone();
        let durable: Arc<dyn SourceAdapter> = self.durable.clone();
        let cache: Arc<dyn SourceAdapter> = self.cache.clone();
        Arc::new(
            CanonicalRepository::builder()
                .shared_adapter(snapshot)
                .shared_adapter(durable)
                .shared_adapter(cache)
                .config(config)
                .build()
                .unwrap(),
        )
    }
}

pub fn quick_timeouts() -> RepositoryConfig {
    RepositoryConfig {
        adapter_timeout_ms: 100,
        debounce_ms: 20,
    }
}
