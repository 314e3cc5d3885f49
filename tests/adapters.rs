//! The bundled adapters wired into one repository, backed by real files

use casesync::{
    CanonicalRepository, CaseId, DurableRecord, DurableStoreAdapter, EmbeddedCacheAdapter, EngineConfig,
    EntityKind, SlotState, SnapshotImporter, SourceId, StableKey,
};
use chrono::{TimeZone, Utc};
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn write(path: &Path, body: &str) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, body).unwrap();
}

struct Stores {
    _dir: TempDir,
    snapshot: SnapshotImporter,
    durable: DurableStoreAdapter,
    cache: EmbeddedCacheAdapter,
}

fn stores() -> Stores {
    let dir = tempfile::tempdir().unwrap();

    write(
        &dir.path().join("snapshots/case-7/document.json"),
        r#"[{"filename": "witness_smith.pdf", "title": "Witness Statement",
             "updated_at": "2024-03-01T10:00:00Z"}]"#,
    );
    write(
        &dir.path().join("snapshots/case-7/person.yaml"),
        "- name: John Smith\n  role: witness\n",
    );

    let durable = DurableStoreAdapter::open(dir.path().join("db/casesync.db")).unwrap();
    durable
        .put_record(&DurableRecord {
            case_id: CaseId::from("case-7"),
            kind: EntityKind::Document,
            record_id: "row-1".into(),
            external_id: Some("doc_1".into()),
            natural_key: Some("witness_smith.pdf".into()),
            fields: [("notes".to_string(), json!("reviewed"))].into_iter().collect(),
            updated_at: Utc.with_ymd_and_hms(2024, 3, 2, 9, 0, 0).unwrap(),
        })
        .unwrap();

    write(
        &dir.path().join("cache.json"),
        r#"{"case-7": {
              "document": [{"name": "witness_smith.pdf", "payload": {"page_refs": "p.1-3"}}],
              "people": [{"name": "john smith", "payload": {"phone": "555-0100"}}]
            }}"#,
    );
    let cache = EmbeddedCacheAdapter::new();
    assert_eq!(cache.load_json(dir.path().join("cache.json")).unwrap(), 2);

    let snapshot = SnapshotImporter::new(dir.path().join("snapshots"));
    Stores {
        _dir: dir,
        snapshot,
        durable,
        cache,
    }
}

fn repository(stores: Stores) -> (CanonicalRepository, TempDir) {
    let Stores {
        _dir,
        snapshot,
        durable,
        cache,
    } = stores;
    let repo = CanonicalRepository::builder()
        .adapter(snapshot)
        .adapter(durable)
        .adapter(cache)
        .config(EngineConfig::default().repository)
        .build()
        .unwrap();
    (repo, _dir)
}

#[tokio::test]
async fn real_stores_reconcile_one_document() {
    let (repo, _dir) = repository(stores());
    let case = CaseId::from("case-7");

    let outcome = repo.reconcile(&case, EntityKind::Document).await;
    assert!(outcome.fully_reconciled);

    let record = repo
        .get(&case, EntityKind::Document, &StableKey::external("doc_1"))
        .unwrap();
    assert_eq!(record.text("title"), Some("Witness Statement"));
    assert_eq!(record.text("notes"), Some("reviewed"));
    assert_eq!(record.text("page_refs"), Some("p.1-3"));
    assert_eq!(
        record.provenance,
        vec![
            SourceId::from("snapshot"),
            SourceId::from("durable"),
            SourceId::from("cache")
        ]
    );
}

#[tokio::test]
async fn yaml_snapshot_and_cache_agree_on_a_person() {
    let (repo, _dir) = repository(stores());
    let case = CaseId::from("case-7");

    repo.reconcile(&case, EntityKind::Person).await;

    let snapshot = repo.snapshot(&case, EntityKind::Person);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].stable_key, StableKey::natural("john smith"));
    assert_eq!(snapshot[0].text("role"), Some("witness"));
    assert_eq!(snapshot[0].text("phone"), Some("555-0100"));
}

#[tokio::test]
async fn corrupt_snapshot_file_degrades_only_that_source() {
    let stores = stores();
    write(
        &stores.snapshot.root().join("case-7/issue.json"),
        "{ not json",
    );
    stores.cache.put(
        &CaseId::from("case-7"),
        EntityKind::Issue,
        casesync::CacheEntry::new("Duty of care"),
    );
    let (repo, _dir) = repository(stores);
    let case = CaseId::from("case-7");

    let outcome = repo.reconcile(&case, EntityKind::Issue).await;

    assert!(!outcome.fully_reconciled);
    assert_eq!(
        repo.state(&case, EntityKind::Issue),
        SlotState::Degraded {
            unavailable: vec![SourceId::from("snapshot")]
        }
    );
    assert_eq!(repo.snapshot(&case, EntityKind::Issue).len(), 1);
}

#[tokio::test]
async fn durable_retraction_is_seen_by_later_passes() {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("casesync.db");
    let case = CaseId::from("case-7");

    let writer = DurableStoreAdapter::open(&db).unwrap();
    writer
        .put_record(&DurableRecord {
            case_id: case.clone(),
            kind: EntityKind::Authority,
            record_id: "a-1".into(),
            external_id: None,
            natural_key: Some("Donoghue v Stevenson".into()),
            fields: Default::default(),
            updated_at: Utc::now(),
        })
        .unwrap();

    let repo = CanonicalRepository::builder()
        .adapter(DurableStoreAdapter::open(&db).unwrap())
        .build()
        .unwrap();
    repo.reconcile(&case, EntityKind::Authority).await;
    assert_eq!(repo.snapshot(&case, EntityKind::Authority).len(), 1);

    assert!(writer.retract_record(&case, EntityKind::Authority, "a-1").unwrap());
    assert!(!writer.retract_record(&case, EntityKind::Authority, "a-1").unwrap());

    let key = StableKey::natural("donoghue v stevenson");
    assert!(
        repo.retract(&case, EntityKind::Authority, &key, &SourceId::from("durable"))
            .await
    );
    assert!(repo.snapshot(&case, EntityKind::Authority).is_empty());

    repo.reconcile(&case, EntityKind::Authority).await;
    assert!(repo.snapshot(&case, EntityKind::Authority).is_empty());
}
