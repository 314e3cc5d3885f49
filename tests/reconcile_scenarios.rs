//! End-to-end reconcile passes across three scripted stores

mod common;

use casesync::{EntityKind, FieldValue, RepositoryConfig, RepositoryEvent, SlotState, SourceError, SourceId, StableKey};
use common::{at, case, quick_timeouts, Sources};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn ids(names: &[&str]) -> Vec<SourceId> {
    names.iter().map(|n| SourceId::from(*n)).collect()
}

fn witness_statement_sources() -> Sources {
    let sources = Sources::new();
    sources.snapshot.set(
        EntityKind::Document,
        vec![sources
            .snapshot
            .record()
            .with_natural_key("witness_smith.pdf")
            .with_field("title", "Witness Statement")],
    );
    sources.durable.set(
        EntityKind::Document,
        vec![sources
            .durable
            .record()
            .with_external_id("doc_1")
            .with_natural_key("witness_smith.pdf")
            .with_field("notes", "reviewed")],
    );
    sources.cache.set(
        EntityKind::Document,
        vec![sources
            .cache
            .record()
            .with_natural_key("witness_smith.pdf")
            .with_field("page_refs", "p.1-3")],
    );
    sources
}

#[tokio::test]
async fn three_sources_collapse_into_one_document() {
    let sources = witness_statement_sources();
    let repo = sources.repository(RepositoryConfig::default());

    let outcome = repo.reconcile(&case(), EntityKind::Document).await;
    assert!(outcome.fully_reconciled);
    assert_eq!(outcome.records, 1);

    let snapshot = repo.snapshot(&case(), EntityKind::Document);
    assert_eq!(snapshot.len(), 1);
    let record = &snapshot[0];
    assert_eq!(record.stable_key, StableKey::external("doc_1"));
    assert_eq!(record.text("title"), Some("Witness Statement"));
    assert_eq!(record.text("notes"), Some("reviewed"));
    assert_eq!(record.text("page_refs"), Some("p.1-3"));
    assert_eq!(record.provenance, ids(&["snapshot", "durable", "cache"]));
}

#[tokio::test]
async fn higher_priority_source_wins_even_when_older() {
    let sources = Sources::new();
    sources.snapshot.set(
        EntityKind::Person,
        vec![sources
            .snapshot
            .record()
            .with_natural_key("Jane Roe")
            .with_field("role", "claimant")
            .with_last_updated(at(0))],
    );
    sources.cache.set(
        EntityKind::Person,
        vec![sources
            .cache
            .record()
            .with_natural_key("jane  roe")
            .with_field("role", "witness")
            .with_field("phone", "555-0100")
            .with_last_updated(at(3600))],
    );
    let repo = sources.repository(RepositoryConfig::default());

    repo.reconcile(&case(), EntityKind::Person).await;

    let snapshot = repo.snapshot(&case(), EntityKind::Person);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text("role"), Some("claimant"));
    assert_eq!(snapshot[0].text("phone"), Some("555-0100"));
}

#[tokio::test]
async fn distinct_natural_keys_stay_separate() {
    let sources = Sources::new();
    sources.durable.set(
        EntityKind::Issue,
        vec![
            sources.durable.record().with_natural_key("Duty of care"),
            sources.durable.record().with_natural_key("Causation"),
        ],
    );
    let repo = sources.repository(RepositoryConfig::default());

    repo.reconcile(&case(), EntityKind::Issue).await;

    let keys: Vec<String> = repo
        .snapshot(&case(), EntityKind::Issue)
        .iter()
        .map(|r| r.stable_key.to_string())
        .collect();
    assert_eq!(keys, vec!["causation".to_string(), "duty of care".to_string()]);
}

#[tokio::test]
async fn slow_source_degrades_the_pass_then_recovers() {
    let sources = witness_statement_sources();
    sources.cache.delay_by(Some(Duration::from_secs(10)));
    let repo = sources.repository(quick_timeouts());

    let outcome = repo.reconcile(&case(), EntityKind::Document).await;
    assert!(!outcome.fully_reconciled);
    assert_eq!(outcome.unavailable.len(), 1);
    assert_eq!(outcome.unavailable[0].source_id, SourceId::from("cache"));
    assert_eq!(
        repo.state(&case(), EntityKind::Document),
        SlotState::Degraded {
            unavailable: ids(&["cache"])
        }
    );

    let record = repo
        .get(&case(), EntityKind::Document, &StableKey::external("doc_1"))
        .unwrap();
    assert_eq!(record.text("title"), Some("Witness Statement"));
    assert_eq!(record.text("notes"), Some("reviewed"));
    assert!(record.field("page_refs").is_none());

    sources.cache.delay_by(None);
    let outcome = repo.reconcile(&case(), EntityKind::Document).await;
    assert!(outcome.fully_reconciled);
    assert_eq!(repo.state(&case(), EntityKind::Document), SlotState::Ready);

    let record = repo
        .get(&case(), EntityKind::Document, &StableKey::external("doc_1"))
        .unwrap();
    assert_eq!(record.text("page_refs"), Some("p.1-3"));
    assert_eq!(record.provenance, ids(&["snapshot", "durable", "cache"]));
}

#[tokio::test]
async fn failed_source_keeps_what_it_contributed_before() {
    let sources = witness_statement_sources();
    let repo = sources.repository(RepositoryConfig::default());
    repo.reconcile(&case(), EntityKind::Document).await;

    sources
        .durable
        .fail_with(Some(SourceError::Unavailable("database locked".into())));
    let outcome = repo.reconcile(&case(), EntityKind::Document).await;

    assert!(!outcome.fully_reconciled);
    let snapshot = repo.snapshot(&case(), EntityKind::Document);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text("notes"), Some("reviewed"));
}

#[tokio::test]
async fn failed_source_keeps_precedence_over_lower_sources() {
    let sources = Sources::new();
    sources.snapshot.set(
        EntityKind::Document,
        vec![sources
            .snapshot
            .record()
            .with_natural_key("smith.pdf")
            .with_field("name", "Smith Statement")],
    );
    sources.cache.set(
        EntityKind::Document,
        vec![sources
            .cache
            .record()
            .with_natural_key("smith.pdf")
            .with_field("name", "Smith")],
    );
    let repo = sources.repository(RepositoryConfig::default());
    repo.reconcile(&case(), EntityKind::Document).await;

    sources
        .snapshot
        .fail_with(Some(SourceError::Unavailable("export missing".into())));
    let outcome = repo.reconcile(&case(), EntityKind::Document).await;

    assert!(!outcome.fully_reconciled);
    let snapshot = repo.snapshot(&case(), EntityKind::Document);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].text("name"), Some("Smith Statement"));

    sources.snapshot.fail_with(None);
    repo.reconcile(&case(), EntityKind::Document).await;
    let record = repo
        .get(&case(), EntityKind::Document, &StableKey::natural("smithpdf"))
        .unwrap();
    assert_eq!(record.text("name"), Some("Smith Statement"));
}

#[tokio::test]
async fn overlapping_reconciles_commit_in_call_order() {
    let sources = Sources::new();
    sources.durable.set(
        EntityKind::Issue,
        vec![sources
            .durable
            .record()
            .with_natural_key("Duty of care")
            .with_field("status", "v1")],
    );
    sources.durable.delay_by(Some(Duration::from_millis(200)));
    let repo = sources.repository(RepositoryConfig::default());

    let first = tokio::spawn({
        let repo = Arc::clone(&repo);
        async move {
            let outcome = repo.reconcile(&case(), EntityKind::Issue).await;
            outcome
        }
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    sources.durable.set(
        EntityKind::Issue,
        vec![sources
            .durable
            .record()
            .with_natural_key("Duty of care")
            .with_field("status", "v2")],
    );
    sources.durable.delay_by(None);
    let second = repo.reconcile(&case(), EntityKind::Issue).await;
    let first = first.await.unwrap();

    assert!(first.fully_reconciled);
    assert!(second.fully_reconciled);
    let record = repo
        .get(&case(), EntityKind::Issue, &StableKey::natural("duty of care"))
        .unwrap();
    assert_eq!(record.text("status"), Some("v2"));
}

#[tokio::test]
async fn reconcile_is_idempotent() {
    let sources = witness_statement_sources();
    let repo = sources.repository(RepositoryConfig::default());

    let first = repo.reconcile(&case(), EntityKind::Document).await;
    let before = repo.snapshot(&case(), EntityKind::Document).to_vec();
    let second = repo.reconcile(&case(), EntityKind::Document).await;
    let after = repo.snapshot(&case(), EntityKind::Document).to_vec();

    assert_eq!(first.changed, 1);
    assert_eq!(second.changed, 0);
    assert_eq!(before, after);
    assert_eq!(
        serde_json::to_string(&before).unwrap(),
        serde_json::to_string(&after).unwrap()
    );
}

#[tokio::test]
async fn set_fields_only_grow() {
    let sources = Sources::new();
    sources.durable.set(
        EntityKind::Person,
        vec![sources
            .durable
            .record()
            .with_natural_key("John Smith")
            .with_field("tags", serde_json::json!(["witness"]))],
    );
    sources.cache.set(
        EntityKind::Person,
        vec![sources
            .cache
            .record()
            .with_natural_key("John Smith")
            .with_field("tags", serde_json::json!(["expert", "witness"]))],
    );
    let repo = sources.repository(RepositoryConfig::default());
    repo.reconcile(&case(), EntityKind::Person).await;

    sources.cache.set(EntityKind::Person, vec![]);
    repo.reconcile(&case(), EntityKind::Person).await;

    let record = repo
        .get(&case(), EntityKind::Person, &StableKey::natural("john smith"))
        .unwrap();
    assert_eq!(
        record.members("tags"),
        &[
            FieldValue::Text("witness".into()),
            FieldValue::Text("expert".into())
        ]
    );
}

#[tokio::test]
async fn discovered_external_id_folds_earlier_natural_record() {
    let sources = Sources::new();
    sources.cache.set(
        EntityKind::Document,
        vec![sources
            .cache
            .record()
            .with_natural_key("expert_report.pdf")
            .with_field("page_refs", "p.4")],
    );
    let repo = sources.repository(RepositoryConfig::default());
    repo.reconcile(&case(), EntityKind::Document).await;
    assert!(repo
        .get(&case(), EntityKind::Document, &StableKey::natural("expertreportpdf"))
        .is_some());

    sources.durable.set(
        EntityKind::Document,
        vec![sources
            .durable
            .record()
            .with_external_id("doc_9")
            .with_natural_key("expert_report.pdf")
            .with_field("notes", "draft")],
    );
    repo.reconcile(&case(), EntityKind::Document).await;

    let snapshot = repo.snapshot(&case(), EntityKind::Document);
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].stable_key, StableKey::external("doc_9"));
    assert_eq!(snapshot[0].text("page_refs"), Some("p.4"));
    assert_eq!(snapshot[0].text("notes"), Some("draft"));
}

#[tokio::test]
async fn reconcile_notifies_subscribers_with_snapshot() {
    let sources = witness_statement_sources();
    let repo = sources.repository(RepositoryConfig::default());

    let seen: Arc<Mutex<Vec<(usize, bool)>>> = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    let _sub = repo.subscribe(&case(), EntityKind::Document, move |event| {
        if let RepositoryEvent::Reconciled {
            snapshot,
            fully_reconciled,
            ..
        } = event
        {
            s.lock().unwrap().push((snapshot.len(), *fully_reconciled));
        }
    });

    repo.reconcile(&case(), EntityKind::Document).await;
    repo.reconcile(&case(), EntityKind::Person).await;

    assert_eq!(*seen.lock().unwrap(), vec![(1, true)]);
}

#[tokio::test]
async fn adapters_are_queried_concurrently() {
    let sources = witness_statement_sources();
    sources.snapshot.delay_by(Some(Duration::from_millis(150)));
    sources.durable.delay_by(Some(Duration::from_millis(150)));
    sources.cache.delay_by(Some(Duration::from_millis(150)));
    let repo = sources.repository(RepositoryConfig {
        adapter_timeout_ms: 400,
        ..RepositoryConfig::default()
    });

    let outcome = repo.reconcile(&case(), EntityKind::Document).await;

    assert!(outcome.fully_reconciled);
    assert_eq!(sources.snapshot.calls(), 1);
    assert_eq!(sources.durable.calls(), 1);
    assert_eq!(sources.cache.calls(), 1);
}
