//! casesync CLI: reconcile case records across stores.
//!
//! Usage:
//!   casesync reconcile --case <id> [--kind <kind>] [source flags]
//!   casesync replay --case <id> --events <file.jsonl> [source flags]
//!   casesync import --file <records.json> [--db path]
//!   casesync retract --case <id> --kind <kind> --record-id <id> [--db path]

use casesync::{
    CanonicalRepository, CaseId, CaseSession, DurableRecord, DurableStoreAdapter,
    EmbeddedCacheAdapter, EngineConfig, EntityKind, EntitySyncBus, SnapshotImporter, SyncEvent,
};
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "casesync",
    version,
    about = "Multi-source record reconciliation for case management"
)]
struct Cli {
    /// Path to a YAML config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct SourceArgs {
    /// Path to the durable SQLite store
    #[arg(long)]
    db: Option<PathBuf>,
    /// Root directory of case snapshots
    #[arg(long)]
    snapshots: Option<PathBuf>,
    /// JSON file to seed the embedded cache from
    #[arg(long)]
    cache: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile a case and print the canonical view
    Reconcile {
        /// Case id
        #[arg(long)]
        case: String,
        /// Only this kind (default: every kind)
        #[arg(long)]
        kind: Option<EntityKind>,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Reconcile, replay a JSON-lines file of sync events, print the converged view
    Replay {
        #[arg(long)]
        case: String,
        /// JSON-lines file, one sync event per line
        #[arg(long)]
        events: PathBuf,
        #[command(flatten)]
        sources: SourceArgs,
    },
    /// Write records from a JSON file into the durable store
    Import {
        /// JSON array of durable records
        #[arg(long)]
        file: PathBuf,
        /// Path to the durable SQLite store
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Delete one record from the durable store
    Retract {
        #[arg(long)]
        case: String,
        #[arg(long)]
        kind: EntityKind,
        #[arg(long)]
        record_id: String,
        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Get the default database path (~/.local/share/casesync/casesync.db)
fn default_db_path() -> PathBuf {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| dirs::home_dir().unwrap_or_default().join(".local/share"));
    data_dir.join("casesync").join("casesync.db")
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("casesync=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_repository(config: &EngineConfig, sources: &SourceArgs) -> Result<CanonicalRepository, String> {
    let mut builder = CanonicalRepository::builder()
        .config(config.repository.clone())
        .merge_policy(config.merge.clone());

    if let Some(root) = &sources.snapshots {
        builder = builder.adapter(SnapshotImporter::new(root));
    }

    let db_path = sources.db.clone().unwrap_or_else(default_db_path);
    let store = DurableStoreAdapter::open(&db_path)
        .map_err(|e| format!("failed to open database at {}: {}", db_path.display(), e))?;
    builder = builder.adapter(store);

    if let Some(path) = &sources.cache {
        let cache = EmbeddedCacheAdapter::new();
        cache
            .load_json(path)
            .map_err(|e| format!("failed to load cache file {}: {}", path.display(), e))?;
        builder = builder.adapter(cache);
    }

    builder.build().map_err(|e| e.to_string())
}

fn print_json(value: &serde_json::Value) -> i32 {
    match serde_json::to_string_pretty(value) {
        Ok(out) => {
            println!("{}", out);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn view_json(repo: &CanonicalRepository, case: &CaseId, kinds: &[EntityKind]) -> serde_json::Value {
    let mut view = serde_json::Map::new();
    for kind in kinds {
        view.insert(
            kind.as_str().to_string(),
            json!({
                "state": repo.state(case, *kind),
                "records": repo.snapshot(case, *kind).to_vec(),
            }),
        );
    }
    serde_json::Value::Object(view)
}

async fn cmd_reconcile(config: EngineConfig, case: String, kind: Option<EntityKind>, sources: SourceArgs) -> i32 {
    let repo = match build_repository(&config, &sources) {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let case = CaseId::from(case);
    let kinds: Vec<EntityKind> = match kind {
        Some(kind) => vec![kind],
        None => EntityKind::ALL.to_vec(),
    };

    let mut outcomes = Vec::with_capacity(kinds.len());
    for kind in &kinds {
        outcomes.push(repo.reconcile(&case, *kind).await);
    }

    print_json(&json!({
        "case_id": case,
        "outcomes": outcomes,
        "view": view_json(&repo, &case, &kinds),
    }))
}

async fn cmd_replay(config: EngineConfig, case: String, events: &Path, sources: SourceArgs) -> i32 {
    let repo = match build_repository(&config, &sources) {
        Ok(repo) => Arc::new(repo),
        Err(e) => {
            eprintln!("Error: {}", e);
            return 1;
        }
    };
    let raw = match tokio::fs::read_to_string(events).await {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", events.display(), e);
            return 1;
        }
    };

    let bus = EntitySyncBus::new();
    let session = CaseSession::open(case.as_str(), Arc::clone(&repo), bus.clone(), &config.repository);
    let outcomes = session.reconcile_all().await;

    let mut published = 0usize;
    let mut rejected = 0usize;
    for (line_no, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let event: SyncEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = line_no + 1, error = %e, "skipping unparseable event");
                rejected += 1;
                continue;
            }
        };
        match session.publish(event) {
            Ok(_) => published += 1,
            Err(_) => rejected += 1,
        }
    }
    bus.drain().await;

    let case_id = session.case_id().clone();
    let output = json!({
        "case_id": case_id,
        "outcomes": outcomes,
        "published": published,
        "rejected": rejected,
        "view": view_json(&repo, &case_id, &EntityKind::ALL),
    });
    drop(session);
    print_json(&output)
}

fn cmd_import(file: &Path, db: Option<PathBuf>) -> i32 {
    let raw = match std::fs::read_to_string(file) {
        Ok(raw) => raw,
        Err(e) => {
            eprintln!("Error: failed to read {}: {}", file.display(), e);
            return 1;
        }
    };
    let records: Vec<DurableRecord> = match serde_json::from_str(&raw) {
        Ok(records) => records,
        Err(e) => {
            eprintln!("Error: invalid record file: {}", e);
            return 1;
        }
    };

    let db_path = db.unwrap_or_else(default_db_path);
    let store = match DurableStoreAdapter::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database at {}: {}", db_path.display(), e);
            return 1;
        }
    };

    for record in &records {
        if let Err(e) = store.put_record(record) {
            eprintln!("Error: failed to write record '{}': {}", record.record_id, e);
            return 1;
        }
    }
    println!("Imported {} record(s) into {}", records.len(), db_path.display());
    0
}

fn cmd_retract(case: String, kind: EntityKind, record_id: &str, db: Option<PathBuf>) -> i32 {
    let db_path = db.unwrap_or_else(default_db_path);
    let store = match DurableStoreAdapter::open(&db_path) {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Error: failed to open database at {}: {}", db_path.display(), e);
            return 1;
        }
    };
    match store.retract_record(&CaseId::from(case), kind, record_id) {
        Ok(true) => {
            println!("Retracted record '{}'", record_id);
            0
        }
        Ok(false) => {
            eprintln!("Warning: record '{}' not found", record_id);
            1
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn run_async<F>(fut: F) -> i32
where
    F: std::future::Future<Output = i32>,
{
    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to create tokio runtime: {}", e);
            return 1;
        }
    };
    rt.block_on(fut)
}

fn main() {
    let cli = Cli::parse();
    init_logging();

    let config = match EngineConfig::load_or_default(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let code = match cli.command {
        Commands::Reconcile { case, kind, sources } => run_async(cmd_reconcile(config, case, kind, sources)),
        Commands::Replay {
            case,
            events,
            sources,
        } => run_async(cmd_replay(config, case, &events, sources)),
        Commands::Import { file, db } => cmd_import(&file, db),
        Commands::Retract {
            case,
            kind,
            record_id,
            db,
        } => cmd_retract(case, kind, &record_id, db),
    };
    std::process::exit(code);
}
