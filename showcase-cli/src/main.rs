//! Showcase sync daemon
//!
//! Keeps a local copy of the showcase tables fresh without a browser:
//! 1. Caches every table and revalidates it on backend changes
//! 2. Persists queued mutations, version history and the offline log in
//!    SQLite so they survive restarts
//!
//! Usage:
//!   showcase-sync --config sync.json --database showcase.db
//!
//! `SHOWCASE_REMOTE_URL` and `SHOWCASE_REMOTE_KEY` override the backend
//! settings of the config file.

use std::{path::PathBuf, sync::Arc};
use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use showcase_storage::{MemoryStore, SqliteStore};
use showcase_sync::remote::{Record, RemoteRequestProcessor};
use showcase_sync::{
    BroadcastHub, Collaborators, FetchFn, HttpProbe, RemoteSource, RestRemote, Subscription,
    SyncConfig, SyncContext, SyncOptions, fetch_fn,
};
use showcase_types::{EntityKind, SystemClock};
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser, Debug)]
#[command(name = "showcase-sync")]
#[command(about = "Headless sync daemon for the project showcase")]
struct Args {
    /// Path to a JSON sync configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the durable SQLite store
    #[arg(short, long, default_value = "showcase-sync.db")]
    database: PathBuf,

    /// Tables to sync, comma separated (default: all)
    #[arg(short, long, value_delimiter = ',')]
    tables: Vec<String>,

    /// Enable verbose debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    info!("Showcase sync starting...");
    let config = load_config(&args)?;
    let kinds = parse_tables(&args.tables)?;

    let durable = SqliteStore::open(&args.database)
        .with_context(|| format!("Failed to open {}", args.database.display()))?;
    let remote = Arc::new(
        RestRemote::new(config.remote.clone()).context("Failed to create REST client")?,
    );
    let processor = Arc::new(RemoteRequestProcessor::new(remote.clone()));
    let probe = HttpProbe::from_config(&config.connection)
        .context("Failed to create connectivity probe")?;
    let base_url = config.remote.base_url.clone();

    let context = SyncContext::new(
        config,
        Collaborators {
            session_store: Arc::new(MemoryStore::new()),
            durable_store: Arc::new(durable),
            hub: BroadcastHub::default(),
            probe: Arc::new(probe),
            processor: processor.clone(),
            task_handler: processor,
            clock: Arc::new(SystemClock),
        },
    );
    context.start();

    let mut subscriptions = Vec::new();
    for kind in &kinds {
        subscriptions.push(report_status(&context, *kind));
        let options = SyncOptions::from_config(&context.config().orchestrator)
            .entity_type(kind.record_type());
        let handle = context
            .register_sync(kind.table(), table_fetch(remote.clone(), *kind), options)
            .await;
        if let Some(Value::Array(rows)) = handle.data() {
            info!("Loaded {} {kind} rows", rows.len());
        }
        if let Err(e) = context.watch_remote(remote.clone(), *kind, kind.table()).await {
            warn!("Not following {kind} changes: {e}");
        }
    }

    println!("\n========================================");
    println!("  Showcase Sync Running");
    println!("========================================");
    println!("  Backend:   {}", base_url);
    println!("  Database:  {}", args.database.display());
    println!(
        "  Tables:    {}",
        kinds.iter().map(EntityKind::table).collect::<Vec<_>>().join(", ")
    );
    println!("========================================\n");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    for subscription in subscriptions {
        subscription.unsubscribe();
    }
    context.shutdown();
    Ok(())
}

fn load_config(args: &Args) -> Result<SyncConfig> {
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => SyncConfig::default(),
    };
    if let Ok(url) = std::env::var("SHOWCASE_REMOTE_URL") {
        config.remote.base_url = url;
    }
    if let Ok(key) = std::env::var("SHOWCASE_REMOTE_KEY") {
        config.remote.api_key = key;
    }
    if config.remote.api_key.is_empty() {
        warn!("No API key configured, requests will be anonymous");
    }
    Ok(config)
}

fn parse_tables(tables: &[String]) -> Result<Vec<EntityKind>> {
    if tables.is_empty() {
        return Ok(EntityKind::ALL.to_vec());
    }
    tables
        .iter()
        .map(|t| t.trim().parse::<EntityKind>().with_context(|| format!("Unknown table {t}")))
        .collect()
}

/// Fetches a whole table as one JSON array.
fn table_fetch(remote: Arc<RestRemote>, kind: EntityKind) -> FetchFn {
    fetch_fn(move || {
        let remote = remote.clone();
        async move {
            let rows = remote.fetch_all(kind, None).await?;
            Ok(Value::Array(rows.iter().map(Record::to_value).collect()))
        }
    })
}

fn report_status(context: &SyncContext, kind: EntityKind) -> Subscription {
    context.status().subscribe(kind.table(), move |status| {
        if let Some(error) = &status.error {
            warn!("{kind} sync failed: {error}");
        } else if let Some(last) = status.last_sync.filter(|_| !status.in_progress) {
            info!("{kind} synced at {last}");
        }
    })
}
