//! `hg` CLI entry point.
//!
//! Provides `enqueue`, `drain` and `depth` subcommands for feeding raw
//! events into a user's queue, forcing a drain, and inspecting queue depth.
//! Dispatched requests are written to stdout as JSON lines.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{debug, info};

use hg_bot::analytics::ChatbaseClient;
use hg_bot::bot::{namespace_for, Bot, BotRegistry, JsonLinesRouter, Router, UserDirectory};
use hg_bot::config::{config_dir, load_config, Config};
use hg_bot::dialog::DialogStore;
use hg_bot::event::{EventKind, RawEvent};
use hg_bot::ingest::Ingestor;
use hg_bot::nlu::api_ai::ApiAiClient;
use hg_bot::queue::{EventQueue, QueueKey};
use hg_bot::worker::{DrainJob, DrainReport, DrainWorker, Scheduler};

/// hg: drain per-user Messenger event queues into bot routers.
#[derive(Parser)]
#[command(name = "hg", version, about)]
struct Cli {
    /// Config file. Defaults to `~/.hg/config.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Queue a raw event from a JSON file (`-` for stdin) and drain it.
    Enqueue {
        /// Registry id of the bot.
        #[arg(long)]
        bot: String,
        /// Queue kind: `message` or `postback`.
        #[arg(long, value_parser = EventKind::parse)]
        kind: EventKind,
        /// Path to the event JSON.
        file: PathBuf,
    },
    /// Drain one user's queue now.
    Drain {
        /// Registry id of the bot.
        #[arg(long)]
        bot: String,
        /// Platform user id.
        #[arg(long)]
        user: String,
        /// Queue kind: `message` or `postback`.
        #[arg(long, value_parser = EventKind::parse)]
        kind: EventKind,
    },
    /// Print how many events are waiting in one user's queue.
    Depth {
        /// Registry id of the bot.
        #[arg(long)]
        bot: String,
        /// Platform user id.
        #[arg(long)]
        user: String,
        /// Queue kind: `message` or `postback`.
        #[arg(long, value_parser = EventKind::parse)]
        kind: EventKind,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_dir()?.join("config.toml"),
    };
    load_env(&config_path);

    let config = load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path.display()))?;

    let _logging_guard = hg_bot::logging::init(config.logging.dir.as_deref())?;

    let db_path = config.database_path()?;
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db = hg_bot::db::open(&db_path)
        .await
        .with_context(|| format!("failed to open database {}", db_path.display()))?;
    debug!(path = %db_path.display(), "database opened");

    match cli.command {
        Command::Enqueue { bot, kind, file } => handle_enqueue(&config, db, &bot, kind, &file).await,
        Command::Drain { bot, user, kind } => handle_drain(&config, db, &bot, &user, kind).await,
        Command::Depth { bot, user, kind } => handle_depth(&config, db, &bot, &user, kind).await,
    }
}

/// Load `.env` files: next to the config first, then the working directory.
/// Variables already set are never overridden.
fn load_env(config_path: &Path) {
    if let Some(dir) = config_path.parent() {
        let _ = dotenvy::from_path(dir.join(".env"));
    }
    let _ = dotenvy::dotenv();
}

/// Build the registry of configured bots, each routing to stdout.
fn build_registry(config: &Config, db: &sqlx::SqlitePool) -> anyhow::Result<Arc<BotRegistry>> {
    let router: Arc<dyn Router> = Arc::new(JsonLinesRouter::new(tokio::io::stdout()));
    let mut registry = BotRegistry::new();
    for entry in &config.bots {
        let namespace = entry
            .namespace
            .clone()
            .unwrap_or_else(|| namespace_for(&entry.id));
        let users = Arc::new(UserDirectory::new(db.clone(), namespace.as_str()));
        let mut bot = Bot::new(entry.id.as_str(), Arc::clone(&router), users).with_namespace(namespace);
        if let Some(token) = entry.access_token() {
            bot = bot.with_access_token(token);
        }
        registry.register(bot)?;
    }
    Ok(Arc::new(registry))
}

/// Wire storage, NLU and analytics into a scheduler.
fn build_scheduler(
    config: &Config,
    db: &sqlx::SqlitePool,
    bots: Arc<BotRegistry>,
) -> anyhow::Result<Scheduler> {
    let nlu = ApiAiClient::new(
        &config.nlu.base_url,
        config.nlu.token()?,
        config.nlu.language.clone(),
        config.nlu.timeout(),
    )
    .context("failed to create NLU client")?;

    let mut worker = DrainWorker::new(
        EventQueue::new(db.clone()),
        DialogStore::new(db.clone()),
        bots,
        Arc::new(nlu),
    )
    .with_lease_settings(config.worker.lease_settings());
    if let Some(api_key) = config.analytics.api_key() {
        info!(base_url = %config.analytics.base_url, "analytics enabled");
        worker = worker.with_analytics(Arc::new(ChatbaseClient::new(
            &config.analytics.base_url,
            api_key,
            config.analytics.bot_version.clone(),
        )));
    }

    Ok(Scheduler::new(Arc::new(worker), config.worker.retry_policy()))
}

async fn handle_enqueue(
    config: &Config,
    db: sqlx::SqlitePool,
    bot_id: &str,
    kind: EventKind,
    file: &Path,
) -> anyhow::Result<()> {
    let raw = if file == Path::new("-") {
        std::io::read_to_string(std::io::stdin()).context("failed to read stdin")?
    } else {
        std::fs::read_to_string(file)
            .with_context(|| format!("failed to read {}", file.display()))?
    };
    let event: RawEvent = serde_json::from_str(&raw).context("event is not a valid raw event")?;

    let bots = build_registry(config, &db)?;
    let scheduler = build_scheduler(config, &db, Arc::clone(&bots))?;
    let ingestor = Ingestor::new(EventQueue::new(db), bots, scheduler);

    let handle = ingestor.enqueue(bot_id, kind, &event).await?;
    let report = handle.await.context("drain task panicked")??;
    log_report(&report);
    Ok(())
}

async fn handle_drain(
    config: &Config,
    db: sqlx::SqlitePool,
    bot_id: &str,
    user_id: &str,
    kind: EventKind,
) -> anyhow::Result<()> {
    let bots = build_registry(config, &db)?;
    let job = DrainJob {
        user_id: user_id.to_owned(),
        bot_id: bots.get(bot_id)?.id().to_owned(),
        kind,
    };
    let scheduler = build_scheduler(config, &db, Arc::clone(&bots))?;
    let report = scheduler.run(&job).await?;
    log_report(&report);
    Ok(())
}

async fn handle_depth(
    config: &Config,
    db: sqlx::SqlitePool,
    bot_id: &str,
    user_id: &str,
    kind: EventKind,
) -> anyhow::Result<()> {
    let bots = build_registry(config, &db)?;
    let bot = bots.get(bot_id)?;
    let key = QueueKey::new(bot.namespace(), user_id, kind);
    let depth = EventQueue::new(db).depth(&key).await?;
    println!("{depth}");
    Ok(())
}

fn log_report(report: &DrainReport) {
    info!(
        popped = report.popped,
        dispatched = report.dispatched,
        dropped = report.dropped,
        "drain finished"
    );
}
