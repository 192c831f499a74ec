//! Shared fixtures: in-memory storage and recording collaborators.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;

use hg_bot::analytics::AnalyticsSink;
use hg_bot::bot::{Bot, BotRegistry, Router, User, UserResolver};
use hg_bot::dialog::DialogStore;
use hg_bot::event::{EventKind, RawEvent};
use hg_bot::nlu::{NluClient, NluError, NluResponse};
use hg_bot::queue::{EventQueue, QueueKey};
use hg_bot::request::{Parameters, Request};
use hg_bot::worker::{DrainJob, DrainWorker};

pub const BOT_ID: &str = "NewsBot";
pub const NAMESPACE: &str = "news_bots";

pub async fn fresh_pool() -> SqlitePool {
    let opts = SqliteConnectOptions::new()
        .filename(":memory:")
        .create_if_missing(true);
    // In-memory databases are per-connection.
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await
        .expect("in-memory pool should connect");
    hg_bot::db::migrate(&pool)
        .await
        .expect("schema should apply");
    pool
}

pub fn event(value: Value) -> RawEvent {
    serde_json::from_value(value).expect("event should deserialize")
}

pub fn text_event(user: &str, mid: &str, text: &str) -> RawEvent {
    event(json!({
        "sender": {"id": user},
        "recipient": {"id": "page"},
        "timestamp": 1_500_000_000_000_i64,
        "message": {"mid": mid, "text": text},
    }))
}

pub fn quick_reply_event(user: &str, mid: &str, payload: Value) -> RawEvent {
    event(json!({
        "sender": {"id": user},
        "recipient": {"id": "page"},
        "message": {
            "mid": mid,
            "text": "tap",
            "quick_reply": {"payload": payload.to_string()},
        },
    }))
}

pub fn postback_event(user: &str, payload: Value) -> RawEvent {
    event(json!({
        "sender": {"id": user},
        "recipient": {"id": "page"},
        "postback": {"title": "Button", "payload": payload},
    }))
}

pub fn user(platform_id: &str) -> User {
    User {
        platform_id: platform_id.to_owned(),
        namespace: NAMESPACE.to_owned(),
        nlu_session_id: format!("session-{platform_id}"),
    }
}

pub fn job(user_id: &str, kind: EventKind) -> DrainJob {
    DrainJob {
        user_id: user_id.to_owned(),
        bot_id: BOT_ID.to_owned(),
        kind,
    }
}

pub fn key(user_id: &str, kind: EventKind) -> QueueKey {
    QueueKey::new(NAMESPACE, user_id, kind)
}

// ---------------------------------------------------------------------------
// Recording collaborators
// ---------------------------------------------------------------------------

/// Records every handled request; optionally fails the first `failures` calls.
#[derive(Default)]
pub struct RecordingRouter {
    pub requests: Arc<Mutex<Vec<Request>>>,
    failures: AtomicU32,
}

impl RecordingRouter {
    pub fn failing(failures: u32) -> Self {
        Self {
            requests: Arc::default(),
            failures: AtomicU32::new(failures),
        }
    }

    pub fn handled(&self) -> Vec<Request> {
        self.requests.lock().expect("router lock").clone()
    }
}

#[async_trait]
impl Router for RecordingRouter {
    async fn handle(&self, request: Request) -> anyhow::Result<()> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures
                .store(remaining.saturating_sub(1), Ordering::SeqCst);
            anyhow::bail!("router unavailable");
        }
        self.requests.lock().expect("router lock").push(request);
        Ok(())
    }
}

/// Resolves every platform id to a fixed session, recording lookups.
#[derive(Default)]
pub struct StaticUsers {
    pub lookups: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl UserResolver for StaticUsers {
    async fn resolve(&self, platform_id: &str) -> anyhow::Result<User> {
        self.lookups
            .lock()
            .expect("users lock")
            .push(platform_id.to_owned());
        Ok(user(platform_id))
    }
}

/// Answers queries from a text-keyed script; unknown text is an error.
#[derive(Default)]
pub struct ScriptedNlu {
    script: HashMap<String, NluResponse>,
    latency: Option<Duration>,
    pub queries: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedNlu {
    /// Sleep this long before every answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn answer(mut self, text: &str, response: NluResponse) -> Self {
        self.script.insert(text.to_owned(), response);
        self
    }

    pub fn queried(&self) -> Vec<(String, String)> {
        self.queries.lock().expect("nlu lock").clone()
    }
}

#[async_trait]
impl NluClient for ScriptedNlu {
    async fn query(&self, session_id: &str, text: &str) -> Result<NluResponse, NluError> {
        self.queries
            .lock()
            .expect("nlu lock")
            .push((session_id.to_owned(), text.to_owned()));
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.script
            .get(text)
            .cloned()
            .ok_or_else(|| NluError::Parse(format!("no scripted answer for {text:?}")))
    }
}

pub fn nlu_response(intent: Option<&str>, action: Option<&str>, parameters: Value) -> NluResponse {
    let raw = json!({
        "metadata": {"intentName": intent},
        "action": action,
        "parameters": parameters.clone(),
    });
    let parameters: Parameters =
        serde_json::from_value(parameters).expect("parameters should be an object");
    NluResponse {
        intent: intent.map(str::to_owned),
        action: action.map(str::to_owned),
        parameters,
        raw,
    }
}

/// Records every inbound event reported.
#[derive(Default)]
pub struct RecordingAnalytics {
    pub events: Arc<Mutex<Vec<(EventKind, String)>>>,
}

impl AnalyticsSink for RecordingAnalytics {
    fn record_inbound(&self, kind: EventKind, event: &RawEvent) {
        self.events
            .lock()
            .expect("analytics lock")
            .push((kind, event.sender_id().to_owned()));
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A worker wired to recording collaborators over one in-memory database.
pub struct Harness {
    pub pool: SqlitePool,
    pub queue: EventQueue,
    pub dialogs: DialogStore,
    pub router: Arc<RecordingRouter>,
    pub users: Arc<StaticUsers>,
    pub nlu: Arc<ScriptedNlu>,
    pub bots: Arc<BotRegistry>,
}

impl Harness {
    pub async fn new(nlu: ScriptedNlu) -> Self {
        Self::with_router(nlu, RecordingRouter::default()).await
    }

    pub async fn with_router(nlu: ScriptedNlu, router: RecordingRouter) -> Self {
        let pool = fresh_pool().await;
        let router = Arc::new(router);
        let users = Arc::new(StaticUsers::default());
        let mut registry = BotRegistry::new();
        registry
            .register(Bot::new(BOT_ID, router.clone(), users.clone()))
            .expect("bot should register");
        Self {
            queue: EventQueue::new(pool.clone()),
            dialogs: DialogStore::new(pool.clone()),
            pool,
            router,
            users,
            nlu: Arc::new(nlu),
            bots: Arc::new(registry),
        }
    }

    /// A fresh worker over the shared storage, with its own key gate.
    /// Workers from one harness share drain leases through the database.
    pub fn worker(&self) -> DrainWorker {
        DrainWorker::new(
            self.queue.clone(),
            self.dialogs.clone(),
            Arc::clone(&self.bots),
            self.nlu.clone(),
        )
    }

    pub async fn push(&self, user_id: &str, kind: EventKind, event: &RawEvent) {
        self.queue
            .push(&key(user_id, kind), event)
            .await
            .expect("push should succeed");
    }
}
