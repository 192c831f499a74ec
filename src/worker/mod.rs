//! The drain worker: pop, classify, dispatch, repeat until empty.
//!
//! One invocation drains one `(namespace, user, kind)` queue. The namespace
//! is always the bot's, for the queue, the dialog store and user lookup
//! alike. The invocation holds the key's [`KeyGate`] permit for its whole
//! run, including the drain lease shared with other workers and processes on
//! the same database, so events for a user are dispatched strictly in push
//! order and a redundant invocation that finds the queue already empty is a
//! no-op.
//!
//! Failure policy: NLU failures, unsupported shapes, malformed payloads and
//! undecodable queue entries drop the event and continue. Everything else
//! (bot or user resolution, the drain lease, storage, router) aborts the
//! invocation and is left to the [`Scheduler`]'s retry policy.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

pub mod gate;
pub mod scheduler;

pub use gate::{DrainLeases, GateError, GatePermit, KeyGate, LeaseSettings};
pub use scheduler::{run_with_retry, RetryPolicy, Scheduler};

use crate::analytics::AnalyticsSink;
use crate::bot::{Bot, BotRegistry, RegistryError, User};
use crate::classify::{classify_message, classify_postback, Outcome};
use crate::dialog::{DialogError, DialogStore};
use crate::event::{EventKind, RawEvent};
use crate::nlu::NluClient;
use crate::queue::{EventQueue, QueueError, QueueKey};
use crate::request::Request;

/// One drain invocation's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainJob {
    /// Platform user id.
    pub user_id: String,
    /// Registry id of the bot. Its namespace selects the queue.
    pub bot_id: String,
    /// Which queue to drain.
    pub kind: EventKind,
}

impl DrainJob {
    /// The queue this job drains under `namespace`.
    pub fn key(&self, namespace: &str) -> QueueKey {
        QueueKey::new(namespace, self.user_id.as_str(), self.kind)
    }
}

impl fmt::Display for DrainJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "drain {}:{} for {}", self.user_id, self.kind, self.bot_id)
    }
}

/// What one invocation did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Events removed from the queue.
    pub popped: u32,
    /// Requests handed to the router.
    pub dispatched: u32,
    /// Events that produced no request.
    pub dropped: u32,
}

/// Errors that abort a drain invocation.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The bot id is not registered.
    #[error(transparent)]
    Bot(#[from] RegistryError),

    /// The queue's drain lease could not be taken or was lost.
    #[error(transparent)]
    Gate(#[from] GateError),

    /// The bot's user lookup failed.
    #[error("failed to resolve user {user_id}: {error:#}")]
    User {
        /// Platform user id.
        user_id: String,
        /// Underlying failure.
        error: anyhow::Error,
    },

    /// Queue storage failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Dialog storage failed.
    #[error("dialog store error: {0}")]
    Dialog(#[from] DialogError),

    /// The router rejected a request.
    #[error("router for bot {bot} failed: {error:#}")]
    Router {
        /// Bot id.
        bot: String,
        /// Underlying failure.
        error: anyhow::Error,
    },
}

/// Drains per-user queues into bot routers.
pub struct DrainWorker {
    queue: EventQueue,
    dialogs: DialogStore,
    bots: Arc<BotRegistry>,
    nlu: Arc<dyn NluClient>,
    analytics: Option<Arc<dyn AnalyticsSink>>,
    gate: KeyGate,
}

impl fmt::Debug for DrainWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DrainWorker")
            .field("bots", &self.bots.ids())
            .field("analytics", &self.analytics.is_some())
            .finish_non_exhaustive()
    }
}

impl DrainWorker {
    /// Create a worker with no analytics sink. Drains are leased in the
    /// queue's database with [`LeaseSettings::default`].
    pub fn new(
        queue: EventQueue,
        dialogs: DialogStore,
        bots: Arc<BotRegistry>,
        nlu: Arc<dyn NluClient>,
    ) -> Self {
        let gate = KeyGate::with_leases(DrainLeases::new(
            queue.pool().clone(),
            LeaseSettings::default(),
        ));
        Self {
            queue,
            dialogs,
            bots,
            nlu,
            analytics: None,
            gate,
        }
    }

    /// Use different drain lease timing.
    pub fn with_lease_settings(mut self, settings: LeaseSettings) -> Self {
        self.gate = KeyGate::with_leases(DrainLeases::new(self.queue.pool().clone(), settings));
        self
    }

    /// Report every popped event to `sink`.
    pub fn with_analytics(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.analytics = Some(sink);
        self
    }

    /// Drain the job's queue until it is empty.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] on bot or user resolution, lease, storage or
    /// router failure. Events popped before the failure are not replayed.
    pub async fn perform(&self, job: &DrainJob) -> Result<DrainReport, WorkerError> {
        let bot = self.bots.get(&job.bot_id)?;
        let key = job.key(bot.namespace());
        let permit = self.gate.acquire(&key).await?;
        let result = self.drain(job, &bot, &permit).await;
        permit.release().await;
        result
    }

    async fn drain(
        &self,
        job: &DrainJob,
        bot: &Bot,
        permit: &GatePermit,
    ) -> Result<DrainReport, WorkerError> {
        let key = permit.key();
        let mut report = DrainReport::default();

        loop {
            permit.renew().await?;
            let event = match self.queue.pop(key).await {
                Ok(Some(event)) => event,
                Ok(None) => break,
                Err(QueueError::Corrupt { id, source }) => {
                    warn!(%key, id, error = %source, "dropping undecodable queue entry");
                    report.popped = report.popped.saturating_add(1);
                    report.dropped = report.dropped.saturating_add(1);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            report.popped = report.popped.saturating_add(1);

            let user = bot
                .users()
                .resolve(&job.user_id)
                .await
                .map_err(|error| WorkerError::User {
                    user_id: job.user_id.clone(),
                    error,
                })?;

            if let Some(sink) = &self.analytics {
                sink.record_inbound(job.kind, &event);
            }

            let request = match job.kind {
                EventKind::Message => self.message_request(bot, &user, &event).await?,
                EventKind::Postback => {
                    let outcome = classify_postback(&user, &event);
                    self.resolve(&user, &event, outcome).await
                }
            };

            let Some(request) = request else {
                report.dropped = report.dropped.saturating_add(1);
                continue;
            };

            info!(
                %key,
                intent = %request.intent,
                action = %request.action,
                routed = request.route_override.is_some(),
                "dispatching request"
            );
            bot.router()
                .handle(request)
                .await
                .map_err(|error| WorkerError::Router {
                    bot: bot.id().to_owned(),
                    error,
                })?;
            report.dispatched = report.dispatched.saturating_add(1);
        }

        if report.popped > 0 {
            debug!(
                %key,
                popped = report.popped,
                dispatched = report.dispatched,
                dropped = report.dropped,
                "queue drained"
            );
        } else {
            debug!(%key, "queue already empty");
        }
        Ok(report)
    }

    /// Classify a message against the user's dialog state, consuming the
    /// continuation when the dialog path is taken.
    async fn message_request(
        &self,
        bot: &Bot,
        user: &User,
        event: &RawEvent,
    ) -> Result<Option<Request>, WorkerError> {
        let namespace = bot.namespace();
        let pending = self.dialogs.load(namespace, &user.platform_id).await?;
        let revision = pending.as_ref().map(|p| p.revision);

        let mut transition = classify_message(user, event, pending.map(|p| p.context));

        if let (Some(revision), None) = (revision, &transition.dialog) {
            let consumed = self
                .dialogs
                .consume(namespace, &user.platform_id, revision)
                .await?;
            if !consumed {
                warn!(
                    namespace,
                    user_id = %user.platform_id,
                    revision,
                    "dialog continuation consumed elsewhere, reclassifying"
                );
                transition = classify_message(user, event, None);
            }
        }

        Ok(self.resolve(user, event, transition.outcome).await)
    }

    /// Turn an outcome into a request, consulting the NLU service if needed.
    async fn resolve(&self, user: &User, event: &RawEvent, outcome: Outcome) -> Option<Request> {
        match outcome {
            Outcome::Dispatch(request) => Some(request),
            Outcome::Drop(reason) => {
                warn!(user_id = %user.platform_id, %reason, "event produced no request");
                None
            }
            Outcome::Interpret { text } => {
                match self.nlu.query(&user.nlu_session_id, &text).await {
                    Ok(response) => {
                        let request = Request::from_nlu(user, event, response);
                        if request.is_none() {
                            warn!(user_id = %user.platform_id, "nlu returned neither intent nor action");
                        }
                        request
                    }
                    Err(e) => {
                        warn!(user_id = %user.platform_id, error = %e, "nlu query failed, dropping message");
                        None
                    }
                }
            }
        }
    }
}
