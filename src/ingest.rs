//! Ingestion: queue an inbound event, then schedule its drain.
//!
//! The webhook endpoint itself lives outside this crate; whatever receives
//! platform callbacks calls [`Ingestor::enqueue`] for each `messaging`
//! entry. The push always completes before the drain is scheduled.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::bot::{BotRegistry, RegistryError};
use crate::event::{EventKind, RawEvent};
use crate::queue::{EventQueue, QueueError, QueueKey};
use crate::worker::{DrainJob, DrainReport, Scheduler, WorkerError};

/// Errors from ingestion.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// The bot id is not registered.
    #[error(transparent)]
    Bot(#[from] RegistryError),

    /// The event could not be queued.
    #[error("failed to queue event: {0}")]
    Queue(#[from] QueueError),
}

/// Queues events and schedules drains.
#[derive(Debug, Clone)]
pub struct Ingestor {
    queue: EventQueue,
    bots: Arc<BotRegistry>,
    scheduler: Scheduler,
}

impl Ingestor {
    /// Create an ingestor.
    pub fn new(queue: EventQueue, bots: Arc<BotRegistry>, scheduler: Scheduler) -> Self {
        Self {
            queue,
            bots,
            scheduler,
        }
    }

    /// Push `event` onto its sender's queue for `bot_id` and schedule a drain.
    ///
    /// Returns the handle of the scheduled drain task.
    ///
    /// # Errors
    ///
    /// Returns an error if the bot is unknown or the push fails; nothing is
    /// scheduled in that case.
    pub async fn enqueue(
        &self,
        bot_id: &str,
        kind: EventKind,
        event: &RawEvent,
    ) -> Result<JoinHandle<Result<DrainReport, WorkerError>>, IngestError> {
        let bot = self.bots.get(bot_id)?;
        let user_id = event.sender_id().to_owned();
        let key = QueueKey::new(bot.namespace(), user_id.as_str(), kind);

        let id = self.queue.push(&key, event).await?;
        info!(%key, id, "event queued");

        Ok(self.scheduler.schedule(DrainJob {
            user_id,
            bot_id: bot.id().to_owned(),
            kind,
        }))
    }
}
