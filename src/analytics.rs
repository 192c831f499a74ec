//! Inbound event analytics.
//!
//! When an API key is configured, every popped event is reported to the
//! Chatbase Facebook API. Reporting is fire-and-forget: the POST runs on its
//! own task, failures are logged and never reach the drain loop.

use serde_json::{json, Value};
use tracing::{trace, warn};

use crate::event::{EventKind, RawEvent};
use crate::request::Payload;

/// Default Chatbase Facebook API base URL.
pub const DEFAULT_CHATBASE_URL: &str = "https://chatbase.com/api/facebook";

/// Receives a notification for each inbound event.
pub trait AnalyticsSink: Send + Sync {
    /// Record an inbound event. Must not block.
    fn record_inbound(&self, kind: EventKind, event: &RawEvent);
}

/// Chatbase analytics client.
#[derive(Clone)]
pub struct ChatbaseClient {
    base_url: String,
    api_key: String,
    bot_version: Option<String>,
    client: reqwest::Client,
}

impl std::fmt::Debug for ChatbaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatbaseClient")
            .field("base_url", &self.base_url)
            .field("bot_version", &self.bot_version)
            .finish_non_exhaustive()
    }
}

impl ChatbaseClient {
    /// Create a client.
    pub fn new(base_url: &str, api_key: String, bot_version: Option<String>) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            bot_version,
            client: reqwest::Client::new(),
        }
    }

    /// POST one serialised message to `message_received`.
    ///
    /// # Errors
    ///
    /// Returns an error on transport failure or a non-success status.
    pub async fn send_user_message(&self, body: &Value) -> Result<(), reqwest::Error> {
        let url = format!("{}/message_received", self.base_url);
        self.client
            .post(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .json(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

impl AnalyticsSink for ChatbaseClient {
    fn record_inbound(&self, kind: EventKind, event: &RawEvent) {
        let body = serialize_user_message(kind, event, self.bot_version.as_deref());
        let client = self.clone();
        tokio::spawn(async move {
            match client.send_user_message(&body).await {
                Ok(()) => trace!("analytics event recorded"),
                Err(e) => warn!(error = %e, "analytics request failed"),
            }
        });
    }
}

/// Format an inbound event for the Chatbase Facebook API.
///
/// Postbacks report their payload action as both text and intent and are
/// marked handled; messages report their text.
pub fn serialize_user_message(kind: EventKind, event: &RawEvent, version: Option<&str>) -> Value {
    let (text, intent, not_handled) = match kind {
        EventKind::Message => (event.text().map(str::to_owned), None, None),
        EventKind::Postback => {
            let action = event
                .postback
                .as_ref()
                .and_then(|p| Payload::parse(&p.payload).ok())
                .map(|p| p.action);
            (action.clone(), action, Some(false))
        }
    };
    let timestamp = event
        .timestamp
        .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

    json!({
        "sender": event.sender.id,
        "recipient": event.recipient.as_ref().map(|r| r.id.as_str()),
        "timestamp": timestamp,
        "message": {
            "mid": event.message.as_ref().and_then(|m| m.mid.as_deref()),
            "text": text,
        },
        "chatbase_fields": {
            "intent": intent,
            "version": version,
            "not_handled": not_handled,
        },
    })
}
