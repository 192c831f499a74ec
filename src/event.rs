//! Raw Messenger events and their input shapes.
//!
//! A [`RawEvent`] is the `messaging` entry of a webhook callback, stored
//! verbatim on the user's queue. The worker never probes its optional fields
//! directly: [`RawEvent::message_shape`] and [`RawEvent::postback_shape`]
//! turn it into a tagged variant once, at the boundary.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// Attachment type carrying a coordinates payload.
const LOCATION_ATTACHMENT: &str = "location";

// ---------------------------------------------------------------------------
// Event kind
// ---------------------------------------------------------------------------

/// Which per-user queue an event lives on. The two queues are independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// Freeform messages (text, quick replies, attachments).
    Message,
    /// Structured postbacks (buttons, referrals).
    Postback,
}

impl EventKind {
    /// Returns the string representation stored in SQLite.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Message => "message",
            Self::Postback => "postback",
        }
    }

    /// Parse from a SQLite or command-line value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a recognised kind.
    pub fn parse(s: &str) -> Result<Self, EventError> {
        match s {
            "message" => Ok(Self::Message),
            "postback" => Ok(Self::Postback),
            other => Err(EventError::InvalidKind(other.to_owned())),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from event model parsing.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    /// An unknown event kind was supplied.
    #[error("invalid event kind: {0:?} (expected \"message\" or \"postback\")")]
    InvalidKind(String),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// An unprocessed inbound event as delivered by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// The user who sent the event.
    pub sender: Party,
    /// The page that received it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient: Option<Party>,
    /// Platform timestamp in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Message fields, for message events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageBody>,
    /// Postback fields, for postback events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postback: Option<PostbackBody>,
}

/// A sender or recipient reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Party {
    /// Page-scoped identifier. Numeric ids are accepted and kept as text.
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
}

/// The `message` member of a message event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MessageBody {
    /// Platform message id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mid: Option<String>,
    /// Freeform text, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Quick reply the user tapped, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quick_reply: Option<QuickReply>,
    /// Attachments (location, image, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachments: Option<Vec<Attachment>>,
}

/// A quick reply tap. The payload is the JSON string set by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickReply {
    /// JSON-encoded `{action, intent?, params}` object.
    pub payload: String,
}

/// A message attachment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    /// Attachment type (`location`, `image`, `audio`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

/// The `postback` member of a postback event.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostbackBody {
    /// Button title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Either a pre-parsed object or the raw JSON string from the button.
    #[serde(default)]
    pub payload: Value,
    /// Referral metadata when the thread was opened from an entry point.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub referral: Option<Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {other}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Input shapes
// ---------------------------------------------------------------------------

/// The input shape of a message event, in precedence order.
#[derive(Debug, Clone, PartialEq)]
pub enum MessageShape<'a> {
    /// A quick reply tap carrying a JSON payload.
    QuickReply(&'a str),
    /// A location attachment with coordinates.
    Location {
        /// Latitude.
        lat: f64,
        /// Longitude.
        long: f64,
    },
    /// Any other attachment kind (or a location without coordinates).
    Attachment {
        /// The attachment type as sent by the platform.
        kind: &'a str,
    },
    /// Freeform text. Empty when the message carried none.
    Text(&'a str),
}

/// The input shape of a postback event.
#[derive(Debug, Clone, PartialEq)]
pub enum PostbackShape<'a> {
    /// The thread was opened from a referral entry point.
    Referral(&'a Value),
    /// An ordinary button payload.
    Payload(&'a Value),
}

impl RawEvent {
    /// The sender's platform id.
    pub fn sender_id(&self) -> &str {
        &self.sender.id
    }

    /// Message text, if this is a message event with text.
    pub fn text(&self) -> Option<&str> {
        self.message.as_ref().and_then(|m| m.text.as_deref())
    }

    /// Classify a message event. Returns `None` for non-message events.
    ///
    /// Quick replies win over attachments, which win over text. Only the
    /// first attachment is inspected.
    pub fn message_shape(&self) -> Option<MessageShape<'_>> {
        let message = self.message.as_ref()?;

        if let Some(quick_reply) = &message.quick_reply {
            return Some(MessageShape::QuickReply(&quick_reply.payload));
        }

        if let Some(attachment) = message.attachments.as_ref().and_then(|a| a.first()) {
            if attachment.kind == LOCATION_ATTACHMENT {
                if let Some((lat, long)) = attachment.payload.as_ref().and_then(coordinates) {
                    return Some(MessageShape::Location { lat, long });
                }
            }
            return Some(MessageShape::Attachment {
                kind: &attachment.kind,
            });
        }

        Some(MessageShape::Text(message.text.as_deref().unwrap_or("")))
    }

    /// Classify a postback event. Returns `None` for non-postback events.
    pub fn postback_shape(&self) -> Option<PostbackShape<'_>> {
        let postback = self.postback.as_ref()?;
        match &postback.referral {
            Some(referral) if !referral.is_null() => Some(PostbackShape::Referral(referral)),
            _ => Some(PostbackShape::Payload(&postback.payload)),
        }
    }
}

/// Extract `coordinates.lat` / `coordinates.long` from a location payload.
fn coordinates(payload: &Value) -> Option<(f64, f64)> {
    let coords = payload.get("coordinates")?;
    let lat = coords.get("lat")?.as_f64()?;
    let long = coords.get("long")?.as_f64()?;
    Some((lat, long))
}
