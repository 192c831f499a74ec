//! The normalised [`Request`] handed to a bot's router, and its builders.
//!
//! Every construction path ends here: structured payloads (quick replies,
//! postbacks, referrals), location coordinates, dialog continuations and
//! NLU interpretations.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::bot::User;
use crate::dialog::DialogContext;
use crate::event::RawEvent;
use crate::nlu::NluResponse;

/// Request parameters. Keys are always strings.
pub type Parameters = BTreeMap<String, Value>;

/// Reserved intent and action for location attachments.
pub const HANDLE_COORDINATES: &str = "hg/handle_coordinates";

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// Explicit routing target that bypasses intent-based dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteOverride {
    /// Controller identifier.
    pub controller: String,
    /// Handler within the controller.
    pub handler: String,
}

/// A normalised inbound request. Transient: built, dispatched, discarded.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Request {
    /// The resolved sender.
    pub user: User,
    /// The event this request was built from.
    pub event: RawEvent,
    /// Intent identifier.
    pub intent: String,
    /// Action identifier.
    pub action: String,
    /// Parameters for the handler.
    pub parameters: Parameters,
    /// Raw NLU result (NLU-derived requests only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    /// Explicit routing target (dialog continuations only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route_override: Option<RouteOverride>,
}

impl Request {
    /// Payload path, shared by quick replies, postbacks and referrals.
    ///
    /// `intent` falls back to the payload's action.
    pub fn from_payload(user: &User, event: &RawEvent, payload: Payload) -> Self {
        let Payload {
            action,
            intent,
            params,
        } = payload;
        Self {
            user: user.clone(),
            event: event.clone(),
            intent: intent.unwrap_or_else(|| action.clone()),
            action,
            parameters: drop_blank(params),
            response: None,
            route_override: None,
        }
    }

    /// Location path: the reserved [`HANDLE_COORDINATES`] action with
    /// `lat` / `long` parameters.
    pub fn coordinates(user: &User, event: &RawEvent, lat: f64, long: f64) -> Self {
        let mut parameters = Parameters::new();
        parameters.insert("lat".to_owned(), Value::from(lat));
        parameters.insert("long".to_owned(), Value::from(long));
        Self {
            user: user.clone(),
            event: event.clone(),
            intent: HANDLE_COORDINATES.to_owned(),
            action: HANDLE_COORDINATES.to_owned(),
            parameters,
            response: None,
            route_override: None,
        }
    }

    /// Dialog continuation path. Parameters are passed through untouched;
    /// a stored controller becomes a [`RouteOverride`].
    pub fn from_dialog(user: &User, event: &RawEvent, context: DialogContext) -> Self {
        let DialogContext {
            handler,
            controller,
            parameters,
        } = context;
        let route_override = controller.map(|controller| RouteOverride {
            controller,
            handler: handler.clone(),
        });
        Self {
            user: user.clone(),
            event: event.clone(),
            intent: handler.clone(),
            action: handler,
            parameters,
            response: None,
            route_override,
        }
    }

    /// NLU path. `action` falls back to `intent` and vice versa; blank
    /// parameters are dropped.
    ///
    /// Returns `None` when the interpretation names neither an intent nor
    /// an action, since such a request could not be routed.
    pub fn from_nlu(user: &User, event: &RawEvent, nlu: NluResponse) -> Option<Self> {
        let NluResponse {
            intent,
            action,
            parameters,
            raw,
            ..
        } = nlu;
        let (intent, action) = match (intent, action) {
            (Some(intent), Some(action)) => (intent, action),
            (Some(intent), None) => (intent.clone(), intent),
            (None, Some(action)) => (action.clone(), action),
            (None, None) => return None,
        };
        Some(Self {
            user: user.clone(),
            event: event.clone(),
            intent,
            action,
            parameters: drop_blank(parameters),
            response: Some(raw),
            route_override: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Structured payloads
// ---------------------------------------------------------------------------

/// A structured `{action, intent?, params}` payload set by the bot on a
/// button, quick reply or referral link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Action identifier.
    pub action: String,
    /// Intent identifier; defaults to `action`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    /// Handler parameters.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub params: Parameters,
}

/// Errors decoding a structured payload.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    /// The payload was not valid JSON or did not match the expected shape.
    #[error("invalid payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The payload named an empty action.
    #[error("payload has an empty action")]
    MissingAction,

    /// The referral did not embed a payload.
    #[error("referral carries no payload")]
    MissingReferralPayload,
}

impl Payload {
    /// Decode a JSON-encoded payload string.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the string is not a valid payload.
    pub fn parse_str(raw: &str) -> Result<Self, PayloadError> {
        let payload: Self = serde_json::from_str(raw)?;
        payload.validated()
    }

    /// Decode a payload that is either an object or a JSON-encoded string.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if the value is not a valid payload.
    pub fn parse(value: &Value) -> Result<Self, PayloadError> {
        match value {
            Value::String(raw) => Self::parse_str(raw),
            other => Self::deserialize(other)?.validated(),
        }
    }

    /// Decode the payload embedded in a referral: `ref.payload`, where both
    /// the referral and its `ref` may themselves be JSON-encoded strings.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadError`] if no valid payload is embedded.
    pub fn from_referral(referral: &Value) -> Result<Self, PayloadError> {
        let referral = decode_embedded(referral)?;
        let reference = referral
            .get("ref")
            .ok_or(PayloadError::MissingReferralPayload)?;
        let reference = decode_embedded(reference)?;
        let payload = reference
            .get("payload")
            .ok_or(PayloadError::MissingReferralPayload)?;
        Self::parse(payload)
    }

    fn validated(self) -> Result<Self, PayloadError> {
        if self.action.trim().is_empty() {
            return Err(PayloadError::MissingAction);
        }
        Ok(self)
    }
}

fn decode_embedded(value: &Value) -> Result<Value, PayloadError> {
    match value {
        Value::String(raw) => Ok(serde_json::from_str(raw)?),
        other => Ok(other.clone()),
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Parameters, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Parameters>::deserialize(deserializer)?.unwrap_or_default())
}

// ---------------------------------------------------------------------------
// Parameter filtering
// ---------------------------------------------------------------------------

/// Whether a parameter value carries no information.
///
/// `null`, whitespace-only strings, and empty arrays or objects are blank.
/// `false` and `0` are values.
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Bool(_) | Value::Number(_) => false,
    }
}

/// Remove blank values from a parameter map.
pub fn drop_blank(mut parameters: Parameters) -> Parameters {
    parameters.retain(|_, value| !is_blank(value));
    parameters
}
