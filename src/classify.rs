//! Pure classification of raw events into requests.
//!
//! [`classify_message`] is the dialog state transition
//! `(context, event) -> (context', outcome)`: it never touches storage. The
//! worker applies the resulting context change through
//! [`DialogStore::consume`](crate::dialog::DialogStore::consume) while it
//! holds the per-user gate.
//!
//! Message precedence, first match wins:
//! 1. quick reply payload
//! 2. first attachment (location, otherwise unsupported)
//! 3. pending dialog continuation
//! 4. freeform text, to be interpreted by the NLU service

use std::fmt;

use crate::bot::User;
use crate::dialog::DialogContext;
use crate::event::{MessageShape, PostbackShape, RawEvent};
use crate::request::{Payload, Request};

/// What to do with one event.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A request is ready for the router.
    Dispatch(Request),
    /// The text must be interpreted by the NLU service first.
    Interpret {
        /// Text to send.
        text: String,
    },
    /// No request is produced.
    Drop(DropReason),
}

/// Why an event produced no request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// An attachment kind with no handling.
    UnsupportedAttachment(String),
    /// A quick reply, postback or referral payload that could not be decoded.
    MalformedPayload(String),
    /// The event has no body of the kind its queue expects.
    MissingBody,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedAttachment(kind) => write!(f, "unsupported attachment type {kind:?}"),
            Self::MalformedPayload(err) => write!(f, "malformed payload: {err}"),
            Self::MissingBody => f.write_str("event has no body of the expected kind"),
        }
    }
}

/// Result of classifying a message against the user's dialog state.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    /// The user's dialog context after this event.
    pub dialog: Option<DialogContext>,
    /// What to do with the event.
    pub outcome: Outcome,
}

impl Transition {
    fn keep(dialog: Option<DialogContext>, outcome: Outcome) -> Self {
        Self { dialog, outcome }
    }
}

/// Classify a message event.
///
/// The pending continuation is consumed (the returned `dialog` is `None`)
/// only when the message falls through to the dialog path.
pub fn classify_message(
    user: &User,
    event: &RawEvent,
    dialog: Option<DialogContext>,
) -> Transition {
    let Some(shape) = event.message_shape() else {
        return Transition::keep(dialog, Outcome::Drop(DropReason::MissingBody));
    };

    match shape {
        MessageShape::QuickReply(raw) => {
            let outcome = match Payload::parse_str(raw) {
                Ok(payload) => Outcome::Dispatch(Request::from_payload(user, event, payload)),
                Err(err) => Outcome::Drop(DropReason::MalformedPayload(err.to_string())),
            };
            Transition::keep(dialog, outcome)
        }
        MessageShape::Location { lat, long } => Transition::keep(
            dialog,
            Outcome::Dispatch(Request::coordinates(user, event, lat, long)),
        ),
        MessageShape::Attachment { kind } => Transition::keep(
            dialog,
            Outcome::Drop(DropReason::UnsupportedAttachment(kind.to_owned())),
        ),
        MessageShape::Text(text) => match dialog {
            Some(context) => Transition {
                dialog: None,
                outcome: Outcome::Dispatch(Request::from_dialog(user, event, context)),
            },
            None => Transition::keep(
                None,
                Outcome::Interpret {
                    text: text.to_owned(),
                },
            ),
        },
    }
}

/// Classify a postback event: referral payload if present, otherwise the
/// postback's own payload.
pub fn classify_postback(user: &User, event: &RawEvent) -> Outcome {
    let parsed = match event.postback_shape() {
        None => return Outcome::Drop(DropReason::MissingBody),
        Some(PostbackShape::Referral(referral)) => Payload::from_referral(referral),
        Some(PostbackShape::Payload(payload)) => Payload::parse(payload),
    };
    match parsed {
        Ok(payload) => Outcome::Dispatch(Request::from_payload(user, event, payload)),
        Err(err) => Outcome::Drop(DropReason::MalformedPayload(err.to_string())),
    }
}
