//! hg-bot: per-user inbound event drain pipeline for Messenger bots.
//!
//! Webhook callbacks push raw events onto durable per-user queues. A drain
//! worker pops them one at a time, classifies each into an input shape,
//! normalises it into a [`request::Request`] and hands it to the bot's
//! router. Freeform text is interpreted by an external NLU service.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod db;
pub mod logging;

pub mod event;
pub mod request;

pub mod dialog;
pub mod queue;

pub mod bot;
pub mod classify;
pub mod nlu;

pub mod analytics;
pub mod ingest;
pub mod worker;
