//! Explicit bot registry keyed by stable id.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use super::Bot;

/// Errors from registry operations.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No bot is registered under this id.
    #[error("no bot registered with id {0:?}")]
    NotFound(String),

    /// A bot with this id is already registered.
    #[error("bot {0:?} is already registered")]
    Duplicate(String),
}

/// Maps bot ids to live descriptors. Populated once at startup.
#[derive(Debug, Default)]
pub struct BotRegistry {
    bots: HashMap<String, Arc<Bot>>,
}

impl BotRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a bot.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Duplicate`] if the id is taken.
    pub fn register(&mut self, bot: Bot) -> Result<(), RegistryError> {
        if self.bots.contains_key(bot.id()) {
            return Err(RegistryError::Duplicate(bot.id().to_owned()));
        }
        if bot.access_token().is_none() {
            warn!(bot = bot.id(), "bot registered without a page access token");
        }
        info!(bot = bot.id(), namespace = bot.namespace(), "bot registered");
        self.bots.insert(bot.id().to_owned(), Arc::new(bot));
        Ok(())
    }

    /// Look up a bot by id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for unknown ids.
    pub fn get(&self, id: &str) -> Result<Arc<Bot>, RegistryError> {
        self.bots
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::NotFound(id.to_owned()))
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.bots.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Number of registered bots.
    pub fn len(&self) -> usize {
        self.bots.len()
    }

    /// Whether no bots are registered.
    pub fn is_empty(&self) -> bool {
        self.bots.is_empty()
    }
}
