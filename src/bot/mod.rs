//! Bot descriptors and their external collaborators.
//!
//! A [`Bot`] bundles what the drain worker needs once it knows which bot an
//! event belongs to: the queue namespace, the [`Router`] that dispatches
//! requests, the [`UserResolver`] that maps platform ids to users, and the
//! page access token. Bots are looked up by id in a [`BotRegistry`]
//! populated at startup.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod registry;
pub mod router;
pub mod users;

pub use registry::{BotRegistry, RegistryError};
pub use router::{JsonLinesRouter, Router};
pub use users::UserDirectory;

/// A resolved bot user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// Platform-specific id (Messenger page-scoped id).
    pub platform_id: String,
    /// Namespace of the bot the user talks to.
    pub namespace: String,
    /// NLU session id, stable across calls for this user.
    pub nlu_session_id: String,
}

/// Bot-specific user lookup strategy.
#[async_trait]
pub trait UserResolver: Send + Sync {
    /// Find (or create) the user for a platform id.
    ///
    /// # Errors
    ///
    /// Returns an error if the user cannot be resolved; the drain invocation
    /// fails.
    async fn resolve(&self, platform_id: &str) -> anyhow::Result<User>;
}

/// A live bot descriptor.
pub struct Bot {
    id: String,
    namespace: String,
    router: Arc<dyn Router>,
    users: Arc<dyn UserResolver>,
    access_token: Option<String>,
}

impl std::fmt::Debug for Bot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bot")
            .field("id", &self.id)
            .field("namespace", &self.namespace)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

impl Bot {
    /// Create a bot whose namespace is derived from its id.
    pub fn new(id: impl Into<String>, router: Arc<dyn Router>, users: Arc<dyn UserResolver>) -> Self {
        let id = id.into();
        Self {
            namespace: namespace_for(&id),
            id,
            router,
            users,
            access_token: None,
        }
    }

    /// Override the derived namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Attach the page access token.
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Registry id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Queue and storage namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Request router.
    pub fn router(&self) -> &dyn Router {
        self.router.as_ref()
    }

    /// User resolution strategy.
    pub fn users(&self) -> &dyn UserResolver {
        self.users.as_ref()
    }

    /// Page access token, if configured.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token.as_deref()
    }
}

/// Derive a storage namespace from a bot id: snake case, pluralised.
///
/// `NewsBot` becomes `news_bots`, `support` becomes `supports`.
pub fn namespace_for(bot_id: &str) -> String {
    let mut out = String::with_capacity(bot_id.len().saturating_add(4));
    let mut prev_lower = false;
    for ch in bot_id.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else if ch.is_ascii_alphanumeric() {
            out.push(ch);
            prev_lower = true;
        } else {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
            prev_lower = false;
        }
    }
    let trimmed = out.trim_end_matches('_');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.ends_with('s') {
        trimmed.to_owned()
    } else {
        format!("{trimmed}s")
    }
}
