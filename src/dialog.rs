//! Per-user dialog continuation store.
//!
//! A router handler may leave a pending continuation for a user (a handler,
//! an optional controller and parameters). The next freeform message from
//! that user is routed to it instead of the NLU service.
//!
//! Rows are never deleted: clearing nulls the handler and bumps a revision
//! counter. [`DialogStore::consume`] is a single conditional `UPDATE` on the
//! revision read by [`DialogStore::load`], so a continuation is consumed at
//! most once even when several processes drain the same user.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::debug;

use crate::request::Parameters;

/// A pending continuation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogContext {
    /// Handler (and action) identifier to continue with.
    pub handler: String,
    /// Controller owning the handler, if dispatch should bypass intents.
    pub controller: Option<String>,
    /// Parameters collected so far.
    pub parameters: Parameters,
}

impl DialogContext {
    /// A continuation with no controller and no parameters.
    pub fn new(handler: impl Into<String>) -> Self {
        Self {
            handler: handler.into(),
            controller: None,
            parameters: Parameters::new(),
        }
    }

    /// Route the continuation straight to `controller`.
    pub fn with_controller(mut self, controller: impl Into<String>) -> Self {
        self.controller = Some(controller.into());
        self
    }

    /// Attach stored parameters.
    pub fn with_parameters(mut self, parameters: Parameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// A continuation as read from the store, with the revision it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingDialog {
    /// The continuation.
    pub context: DialogContext,
    /// Revision to pass to [`DialogStore::consume`].
    pub revision: i64,
}

/// Errors from dialog store operations.
#[derive(Debug, thiserror::Error)]
pub enum DialogError {
    /// Database operation failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Stored parameters could not be encoded or decoded.
    #[error("invalid dialog parameters: {0}")]
    Parameters(#[from] serde_json::Error),
}

/// SQLite-backed dialog continuation store.
#[derive(Debug, Clone)]
pub struct DialogStore {
    db: SqlitePool,
}

impl DialogStore {
    /// Create a store backed by the given pool.
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    /// Register a continuation for a user, replacing any pending one.
    ///
    /// Returns the new revision.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameters cannot be encoded or the write fails.
    pub async fn set(
        &self,
        namespace: &str,
        user_id: &str,
        context: &DialogContext,
    ) -> Result<i64, DialogError> {
        let parameters = serde_json::to_string(&context.parameters)?;
        let (revision,): (i64,) = sqlx::query_as(
            "INSERT INTO dialog_contexts (namespace, user_id, handler, controller, parameters) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (namespace, user_id) DO UPDATE SET \
                 handler = excluded.handler, \
                 controller = excluded.controller, \
                 parameters = excluded.parameters, \
                 revision = dialog_contexts.revision + 1, \
                 updated_at = datetime('now') \
             RETURNING revision",
        )
        .bind(namespace)
        .bind(user_id)
        .bind(&context.handler)
        .bind(&context.controller)
        .bind(&parameters)
        .fetch_one(&self.db)
        .await?;

        debug!(namespace, user_id, handler = %context.handler, revision, "dialog continuation set");
        Ok(revision)
    }

    /// Read the pending continuation for a user without clearing it.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails or stored parameters are corrupt.
    pub async fn load(
        &self,
        namespace: &str,
        user_id: &str,
    ) -> Result<Option<PendingDialog>, DialogError> {
        let row: Option<(String, Option<String>, String, i64)> = sqlx::query_as(
            "SELECT handler, controller, parameters, revision FROM dialog_contexts \
             WHERE namespace = ?1 AND user_id = ?2 AND handler IS NOT NULL",
        )
        .bind(namespace)
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;

        let Some((handler, controller, parameters, revision)) = row else {
            return Ok(None);
        };
        Ok(Some(PendingDialog {
            context: DialogContext {
                handler,
                controller,
                parameters: serde_json::from_str(&parameters)?,
            },
            revision,
        }))
    }

    /// Clear the continuation read at `revision`.
    ///
    /// Returns `false` if it was already consumed or replaced since it was
    /// read; the caller must then treat the user as having no continuation.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn consume(
        &self,
        namespace: &str,
        user_id: &str,
        revision: i64,
    ) -> Result<bool, DialogError> {
        let result = sqlx::query(
            "UPDATE dialog_contexts \
             SET handler = NULL, controller = NULL, parameters = '{}', \
                 revision = revision + 1, updated_at = datetime('now') \
             WHERE namespace = ?1 AND user_id = ?2 AND revision = ?3 AND handler IS NOT NULL",
        )
        .bind(namespace)
        .bind(user_id)
        .bind(revision)
        .execute(&self.db)
        .await?;

        let consumed = result.rows_affected() == 1;
        debug!(namespace, user_id, revision, consumed, "dialog continuation consume");
        Ok(consumed)
    }

    /// Unconditionally clear any pending continuation for a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn clear(&self, namespace: &str, user_id: &str) -> Result<(), DialogError> {
        sqlx::query(
            "UPDATE dialog_contexts \
             SET handler = NULL, controller = NULL, parameters = '{}', \
                 revision = revision + 1, updated_at = datetime('now') \
             WHERE namespace = ?1 AND user_id = ?2 AND handler IS NOT NULL",
        )
        .bind(namespace)
        .bind(user_id)
        .execute(&self.db)
        .await?;
        Ok(())
    }
}
