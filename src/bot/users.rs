//! SQLite-backed find-or-create user directory.

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;

use super::{User, UserResolver};

/// Resolves users by platform id within one bot namespace, creating them on
/// first contact with a fresh NLU session id.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: SqlitePool,
    namespace: String,
}

impl UserDirectory {
    /// Create a directory for `namespace`.
    pub fn new(db: SqlitePool, namespace: impl Into<String>) -> Self {
        Self {
            db,
            namespace: namespace.into(),
        }
    }

    /// Find or create a user.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub async fn find_or_create(&self, platform_id: &str) -> Result<User, sqlx::Error> {
        let candidate = uuid::Uuid::new_v4().to_string();
        let inserted = sqlx::query(
            "INSERT INTO bot_users (namespace, platform_id, nlu_session_id) VALUES (?1, ?2, ?3) \
             ON CONFLICT (namespace, platform_id) DO NOTHING",
        )
        .bind(&self.namespace)
        .bind(platform_id)
        .bind(&candidate)
        .execute(&self.db)
        .await?
        .rows_affected();

        let (nlu_session_id,): (String,) = sqlx::query_as(
            "SELECT nlu_session_id FROM bot_users WHERE namespace = ?1 AND platform_id = ?2",
        )
        .bind(&self.namespace)
        .bind(platform_id)
        .fetch_one(&self.db)
        .await?;

        if inserted > 0 {
            debug!(namespace = %self.namespace, platform_id, "user created");
        }
        Ok(User {
            platform_id: platform_id.to_owned(),
            namespace: self.namespace.clone(),
            nlu_session_id,
        })
    }
}

#[async_trait]
impl UserResolver for UserDirectory {
    async fn resolve(&self, platform_id: &str) -> anyhow::Result<User> {
        Ok(self.find_or_create(platform_id).await?)
    }
}
