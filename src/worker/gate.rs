//! Per-queue single-flight gate.
//!
//! At most one drain may run per [`QueueKey`] at a time. Later invocations
//! for the same key wait for the permit and then find whatever the first one
//! left behind, usually an empty queue.
//!
//! The gate has two layers. An in-process keyed mutex serialises tasks that
//! share one [`KeyGate`]. A [`DrainLeases`] row in the shared database
//! serialises gates in different workers or processes: the holder owns a
//! `drain_leases` row until it releases it or the lease expires. Holders
//! renew the lease as they go, so only a crashed holder lets it lapse.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::OwnedMutexGuard;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::queue::QueueKey;

type Slots = Arc<Mutex<HashMap<QueueKey, Arc<tokio::sync::Mutex<()>>>>>;

/// Errors from acquiring or holding a drain lease.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// Lease storage failed.
    #[error("drain lease storage error: {0}")]
    Database(#[from] sqlx::Error),

    /// Another holder kept the lease for the whole wait.
    #[error("queue {key} is being drained elsewhere; gave up after {waited:?}")]
    Busy {
        /// The contended queue.
        key: QueueKey,
        /// How long this caller waited.
        waited: Duration,
    },

    /// The lease expired and was taken over while this holder was draining.
    #[error("drain lease for {key} was lost")]
    Lost {
        /// The queue whose lease was lost.
        key: QueueKey,
    },
}

/// Timing for database-backed drain leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseSettings {
    /// How long a claim or renewal stays valid.
    pub ttl: Duration,
    /// How long to wait for a held lease before failing with [`GateError::Busy`].
    pub wait: Duration,
    /// Pause between claim attempts while waiting.
    pub poll: Duration,
}

impl Default for LeaseSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            wait: Duration::from_secs(30),
            poll: Duration::from_millis(50),
        }
    }
}

/// Drain leases stored in the `drain_leases` table.
#[derive(Debug, Clone)]
pub struct DrainLeases {
    db: SqlitePool,
    settings: LeaseSettings,
}

impl DrainLeases {
    /// Leases over `db` with the given timing.
    pub fn new(db: SqlitePool, settings: LeaseSettings) -> Self {
        Self { db, settings }
    }

    /// The timing in effect.
    pub fn settings(&self) -> LeaseSettings {
        self.settings
    }

    /// Claim the lease for `key` if it is free or expired.
    ///
    /// # Errors
    ///
    /// Returns an error if the upsert fails.
    pub async fn try_claim(&self, key: &QueueKey, owner: &str) -> Result<bool, sqlx::Error> {
        let now = now_millis();
        let result = sqlx::query(
            "INSERT INTO drain_leases (namespace, user_id, kind, owner, expires_at) \
             VALUES (?1, ?2, ?3, ?4, ?5) \
             ON CONFLICT (namespace, user_id, kind) DO UPDATE \
             SET owner = excluded.owner, expires_at = excluded.expires_at \
             WHERE drain_leases.expires_at <= ?6",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(owner)
        .bind(self.expiry_from(now))
        .bind(now)
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Push the expiry of a lease `owner` still holds.
    ///
    /// Returns `false` if `owner` no longer holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the update fails.
    pub async fn renew(&self, key: &QueueKey, owner: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE drain_leases SET expires_at = ?5 \
             WHERE namespace = ?1 AND user_id = ?2 AND kind = ?3 AND owner = ?4",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(owner)
        .bind(self.expiry_from(now_millis()))
        .execute(&self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drop the lease if `owner` still holds it.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn release(&self, key: &QueueKey, owner: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "DELETE FROM drain_leases \
             WHERE namespace = ?1 AND user_id = ?2 AND kind = ?3 AND owner = ?4",
        )
        .bind(&key.namespace)
        .bind(&key.user_id)
        .bind(key.kind.as_str())
        .bind(owner)
        .execute(&self.db)
        .await?;
        Ok(())
    }

    fn expiry_from(&self, now: i64) -> i64 {
        let ttl = i64::try_from(self.settings.ttl.as_millis()).unwrap_or(i64::MAX);
        now.saturating_add(ttl)
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Keyed mutex over queue keys, optionally backed by [`DrainLeases`].
/// Idle keys hold no memory.
#[derive(Debug, Clone, Default)]
pub struct KeyGate {
    slots: Slots,
    leases: Option<DrainLeases>,
}

/// Exclusive right to drain one queue.
///
/// Call [`GatePermit::release`] when done. Dropping an unreleased permit
/// frees the in-process slot at once and the lease on a background task.
#[derive(Debug)]
pub struct GatePermit {
    guard: Option<OwnedMutexGuard<()>>,
    key: QueueKey,
    slots: Slots,
    lease: Option<(DrainLeases, String)>,
}

impl KeyGate {
    /// A gate that serialises tasks in this process only.
    pub fn new() -> Self {
        Self::default()
    }

    /// A gate that also serialises against every other holder of `leases`'
    /// database.
    pub fn with_leases(leases: DrainLeases) -> Self {
        Self {
            slots: Slots::default(),
            leases: Some(leases),
        }
    }

    /// Wait for exclusive access to `key`.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Busy`] if the lease stays held elsewhere for the
    /// configured wait, or a storage error.
    pub async fn acquire(&self, key: &QueueKey) -> Result<GatePermit, GateError> {
        let slot = {
            let mut slots = lock(&self.slots);
            Arc::clone(slots.entry(key.clone()).or_default())
        };
        let guard = slot.lock_owned().await;
        let mut permit = GatePermit {
            guard: Some(guard),
            key: key.clone(),
            slots: Arc::clone(&self.slots),
            lease: None,
        };

        if let Some(leases) = &self.leases {
            let owner = uuid::Uuid::new_v4().to_string();
            let settings = leases.settings();
            let started = Instant::now();
            while !leases.try_claim(key, &owner).await? {
                let waited = started.elapsed();
                if waited >= settings.wait {
                    return Err(GateError::Busy {
                        key: key.clone(),
                        waited,
                    });
                }
                debug!(%key, "drain lease held elsewhere, waiting");
                tokio::time::sleep(settings.poll).await;
            }
            permit.lease = Some((leases.clone(), owner));
        }
        Ok(permit)
    }

    /// Number of keys currently held or waited on in this process.
    pub fn active_keys(&self) -> usize {
        lock(&self.slots).len()
    }
}

impl GatePermit {
    /// The queue this permit covers.
    pub fn key(&self) -> &QueueKey {
        &self.key
    }

    /// Extend the lease, failing if another holder has taken it over.
    ///
    /// # Errors
    ///
    /// Returns [`GateError::Lost`] if the lease changed hands, or a storage
    /// error.
    pub async fn renew(&self) -> Result<(), GateError> {
        let Some((leases, owner)) = &self.lease else {
            return Ok(());
        };
        if leases.renew(&self.key, owner).await? {
            Ok(())
        } else {
            Err(GateError::Lost {
                key: self.key.clone(),
            })
        }
    }

    /// Give up the lease and the in-process slot.
    pub async fn release(mut self) {
        if let Some((leases, owner)) = self.lease.take() {
            if let Err(e) = leases.release(&self.key, &owner).await {
                warn!(key = %self.key, error = %e, "failed to release drain lease; it will expire");
            }
        }
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        if let Some((leases, owner)) = self.lease.take() {
            let key = self.key.clone();
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(async move {
                        if let Err(e) = leases.release(&key, &owner).await {
                            warn!(%key, error = %e, "failed to release drain lease; it will expire");
                        }
                    });
                }
                Err(_) => warn!(%key, "no runtime to release drain lease; it will expire"),
            }
        }

        drop(self.guard.take());
        let mut slots = lock(&self.slots);
        // Only the map's own reference left: nobody holds or awaits this key.
        if slots
            .get(&self.key)
            .is_some_and(|slot| Arc::strong_count(slot) == 1)
        {
            slots.remove(&self.key);
        }
    }
}

fn lock(slots: &Slots) -> MutexGuard<'_, HashMap<QueueKey, Arc<tokio::sync::Mutex<()>>>> {
    slots.lock().unwrap_or_else(PoisonError::into_inner)
}
