use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common_redis::{Client, CustomRedisError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

use crate::metric_consts::{VERSION_LOCK_FAILED, VERSION_UPDATE_CONFLICT, VERSION_UPDATE_SUCCESS};

/// An absent record counts as this version, so "create" and "first read"
/// agree on where counting starts.
pub const INITIAL_VERSION: u64 = 1;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);

pub fn profile_key(user_id: &str) -> String {
    format!("profile:user:{user_id}")
}

pub fn lock_key(user_id: &str) -> String {
    format!("lock:profile:{user_id}")
}

/// The latest-known per-user state on the fast path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FastPathProfile {
    pub fields: HashMap<String, Value>,
    pub version: u64,
    pub last_updated_by: String,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SafeUpdateOutcome {
    Success { version: u64 },
    /// The per-user lock could not be acquired within the wait budget.
    LockFailed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AtomicUpdateOutcome {
    Success { version: u64 },
    /// The expectation did not hold; `observed` is the version found.
    VersionConflict { observed: u64 },
}

/// Maintains the authoritative latest-known per-user profile state in the
/// fast-path store, for callers that do not want to depend on the document
/// store. Writes are guarded either by a per-user distributed lock
/// (`safe_update`) or by compare-and-swap (`atomic_update`).
pub struct VersionManager {
    redis: Arc<dyn Client>,
    lock_ttl: Duration,
    lock_wait: Duration,
}

impl VersionManager {
    pub fn new(redis: Arc<dyn Client>, lock_ttl: Duration, lock_wait: Duration) -> Self {
        Self {
            redis,
            lock_ttl,
            lock_wait,
        }
    }

    /// Merge `updates` into the user's field map under the per-user lock,
    /// bumping the version by one (creating the record at
    /// `INITIAL_VERSION` when absent). Contention within the wait budget
    /// returns `LockFailed` rather than blocking the caller.
    pub async fn safe_update(
        &self,
        user_id: &str,
        updates: &HashMap<String, Value>,
        source: &str,
    ) -> Result<SafeUpdateOutcome, CustomRedisError> {
        let Some(token) = self.acquire_lock(user_id).await? else {
            metrics::counter!(VERSION_LOCK_FAILED).increment(1);
            return Ok(SafeUpdateOutcome::LockFailed);
        };

        let written = self.write_merged(user_id, updates, source).await;
        self.release_lock(user_id, &token).await;

        let version = written?;
        metrics::counter!(VERSION_UPDATE_SUCCESS).increment(1);
        Ok(SafeUpdateOutcome::Success { version })
    }

    /// Compare-and-swap without the lock: the write only lands if the
    /// record is still exactly the one whose version the caller expected.
    pub async fn atomic_update(
        &self,
        user_id: &str,
        updates: &HashMap<String, Value>,
        expected_version: u64,
        source: &str,
    ) -> Result<AtomicUpdateOutcome, CustomRedisError> {
        let current = self.read_profile(user_id).await?;
        let observed = current
            .as_ref()
            .map(|(profile, _)| profile.version)
            .unwrap_or(INITIAL_VERSION);

        if expected_version != observed {
            metrics::counter!(VERSION_UPDATE_CONFLICT).increment(1);
            return Ok(AtomicUpdateOutcome::VersionConflict { observed });
        }

        let mut fields = current
            .as_ref()
            .map(|(profile, _)| profile.fields.clone())
            .unwrap_or_default();
        fields.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));

        let version = match &current {
            Some((profile, _)) => profile.version + 1,
            None => INITIAL_VERSION,
        };
        let payload = Self::encode(FastPathProfile {
            fields,
            version,
            last_updated_by: source.to_string(),
            last_updated_at: Utc::now(),
        })?;

        let expected_payload = current.map(|(_, raw)| raw);
        let swapped = self
            .redis
            .set_if_equals(profile_key(user_id), expected_payload, payload)
            .await?;

        if !swapped {
            // Raced between the read and the swap; report what's there now.
            let observed = self.current_version(user_id).await?;
            metrics::counter!(VERSION_UPDATE_CONFLICT).increment(1);
            return Ok(AtomicUpdateOutcome::VersionConflict { observed });
        }

        metrics::counter!(VERSION_UPDATE_SUCCESS).increment(1);
        Ok(AtomicUpdateOutcome::Success { version })
    }

    pub async fn current_version(&self, user_id: &str) -> Result<u64, CustomRedisError> {
        Ok(self
            .read_profile(user_id)
            .await?
            .map(|(profile, _)| profile.version)
            .unwrap_or(INITIAL_VERSION))
    }

    pub async fn exists(&self, user_id: &str) -> Result<bool, CustomRedisError> {
        self.redis.exists(profile_key(user_id)).await
    }

    /// Lock-guarded deletion. Returns whether a record was removed.
    pub async fn delete(&self, user_id: &str, reason: &str) -> Result<bool, CustomRedisError> {
        let Some(token) = self.acquire_lock(user_id).await? else {
            metrics::counter!(VERSION_LOCK_FAILED).increment(1);
            return Ok(false);
        };

        let key = profile_key(user_id);
        let deleted = match self.redis.exists(key.clone()).await {
            Ok(true) => self.redis.del(key).await.map(|_| true),
            Ok(false) => Ok(false),
            Err(e) => Err(e),
        };
        self.release_lock(user_id, &token).await;

        let deleted = deleted?;
        if deleted {
            info!(user_id, reason, "Deleted fast-path profile");
        }
        Ok(deleted)
    }

    async fn read_profile(
        &self,
        user_id: &str,
    ) -> Result<Option<(FastPathProfile, String)>, CustomRedisError> {
        match self.redis.get(profile_key(user_id)).await {
            Ok(raw) => {
                let profile = serde_json::from_str(&raw)
                    .map_err(|e| CustomRedisError::ParseError(e.to_string()))?;
                Ok(Some((profile, raw)))
            }
            Err(CustomRedisError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_merged(
        &self,
        user_id: &str,
        updates: &HashMap<String, Value>,
        source: &str,
    ) -> Result<u64, CustomRedisError> {
        let current = self.read_profile(user_id).await?;

        let mut fields = current
            .as_ref()
            .map(|(profile, _)| profile.fields.clone())
            .unwrap_or_default();
        fields.extend(updates.iter().map(|(k, v)| (k.clone(), v.clone())));

        let version = match &current {
            Some((profile, _)) => profile.version + 1,
            None => INITIAL_VERSION,
        };
        let payload = Self::encode(FastPathProfile {
            fields,
            version,
            last_updated_by: source.to_string(),
            last_updated_at: Utc::now(),
        })?;

        self.redis.set(profile_key(user_id), payload).await?;
        Ok(version)
    }

    /// Acquire the per-user lock with a unique per-acquisition token,
    /// polling within the wait budget. The TTL bounds how long a crashed
    /// holder can keep the lock.
    async fn acquire_lock(&self, user_id: &str) -> Result<Option<String>, CustomRedisError> {
        let token = Uuid::now_v7().to_string();
        let ttl_secs = self.lock_ttl.as_secs().max(1);
        let deadline = Instant::now() + self.lock_wait;

        loop {
            if self
                .redis
                .set_nx_ex(lock_key(user_id), token.clone(), ttl_secs)
                .await?
            {
                return Ok(Some(token));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    /// Compare-and-delete on the token: a lock whose TTL elapsed (and was
    /// possibly re-acquired by someone else) is left alone.
    async fn release_lock(&self, user_id: &str, token: &str) {
        match self
            .redis
            .del_if_equals(lock_key(user_id), token.to_string())
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                warn!(user_id, "Fast-path lock expired before release");
            }
            Err(e) => {
                warn!(user_id, "Failed to release fast-path lock: {}", e);
            }
        }
    }

    fn encode(profile: FastPathProfile) -> Result<String, CustomRedisError> {
        serde_json::to_string(&profile).map_err(|e| CustomRedisError::ParseError(e.to_string()))
    }
}
