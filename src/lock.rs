//! Distributed Lock (C3): a `sqlx::Any`-backed compare-and-set primitive
//! with TTL, plus the conflict tracker that drives stale-holder recovery.
//! Queries run through `sqlx::query::<sqlx::Any>` with bound params against
//! `self.pool`, wrapped in the shared `retry_tx!` macro.

use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::RngCore;
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;
use tokio::sync::Mutex;

use crate::error::LockError;
use crate::retry_tx;

const DEFAULT_TTL: Duration = Duration::from_secs(60);
pub const OPPORTUNITY_LOCK_TTL: Duration = Duration::from_secs(120);
const CONFLICT_WINDOW: Duration = Duration::from_secs(30);
const CONFLICT_THRESHOLD: u32 = 3;

pub struct DistributedLock {
    pool: AnyPool,
    conflicts: Mutex<HashMap<String, Vec<std::time::Instant>>>,
}

impl DistributedLock {
    pub async fn connect(database_url: &str) -> Result<Self, LockError> {
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;

        sqlx::query::<sqlx::Any>(
            r#"
            CREATE TABLE IF NOT EXISTS distributed_locks (
                resource_id TEXT PRIMARY KEY,
                token TEXT NOT NULL,
                expires_at BIGINT NOT NULL
            );
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            conflicts: Mutex::new(HashMap::new()),
        })
    }

    /// Attempts to acquire `resource_id` for `ttl` (defaults to 60s).
    /// Returns `None` on conflict with a live holder; tracks the conflict so
    /// [`Self::should_force_delete`] can recommend stale-holder recovery.
    pub async fn acquire(
        &self,
        resource_id: &str,
        ttl: Option<Duration>,
    ) -> Result<Option<String>, LockError> {
        let ttl = ttl.unwrap_or(DEFAULT_TTL);
        let token = random_token();
        let now = now_secs();
        let expires_at = now + ttl.as_secs() as i64;

        let acquired = retry_tx!(self.pool, tx, {
            let existing: Option<(String, i64)> = sqlx::query_as::<_, (String, i64)>(
                "SELECT token, expires_at FROM distributed_locks WHERE resource_id = $1",
            )
            .bind(resource_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(LockError::Store)?;

            let held_and_live = existing.map(|(_, exp)| exp > now).unwrap_or(false);
            if held_and_live {
                Ok::<bool, LockError>(false)
            } else {
                sqlx::query::<sqlx::Any>(
                    r#"
                    INSERT INTO distributed_locks (resource_id, token, expires_at)
                    VALUES ($1, $2, $3)
                    ON CONFLICT (resource_id) DO UPDATE SET token = $2, expires_at = $3
                    "#,
                )
                .bind(resource_id)
                .bind(&token)
                .bind(expires_at)
                .execute(&mut *tx)
                .await
                .map_err(LockError::Store)?;
                Ok(true)
            }
        })
        .await?;

        if acquired {
            self.conflicts.lock().await.remove(resource_id);
            Ok(Some(token))
        } else {
            self.record_conflict(resource_id).await;
            Ok(None)
        }
    }

    /// Deletes the lock row unconditionally, ignoring whatever token is
    /// stored. Used only after [`Self::should_force_delete`] recommends it.
    pub async fn force_delete(&self, resource_id: &str) -> Result<(), LockError> {
        sqlx::query::<sqlx::Any>("DELETE FROM distributed_locks WHERE resource_id = $1")
            .bind(resource_id)
            .execute(&self.pool)
            .await?;
        self.conflicts.lock().await.remove(resource_id);
        Ok(())
    }

    /// Deletes the lock row only if `token` matches the stored value
    /// ("no friendly-fire" release).
    pub async fn release(&self, resource_id: &str, token: &str) -> Result<(), LockError> {
        let result = sqlx::query::<sqlx::Any>(
            "DELETE FROM distributed_locks WHERE resource_id = $1 AND token = $2",
        )
        .bind(resource_id)
        .bind(token)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LockError::TokenMismatch);
        }
        Ok(())
    }

    /// True once `resource_id` has accumulated >= 3 conflicts within a 30s
    /// window, i.e. the current holder is very likely dead (§4.3).
    pub async fn should_force_delete(&self, resource_id: &str) -> bool {
        let conflicts = self.conflicts.lock().await;
        conflicts
            .get(resource_id)
            .map(|hits| hits.len() as u32 >= CONFLICT_THRESHOLD)
            .unwrap_or(false)
    }

    async fn record_conflict(&self, resource_id: &str) {
        let mut conflicts = self.conflicts.lock().await;
        let hits = conflicts.entry(resource_id.to_string()).or_default();
        let now = std::time::Instant::now();
        hits.retain(|t| now.duration_since(*t) < CONFLICT_WINDOW);
        hits.push(now);
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_memory_lock() -> DistributedLock {
        DistributedLock::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn acquire_then_conflict_then_release() {
        let lock = in_memory_lock().await;
        let token = lock.acquire("o1", None).await.unwrap();
        assert!(token.is_some());

        let conflict = lock.acquire("o1", None).await.unwrap();
        assert!(conflict.is_none());

        lock.release("o1", &token.unwrap()).await.unwrap();
        assert!(lock.acquire("o1", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn repeated_conflicts_trigger_force_delete_recommendation() {
        let lock = in_memory_lock().await;
        let _held = lock.acquire("o5", Some(Duration::from_secs(120))).await.unwrap();

        for _ in 0..3 {
            assert!(lock.acquire("o5", None).await.unwrap().is_none());
        }

        assert!(lock.should_force_delete("o5").await);
        lock.force_delete("o5").await.unwrap();
        assert!(lock.acquire("o5", None).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expired_lock_can_be_reacquired_without_force_delete() {
        let lock = in_memory_lock().await;
        lock.acquire("o9", Some(Duration::from_millis(10))).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert!(lock.acquire("o9", None).await.unwrap().is_some());
    }
}
