use std::time::Duration;

use async_trait::async_trait;
use revq_db::PgPool;
use uuid::Uuid;

use super::{page_count_key, CacheError, LockToken, ReviewCache, NEXT_JOBS_COUNT};

/// Cache shared across the fleet through the `review_locks` and
/// `counters` tables.
pub struct PgCache {
    pool: PgPool,
}

impl PgCache {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bump(&self, key: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO counters (name, value) VALUES ($1, 1)
             ON CONFLICT (name) DO UPDATE SET value = counters.value + 1",
        )
        .bind(key)
        .execute(&self.pool)
        .await
        .map(|_| ())
        .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}

#[async_trait]
impl ReviewCache for PgCache {
    async fn try_lock(&self, url: &str, ttl: Duration) -> Result<Option<LockToken>, CacheError> {
        let owner = Uuid::new_v4();
        // The upsert only replaces rows whose lease has lapsed, so a live
        // lock is never stolen and exactly one contender gets the row.
        let row = sqlx::query_scalar::<_, Uuid>(
            "INSERT INTO review_locks (url, owner, expires_at)
             VALUES ($1, $2, now() + make_interval(secs => $3))
             ON CONFLICT (url) DO UPDATE
                SET owner = EXCLUDED.owner, expires_at = EXCLUDED.expires_at
              WHERE review_locks.expires_at <= now()
             RETURNING owner",
        )
        .bind(url)
        .bind(owner)
        .bind(ttl.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CacheError::Unavailable(e.to_string()))?;

        Ok(row.map(|owner| LockToken {
            url: url.to_string(),
            owner,
        }))
    }

    async fn increment_page_count(&self, domain_id: Option<i64>) -> Result<(), CacheError> {
        self.bump(&page_count_key(domain_id)).await
    }

    async fn increment_next_jobs_count(&self) -> Result<(), CacheError> {
        self.bump(NEXT_JOBS_COUNT).await
    }

    async fn page_count(&self, domain_id: Option<i64>) -> Result<i64, CacheError> {
        sqlx::query_scalar::<_, i64>("SELECT value FROM counters WHERE name = $1")
            .bind(page_count_key(domain_id))
            .fetch_optional(&self.pool)
            .await
            .map(|v| v.unwrap_or(0))
            .map_err(|e| CacheError::Unavailable(e.to_string()))
    }
}
