use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{page_count_key, CacheError, LockToken, ReviewCache, NEXT_JOBS_COUNT};

/// Process-local cache. Locks expire passively: an expired entry is
/// replaced by the next try_lock on its URL.
#[derive(Default)]
pub struct MemCache {
    locks: Mutex<HashMap<String, MemLock>>,
    counters: Mutex<HashMap<String, i64>>,
}

struct MemLock {
    owner: Uuid,
    expires_at: Instant,
}

impl MemCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `url` is currently locked (test helper).
    pub async fn is_locked(&self, url: &str) -> bool {
        let locks = self.locks.lock().await;
        locks
            .get(url)
            .map(|l| l.expires_at > Instant::now())
            .unwrap_or(false)
    }

    async fn bump(&self, key: &str) {
        let mut counters = self.counters.lock().await;
        *counters.entry(key.to_string()).or_insert(0) += 1;
    }
}

#[async_trait]
impl ReviewCache for MemCache {
    async fn try_lock(&self, url: &str, ttl: Duration) -> Result<Option<LockToken>, CacheError> {
        let now = Instant::now();
        let mut locks = self.locks.lock().await;
        if let Some(existing) = locks.get(url) {
            if existing.expires_at > now {
                return Ok(None);
            }
        }
        let owner = Uuid::new_v4();
        locks.insert(
            url.to_string(),
            MemLock {
                owner,
                expires_at: now + ttl,
            },
        );
        Ok(Some(LockToken {
            url: url.to_string(),
            owner,
        }))
    }

    async fn increment_page_count(&self, domain_id: Option<i64>) -> Result<(), CacheError> {
        self.bump(&page_count_key(domain_id)).await;
        Ok(())
    }

    async fn increment_next_jobs_count(&self) -> Result<(), CacheError> {
        self.bump(NEXT_JOBS_COUNT).await;
        Ok(())
    }

    async fn page_count(&self, domain_id: Option<i64>) -> Result<i64, CacheError> {
        let counters = self.counters.lock().await;
        Ok(counters.get(&page_count_key(domain_id)).copied().unwrap_or(0))
    }
}
