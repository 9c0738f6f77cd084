pub mod mem;
pub mod pg;

pub use mem::MemCache;
pub use pg::PgCache;

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Proof of ownership of a URL's review slot. Holding one means no other
/// worker will be handed the same URL until the lock expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockToken {
    pub url: String,
    pub owner: Uuid,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Ephemeral coordination state shared by the fleet: per-URL review
/// locks and advisory counters.
///
/// Lock atomicity is a correctness requirement; counters are best-effort
/// and their reads may be stale.
#[async_trait]
pub trait ReviewCache: Send + Sync {
    /// Atomic create-if-absent with expiration. `None` means another
    /// worker owns the URL right now.
    async fn try_lock(&self, url: &str, ttl: Duration) -> Result<Option<LockToken>, CacheError>;

    async fn increment_page_count(&self, domain_id: Option<i64>) -> Result<(), CacheError>;

    async fn increment_next_jobs_count(&self) -> Result<(), CacheError>;

    async fn page_count(&self, domain_id: Option<i64>) -> Result<i64, CacheError>;
}

pub(crate) const NEXT_JOBS_COUNT: &str = "next_jobs_count";

pub(crate) fn page_count_key(domain_id: Option<i64>) -> String {
    match domain_id {
        Some(id) => format!("page_count:{id}"),
        None => "page_count".to_string(),
    }
}
