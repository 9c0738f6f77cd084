pub mod mem;
pub mod pg;

pub use mem::MemCatalog;
pub use pg::PgCatalog;

use async_trait::async_trait;

use crate::models::{Domain, Limiter, NewDomain, NewPage, Page, PageCandidate, Settings, Worker};

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    /// Unique-key collision on insert. Callers resolve the lost race by
    /// re-reading the winning row.
    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// Anything else, including transient lock failures that survived
    /// the retry budget.
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

impl CatalogError {
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if revq_db::is_unique_violation(&err) {
            Self::Duplicate(err.to_string())
        } else {
            Self::Unavailable(err.to_string())
        }
    }
}

/// Durable store of domains, pages, workers, limiters and settings.
///
/// Implementations must keep the write discipline: contended writes are
/// retried while [`revq_db::is_transient`] holds, up to
/// [`revq_db::WRITE_RETRY_ATTEMPTS`] times, then surfaced as
/// [`CatalogError::Unavailable`].
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Active domains in stable id order.
    async fn active_domains(&self) -> Result<Vec<Domain>, CatalogError>;

    /// Domain lookup tolerant of a trailing slash: matches `name`,
    /// `name` without a trailing `/`, and `name` with one appended.
    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, CatalogError>;

    async fn insert_domain(&self, new: NewDomain) -> Result<Domain, CatalogError>;

    /// Up to `limit` pages of the domain, score descending, ties broken
    /// by id ascending.
    async fn top_pages_for_domain(
        &self,
        domain_id: i64,
        limit: usize,
    ) -> Result<Vec<PageCandidate>, CatalogError>;

    async fn page_by_url_hash(&self, url_hash: &str) -> Result<Option<Page>, CatalogError>;

    async fn insert_page(&self, new: NewPage) -> Result<Page, CatalogError>;

    /// `score += delta` on one row, under the transient-retry discipline.
    async fn add_page_score(&self, page_id: i64, delta: f64) -> Result<(), CatalogError>;

    /// `score += delta` on every row, as a single statement.
    async fn add_to_all_page_scores(&self, delta: f64) -> Result<(), CatalogError>;

    async fn page_count(&self) -> Result<i64, CatalogError>;

    /// Union of all active domains' pages by global score descending.
    async fn pages_in_active_domains(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PageCandidate>, CatalogError>;

    async fn pages_in_active_domains_count(&self) -> Result<i64, CatalogError>;

    async fn workers(&self) -> Result<Vec<Worker>, CatalogError>;

    async fn limiters(&self) -> Result<Vec<Limiter>, CatalogError>;

    async fn upsert_limiter(&self, url: &str, value: i32) -> Result<(), CatalogError>;

    async fn settings(&self) -> Result<Settings, CatalogError>;

    /// Zero `lambda_score` only if it still holds `expected`. Returns
    /// whether this caller won the swap.
    async fn consume_lambda_score(&self, expected: f64) -> Result<bool, CatalogError>;
}
