use async_trait::async_trait;
use revq_db::PgPool;
use tracing::warn;

use super::{Catalog, CatalogError};
use crate::models::{Domain, Limiter, NewDomain, NewPage, Page, PageCandidate, Settings, Worker};

/// PostgreSQL-backed catalog. One pool, no state across calls.
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Runs `op` under the shared retry budget for transient lock failures.
async fn with_write_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T, CatalogError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 0u32;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if revq_db::is_transient(&e) && attempt + 1 < revq_db::WRITE_RETRY_ATTEMPTS => {
                attempt += 1;
                warn!(
                    target: "revq_catalog",
                    "transient lock failure on {} (attempt {}): {}; retrying",
                    what, attempt, e
                );
            }
            Err(e) => return Err(CatalogError::from_sqlx(e)),
        }
    }
}

const PAGE_COLUMNS: &str =
    "id, uuid, url, url_hash, domain_id, score, last_review_date, last_review_uuid, \
     violations_count, created_date";

#[async_trait]
impl Catalog for PgCatalog {
    async fn active_domains(&self) -> Result<Vec<Domain>, CatalogError> {
        sqlx::query_as::<_, Domain>(
            "SELECT id, name, url, url_hash, is_active
               FROM domains
              WHERE is_active
              ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, CatalogError> {
        let bare = name.trim_end_matches('/');
        let slashed = format!("{}/", bare);
        sqlx::query_as::<_, Domain>(
            "SELECT id, name, url, url_hash, is_active
               FROM domains
              WHERE name = $1 OR name = $2 OR name = $3
              ORDER BY id
              LIMIT 1",
        )
        .bind(name)
        .bind(bare)
        .bind(&slashed)
        .fetch_optional(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn insert_domain(&self, new: NewDomain) -> Result<Domain, CatalogError> {
        sqlx::query_as::<_, Domain>(
            "INSERT INTO domains (name, url, url_hash)
             VALUES ($1, $2, $3)
             RETURNING id, name, url, url_hash, is_active",
        )
        .bind(&new.name)
        .bind(&new.url)
        .bind(&new.url_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn top_pages_for_domain(
        &self,
        domain_id: i64,
        limit: usize,
    ) -> Result<Vec<PageCandidate>, CatalogError> {
        sqlx::query_as::<_, PageCandidate>(
            "SELECT uuid, url, score, last_review_date, domain_id
               FROM pages
              WHERE domain_id = $1
              ORDER BY score DESC, id ASC
              LIMIT $2",
        )
        .bind(domain_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn page_by_url_hash(&self, url_hash: &str) -> Result<Option<Page>, CatalogError> {
        let sql = format!("SELECT {PAGE_COLUMNS} FROM pages WHERE url_hash = $1");
        sqlx::query_as::<_, Page>(&sql)
            .bind(url_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(CatalogError::from_sqlx)
    }

    async fn insert_page(&self, new: NewPage) -> Result<Page, CatalogError> {
        let sql = format!(
            "INSERT INTO pages (uuid, url, url_hash, domain_id, score)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING {PAGE_COLUMNS}"
        );
        sqlx::query_as::<_, Page>(&sql)
            .bind(new.uuid)
            .bind(&new.url)
            .bind(&new.url_hash)
            .bind(new.domain_id)
            .bind(new.score)
            .fetch_one(&self.pool)
            .await
            .map_err(CatalogError::from_sqlx)
    }

    async fn add_page_score(&self, page_id: i64, delta: f64) -> Result<(), CatalogError> {
        let pool = &self.pool;
        with_write_retry("add_page_score", || async move {
            sqlx::query("UPDATE pages SET score = score + $2 WHERE id = $1")
                .bind(page_id)
                .bind(delta)
                .execute(pool)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn add_to_all_page_scores(&self, delta: f64) -> Result<(), CatalogError> {
        let pool = &self.pool;
        with_write_retry("add_to_all_page_scores", || async move {
            sqlx::query("UPDATE pages SET score = score + $1")
                .bind(delta)
                .execute(pool)
                .await
                .map(|_| ())
        })
        .await
    }

    async fn page_count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM pages")
            .fetch_one(&self.pool)
            .await
            .map_err(CatalogError::from_sqlx)
    }

    async fn pages_in_active_domains(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PageCandidate>, CatalogError> {
        sqlx::query_as::<_, PageCandidate>(
            "SELECT p.uuid, p.url, p.score, p.last_review_date, p.domain_id
               FROM pages p
               JOIN domains d ON d.id = p.domain_id
              WHERE d.is_active
              ORDER BY p.score DESC, p.id ASC
              LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn pages_in_active_domains_count(&self) -> Result<i64, CatalogError> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*)
               FROM pages p
               JOIN domains d ON d.id = p.domain_id
              WHERE d.is_active",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(CatalogError::from_sqlx)
    }

    async fn workers(&self) -> Result<Vec<Worker>, CatalogError> {
        sqlx::query_as::<_, Worker>("SELECT id, current_url, last_ping FROM workers ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(CatalogError::from_sqlx)
    }

    async fn limiters(&self) -> Result<Vec<Limiter>, CatalogError> {
        sqlx::query_as::<_, Limiter>("SELECT id, url, value FROM limiters ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(CatalogError::from_sqlx)
    }

    async fn upsert_limiter(&self, url: &str, value: i32) -> Result<(), CatalogError> {
        let pool = &self.pool;
        with_write_retry("upsert_limiter", || async move {
            sqlx::query(
                "INSERT INTO limiters (url, value) VALUES ($1, $2)
                 ON CONFLICT (url) DO UPDATE SET value = EXCLUDED.value",
            )
            .bind(url)
            .bind(value)
            .execute(pool)
            .await
            .map(|_| ())
        })
        .await
    }

    async fn settings(&self) -> Result<Settings, CatalogError> {
        sqlx::query_as::<_, Settings>("SELECT lambda_score FROM settings WHERE id = 1")
            .fetch_optional(&self.pool)
            .await
            .map(|row| row.unwrap_or_default())
            .map_err(CatalogError::from_sqlx)
    }

    async fn consume_lambda_score(&self, expected: f64) -> Result<bool, CatalogError> {
        let pool = &self.pool;
        let result = with_write_retry("consume_lambda_score", || async move {
            sqlx::query("UPDATE settings SET lambda_score = 0 WHERE id = 1 AND lambda_score = $1")
                .bind(expected)
                .execute(pool)
                .await
        })
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
