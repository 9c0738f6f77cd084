pub mod limiter;

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::cache::{LockToken, ReviewCache};
use crate::catalog::{Catalog, CatalogError};
use crate::models::PageCandidate;

pub const DEFAULT_AVG_LINKS_PER_PAGE: u32 = 10;
pub const DEFAULT_JOB_LIST_PAGE_SIZE: i64 = 200;

/// What an idle worker receives: the page to review and the lock that
/// proves the URL is theirs until the lock expires.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub page: Uuid,
    pub url: String,
    pub score: f64,
    pub lock: LockToken,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Produces the next job for an idle worker: candidate assembly,
/// round-robin fairness across domains, limiter admission, and lock
/// acquisition through the cache.
pub struct Dispatcher {
    catalog: Arc<dyn Catalog>,
    cache: Arc<dyn ReviewCache>,
}

impl Dispatcher {
    pub fn new(catalog: Arc<dyn Catalog>, cache: Arc<dyn ReviewCache>) -> Self {
        Self { catalog, cache }
    }

    /// Pick the next page to review, or `None` when every candidate is
    /// limited, locked, or absent.
    ///
    /// Candidates are the top-`W` pages of each active domain (`W` =
    /// fleet size), interleaved round-robin so one hot domain cannot
    /// monopolize the head of the queue. The cache's create-if-absent
    /// lock is the serialization point across concurrent callers.
    pub async fn next_job(
        &self,
        lock_ttl: Duration,
        avg_links_per_page: u32,
    ) -> Result<Option<Job>, DispatchError> {
        let settings = self.catalog.settings().await?;
        let workers = self.catalog.workers().await?;
        let domains = self.catalog.active_domains().await?;

        let mut per_domain = Vec::with_capacity(domains.len());
        for domain in &domains {
            let pages = self
                .catalog
                .top_pages_for_domain(domain.id, workers.len())
                .await?;
            if !pages.is_empty() {
                per_domain.push(pages);
            }
        }

        let candidates = interleave(per_domain);
        if candidates.is_empty() {
            return Ok(None);
        }

        // A pending lambda boost is consumed only when nothing on offer
        // reaches it: scores re-enter the interesting range while the
        // relative order is preserved.
        if settings.lambda_score > 0.0 && candidates[0].score < settings.lambda_score {
            self.update_pages_score_by(settings.lambda_score).await?;
        }

        let limiters = self.catalog.limiters().await?;
        let domain_urls: HashMap<i64, &str> =
            domains.iter().map(|d| (d.id, d.url.as_str())).collect();

        for cand in &candidates {
            let Some(domain_url) = domain_urls.get(&cand.domain_id) else {
                continue;
            };
            if !limiter::admits(&workers, &limiters, domain_url, avg_links_per_page) {
                debug!(target: "revq_dispatch", "domain at capacity, skipping {}", cand.url);
                continue;
            }
            match self.cache.try_lock(&cand.url, lock_ttl).await {
                Ok(Some(lock)) => {
                    return Ok(Some(Job {
                        page: cand.uuid,
                        url: cand.url.clone(),
                        score: cand.score,
                        lock,
                    }));
                }
                Ok(None) => continue,
                Err(e) => {
                    // fail closed: an unreachable cache must not hand
                    // the same URL to two workers
                    warn!(target: "revq_dispatch", "lock attempt for {} failed: {e}", cand.url);
                    continue;
                }
            }
        }

        Ok(None)
    }

    /// Non-dispatching view for operator tooling: all active domains'
    /// pages by global score, paginated. No locking, no limiter check.
    pub async fn next_job_list(
        &self,
        current_page: i64,
        page_size: i64,
    ) -> Result<Vec<PageCandidate>, DispatchError> {
        let offset = (current_page.max(1) - 1) * page_size;
        Ok(self
            .catalog
            .pages_in_active_domains(offset, page_size)
            .await?)
    }

    /// Count of pages in active domains.
    pub async fn next_jobs_count(&self) -> Result<i64, DispatchError> {
        Ok(self.catalog.pages_in_active_domains_count().await?)
    }

    /// Consume a pending lambda boost: zero the settings row, then
    /// spread the boost uniformly across every page. Losing the swap
    /// means another process already consumed it.
    pub async fn update_pages_score_by(&self, score: f64) -> Result<(), DispatchError> {
        if !self.catalog.consume_lambda_score(score).await? {
            return Ok(());
        }
        let count = self.catalog.page_count().await?;
        if count == 0 {
            return Ok(());
        }
        self.catalog
            .add_to_all_page_scores(score / count as f64)
            .await?;
        Ok(())
    }
}

/// Round-robin interleave: position 0 of every domain in order, then
/// position 1, and so on, dropping a domain once exhausted. Never a
/// global sort — that would let one domain's scores crowd out the rest.
fn interleave(per_domain: Vec<Vec<PageCandidate>>) -> Vec<PageCandidate> {
    let total = per_domain.iter().map(Vec::len).sum();
    let mut queues: Vec<VecDeque<PageCandidate>> =
        per_domain.into_iter().map(VecDeque::from).collect();
    let mut out = Vec::with_capacity(total);
    while !queues.is_empty() {
        let mut i = 0;
        while i < queues.len() {
            if let Some(candidate) = queues[i].pop_front() {
                out.push(candidate);
            }
            if queues[i].is_empty() {
                queues.remove(i);
            } else {
                i += 1;
            }
        }
    }
    out
}
