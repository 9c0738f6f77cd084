use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Catalog, CatalogError};
use crate::ingest::url::sha512_hex;
use crate::models::{Domain, Limiter, NewDomain, NewPage, Page, PageCandidate, Settings, Worker};

/// In-memory catalog with the same contract as the PostgreSQL one.
/// Backs the test suite and single-process runs.
#[derive(Default)]
pub struct MemCatalog {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    domains: Vec<Domain>,
    pages: Vec<Page>,
    workers: Vec<Worker>,
    limiters: Vec<Limiter>,
    lambda_score: f64,
    next_domain_id: i64,
    next_page_id: i64,
    next_worker_id: i64,
    next_limiter_id: i64,
}

fn by_score_desc_id_asc(a: &Page, b: &Page) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then(a.id.cmp(&b.id))
}

fn candidate(page: &Page) -> PageCandidate {
    PageCandidate {
        uuid: page.uuid,
        url: page.url.clone(),
        score: page.score,
        last_review_date: page.last_review_date,
        domain_id: page.domain_id,
    }
}

impl MemCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_domain(&self, name: &str, url: &str, is_active: bool) -> Domain {
        let mut state = self.state.lock().await;
        state.next_domain_id += 1;
        let domain = Domain {
            id: state.next_domain_id,
            name: name.to_string(),
            url: url.to_string(),
            url_hash: sha512_hex(url),
            is_active,
        };
        state.domains.push(domain.clone());
        domain
    }

    pub async fn add_worker(&self, current_url: Option<&str>) -> Worker {
        let mut state = self.state.lock().await;
        state.next_worker_id += 1;
        let worker = Worker {
            id: state.next_worker_id,
            current_url: current_url.map(str::to_string),
            last_ping: Some(Utc::now()),
        };
        state.workers.push(worker.clone());
        worker
    }

    pub async fn set_worker_url(&self, worker_id: i64, url: Option<&str>) {
        let mut state = self.state.lock().await;
        if let Some(worker) = state.workers.iter_mut().find(|w| w.id == worker_id) {
            worker.current_url = url.map(str::to_string);
        }
    }

    pub async fn set_lambda_score(&self, value: f64) {
        self.state.lock().await.lambda_score = value;
    }

    pub async fn page_score(&self, uuid: Uuid) -> Option<f64> {
        self.state
            .lock()
            .await
            .pages
            .iter()
            .find(|p| p.uuid == uuid)
            .map(|p| p.score)
    }
}

#[async_trait]
impl Catalog for MemCatalog {
    async fn active_domains(&self) -> Result<Vec<Domain>, CatalogError> {
        let state = self.state.lock().await;
        let mut out: Vec<Domain> = state
            .domains
            .iter()
            .filter(|d| d.is_active)
            .cloned()
            .collect();
        out.sort_by_key(|d| d.id);
        Ok(out)
    }

    async fn domain_by_name(&self, name: &str) -> Result<Option<Domain>, CatalogError> {
        let bare = name.trim_end_matches('/');
        let slashed = format!("{}/", bare);
        let state = self.state.lock().await;
        Ok(state
            .domains
            .iter()
            .find(|d| d.name == name || d.name == bare || d.name == slashed)
            .cloned())
    }

    async fn insert_domain(&self, new: NewDomain) -> Result<Domain, CatalogError> {
        let mut state = self.state.lock().await;
        if state.domains.iter().any(|d| d.name == new.name) {
            return Err(CatalogError::Duplicate(format!("domains.name = {}", new.name)));
        }
        state.next_domain_id += 1;
        let domain = Domain {
            id: state.next_domain_id,
            name: new.name,
            url: new.url,
            url_hash: new.url_hash,
            is_active: true,
        };
        state.domains.push(domain.clone());
        Ok(domain)
    }

    async fn top_pages_for_domain(
        &self,
        domain_id: i64,
        limit: usize,
    ) -> Result<Vec<PageCandidate>, CatalogError> {
        let state = self.state.lock().await;
        let mut pages: Vec<&Page> = state
            .pages
            .iter()
            .filter(|p| p.domain_id == domain_id)
            .collect();
        pages.sort_by(|a, b| by_score_desc_id_asc(a, b));
        Ok(pages.into_iter().take(limit).map(candidate).collect())
    }

    async fn page_by_url_hash(&self, url_hash: &str) -> Result<Option<Page>, CatalogError> {
        let state = self.state.lock().await;
        Ok(state.pages.iter().find(|p| p.url_hash == url_hash).cloned())
    }

    async fn insert_page(&self, new: NewPage) -> Result<Page, CatalogError> {
        let mut state = self.state.lock().await;
        if state.pages.iter().any(|p| p.url_hash == new.url_hash) {
            return Err(CatalogError::Duplicate(format!(
                "pages.url_hash = {}",
                new.url_hash
            )));
        }
        state.next_page_id += 1;
        let page = Page {
            id: state.next_page_id,
            uuid: new.uuid,
            url: new.url,
            url_hash: new.url_hash,
            domain_id: new.domain_id,
            score: new.score,
            last_review_date: None,
            last_review_uuid: None,
            violations_count: 0,
            created_date: Utc::now(),
        };
        state.pages.push(page.clone());
        Ok(page)
    }

    async fn add_page_score(&self, page_id: i64, delta: f64) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        if let Some(page) = state.pages.iter_mut().find(|p| p.id == page_id) {
            page.score += delta;
        }
        Ok(())
    }

    async fn add_to_all_page_scores(&self, delta: f64) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        for page in &mut state.pages {
            page.score += delta;
        }
        Ok(())
    }

    async fn page_count(&self) -> Result<i64, CatalogError> {
        Ok(self.state.lock().await.pages.len() as i64)
    }

    async fn pages_in_active_domains(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<PageCandidate>, CatalogError> {
        let state = self.state.lock().await;
        let active: Vec<i64> = state
            .domains
            .iter()
            .filter(|d| d.is_active)
            .map(|d| d.id)
            .collect();
        let mut pages: Vec<&Page> = state
            .pages
            .iter()
            .filter(|p| active.contains(&p.domain_id))
            .collect();
        pages.sort_by(|a, b| by_score_desc_id_asc(a, b));
        Ok(pages
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(candidate)
            .collect())
    }

    async fn pages_in_active_domains_count(&self) -> Result<i64, CatalogError> {
        let state = self.state.lock().await;
        let active: Vec<i64> = state
            .domains
            .iter()
            .filter(|d| d.is_active)
            .map(|d| d.id)
            .collect();
        Ok(state
            .pages
            .iter()
            .filter(|p| active.contains(&p.domain_id))
            .count() as i64)
    }

    async fn workers(&self) -> Result<Vec<Worker>, CatalogError> {
        Ok(self.state.lock().await.workers.clone())
    }

    async fn limiters(&self) -> Result<Vec<Limiter>, CatalogError> {
        Ok(self.state.lock().await.limiters.clone())
    }

    async fn upsert_limiter(&self, url: &str, value: i32) -> Result<(), CatalogError> {
        let mut state = self.state.lock().await;
        if let Some(limiter) = state.limiters.iter_mut().find(|l| l.url == url) {
            limiter.value = value;
        } else {
            state.next_limiter_id += 1;
            let limiter = Limiter {
                id: state.next_limiter_id,
                url: url.to_string(),
                value,
            };
            state.limiters.push(limiter);
        }
        Ok(())
    }

    async fn settings(&self) -> Result<Settings, CatalogError> {
        Ok(Settings {
            lambda_score: self.state.lock().await.lambda_score,
        })
    }

    async fn consume_lambda_score(&self, expected: f64) -> Result<bool, CatalogError> {
        let mut state = self.state.lock().await;
        if state.lambda_score == expected {
            state.lambda_score = 0.0;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
