pub mod url;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::cache::ReviewCache;
use crate::catalog::{Catalog, CatalogError};
use crate::events::{Event, Publisher};
use crate::fetch::Fetcher;
use crate::models::{Domain, NewDomain, NewPage};

const BODY_EXCERPT_CHARS: usize = 256;

/// Result of an ingestion attempt. Rejections are ordinary return
/// values; only catalog faults are errors.
#[derive(Debug, Clone, PartialEq)]
pub enum AddPageOutcome {
    Accepted { page: Uuid },
    Rejected(Rejection),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rejection {
    pub url: String,
    #[serde(flatten)]
    pub reason: RejectReason,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectReason {
    InvalidUrl {
        #[serde(skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        details: String,
    },
    Redirect {
        #[serde(rename = "effectiveUrl")]
        effective_url: String,
    },
    FetchError {
        details: String,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),
}

/// Adds pages (and lazily their domains) on demand, keeping the
/// selectable set coherent: URL validation, fetch probe, redirect check,
/// upsert with score accumulation, counter maintenance, events.
pub struct Ingester {
    catalog: Arc<dyn Catalog>,
    cache: Arc<dyn ReviewCache>,
    fetcher: Arc<dyn Fetcher>,
    publisher: Arc<dyn Publisher>,
    default_connections: i32,
}

impl Ingester {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        cache: Arc<dyn ReviewCache>,
        fetcher: Arc<dyn Fetcher>,
        publisher: Arc<dyn Publisher>,
        default_connections: i32,
    ) -> Self {
        Self {
            catalog,
            cache,
            fetcher,
            publisher,
            default_connections,
        }
    }

    pub async fn add_page(&self, page_url: &str, score: f64) -> Result<AddPageOutcome, IngestError> {
        let Some((domain_name, domain_url)) = url::domain_from_url(page_url) else {
            return Ok(rejected(
                page_url,
                RejectReason::InvalidUrl {
                    status: None,
                    details: "domain name could not be determined".to_string(),
                },
            ));
        };

        debug!(target: "revq_ingest", "probing {}", page_url);
        let fetched = match self.fetcher.fetch(page_url).await {
            Ok(fetched) => fetched,
            Err(e) => {
                return Ok(rejected(
                    page_url,
                    RejectReason::FetchError {
                        details: e.to_string(),
                    },
                ))
            }
        };

        if fetched.status >= 400 {
            return Ok(rejected(
                page_url,
                RejectReason::InvalidUrl {
                    status: Some(fetched.status),
                    details: body_excerpt(&fetched.body),
                },
            ));
        }

        // A moved page is not ingested under the requested URL; the
        // caller re-ingests the canonical one.
        if !same_url(&fetched.effective_url, page_url) {
            return Ok(rejected(
                page_url,
                RejectReason::Redirect {
                    effective_url: fetched.effective_url,
                },
            ));
        }

        let domain = self.ensure_domain(&domain_name, &domain_url).await?;
        let page = self.insert_or_update_page(page_url, score, &domain).await?;
        Ok(AddPageOutcome::Accepted { page })
    }

    /// Domain lookup tolerant of trailing slashes; inserts on miss,
    /// emitting the `new-domain` event and seeding the default limiter.
    async fn ensure_domain(&self, name: &str, domain_url: &str) -> Result<Domain, IngestError> {
        if let Some(domain) = self.catalog.domain_by_name(name).await? {
            return Ok(domain);
        }

        let new = NewDomain {
            name: name.to_string(),
            url: domain_url.to_string(),
            url_hash: url::sha512_hex(domain_url),
        };
        match self.catalog.insert_domain(new).await {
            Ok(domain) => {
                self.publisher.publish(&Event::NewDomain {
                    domain_url: domain_url.to_string(),
                });
                self.catalog
                    .upsert_limiter(domain_url, self.default_connections)
                    .await?;
                Ok(domain)
            }
            Err(CatalogError::Duplicate(_)) => {
                // lost the insert race; the winner's row is visible now
                self.catalog.domain_by_name(name).await?.ok_or_else(|| {
                    IngestError::Catalog(CatalogError::Unavailable(
                        "domain vanished after duplicate insert".to_string(),
                    ))
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Existing pages accumulate score; new pages get a row, counter
    /// bumps and the `new-page` event. A duplicate-key race lands in the
    /// existing-page branch.
    async fn insert_or_update_page(
        &self,
        page_url: &str,
        score: f64,
        domain: &Domain,
    ) -> Result<Uuid, IngestError> {
        let url_hash = url::sha512_hex(page_url);

        if let Some(existing) = self.catalog.page_by_url_hash(&url_hash).await? {
            self.catalog.add_page_score(existing.id, score).await?;
            return Ok(existing.uuid);
        }

        let new = NewPage {
            uuid: Uuid::new_v4(),
            url: page_url.to_string(),
            url_hash: url_hash.clone(),
            domain_id: domain.id,
            score,
        };
        match self.catalog.insert_page(new).await {
            Ok(page) => {
                // counters are advisory: log and move on
                if let Err(e) = self.cache.increment_page_count(Some(domain.id)).await {
                    warn!(target: "revq_ingest", "page_count({}) not bumped: {e}", domain.id);
                }
                if let Err(e) = self.cache.increment_page_count(None).await {
                    warn!(target: "revq_ingest", "page_count not bumped: {e}");
                }
                if let Err(e) = self.cache.increment_next_jobs_count().await {
                    warn!(target: "revq_ingest", "next_jobs_count not bumped: {e}");
                }
                self.publisher.publish(&Event::NewPage {
                    page_url: page_url.to_string(),
                });
                Ok(page.uuid)
            }
            Err(CatalogError::Duplicate(details)) => {
                info!(target: "revq_ingest", "page insert lost a race ({details}); updating winner");
                match self.catalog.page_by_url_hash(&url_hash).await? {
                    Some(existing) => {
                        self.catalog.add_page_score(existing.id, score).await?;
                        Ok(existing.uuid)
                    }
                    None => Err(IngestError::Catalog(CatalogError::Unavailable(
                        "page vanished after duplicate insert".to_string(),
                    ))),
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn rejected(url: &str, reason: RejectReason) -> AddPageOutcome {
    AddPageOutcome::Rejected(Rejection {
        url: url.to_string(),
        reason,
    })
}

/// URL equality tolerant of one trailing slash, so a fetcher that
/// normalizes `http://host` to `http://host/` does not read as a
/// redirect.
fn same_url(a: &str, b: &str) -> bool {
    a == b || a.trim_end_matches('/') == b.trim_end_matches('/')
}

fn body_excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_CHARS)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_is_not_a_redirect() {
        assert!(same_url("http://a.com/", "http://a.com"));
        assert!(same_url("http://a.com/x", "http://a.com/x"));
        assert!(!same_url("http://a.com/y", "http://a.com/x"));
    }

    #[test]
    fn body_excerpt_truncates_and_survives_bad_utf8() {
        let long = "x".repeat(1000);
        assert_eq!(body_excerpt(long.as_bytes()).len(), BODY_EXCERPT_CHARS);
        let bad = [0xff, 0xfe, b'o', b'k'];
        assert!(body_excerpt(&bad).ends_with("ok"));
    }

    #[test]
    fn rejection_json_carries_reason_fields() {
        let rej = Rejection {
            url: "http://a/x".to_string(),
            reason: RejectReason::Redirect {
                effective_url: "http://a/y".to_string(),
            },
        };
        let json = serde_json::to_value(&rej).unwrap();
        assert_eq!(json["reason"], "redirect");
        assert_eq!(json["effectiveUrl"], "http://a/y");
        assert_eq!(json["url"], "http://a/x");

        let rej = Rejection {
            url: "http://a/x".to_string(),
            reason: RejectReason::InvalidUrl {
                status: Some(404),
                details: "not found".to_string(),
            },
        };
        let json = serde_json::to_value(&rej).unwrap();
        assert_eq!(json["reason"], "invalid_url");
        assert_eq!(json["status"], 404);
    }
}
