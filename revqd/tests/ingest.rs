use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use revqd::cache::{MemCache, ReviewCache};
use revqd::catalog::{Catalog, MemCatalog};
use revqd::dispatch::Dispatcher;
use revqd::events::{Event, Publisher};
use revqd::fetch::{FetchError, FetchedPage, Fetcher};
use revqd::ingest::url::sha512_hex;
use revqd::ingest::{AddPageOutcome, Ingester, RejectReason};

const DEFAULT_CONNECTIONS: i32 = 2;

/// Canned probe: answers every URL the same way.
struct StaticFetcher {
    status: u16,
    body: &'static str,
    redirect_to: Option<&'static str>,
    fail_with: Option<&'static str>,
}

impl StaticFetcher {
    fn ok() -> Self {
        Self {
            status: 200,
            body: "<html>ok</html>",
            redirect_to: None,
            fail_with: None,
        }
    }

    fn status(status: u16, body: &'static str) -> Self {
        Self {
            status,
            body,
            redirect_to: None,
            fail_with: None,
        }
    }

    fn redirect(to: &'static str) -> Self {
        Self {
            redirect_to: Some(to),
            ..Self::ok()
        }
    }

    fn failing(details: &'static str) -> Self {
        Self {
            fail_with: Some(details),
            ..Self::ok()
        }
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        if let Some(details) = self.fail_with {
            return Err(FetchError::Transport(details.to_string()));
        }
        Ok(FetchedPage {
            status: self.status,
            body: self.body.as_bytes().to_vec(),
            effective_url: self.redirect_to.unwrap_or(url).to_string(),
        })
    }
}

#[derive(Default)]
struct CollectingPublisher {
    events: Mutex<Vec<Event>>,
}

impl CollectingPublisher {
    fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }
}

impl Publisher for CollectingPublisher {
    fn publish(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct Harness {
    catalog: Arc<MemCatalog>,
    cache: Arc<MemCache>,
    publisher: Arc<CollectingPublisher>,
    ingester: Ingester,
}

fn harness(fetcher: StaticFetcher) -> Harness {
    let catalog = Arc::new(MemCatalog::new());
    let cache = Arc::new(MemCache::new());
    let publisher = Arc::new(CollectingPublisher::default());
    let ingester = Ingester::new(
        catalog.clone(),
        cache.clone(),
        Arc::new(fetcher),
        publisher.clone(),
        DEFAULT_CONNECTIONS,
    );
    Harness {
        catalog,
        cache,
        publisher,
        ingester,
    }
}

fn accepted(outcome: AddPageOutcome) -> uuid::Uuid {
    match outcome {
        AddPageOutcome::Accepted { page } => page,
        AddPageOutcome::Rejected(rejection) => panic!("unexpected rejection: {rejection:?}"),
    }
}

#[tokio::test]
async fn first_ingestion_creates_domain_page_limiter_and_events() {
    let h = harness(StaticFetcher::ok());
    let url = "http://my-site.com/about.html";

    let page = accepted(h.ingester.add_page(url, 1.5).await.unwrap());

    let row = h
        .catalog
        .page_by_url_hash(&sha512_hex(url))
        .await
        .unwrap()
        .expect("page row");
    assert_eq!(row.uuid, page);
    assert_eq!(row.score, 1.5);

    let domain = h
        .catalog
        .domain_by_name("my-site.com")
        .await
        .unwrap()
        .expect("domain row");
    assert_eq!(domain.url, "http://my-site.com");
    assert_eq!(row.domain_id, domain.id);

    let limiters = h.catalog.limiters().await.unwrap();
    assert_eq!(limiters.len(), 1);
    assert_eq!(limiters[0].url, "http://my-site.com");
    assert_eq!(limiters[0].value, DEFAULT_CONNECTIONS);

    assert_eq!(
        h.publisher.events(),
        vec![
            Event::NewDomain {
                domain_url: "http://my-site.com".to_string()
            },
            Event::NewPage {
                page_url: url.to_string()
            },
        ]
    );

    assert_eq!(h.cache.page_count(None).await.unwrap(), 1);
    assert_eq!(h.cache.page_count(Some(domain.id)).await.unwrap(), 1);
}

#[tokio::test]
async fn repeated_ingestion_accumulates_score_on_one_row() {
    let h = harness(StaticFetcher::ok());
    let url = "http://my-site.com/about.html";

    let first = accepted(h.ingester.add_page(url, 2.0).await.unwrap());
    let second = accepted(h.ingester.add_page(url, 3.0).await.unwrap());
    assert_eq!(first, second);

    let row = h
        .catalog
        .page_by_url_hash(&sha512_hex(url))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.score, 5.0);
    assert_eq!(h.catalog.page_count().await.unwrap(), 1);

    // no second new-page event, no second counter bump
    assert_eq!(h.publisher.events().len(), 2);
    assert_eq!(h.cache.page_count(None).await.unwrap(), 1);
}

#[tokio::test]
async fn zero_score_ingestion_is_idempotent() {
    let h = harness(StaticFetcher::ok());
    let url = "http://my-site.com/";

    accepted(h.ingester.add_page(url, 0.0).await.unwrap());
    accepted(h.ingester.add_page(url, 0.0).await.unwrap());

    let row = h
        .catalog
        .page_by_url_hash(&sha512_hex(url))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.score, 0.0);
    assert_eq!(h.catalog.page_count().await.unwrap(), 1);
}

#[tokio::test]
async fn unparseable_urls_are_rejected_before_fetching() {
    let h = harness(StaticFetcher::ok());

    let outcome = h.ingester.add_page("not a url at all", 0.0).await.unwrap();
    match outcome {
        AddPageOutcome::Rejected(rejection) => match rejection.reason {
            RejectReason::InvalidUrl { status, .. } => assert_eq!(status, None),
            other => panic!("wrong reason: {other:?}"),
        },
        AddPageOutcome::Accepted { .. } => panic!("accepted an unparseable url"),
    }
    assert_eq!(h.catalog.page_count().await.unwrap(), 0);
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn error_statuses_are_rejected_with_the_body_excerpt() {
    let h = harness(StaticFetcher::status(404, "nothing here"));

    let outcome = h
        .ingester
        .add_page("http://my-site.com/missing.html", 1.0)
        .await
        .unwrap();
    match outcome {
        AddPageOutcome::Rejected(rejection) => match rejection.reason {
            RejectReason::InvalidUrl { status, details } => {
                assert_eq!(status, Some(404));
                assert_eq!(details, "nothing here");
            }
            other => panic!("wrong reason: {other:?}"),
        },
        AddPageOutcome::Accepted { .. } => panic!("accepted a 404"),
    }
    assert_eq!(h.catalog.page_count().await.unwrap(), 0);
}

#[tokio::test]
async fn redirects_are_rejected_and_leave_no_row() {
    let h = harness(StaticFetcher::redirect("http://a.test/y"));

    let outcome = h.ingester.add_page("http://a.test/x", 1.0).await.unwrap();
    match outcome {
        AddPageOutcome::Rejected(rejection) => {
            assert_eq!(rejection.url, "http://a.test/x");
            assert_eq!(
                rejection.reason,
                RejectReason::Redirect {
                    effective_url: "http://a.test/y".to_string()
                }
            );
        }
        AddPageOutcome::Accepted { .. } => panic!("accepted a redirect"),
    }

    assert!(h
        .catalog
        .page_by_url_hash(&sha512_hex("http://a.test/x"))
        .await
        .unwrap()
        .is_none());
    assert!(h
        .catalog
        .page_by_url_hash(&sha512_hex("http://a.test/y"))
        .await
        .unwrap()
        .is_none());
    assert!(h.publisher.events().is_empty());
}

#[tokio::test]
async fn fetch_failures_are_rejected_as_fetch_error() {
    let h = harness(StaticFetcher::failing("connection refused"));

    let outcome = h.ingester.add_page("http://a.test/x", 1.0).await.unwrap();
    match outcome {
        AddPageOutcome::Rejected(rejection) => match rejection.reason {
            RejectReason::FetchError { details } => assert!(details.contains("connection refused")),
            other => panic!("wrong reason: {other:?}"),
        },
        AddPageOutcome::Accepted { .. } => panic!("accepted a failing fetch"),
    }
    assert_eq!(h.catalog.page_count().await.unwrap(), 0);
}

#[tokio::test]
async fn jobs_count_follows_ingestion() {
    let h = harness(StaticFetcher::ok());
    let dispatcher = Dispatcher::new(h.catalog.clone(), h.cache.clone());

    for i in 0..3 {
        let url = format!("http://my-site.com/{i}.html");
        accepted(h.ingester.add_page(&url, 0.0).await.unwrap());
    }
    assert_eq!(dispatcher.next_jobs_count().await.unwrap(), 3);

    for i in 3..5 {
        let url = format!("http://my-site.com/{i}.html");
        accepted(h.ingester.add_page(&url, 0.0).await.unwrap());
    }
    assert_eq!(dispatcher.next_jobs_count().await.unwrap(), 5);
}

#[tokio::test]
async fn one_domain_serves_many_pages() {
    let h = harness(StaticFetcher::ok());

    accepted(h.ingester.add_page("http://a.test/1.html", 0.0).await.unwrap());
    accepted(h.ingester.add_page("http://a.test/2.html", 0.0).await.unwrap());

    let events = h.publisher.events();
    let new_domains = events
        .iter()
        .filter(|e| matches!(e, Event::NewDomain { .. }))
        .count();
    assert_eq!(new_domains, 1);
    assert_eq!(h.catalog.limiters().await.unwrap().len(), 1);
    assert_eq!(h.catalog.page_count().await.unwrap(), 2);
}

#[tokio::test]
async fn trailing_slash_domain_names_are_reused() {
    let h = harness(StaticFetcher::ok());
    h.catalog
        .add_domain("my-site.com/", "http://my-site.com/", true)
        .await;

    accepted(
        h.ingester
            .add_page("http://my-site.com/page.html", 0.0)
            .await
            .unwrap(),
    );

    // the existing domain row was matched, so no new-domain event
    assert_eq!(
        h.publisher.events(),
        vec![Event::NewPage {
            page_url: "http://my-site.com/page.html".to_string()
        }]
    );
}
