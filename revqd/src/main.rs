use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info};

use revqd::cache::{PgCache, ReviewCache};
use revqd::catalog::{Catalog, PgCatalog};
use revqd::config::AppConfig;
use revqd::dispatch::Dispatcher;
use revqd::events::{LogPublisher, Publisher};
use revqd::fetch::{Fetcher, HttpFetcher};
use revqd::ingest::{AddPageOutcome, Ingester};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenv::dotenv();
    tracing_subscriber::fmt::init();

    let cfg = AppConfig::from_env();
    let db = revq_db::Db::new(revq_db::DbConfig::from_env());
    db.init().await?;
    let pool = db.get_pool().await?.clone();

    let catalog: Arc<dyn Catalog> = Arc::new(PgCatalog::new(pool.clone()));
    let cache: Arc<dyn ReviewCache> = Arc::new(PgCache::new(pool));
    let fetcher: Arc<dyn Fetcher> = Arc::new(HttpFetcher::new(
        cfg.http_proxy_host.as_deref(),
        cfg.http_proxy_port,
        cfg.fetch_timeout(),
    )?);
    let publisher: Arc<dyn Publisher> = Arc::new(LogPublisher);

    let dispatcher = Arc::new(Dispatcher::new(catalog.clone(), cache.clone()));
    let ingester = Arc::new(Ingester::new(
        catalog,
        cache,
        fetcher,
        publisher,
        cfg.default_concurrent_connections,
    ));

    let listener = TcpListener::bind(&cfg.bind_addr).await?;
    info!(target: "revqd", "dispatch endpoint listening on {}", cfg.bind_addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let dispatcher = dispatcher.clone();
        let ingester = ingester.clone();
        let cfg = cfg.clone();
        tokio::spawn(async move {
            if let Err(err) = handle_conn(stream, &dispatcher, &ingester, &cfg).await {
                error!(target: "revqd", "connection {} error: {err}", peer);
            }
        });
    }
}

/// One newline-delimited JSON request per line, one JSON reply per line.
async fn handle_conn(
    stream: TcpStream,
    dispatcher: &Dispatcher,
    ingester: &Ingester,
    cfg: &AppConfig,
) -> Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = handle_request(line, dispatcher, ingester, cfg).await;
        write_half.write_all(reply.as_bytes()).await?;
        write_half.write_all(b"\n").await?;
    }
    Ok(())
}

async fn handle_request(
    line: &str,
    dispatcher: &Dispatcher,
    ingester: &Ingester,
    cfg: &AppConfig,
) -> String {
    let request: serde_json::Value = match serde_json::from_str(line) {
        Ok(value) => value,
        Err(e) => return error_body(&format!("bad request: {e}")),
    };

    match request.get("op").and_then(|v| v.as_str()) {
        Some("next-job") => {
            match dispatcher
                .next_job(cfg.lock_expiration(), cfg.avg_links_per_page)
                .await
            {
                Ok(Some(job)) => {
                    serde_json::to_string(&job).unwrap_or_else(|e| error_body(&e.to_string()))
                }
                Ok(None) => "null".to_string(),
                Err(e) => {
                    error!(target: "revqd", "next_job failed: {e}");
                    error_body(&e.to_string())
                }
            }
        }
        Some("add-page") => {
            let Some(url) = request.get("url").and_then(|v| v.as_str()) else {
                return error_body("add-page requires a url");
            };
            let score = request.get("score").and_then(|v| v.as_f64()).unwrap_or(0.0);
            match ingester.add_page(url, score).await {
                Ok(AddPageOutcome::Accepted { page }) => {
                    serde_json::json!({ "page": page }).to_string()
                }
                Ok(AddPageOutcome::Rejected(rejection)) => {
                    serde_json::to_string(&rejection).unwrap_or_else(|e| error_body(&e.to_string()))
                }
                Err(e) => {
                    error!(target: "revqd", "add_page failed: {e}");
                    error_body(&e.to_string())
                }
            }
        }
        Some("next-jobs-count") => match dispatcher.next_jobs_count().await {
            Ok(count) => serde_json::json!({ "count": count }).to_string(),
            Err(e) => {
                error!(target: "revqd", "next_jobs_count failed: {e}");
                error_body(&e.to_string())
            }
        },
        _ => error_body("unknown op"),
    }
}

fn error_body(message: &str) -> String {
    serde_json::json!({ "error": message }).to_string()
}
