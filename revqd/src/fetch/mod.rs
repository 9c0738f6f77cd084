use std::time::Duration;

use async_trait::async_trait;

/// What the probe saw: final status, body, and the URL the response
/// actually came from (after any redirects the client followed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub status: u16,
    pub body: Vec<u8>,
    pub effective_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("invalid fetch configuration: {0}")]
    Config(String),

    #[error("fetch failed: {0}")]
    Transport(String),
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;
}

/// HTTP probe used by the ingester. Follows redirects; the final URL is
/// reported as `effective_url` so the redirect gate can compare.
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(
        proxy_host: Option<&str>,
        proxy_port: Option<u16>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(host) = proxy_host {
            let port = proxy_port.unwrap_or(80);
            let proxy = reqwest::Proxy::all(format!("http://{host}:{port}"))
                .map_err(|e| FetchError::Config(e.to_string()))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Config(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let effective_url = response.url().to_string();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
            .to_vec();
        Ok(FetchedPage {
            status,
            body,
            effective_url,
        })
    }
}
