use std::time::Duration;

/// Daemon configuration. Database settings live in
/// [`revq_db::DbConfig`]; everything here shapes dispatch and ingestion.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub bind_addr: String,
    pub http_proxy_host: Option<String>,
    pub http_proxy_port: Option<u16>,
    /// Seed value for the limiter registered with a new domain.
    pub default_concurrent_connections: i32,
    /// Age beyond which a review is stale; consumed by callers of
    /// `next_jobs_count`, not by the dispatcher itself.
    pub review_expiration_secs: u64,
    /// TTL of the review lock handed out with each job.
    pub lock_expiration_secs: u64,
    /// Divisor in the limiter formula.
    pub avg_links_per_page: u32,
    pub fetch_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:2368".to_string(),
            http_proxy_host: None,
            http_proxy_port: None,
            default_concurrent_connections: 10,
            review_expiration_secs: 6 * 60 * 60,
            lock_expiration_secs: 30,
            avg_links_per_page: crate::dispatch::DEFAULT_AVG_LINKS_PER_PAGE,
            fetch_timeout_secs: 30,
        }
    }
}

impl AppConfig {
    /// - REVQ_ADDR (default 127.0.0.1:2368)
    /// - HTTP_PROXY_HOST / HTTP_PROXY_PORT (optional fetch proxy)
    /// - DEFAULT_NUMBER_OF_CONCURRENT_CONNECTIONS (default 10)
    /// - REVIEW_EXPIRATION_IN_SECONDS (default 21600)
    /// - LOCK_EXPIRATION_IN_SECONDS (default 30)
    /// - AVG_LINKS_PER_PAGE (default 10)
    /// - FETCH_TIMEOUT_SECS (default 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("REVQ_ADDR").unwrap_or(defaults.bind_addr),
            http_proxy_host: std::env::var("HTTP_PROXY_HOST").ok().filter(|s| !s.is_empty()),
            http_proxy_port: std::env::var("HTTP_PROXY_PORT")
                .ok()
                .and_then(|s| s.parse::<u16>().ok()),
            default_concurrent_connections: parse_env(
                "DEFAULT_NUMBER_OF_CONCURRENT_CONNECTIONS",
                defaults.default_concurrent_connections,
            ),
            review_expiration_secs: parse_env(
                "REVIEW_EXPIRATION_IN_SECONDS",
                defaults.review_expiration_secs,
            ),
            lock_expiration_secs: parse_env(
                "LOCK_EXPIRATION_IN_SECONDS",
                defaults.lock_expiration_secs,
            ),
            avg_links_per_page: parse_env("AVG_LINKS_PER_PAGE", defaults.avg_links_per_page),
            fetch_timeout_secs: parse_env("FETCH_TIMEOUT_SECS", defaults.fetch_timeout_secs),
        }
    }

    pub fn lock_expiration(&self) -> Duration {
        Duration::from_secs(self.lock_expiration_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}
