use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use tokio::sync::OnceCell;
use tracing::{info, warn};

pub use sqlx::PgPool;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

/// Retry budget for writes that lose a row or table lock race.
/// Shared by every contended catalog write.
pub const WRITE_RETRY_ATTEMPTS: u32 = 3;

/// Whether an error is a transient locking failure worth retrying.
///
/// Matches the PostgreSQL SQLSTATEs for serialization failure (40001),
/// deadlock (40P01) and lock-wait timeout (55P03). Callers retry up to
/// [`WRITE_RETRY_ATTEMPTS`] times; everything else aborts the write.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => matches!(
            db.code().as_deref(),
            Some("40001") | Some("40P01") | Some("55P03")
        ),
        _ => false,
    }
}

/// Whether an error is a unique-key collision (SQLSTATE 23505).
/// Insert races resolve by re-reading the winning row.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

#[derive(Clone, Debug)]
pub struct DbConfig {
    pub database_url: Option<String>,

    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,

    pub connect_timeout_secs: u64,
    pub connect_attempts: u32,
    pub connect_backoff_ms: u64,

    /// true: fail startup when the DB cannot be reached after retries.
    /// false: log and continue; the first use of get_pool() retries.
    pub eager_init: bool,

    /// true: run migrations right after the first successful connect.
    pub migrate_on_start: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            min_connections: 0,
            max_connections: 20,
            acquire_timeout_secs: 5,
            connect_timeout_secs: 5,
            connect_attempts: 5,
            connect_backoff_ms: 200,
            eager_init: false,
            migrate_on_start: false,
        }
    }
}

impl DbConfig {
    /// - DATABASE_URL (optional)
    /// - DB_MIN_CONNECTIONS / DB_MAX_CONNECTIONS (defaults 0 / 20)
    /// - DB_ACQUIRE_TIMEOUT_SECS (default 5)
    /// - DB_CONNECT_TIMEOUT_SECS (default 5)
    /// - DB_CONNECT_ATTEMPTS (default 5)
    /// - DB_CONNECT_BACKOFF_MS (default 200)
    /// - DB_EAGER_INIT (bool, default false)
    /// - DB_MIGRATE_ON_START (bool, default false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            min_connections: env_parse("DB_MIN_CONNECTIONS", defaults.min_connections),
            max_connections: env_parse("DB_MAX_CONNECTIONS", defaults.max_connections),
            acquire_timeout_secs: env_parse(
                "DB_ACQUIRE_TIMEOUT_SECS",
                defaults.acquire_timeout_secs,
            ),
            connect_timeout_secs: env_parse(
                "DB_CONNECT_TIMEOUT_SECS",
                defaults.connect_timeout_secs,
            ),
            connect_attempts: env_parse("DB_CONNECT_ATTEMPTS", defaults.connect_attempts).max(1),
            connect_backoff_ms: env_parse("DB_CONNECT_BACKOFF_MS", defaults.connect_backoff_ms),
            eager_init: env_flag("DB_EAGER_INIT", defaults.eager_init),
            migrate_on_start: env_flag("DB_MIGRATE_ON_START", defaults.migrate_on_start),
        }
    }
}

/// Lazily connected pool handle. The pool (and, when enabled, the
/// migration run) is established exactly once, on whichever call gets
/// there first.
pub struct Db {
    cfg: DbConfig,
    pool: OnceCell<PgPool>,
}

impl Db {
    pub fn new(cfg: DbConfig) -> Self {
        Self {
            cfg,
            pool: OnceCell::new(),
        }
    }

    /// Warm up the pool. Eager mode fails when the database stays
    /// unreachable; lazy mode logs and leaves the connect to the first
    /// get_pool() call.
    pub async fn init(&self) -> Result<(), DbInitError> {
        match self.get_pool().await {
            Ok(_) => Ok(()),
            Err(e) if self.cfg.eager_init => Err(e),
            Err(e) => {
                warn!(target: "revq_db", "database not available at startup (lazy): {e}");
                Ok(())
            }
        }
    }

    /// The shared pool, connected (and migrated, when enabled) on first
    /// use. The cell is only set once both steps succeed, so a failed
    /// migration run is retried by the next caller.
    pub async fn get_pool(&self) -> Result<&PgPool, DbInitError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = self.connect_with_retry().await?;
                if self.cfg.migrate_on_start {
                    info!(target: "revq_db", "running database migrations");
                    MIGRATOR
                        .run(&pool)
                        .await
                        .map_err(|e| DbInitError::Migrate(e.to_string()))?;
                }
                Ok(pool)
            })
            .await
    }

    async fn connect_with_retry(&self) -> Result<PgPool, DbInitError> {
        let url = self
            .cfg
            .database_url
            .as_deref()
            .ok_or(DbInitError::MissingUrl)?;
        let attempts = self.cfg.connect_attempts.max(1);

        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.connect_once(url).await {
                Ok(pool) => return Ok(pool),
                Err(msg) => {
                    last_error = msg;
                    if attempt < attempts {
                        let delay = backoff_delay(self.cfg.connect_backoff_ms, attempt);
                        warn!(
                            target: "revq_db",
                            "db connect attempt {attempt}/{attempts} failed: {last_error}; next try in {delay:?}"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        Err(DbInitError::Connect {
            attempts,
            last_error,
        })
    }

    async fn connect_once(&self, url: &str) -> Result<PgPool, String> {
        let options = PgPoolOptions::new()
            .min_connections(self.cfg.min_connections)
            .max_connections(self.cfg.max_connections)
            .acquire_timeout(Duration::from_secs(self.cfg.acquire_timeout_secs));
        let timeout = Duration::from_secs(self.cfg.connect_timeout_secs.max(1));
        match tokio::time::timeout(timeout, options.connect(url)).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(format!("connect timed out after {}s", timeout.as_secs())),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DbInitError {
    #[error("DATABASE_URL is not set")]
    MissingUrl,

    #[error("database unreachable after {attempts} attempt(s): {last_error}")]
    Connect { attempts: u32, last_error: String },

    #[error("migrations failed: {0}")]
    Migrate(String),
}

/// Exponential backoff with a 30s ceiling and up to half a base step of
/// jitter, so restarting daemons do not reconnect in lockstep.
fn backoff_delay(base_ms: u64, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let scaled = base_ms.saturating_mul(1u64 << exp).min(30_000);
    let jitter = fastrand::u64(..=base_ms / 2);
    Duration::from_millis(scaled.saturating_add(jitter))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}
