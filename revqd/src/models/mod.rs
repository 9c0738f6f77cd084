use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A site registered for review. Only active domains supply candidates.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Domain {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub url_hash: String,
    pub is_active: bool,
}

#[derive(Debug, Clone)]
pub struct NewDomain {
    pub name: String,
    pub url: String,
    pub url_hash: String,
}

/// A page known to the catalog. `url_hash` is the SHA-512 hex digest of
/// the url bytes and is unique: equal URLs are the same row.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Page {
    pub id: i64,
    pub uuid: Uuid,
    pub url: String,
    pub url_hash: String,
    pub domain_id: i64,
    pub score: f64,
    pub last_review_date: Option<DateTime<Utc>>,
    pub last_review_uuid: Option<Uuid>,
    pub violations_count: i32,
    pub created_date: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewPage {
    pub uuid: Uuid,
    pub url: String,
    pub url_hash: String,
    pub domain_id: i64,
    pub score: f64,
}

/// The slice of a page the dispatcher works with.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct PageCandidate {
    pub uuid: Uuid,
    pub url: String,
    pub score: f64,
    pub last_review_date: Option<DateTime<Utc>>,
    pub domain_id: i64,
}

/// A review process in the fleet. `current_url` names the page it is
/// fetching right now; the limiter counts these per domain.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Worker {
    pub id: i64,
    pub current_url: Option<String>,
    pub last_ping: Option<DateTime<Utc>>,
}

/// Max concurrent outbound connections permitted on a domain.
/// No row for a domain means unlimited.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Limiter {
    pub id: i64,
    pub url: String,
    pub value: i32,
}

/// Single-row process settings. `lambda_score` is a pending global score
/// boost consumed exactly once by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Default, sqlx::FromRow)]
pub struct Settings {
    pub lambda_score: f64,
}
