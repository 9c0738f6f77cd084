use crate::models::{Limiter, Worker};

/// How many concurrent page reviews a limiter value permits.
///
/// A limiter value counts outbound connections; each review fans out to
/// roughly `avg_links_per_page` subrequests, so the value is divided by
/// it and rounded up. A domain with a limiter row always gets at least
/// one slot; a domain without one is unlimited.
pub fn allowed_concurrency(limit: Option<i32>, avg_links_per_page: u32) -> usize {
    let avg = i64::from(avg_links_per_page.max(1));
    match limit {
        None => usize::MAX,
        Some(value) => {
            let value = i64::from(value.max(0));
            let reviews = (value + avg - 1) / avg;
            reviews.max(1) as usize
        }
    }
}

/// Whether `url` lives under `domain_url`, tolerating a trailing slash
/// on the domain and rejecting sibling hosts that merely share a prefix.
pub fn url_in_domain(url: &str, domain_url: &str) -> bool {
    let base = domain_url.trim_end_matches('/');
    match url.strip_prefix(base) {
        Some("") => true,
        Some(rest) => rest.starts_with('/') || rest.starts_with('?') || rest.starts_with('#'),
        None => false,
    }
}

pub fn limiter_value_for(limiters: &[Limiter], domain_url: &str) -> Option<i32> {
    let base = domain_url.trim_end_matches('/');
    limiters
        .iter()
        .find(|l| l.url.trim_end_matches('/') == base)
        .map(|l| l.value)
}

pub fn busy_workers(workers: &[Worker], domain_url: &str) -> usize {
    workers
        .iter()
        .filter(|w| {
            w.current_url
                .as_deref()
                .is_some_and(|url| url_in_domain(url, domain_url))
        })
        .count()
}

/// Admission check: the domain has spare capacity for one more review.
pub fn admits(
    workers: &[Worker],
    limiters: &[Limiter],
    domain_url: &str,
    avg_links_per_page: u32,
) -> bool {
    let allowed = allowed_concurrency(limiter_value_for(limiters, domain_url), avg_links_per_page);
    busy_workers(workers, domain_url) < allowed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: i64, current_url: Option<&str>) -> Worker {
        Worker {
            id,
            current_url: current_url.map(str::to_string),
            last_ping: None,
        }
    }

    fn limiter(url: &str, value: i32) -> Limiter {
        Limiter {
            id: 1,
            url: url.to_string(),
            value,
        }
    }

    #[test]
    fn two_connections_over_ten_links_is_one_review() {
        assert_eq!(allowed_concurrency(Some(2), 10), 1);
    }

    #[test]
    fn allowance_rounds_up_and_never_hits_zero() {
        assert_eq!(allowed_concurrency(Some(10), 10), 1);
        assert_eq!(allowed_concurrency(Some(11), 10), 2);
        assert_eq!(allowed_concurrency(Some(25), 10), 3);
        assert_eq!(allowed_concurrency(Some(0), 10), 1);
    }

    #[test]
    fn missing_limiter_means_unlimited() {
        assert_eq!(allowed_concurrency(None, 10), usize::MAX);
    }

    #[test]
    fn domain_prefix_matching_rejects_sibling_hosts() {
        assert!(url_in_domain("http://a.com/x.html", "http://a.com"));
        assert!(url_in_domain("http://a.com", "http://a.com/"));
        assert!(url_in_domain("http://a.com/?q=1", "http://a.com"));
        assert!(!url_in_domain("http://a.community/x", "http://a.com"));
        assert!(!url_in_domain("http://b.com/x", "http://a.com"));
    }

    #[test]
    fn admission_counts_busy_workers_in_the_domain() {
        let limiters = vec![limiter("http://a.com", 2)];
        let idle = vec![worker(1, None), worker(2, None)];
        assert!(admits(&idle, &limiters, "http://a.com", 10));

        let busy = vec![worker(1, Some("http://a.com/p.html")), worker(2, None)];
        assert!(!admits(&busy, &limiters, "http://a.com", 10));

        // another domain's work does not count against a.com
        let elsewhere = vec![worker(1, Some("http://b.com/p.html"))];
        assert!(admits(&elsewhere, &limiters, "http://a.com", 10));
    }
}
