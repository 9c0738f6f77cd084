use sha2::{Digest, Sha512};
use url::Url;

/// SHA-512 hex digest of a string's UTF-8 bytes. The uniqueness key for
/// pages and domains.
pub fn sha512_hex(input: &str) -> String {
    let digest = Sha512::digest(input.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Split a URL into its domain name and canonical domain url:
/// `http://host:8080/a/b?q=1` becomes `("host:8080", "http://host:8080")`.
/// Returns `None` when no host can be determined.
pub fn domain_from_url(raw: &str) -> Option<(String, String)> {
    let parsed = Url::parse(raw).ok()?;
    let host = parsed.host_str()?;
    if host.is_empty() {
        return None;
    }
    let name = match parsed.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let domain_url = format!("{}://{}", parsed.scheme(), name);
    Some((name, domain_url))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_host_and_canonical_url() {
        let (name, url) = domain_from_url("http://www.globo.com/index.html").unwrap();
        assert_eq!(name, "www.globo.com");
        assert_eq!(url, "http://www.globo.com");
    }

    #[test]
    fn keeps_explicit_port() {
        let (name, url) = domain_from_url("https://site.test:8443/x").unwrap();
        assert_eq!(name, "site.test:8443");
        assert_eq!(url, "https://site.test:8443");
    }

    #[test]
    fn rejects_urls_without_a_host() {
        assert!(domain_from_url("not a url").is_none());
        assert!(domain_from_url("mailto:someone@site.test").is_none());
        assert!(domain_from_url("").is_none());
    }

    #[test]
    fn sha512_matches_known_vector() {
        // sha512("abc")
        assert_eq!(
            sha512_hex("abc"),
            "ddaf35a193617abacc417349ae20413112e6fa4e89a97ea20a9eeee64b55d39a\
             2192992a274fc1a836ba3c23a3feebbd454d4423643ce80e2a9ac94fa54ca49f"
        );
    }

    #[test]
    fn sha512_is_stable_for_non_ascii() {
        assert_eq!(sha512_hex("http://пример.test/страница"), sha512_hex("http://пример.test/страница"));
        assert_ne!(sha512_hex("http://a/x"), sha512_hex("http://a/y"));
    }
}
