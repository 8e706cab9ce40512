//! Route matching logic.
//!
//! # Responsibilities
//! - Match host header (exact match, case-insensitive, port ignored)
//! - Match path prefix (case-sensitive, on segment boundaries)
//! - Combine conditions with AND semantics
//!
//! # Design Decisions
//! - Host matching is case-insensitive (RFC 9110)
//! - Path matching is case-sensitive
//! - Empty condition = always matches (wildcard)
//! - No regex to guarantee O(n) matching

use axum::http::{header, HeaderMap, Uri};

/// Trait for matching requests against conditions.
pub trait Matcher: Send + Sync + std::fmt::Debug {
    /// Returns true if the request head matches this condition.
    fn matches(&self, uri: &Uri, headers: &HeaderMap) -> bool;
}

/// Matches the Host header.
#[derive(Debug, Clone)]
pub struct HostMatcher {
    expected_host: String,
}

impl HostMatcher {
    /// The host is normalized to lowercase for case-insensitive matching.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            expected_host: host.into().to_lowercase(),
        }
    }
}

impl Matcher for HostMatcher {
    fn matches(&self, uri: &Uri, headers: &HeaderMap) -> bool {
        let host = headers
            .get(header::HOST)
            .and_then(|h| h.to_str().ok())
            .or_else(|| uri.host());

        match host {
            Some(h) => {
                let name = h.rsplit_once(':').map_or(h, |(name, _port)| name);
                name.eq_ignore_ascii_case(&self.expected_host)
            }
            None => false,
        }
    }
}

/// Matches the request path prefix.
#[derive(Debug, Clone)]
pub struct PathPrefixMatcher {
    prefix: String,
}

impl PathPrefixMatcher {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// `/api` matches `/api` and `/api/x`, not `/apiary`.
    pub fn matches_path(&self, path: &str) -> bool {
        match path.strip_prefix(self.prefix.as_str()) {
            Some(rest) => rest.is_empty() || self.prefix.ends_with('/') || rest.starts_with('/'),
            None => false,
        }
    }
}

impl Matcher for PathPrefixMatcher {
    fn matches(&self, uri: &Uri, _headers: &HeaderMap) -> bool {
        self.matches_path(uri.path())
    }
}

/// Combines multiple matchers with AND semantics.
#[derive(Debug, Default)]
pub struct AndMatcher {
    matchers: Vec<Box<dyn Matcher>>,
}

impl AndMatcher {
    pub fn new(matchers: Vec<Box<dyn Matcher>>) -> Self {
        Self { matchers }
    }
}

impl Matcher for AndMatcher {
    fn matches(&self, uri: &Uri, headers: &HeaderMap) -> bool {
        self.matchers.iter().all(|m| m.matches(uri, headers))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn host(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_host_matcher() {
        let matcher = HostMatcher::new("example.com");
        let uri = Uri::from_static("/");

        assert!(matcher.matches(&uri, &host("example.com")));
        assert!(matcher.matches(&uri, &host("EXAMPLE.COM"))); // Case insensitive
        assert!(matcher.matches(&uri, &host("example.com:8080")));
        assert!(!matcher.matches(&uri, &host("other.com")));
        assert!(!matcher.matches(&uri, &HeaderMap::new()));
    }

    #[test]
    fn test_path_matcher() {
        let matcher = PathPrefixMatcher::new("/api");
        let headers = HeaderMap::new();

        assert!(matcher.matches(&Uri::from_static("http://example.com/api/v1"), &headers));
        assert!(matcher.matches(&Uri::from_static("/api"), &headers));
        assert!(!matcher.matches(&Uri::from_static("/apiary"), &headers));
        assert!(!matcher.matches(&Uri::from_static("http://example.com/images"), &headers));
    }

    #[test]
    fn test_and_matcher() {
        let matcher = AndMatcher::new(vec![
            Box::new(HostMatcher::new("example.com")),
            Box::new(PathPrefixMatcher::new("/api")),
        ]);
        let uri = Uri::from_static("/api/products");

        assert!(matcher.matches(&uri, &host("example.com")));
        assert!(!matcher.matches(&uri, &host("other.com")));
        assert!(AndMatcher::default().matches(&uri, &HeaderMap::new()));
    }
}
