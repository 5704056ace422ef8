//! URL handling for discovered links
//!
//! Normalization collapses equivalent links into one frontier target, and
//! [`DomainFilter`] keeps discovery inside the configured domains.

mod normalize;

pub use normalize::normalize_url;

use url::Url;

/// Checks if a host matches a domain pattern
///
/// `"example.com"` matches only that host. `"*.example.com"` matches the bare
/// domain and any subdomain of it. Comparison ignores ASCII case.
///
/// # Examples
///
/// ```
/// use sumi_trawl::url::matches_wildcard;
///
/// assert!(matches_wildcard("*.bilibili.com", "api.bilibili.com"));
/// assert!(matches_wildcard("*.bilibili.com", "bilibili.com"));
/// assert!(!matches_wildcard("*.bilibili.com", "notbilibili.com"));
/// ```
pub fn matches_wildcard(pattern: &str, host: &str) -> bool {
    let host = host.to_ascii_lowercase();
    let pattern = pattern.to_ascii_lowercase();

    match pattern.strip_prefix("*.") {
        Some(base) => {
            host == base
                || host
                    .strip_suffix(base)
                    .is_some_and(|prefix| prefix.ends_with('.'))
        }
        None => host == pattern,
    }
}

/// Set of domain patterns a discovered URL must match
///
/// An empty filter allows every host.
#[derive(Debug, Clone, Default)]
pub struct DomainFilter {
    patterns: Vec<String>,
}

impl DomainFilter {
    pub fn new(patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns true if `url` has a host matching one of the patterns
    pub fn allows(&self, url: &Url) -> bool {
        if self.patterns.is_empty() {
            return true;
        }

        match url.host_str() {
            Some(host) => self
                .patterns
                .iter()
                .any(|pattern| matches_wildcard(pattern, host)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "www.example.com"));
    }

    #[test]
    fn test_wildcard_covers_nested_subdomains() {
        assert!(matches_wildcard("*.example.com", "a.b.example.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.evil.org"));
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
    }

    #[test]
    fn test_matching_ignores_case() {
        assert!(matches_wildcard("Example.com", "EXAMPLE.COM"));
        assert!(matches_wildcard("*.EXAMPLE.com", "Blog.example.COM"));
    }

    #[test]
    fn test_empty_filter_allows_everything() {
        let filter = DomainFilter::default();
        let url = Url::parse("https://anything.org/x").unwrap();
        assert!(filter.allows(&url));
    }

    #[test]
    fn test_filter_checks_every_pattern() {
        let filter = DomainFilter::new(["*.bilibili.com", "example.org"]);

        let allowed = [
            "https://www.bilibili.com/video/1",
            "https://bilibili.com/",
            "http://example.org/page",
        ];
        for raw in allowed {
            assert!(filter.allows(&Url::parse(raw).unwrap()), "{}", raw);
        }

        let denied = ["https://sub.example.org/", "https://evil.com/bilibili.com"];
        for raw in denied {
            assert!(!filter.allows(&Url::parse(raw).unwrap()), "{}", raw);
        }
    }

    #[test]
    fn test_filter_matches_ip_hosts() {
        let filter = DomainFilter::new(["127.0.0.1"]);
        assert!(filter.allows(&Url::parse("http://127.0.0.1:8080/a").unwrap()));
    }
}
