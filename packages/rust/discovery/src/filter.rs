//! Include/exclude filtering of resolved page URLs.

use regex::Regex;
use tracing::warn;
use url::Url;

/// Glob filter over URL paths. `**` spans segments, `*` stays within one,
/// `?` matches a single character.
#[derive(Debug, Clone, Default)]
pub struct UrlFilter {
    /// If non-empty, a path must match at least one.
    include: Vec<Regex>,
    /// A path matching any of these is dropped.
    exclude: Vec<Regex>,
}

impl UrlFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: include.iter().filter_map(|p| glob_to_regex(p)).collect(),
            exclude: exclude.iter().filter_map(|p| glob_to_regex(p)).collect(),
        }
    }

    pub fn allows(&self, url: &Url) -> bool {
        let path = url.path();
        if self.exclude.iter().any(|p| p.is_match(path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.is_match(path))
    }
}

/// Convert a glob-like pattern to an anchored regex.
fn glob_to_regex(pattern: &str) -> Option<Regex> {
    let escaped = regex::escape(pattern)
        .replace(r"\*\*", ".*")
        .replace(r"\*", "[^/]*")
        .replace(r"\?", ".");
    match Regex::new(&format!("^{escaped}$")) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(%pattern, error = %e, "ignoring invalid URL pattern");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn empty_filter_allows_everything() {
        let filter = UrlFilter::default();
        assert!(filter.allows(&url("https://docs.example.com/anything")));
    }

    #[test]
    fn exclude_wins_over_include() {
        let filter = UrlFilter::new(&["/docs/**".into()], &["/docs/internal/**".into()]);
        assert!(filter.allows(&url("https://example.com/docs/guide/intro")));
        assert!(!filter.allows(&url("https://example.com/docs/internal/secret")));
        assert!(!filter.allows(&url("https://example.com/blog/post-1")));
    }

    #[test]
    fn single_star_stays_in_segment() {
        let filter = UrlFilter::new(&["/api/*".into()], &[]);
        assert!(filter.allows(&url("https://example.com/api/users")));
        assert!(!filter.allows(&url("https://example.com/api/users/42")));
    }
}
