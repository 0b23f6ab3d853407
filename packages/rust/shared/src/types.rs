//! Core domain types for the crawl-and-convert pipeline.

use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, SiteScribeError};

/// Longest slug kept in a page id, before the hash suffix.
const MAX_SLUG_LEN: usize = 80;

static NON_SLUG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^a-z0-9]+").unwrap());

// ---------------------------------------------------------------------------
// URL identity
// ---------------------------------------------------------------------------

/// Canonical form used for dedup and keying: fragment dropped, trailing slash
/// dropped except on the root path.
pub fn normalize_url(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    let path = normalized.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        normalized.set_path(path.trim_end_matches('/'));
    }
    normalized.to_string()
}

/// Storage partition for a URL: its host, plus `_port` when non-default.
pub fn domain_of(url: &Url) -> Result<String> {
    let host = url
        .host_str()
        .ok_or_else(|| SiteScribeError::validation(format!("URL has no host: {url}")))?
        .to_ascii_lowercase();
    Ok(match url.port() {
        Some(port) => format!("{host}_{port}"),
        None => host,
    })
}

/// Compute SHA-256 hash of content.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `(domain, page_id)` key under which a URL's raw content and output live.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UrlKey {
    pub domain: String,
    pub page_id: String,
}

impl UrlKey {
    /// Derive the key for a URL. Equal normalized URLs yield equal keys.
    pub fn from_url(raw: &str) -> Result<Self> {
        let url = Url::parse(raw)
            .map_err(|e| SiteScribeError::validation(format!("invalid URL '{raw}': {e}")))?;
        let domain = domain_of(&url)?;
        let normalized = normalize_url(&url);

        let mut source = url.path().to_ascii_lowercase();
        if let Some(query) = url.query() {
            source.push('-');
            source.push_str(&query.to_ascii_lowercase());
        }
        let source = source
            .trim_end_matches(".html")
            .trim_end_matches(".htm")
            .to_string();
        let mut slug = NON_SLUG.replace_all(&source, "-").trim_matches('-').to_string();
        if slug.is_empty() {
            slug = "index".into();
        }
        if slug.len() > MAX_SLUG_LEN {
            slug.truncate(MAX_SLUG_LEN);
            slug = slug.trim_end_matches('-').to_string();
        }

        let hash = compute_hash(&normalized);
        Ok(Self {
            domain,
            page_id: format!("{slug}-{}", &hash[..8]),
        })
    }
}

impl fmt::Display for UrlKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.page_id)
    }
}

// ---------------------------------------------------------------------------
// Sitemap and fetch
// ---------------------------------------------------------------------------

/// A page URL listed by a sitemap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SitemapEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Outcome of fetching one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum FetchStatus {
    Success,
    Failed(String),
}

/// One fetched page, owned by the fetch stage until persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchResult {
    pub url: String,
    pub domain: String,
    pub raw_content: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub status: FetchStatus,
    /// Number of fetch attempts spent on this URL.
    pub attempts: u32,
}

/// Durable raw content, one row per `(domain, page_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub key: UrlKey,
    pub url: String,
    pub raw_content: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// SHA-256 of `raw_content`.
    pub content_hash: String,
    pub content_len: usize,
}

impl ContentRecord {
    /// Build a record from a successful fetch.
    pub fn from_fetch(result: &FetchResult) -> Result<Self> {
        if result.status != FetchStatus::Success {
            return Err(SiteScribeError::validation(format!(
                "cannot store failed fetch for {}",
                result.url
            )));
        }
        Ok(Self {
            key: UrlKey::from_url(&result.url)?,
            url: result.url.clone(),
            content_hash: compute_hash(&result.raw_content),
            content_len: result.raw_content.len(),
            raw_content: result.raw_content.clone(),
            fetched_at: result.fetched_at,
            status_code: result.status_code,
        })
    }
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

/// One ordered slice of a page's HTML submitted to the conversion service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionChunk {
    pub parent_url: String,
    pub chunk_index: usize,
    pub chunk_text: String,
}

/// A code span with its detected language and normalized text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBlock {
    pub raw_text: String,
    pub detected_language: Option<String>,
    pub normalized_text: String,
}

/// Result of converting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    Success,
    Failed(String),
}

/// Status as written into frontmatter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Success,
    Failed,
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

impl From<&ConversionStatus> for DocumentStatus {
    fn from(status: &ConversionStatus) -> Self {
        match status {
            ConversionStatus::Success => Self::Success,
            ConversionStatus::Failed(_) => Self::Failed,
        }
    }
}

/// Metadata block prefixed to every output document. All keys are always
/// present, in this order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frontmatter {
    pub url: String,
    pub domain: String,
    pub title: Option<String>,
    /// Fetch time of the source content.
    pub date: DateTime<Utc>,
    pub code_block_count: usize,
    pub chunk_count: usize,
    pub status: DocumentStatus,
    pub error: Option<String>,
    /// Conversion backend name.
    pub converter: String,
}

/// Final artifact for one URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkdownDocument {
    pub key: UrlKey,
    pub url: String,
    pub domain: String,
    pub frontmatter: Frontmatter,
    pub body: String,
    pub code_block_count: usize,
    pub chunk_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_fragment_and_trailing_slash() {
        let url = Url::parse("https://docs.example.com/guide/intro/#section-1").unwrap();
        assert_eq!(normalize_url(&url), "https://docs.example.com/guide/intro");

        let root = Url::parse("https://docs.example.com/").unwrap();
        assert_eq!(normalize_url(&root), "https://docs.example.com/");

        let query = Url::parse("https://docs.example.com/a/?v=2").unwrap();
        assert_eq!(normalize_url(&query), "https://docs.example.com/a?v=2");
    }

    #[test]
    fn url_key_is_stable_and_filesystem_safe() {
        let a = UrlKey::from_url("https://Docs.Example.com/Guide/Getting-Started.html").unwrap();
        let b = UrlKey::from_url("https://docs.example.com/Guide/Getting-Started.html#top").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.domain, "docs.example.com");
        assert!(a.page_id.starts_with("guide-getting-started-"));
        assert_eq!(a.page_id.len(), "guide-getting-started-".len() + 8);
        assert!(
            a.page_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-')
        );
    }

    #[test]
    fn url_key_distinguishes_queries_and_roots() {
        let root = UrlKey::from_url("https://example.com/").unwrap();
        assert!(root.page_id.starts_with("index-"));

        let p1 = UrlKey::from_url("https://example.com/list?page=1").unwrap();
        let p2 = UrlKey::from_url("https://example.com/list?page=2").unwrap();
        assert_ne!(p1, p2);

        let port = UrlKey::from_url("http://127.0.0.1:8080/x").unwrap();
        assert_eq!(port.domain, "127.0.0.1_8080");
    }

    #[test]
    fn url_key_truncates_long_paths() {
        let long = format!("https://example.com/{}", "segment/".repeat(40));
        let key = UrlKey::from_url(&long).unwrap();
        assert!(key.page_id.len() <= MAX_SLUG_LEN + 9);
    }

    #[test]
    fn url_key_rejects_garbage() {
        assert!(UrlKey::from_url("not a url").is_err());
    }

    #[test]
    fn content_record_from_fetch() {
        let fetch = FetchResult {
            url: "https://example.com/a".into(),
            domain: "example.com".into(),
            raw_content: "<p>hi</p>".into(),
            fetched_at: Utc::now(),
            status_code: Some(200),
            status: FetchStatus::Success,
            attempts: 1,
        };
        let record = ContentRecord::from_fetch(&fetch).unwrap();
        assert_eq!(record.content_len, 9);
        assert_eq!(record.content_hash.len(), 64);
        assert_eq!(record.key.domain, "example.com");

        let failed = FetchResult {
            status: FetchStatus::Failed("PermanentFetchError: 404".into()),
            ..fetch
        };
        assert!(ContentRecord::from_fetch(&failed).is_err());
    }

    #[test]
    fn fetch_status_serializes_with_reason() {
        let json = serde_json::to_string(&FetchStatus::Failed("x".into())).unwrap();
        assert_eq!(json, r#"{"state":"failed","reason":"x"}"#);
    }
}
