//! Sitemap XML parsing and recursive index resolution.
//!
//! Supports both standard sitemaps and sitemap index files:
//!
//! - **Standard sitemap**: `<urlset>` with `<url>` entries
//! - **Sitemap index**: `<sitemapindex>` with `<sitemap>` entries pointing to
//!   other sitemaps, expanded depth-first in document order

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitescribe_crawler::{FetchOptions, PageFetcher, RateLimiter, RetryPolicy, fetch_with_retry};
use sitescribe_shared::{
    CancelSignal, FetchConfig, Result, SiteScribeError, SitemapConfig, SitemapEntry,
    normalize_url,
};

use crate::filter::UrlFilter;

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SitemapDocument {
    /// Standard sitemap with page entries.
    UrlSet(Vec<SitemapEntry>),
    /// Sitemap index with child sitemap locations.
    Index(Vec<String>),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse sitemap XML, detecting the root element.
///
/// Element names are matched by local name, so namespace prefixes do not
/// matter. Only direct children of `<url>`/`<sitemap>` are read, so extension
/// elements such as `<image:loc>` never replace the page location. Entries
/// without a `<loc>` are dropped.
pub fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut root: Option<String> = None;
    let mut pages = Vec::new();
    let mut children = Vec::new();

    // Elements open below the current `<url>`/`<sitemap>`; `None` outside one.
    let mut entry_depth: Option<usize> = None;
    let mut current_element: Option<String> = None;
    let mut current_loc: Option<String> = None;
    let mut current_lastmod: Option<DateTime<Utc>> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if root.is_none() {
                    match name.as_str() {
                        "urlset" | "sitemapindex" => root = Some(name),
                        other => {
                            return Err(SiteScribeError::MalformedSitemap(format!(
                                "unexpected root element <{other}>"
                            )));
                        }
                    }
                    continue;
                }
                match entry_depth {
                    None => {
                        if name == "url" || name == "sitemap" {
                            entry_depth = Some(0);
                            current_loc = None;
                            current_lastmod = None;
                        }
                    }
                    Some(depth) => {
                        if depth == 0 && (name == "loc" || name == "lastmod") {
                            current_element = Some(name);
                        }
                        entry_depth = Some(depth + 1);
                    }
                }
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                match entry_depth {
                    Some(0) if name == "url" || name == "sitemap" => {
                        if let Some(loc) = current_loc.take() {
                            if name == "url" {
                                pages.push(SitemapEntry {
                                    url: loc,
                                    last_modified: current_lastmod.take(),
                                });
                            } else {
                                children.push(loc);
                            }
                        }
                        entry_depth = None;
                    }
                    Some(depth) => entry_depth = Some(depth.saturating_sub(1)),
                    None => {}
                }
                current_element = None;
            }
            Ok(Event::Text(e)) => {
                if let Some(element) = current_element.as_deref() {
                    let text = e
                        .unescape()
                        .map_err(|e| SiteScribeError::MalformedSitemap(e.to_string()))?;
                    set_field(element, text.trim(), &mut current_loc, &mut current_lastmod);
                }
            }
            Ok(Event::CData(e)) => {
                if let Some(element) = current_element.as_deref() {
                    let text = String::from_utf8_lossy(e.as_ref()).to_string();
                    set_field(element, text.trim(), &mut current_loc, &mut current_lastmod);
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SiteScribeError::MalformedSitemap(format!(
                    "XML parse error at byte {}: {e}",
                    reader.error_position()
                )));
            }
            _ => {}
        }
    }

    match root.as_deref() {
        Some("urlset") => Ok(SitemapDocument::UrlSet(pages)),
        Some(_) => Ok(SitemapDocument::Index(children)),
        None => Err(SiteScribeError::MalformedSitemap(
            "no root element found".into(),
        )),
    }
}

fn set_field(
    element: &str,
    text: &str,
    loc: &mut Option<String>,
    lastmod: &mut Option<DateTime<Utc>>,
) {
    match element {
        "loc" => *loc = Some(text.to_string()),
        "lastmod" => *lastmod = parse_lastmod(text),
        _ => {}
    }
}

/// Parse a lastmod value: RFC 3339, bare date, or naive date-time (UTC).
fn parse_lastmod(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Some(date.and_hms_opt(0, 0, 0)?.and_utc());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(dt.and_utc());
    }
    debug!(date_str = %s, "could not parse lastmod date");
    None
}

/// Parse `raw` as an absolute http(s) URL.
fn absolute_http_url(raw: &str) -> Option<Url> {
    let url = Url::parse(raw).ok()?;
    matches!(url.scheme(), "http" | "https").then_some(url)
}

// ---------------------------------------------------------------------------
// SitemapResolver
// ---------------------------------------------------------------------------

/// Resolves a sitemap URL into page entries through the fetch collaborator.
pub struct SitemapResolver {
    fetcher: Arc<dyn PageFetcher>,
    config: SitemapConfig,
    policy: RetryPolicy,
    options: FetchOptions,
    limiter: RateLimiter,
    filter: UrlFilter,
}

impl SitemapResolver {
    /// Sitemap fetches reuse the page fetch retry policy and timeout.
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: SitemapConfig, fetch: &FetchConfig) -> Self {
        let filter = UrlFilter::new(&config.include_patterns, &config.exclude_patterns);
        Self {
            fetcher,
            config,
            policy: RetryPolicy::from(fetch),
            options: FetchOptions::from(fetch),
            limiter: RateLimiter::new(Duration::from_millis(fetch.rate_limit_ms)),
            filter,
        }
    }

    /// Resolve `sitemap_url` into an ordered, deduplicated list of entries.
    ///
    /// Only a failure of the root sitemap is an error: `UnreachableSitemap`
    /// when it cannot be fetched, `MalformedSitemap` when it cannot be parsed.
    /// Broken child sitemaps are logged and skipped.
    #[instrument(skip_all, fields(sitemap = %sitemap_url))]
    pub async fn resolve(
        &self,
        sitemap_url: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<SitemapEntry>> {
        let root = absolute_http_url(sitemap_url).ok_or_else(|| {
            SiteScribeError::UnreachableSitemap(format!("not an http(s) URL: {sitemap_url}"))
        })?;
        let root = normalize_url(&root);

        let mut visited: HashSet<String> = HashSet::new();
        let mut seen_pages: HashSet<String> = HashSet::new();
        let mut entries: Vec<SitemapEntry> = Vec::new();
        let mut stack: Vec<(String, u32)> = vec![(root.clone(), 0)];

        while let Some((url, depth)) = stack.pop() {
            if cancel.is_cancelled() {
                return Err(SiteScribeError::Cancelled);
            }
            if !visited.insert(url.clone()) {
                warn!(%url, "sitemap already visited, skipping cycle");
                continue;
            }
            let is_root = depth == 0;

            let document = match self.load(&url, cancel).await {
                Ok(document) => document,
                Err(SiteScribeError::Cancelled) => return Err(SiteScribeError::Cancelled),
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    warn!(%url, error = %e, "skipping child sitemap");
                    continue;
                }
            };

            match document {
                SitemapDocument::UrlSet(pages) => {
                    debug!(%url, depth, count = pages.len(), "parsed urlset");
                    for page in pages {
                        let Some(parsed) = absolute_http_url(&page.url) else {
                            warn!(loc = %page.url, "skipping non-http(s) loc");
                            continue;
                        };
                        if !self.filter.allows(&parsed) {
                            continue;
                        }
                        let normalized = normalize_url(&parsed);
                        if !seen_pages.insert(normalized.clone()) {
                            continue;
                        }
                        if entries.len() >= self.config.max_urls {
                            warn!(max_urls = self.config.max_urls, "URL cap reached, truncating");
                            return Ok(entries);
                        }
                        entries.push(SitemapEntry {
                            url: normalized,
                            last_modified: page.last_modified,
                        });
                    }
                }
                SitemapDocument::Index(children) => {
                    if depth >= self.config.max_depth {
                        warn!(%url, depth, max_depth = self.config.max_depth, "index depth cap reached, not expanding");
                        continue;
                    }
                    debug!(%url, depth, children = children.len(), "expanding sitemap index");
                    for child in children.iter().rev() {
                        match absolute_http_url(child) {
                            Some(child) => stack.push((normalize_url(&child), depth + 1)),
                            None => warn!(loc = %child, "skipping non-http(s) child sitemap"),
                        }
                    }
                }
            }
        }

        info!(urls = entries.len(), sitemaps = visited.len(), "sitemap resolved");
        Ok(entries)
    }

    /// Fetch and parse one sitemap document.
    async fn load(&self, url: &str, cancel: &CancelSignal) -> Result<SitemapDocument> {
        let outcome = fetch_with_retry(
            self.fetcher.as_ref(),
            url,
            &self.options,
            &self.policy,
            &self.limiter,
            cancel,
        )
        .await;

        let response = match outcome.result {
            Ok(response) => response,
            Err(SiteScribeError::Cancelled) => return Err(SiteScribeError::Cancelled),
            Err(e) => return Err(SiteScribeError::UnreachableSitemap(format!("{url}: {e}"))),
        };
        parse_sitemap(&response.html)
    }
}
