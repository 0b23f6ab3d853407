//! Sitemap discovery: turns one sitemap URL into the bounded, deduplicated,
//! ordered list of page URLs a run will process.
//!
//! Sitemap indexes are expanded recursively up to a depth cap, each sitemap is
//! fetched at most once, and the leaf set is capped in size and filtered by
//! include/exclude globs.

mod filter;
mod sitemap;

pub use filter::UrlFilter;
pub use sitemap::{SitemapDocument, SitemapResolver, parse_sitemap};
