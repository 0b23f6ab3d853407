//! Shared types, error model, and configuration for SiteScribe.
//!
//! This crate is the foundation depended on by all other SiteScribe crates.
//! It provides:
//! - [`SiteScribeError`], the unified error type
//! - Domain types ([`SitemapEntry`], [`FetchResult`], [`ContentRecord`],
//!   [`ConversionChunk`], [`CodeBlock`], [`MarkdownDocument`], [`UrlKey`])
//! - Configuration ([`AppConfig`], runtime configs, config loading)
//! - [`CancelSignal`], the run-wide cancellation flag

pub mod cancel;
pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use cancel::CancelSignal;
pub use config::{
    AppConfig, ConversionBackend, ConversionConfig, ConversionSection, DefaultsConfig,
    FetchConfig, FetchSection, OpenRouterConfig, SitemapConfig, SitemapSection, config_dir,
    config_file_path, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, SiteScribeError};
pub use types::{
    CodeBlock, ContentRecord, ConversionChunk, ConversionStatus, DocumentStatus, FetchResult,
    FetchStatus, Frontmatter, MarkdownDocument, SitemapEntry, UrlKey, compute_hash,
    domain_of, normalize_url,
};
