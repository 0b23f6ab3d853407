//! Error types for SiteScribe.
//!
//! Library crates use [`SiteScribeError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Every variant renders with its taxonomy name first (`PermanentFetchError: 404`),
//! so a per-URL failure reason is simply the error's display string.

use std::path::PathBuf;

/// Top-level error type for all SiteScribe operations.
#[derive(Debug, thiserror::Error)]
pub enum SiteScribeError {
    /// The sitemap body could not be parsed as a sitemap document.
    #[error("MalformedSitemap: {0}")]
    MalformedSitemap(String),

    /// The root sitemap could not be fetched.
    #[error("UnreachableSitemap: {0}")]
    UnreachableSitemap(String),

    /// Timeout, 5xx, 408/429 or connection failure. Worth retrying.
    #[error("TransientFetchError: {0}")]
    TransientFetch(String),

    /// 4xx (except 408/429), blocked target or malformed response. Never retried.
    #[error("PermanentFetchError: {0}")]
    PermanentFetch(String),

    /// The conversion service errored or returned empty output.
    #[error("ConversionServiceError: {0}")]
    ConversionService(String),

    /// A chunk still exceeds the conversion service's hard limit after splitting.
    #[error("OversizedChunkError: {size} bytes exceeds limit of {limit} bytes")]
    OversizedChunk { size: usize, limit: usize },

    /// Content store or output store failure.
    #[error("PersistenceError: {0}")]
    Persistence(String),

    /// Configuration loading or validation error.
    #[error("ConfigError: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("IoError at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad URL, empty sitemap, bad frontmatter, ...).
    #[error("ValidationError: {message}")]
    Validation { message: String },

    /// The run was cancelled before this operation started.
    #[error("Cancelled")]
    Cancelled,
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SiteScribeError>;

impl SiteScribeError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Taxonomy name of this error, as used in run reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MalformedSitemap(_) => "MalformedSitemap",
            Self::UnreachableSitemap(_) => "UnreachableSitemap",
            Self::TransientFetch(_) => "TransientFetchError",
            Self::PermanentFetch(_) => "PermanentFetchError",
            Self::ConversionService(_) => "ConversionServiceError",
            Self::OversizedChunk { .. } => "OversizedChunkError",
            Self::Persistence(_) => "PersistenceError",
            Self::Config { .. } => "ConfigError",
            Self::Io { .. } => "IoError",
            Self::Validation { .. } => "ValidationError",
            Self::Cancelled => "Cancelled",
        }
    }

    /// Whether a bounded retry may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientFetch(_) | Self::ConversionService(_))
    }
}
