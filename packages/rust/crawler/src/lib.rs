//! Page fetching: the fetch collaborator, retry policy, and the concurrent
//! fetch orchestrator.
//!
//! This crate provides:
//! - [`PageFetcher`], the seam to whatever actually retrieves a page, with
//!   [`HttpFetcher`] as the reqwest implementation
//! - [`fetch_with_retry`], bounded retry with exponential backoff and jitter,
//!   shared with sitemap resolution
//! - [`FetchOrchestrator`], a bounded worker pool that writes into the
//!   content store

pub mod fetcher;
pub mod orchestrator;
pub mod retry;

pub use fetcher::{FetchOptions, FetchResponse, HttpFetcher, PageFetcher, is_ssrf_target};
pub use orchestrator::{FailedFetch, FetchOrchestrator, FetchSummary};
pub use retry::{FetchOutcome, RateLimiter, RetryPolicy, classify_response, fetch_with_retry};
