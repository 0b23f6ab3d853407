//! Core pipeline orchestration for SiteScribe.
//!
//! This crate ties together sitemap discovery, page fetching, AI conversion,
//! and code-block correction into the end-to-end `run` workflow.

pub mod convert;
pub mod converter;
pub mod output;
pub mod pipeline;
pub mod state;

pub use convert::ConversionOrchestrator;
pub use converter::{
    ConversionContext, LocalConverter, MarkdownConverter, OpenRouterConverter, build_converter,
};
pub use output::{OutputWriter, WriteOutcome};
pub use pipeline::{
    Pipeline, ProgressReporter, RunCounts, RunOptions, RunReport, SilentProgress,
};
pub use state::{FailureRecord, PipelineState, Stage, UrlStatus};
