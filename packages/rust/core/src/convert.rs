//! Conversion of stored pages into Markdown documents.
//!
//! One [`ContentRecord`] becomes one [`MarkdownDocument`]. Oversized pages are
//! split into ordered chunks that are converted concurrently and joined back
//! by index. Every remote call goes through a semaphore sized by the
//! conversion concurrency, independent of the fetch pool.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitescribe_crawler::RetryPolicy;
use sitescribe_markdown::{
    DocumentFacts, code_language_hints, extract_content_html, extract_title, finish_markdown,
    split_into_chunks, synthesize, title_from_markdown,
};
use sitescribe_shared::{
    CancelSignal, ContentRecord, ConversionChunk, ConversionConfig, ConversionStatus,
    MarkdownDocument, Result, SiteScribeError,
};

use crate::converter::{ConversionContext, MarkdownConverter};

/// Upper bound on a single backoff sleep between conversion attempts.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

pub struct ConversionOrchestrator {
    converter: Arc<dyn MarkdownConverter>,
    config: ConversionConfig,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
}

impl ConversionOrchestrator {
    pub fn new(converter: Arc<dyn MarkdownConverter>, config: ConversionConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        let policy = RetryPolicy::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            MAX_BACKOFF,
        );
        Self {
            converter,
            config,
            permits,
            policy,
        }
    }

    pub fn converter_name(&self) -> &str {
        self.converter.name()
    }

    pub fn config(&self) -> &ConversionConfig {
        &self.config
    }

    /// Convert one stored page.
    ///
    /// Conversion failures do not surface as `Err`: they produce a document
    /// whose frontmatter says `status: failed` with the reason, and an empty
    /// body. `Err` is returned only for `Cancelled`, in which case nothing
    /// should be written for the page.
    #[instrument(skip_all, fields(url = %record.url))]
    pub async fn convert(
        &self,
        record: &ContentRecord,
        cancel: &CancelSignal,
    ) -> Result<MarkdownDocument> {
        if cancel.is_cancelled() {
            return Err(SiteScribeError::Cancelled);
        }

        let content = extract_content_html(&record.raw_content);
        let html_title = extract_title(&record.raw_content);

        let chunks = match split_into_chunks(
            &record.url,
            &content,
            self.config.chunk_threshold_bytes,
            self.config.max_chunk_bytes,
        ) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!(url = %record.url, error = %e, "cannot chunk page");
                return Ok(self.failed_document(record, html_title.as_deref(), 0, &e));
            }
        };
        let chunk_count = chunks.len();

        let outputs = match self.convert_chunks(&chunks, cancel).await {
            Ok(outputs) => outputs,
            Err(SiteScribeError::Cancelled) => return Err(SiteScribeError::Cancelled),
            Err(e) => {
                warn!(url = %record.url, error = %e, "conversion failed");
                return Ok(self.failed_document(record, html_title.as_deref(), chunk_count, &e));
            }
        };

        let body = outputs
            .iter()
            .map(|s| s.trim_matches('\n'))
            .collect::<Vec<_>>()
            .join("\n\n");
        let base_url = Url::parse(&record.url).ok();
        let finished = finish_markdown(&body, base_url.as_ref());

        let title = title_from_markdown(&finished.markdown).or(html_title);
        let status = ConversionStatus::Success;
        let frontmatter = synthesize(&DocumentFacts {
            url: &record.url,
            domain: &record.key.domain,
            title: title.as_deref(),
            fetched_at: record.fetched_at,
            code_block_count: finished.code_block_count(),
            chunk_count,
            status: &status,
            converter: self.converter.name(),
        });

        info!(
            url = %record.url,
            chunk_count,
            code_block_count = finished.code_block_count(),
            bytes = finished.markdown.len(),
            "page converted"
        );

        Ok(MarkdownDocument {
            key: record.key.clone(),
            url: record.url.clone(),
            domain: record.key.domain.clone(),
            code_block_count: finished.code_block_count(),
            chunk_count,
            frontmatter,
            body: finished.markdown,
        })
    }

    /// Convert all chunks, outputs in chunk order. The first failure cancels
    /// the remaining chunks of this page.
    async fn convert_chunks(
        &self,
        chunks: &[ConversionChunk],
        cancel: &CancelSignal,
    ) -> Result<Vec<String>> {
        let chunk_count = chunks.len();
        try_join_all(chunks.iter().map(|chunk| {
            let context = ConversionContext {
                url: chunk.parent_url.clone(),
                chunk_index: chunk.chunk_index,
                chunk_count,
                language_hints: code_language_hints(&chunk.chunk_text),
            };
            async move { self.convert_chunk(&chunk.chunk_text, &context, cancel).await }
        }))
        .await
    }

    /// One chunk with bounded retries. A permit is held only while a call is
    /// in flight, never across a backoff sleep.
    async fn convert_chunk(
        &self,
        html: &str,
        context: &ConversionContext,
        cancel: &CancelSignal,
    ) -> Result<String> {
        let max_attempts = self.policy.max_attempts();
        let retry_key = format!("{}#{}", context.url, context.chunk_index);
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(SiteScribeError::Cancelled);
            }
            attempt += 1;

            let result = {
                let _permit = self
                    .permits
                    .acquire()
                    .await
                    .map_err(|_| SiteScribeError::Cancelled)?;
                self.converter.convert(html, context).await
            };
            let err = match result {
                Ok(markdown) if !markdown.trim().is_empty() => {
                    debug!(
                        url = %context.url,
                        chunk_index = context.chunk_index,
                        attempt,
                        "chunk converted"
                    );
                    return Ok(markdown);
                }
                Ok(_) => SiteScribeError::ConversionService(format!(
                    "empty output for chunk {}",
                    context.chunk_index
                )),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt >= max_attempts {
                return Err(err);
            }

            let delay = self.policy.delay_for(&retry_key, attempt);
            debug!(
                url = %context.url,
                chunk_index = context.chunk_index,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying chunk"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(SiteScribeError::Cancelled),
            }
        }
    }

    /// Frontmatter-only audit document for a page that could not be converted.
    fn failed_document(
        &self,
        record: &ContentRecord,
        title: Option<&str>,
        chunk_count: usize,
        error: &SiteScribeError,
    ) -> MarkdownDocument {
        let status = ConversionStatus::Failed(error.to_string());
        let frontmatter = synthesize(&DocumentFacts {
            url: &record.url,
            domain: &record.key.domain,
            title,
            fetched_at: record.fetched_at,
            code_block_count: 0,
            chunk_count,
            status: &status,
            converter: self.converter.name(),
        });
        MarkdownDocument {
            key: record.key.clone(),
            url: record.url.clone(),
            domain: record.key.domain.clone(),
            frontmatter,
            body: String::new(),
            code_block_count: 0,
            chunk_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use sitescribe_shared::{AppConfig, DocumentStatus, FetchResult, FetchStatus};

    /// Echoes chunk index and size; fails the first `fail_first` calls.
    struct ScriptedConverter {
        calls: AtomicUsize,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        fail_first: usize,
        error: fn() -> SiteScribeError,
        delay: Duration,
    }

    impl ScriptedConverter {
        fn new(fail_first: usize, error: fn() -> SiteScribeError) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                in_flight: AtomicUsize::new(0),
                max_in_flight: AtomicUsize::new(0),
                fail_first,
                error,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl MarkdownConverter for ScriptedConverter {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn convert(&self, html: &str, context: &ConversionContext) -> Result<String> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err((self.error)());
            }
            Ok(format!(
                "## Part {} of {}\n\n{} bytes\n",
                context.chunk_index, context.chunk_count,
                html.len()
            ))
        }
    }

    fn config() -> ConversionConfig {
        let mut config = ConversionConfig::from(&AppConfig::default());
        config.backoff_base_ms = 1;
        config.chunk_threshold_bytes = 200;
        config.max_chunk_bytes = 1000;
        config
    }

    fn record(body: &str) -> ContentRecord {
        let fetch = FetchResult {
            url: "https://docs.example.com/guide".into(),
            domain: "docs.example.com".into(),
            raw_content: format!("<html><head><title>Guide</title></head><body><main>{body}</main></body></html>"),
            fetched_at: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            status_code: Some(200),
            status: FetchStatus::Success,
            attempts: 1,
        };
        ContentRecord::from_fetch(&fetch).unwrap()
    }

    fn paragraphs(n: usize) -> String {
        (0..n).map(|i| format!("<p>{i}{}</p>", "z".repeat(150))).collect()
    }

    fn transient() -> SiteScribeError {
        SiteScribeError::ConversionService("503".into())
    }

    #[tokio::test]
    async fn small_page_is_single_chunk() {
        let converter = Arc::new(ScriptedConverter::new(0, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let doc = orchestrator
            .convert(&record("<p>hello</p>"), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.chunk_count, 1);
        assert_eq!(doc.frontmatter.status, DocumentStatus::Success);
        assert_eq!(doc.frontmatter.converter, "scripted");
        assert_eq!(doc.frontmatter.date, record("").fetched_at);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn chunks_are_reassembled_in_order() {
        let converter = Arc::new(ScriptedConverter::new(0, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let doc = orchestrator
            .convert(&record(&paragraphs(4)), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.chunk_count, 4);
        assert_eq!(doc.frontmatter.chunk_count, 4);
        let positions: Vec<usize> = (0..4)
            .map(|i| doc.body.find(&format!("Part {i} of 4")).unwrap())
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(converter.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let converter = Arc::new(ScriptedConverter::new(2, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let doc = orchestrator
            .convert(&record("<p>hello</p>"), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.frontmatter.status, DocumentStatus::Success);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_fail_the_whole_document() {
        let converter = Arc::new(ScriptedConverter::new(usize::MAX, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let doc = orchestrator
            .convert(&record("<p>hello</p>"), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.frontmatter.status, DocumentStatus::Failed);
        assert_eq!(doc.frontmatter.error.as_deref(), Some("ConversionServiceError: 503"));
        assert!(doc.body.is_empty());
        // max_retries = 2 by default
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let converter = Arc::new(ScriptedConverter::new(usize::MAX, || {
            SiteScribeError::config("bad key")
        }));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let doc = orchestrator
            .convert(&record("<p>hello</p>"), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.frontmatter.status, DocumentStatus::Failed);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn oversized_piece_fails_without_calls() {
        let converter = Arc::new(ScriptedConverter::new(0, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let big = format!("<pre>{}</pre>", "q".repeat(3000));
        let doc = orchestrator
            .convert(&record(&big), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(doc.frontmatter.status, DocumentStatus::Failed);
        assert!(
            doc.frontmatter
                .error
                .as_deref()
                .unwrap()
                .starts_with("OversizedChunkError")
        );
        assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn chunk_calls_respect_concurrency_cap() {
        let mut scripted = ScriptedConverter::new(0, transient);
        scripted.delay = Duration::from_millis(20);
        let converter = Arc::new(scripted);
        let mut cfg = config();
        cfg.concurrency = 2;
        let orchestrator = ConversionOrchestrator::new(converter.clone(), cfg);
        orchestrator
            .convert(&record(&paragraphs(6)), &CancelSignal::new())
            .await
            .unwrap();
        assert_eq!(converter.calls.load(Ordering::SeqCst), 6);
        assert!(converter.max_in_flight.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelled_run_converts_nothing() {
        let converter = Arc::new(ScriptedConverter::new(0, transient));
        let orchestrator = ConversionOrchestrator::new(converter.clone(), config());
        let cancel = CancelSignal::new();
        cancel.cancel();
        let err = orchestrator
            .convert(&record("<p>hello</p>"), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteScribeError::Cancelled));
        assert_eq!(converter.calls.load(Ordering::SeqCst), 0);
    }
}
