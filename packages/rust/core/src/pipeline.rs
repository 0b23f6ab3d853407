//! End-to-end `run` pipeline: sitemap → fetch → store → convert → write.
//!
//! The fetch and convert phases are independent: either can be skipped, and
//! a convert-only run works from whatever an earlier run left in the content
//! store. Per-URL failures are collected in the [`RunReport`]; only a sitemap
//! that yields no URLs at all stops the run.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use futures::StreamExt;
use futures::stream;
use serde::Serialize;
use tracing::{info, instrument, warn};
use url::Url;

use sitescribe_crawler::{FetchOrchestrator, PageFetcher};
use sitescribe_discovery::SitemapResolver;
use sitescribe_shared::{
    CancelSignal, ContentRecord, ConversionConfig, DocumentStatus, FetchConfig, FetchResult,
    FetchStatus, MarkdownDocument, Result, SiteScribeError, SitemapConfig, SitemapEntry, UrlKey,
    domain_of,
};
use sitescribe_storage::{ContentStore, db_path};

use crate::convert::ConversionOrchestrator;
use crate::converter::MarkdownConverter;
use crate::output::{OutputWriter, WriteOutcome};
use crate::state::{FailureRecord, PipelineState, Stage, UrlStatus};

// ---------------------------------------------------------------------------
// Options and report
// ---------------------------------------------------------------------------

/// What to run and where.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Required unless `skip_fetch` is set.
    pub sitemap_url: Option<String>,
    pub skip_fetch: bool,
    pub skip_convert: bool,
    /// Directory holding `content.db`.
    pub raw_dir: PathBuf,
    /// Root of the Markdown output store.
    pub output_dir: PathBuf,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunCounts {
    /// Page URLs produced by the sitemap.
    pub resolved: usize,
    /// Pages fetched and stored in this run.
    pub fetched: usize,
    /// Pages already in the store and not fetched again.
    pub fetch_skipped: usize,
    /// Pages converted successfully in this run.
    pub converted: usize,
    /// Pages whose output already reported success; no conversion call made.
    pub convert_skipped: usize,
    /// Output files created or replaced.
    pub written: usize,
    /// Output files that already had identical content.
    pub unchanged: usize,
    /// URLs that finished the run in their final good state.
    pub succeeded: usize,
    pub failed: usize,
    /// URLs never started because the run was cancelled.
    pub pending: usize,
}

/// Summary of one run, serializable for `--report`.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub sitemap_url: Option<String>,
    pub counts: RunCounts,
    pub failures: Vec<FailureRecord>,
    pub pending: Vec<String>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// True when no URL ended in a failed state.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called once per fetched or failed URL.
    fn page_fetched(&self, url: &str, ok: bool, current: usize, total: usize);
    /// Called once per URL leaving the conversion phase.
    fn page_converted(&self, url: &str, ok: bool, current: usize, total: usize);
    /// Called when the pipeline completes.
    fn done(&self, report: &RunReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn page_fetched(&self, _url: &str, _ok: bool, _current: usize, _total: usize) {}
    fn page_converted(&self, _url: &str, _ok: bool, _current: usize, _total: usize) {}
    fn done(&self, _report: &RunReport) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// How one page left the conversion phase.
enum PageOutcome {
    AlreadyComplete,
    Converted(MarkdownDocument),
    ConversionFailed(String),
    Cancelled,
}

pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    converter: Arc<dyn MarkdownConverter>,
    fetch: FetchConfig,
    sitemap: SitemapConfig,
    conversion: ConversionConfig,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        converter: Arc<dyn MarkdownConverter>,
        fetch: FetchConfig,
        sitemap: SitemapConfig,
        conversion: ConversionConfig,
    ) -> Self {
        Self {
            fetcher,
            converter,
            fetch,
            sitemap,
            conversion,
        }
    }

    /// Resolve a sitemap into page entries. No URLs at all is an error.
    pub async fn resolve(
        &self,
        sitemap_url: &str,
        cancel: &CancelSignal,
    ) -> Result<Vec<SitemapEntry>> {
        let resolver =
            SitemapResolver::new(self.fetcher.clone(), self.sitemap.clone(), &self.fetch);
        let entries = resolver.resolve(sitemap_url, cancel).await?;
        if entries.is_empty() {
            return Err(SiteScribeError::validation(format!(
                "sitemap {sitemap_url} contains no page URLs"
            )));
        }
        Ok(entries)
    }

    /// Run the configured phases.
    #[instrument(skip_all, fields(
        sitemap = options.sitemap_url.as_deref().unwrap_or("-"),
        skip_fetch = options.skip_fetch,
        skip_convert = options.skip_convert,
    ))]
    pub async fn run(
        &self,
        options: &RunOptions,
        cancel: &CancelSignal,
        progress: &dyn ProgressReporter,
    ) -> Result<RunReport> {
        let start = Instant::now();
        let mut state = PipelineState::new();
        let mut counts = RunCounts::default();

        if options.skip_fetch && options.skip_convert {
            return Err(SiteScribeError::validation(
                "both phases skipped, nothing to do",
            ));
        }

        // --- Phase 1: fetch ---
        let store = if options.skip_fetch {
            ContentStore::open_readonly(&db_path(&options.raw_dir)).await?
        } else {
            let sitemap_url = options.sitemap_url.as_deref().ok_or_else(|| {
                SiteScribeError::validation("a sitemap URL is required unless fetching is skipped")
            })?;

            progress.phase("Resolving sitemap");
            let entries = self.resolve(sitemap_url, cancel).await?;
            counts.resolved = entries.len();
            for entry in &entries {
                state.track(&entry.url);
            }

            let store = ContentStore::open(&db_path(&options.raw_dir)).await?;
            progress.phase("Fetching pages");
            self.fetch_phase(&entries, &store, cancel, progress, &mut state, &mut counts)
                .await;
            store
        };

        // --- Phase 2: convert ---
        if !options.skip_convert {
            let records = if options.skip_fetch {
                self.stored_records(&store, options.sitemap_url.as_deref(), &mut state)
                    .await?
            } else {
                fetched_records(&store, &mut state).await
            };

            progress.phase("Converting pages");
            self.convert_phase(&records, options, cancel, progress, &mut state, &mut counts)
                .await;
        }

        // --- Report ---
        let finished = if options.skip_convert {
            UrlStatus::Fetched
        } else {
            UrlStatus::Written
        };
        let mut pending: Vec<String> = state
            .urls_with(&UrlStatus::Pending)
            .into_iter()
            .map(str::to_string)
            .collect();
        if !options.skip_convert {
            pending.extend(state.urls_with(&UrlStatus::Fetched).into_iter().map(str::to_string));
        }

        let failures = state.failures();
        counts.succeeded = state.count(&finished);
        counts.failed = failures.len();
        counts.pending = pending.len();

        let report = RunReport {
            sitemap_url: options.sitemap_url.clone(),
            counts,
            failures,
            pending,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            succeeded = report.counts.succeeded,
            failed = report.counts.failed,
            pending = report.counts.pending,
            duration_ms = report.elapsed_ms,
            "run complete"
        );
        progress.done(&report);
        Ok(report)
    }

    async fn fetch_phase(
        &self,
        entries: &[SitemapEntry],
        store: &ContentStore,
        cancel: &CancelSignal,
        progress: &dyn ProgressReporter,
        state: &mut PipelineState,
        counts: &mut RunCounts,
    ) {
        let orchestrator = FetchOrchestrator::new(self.fetcher.clone(), self.fetch.clone());
        let total = entries.len();
        let mut done = 0;

        let summary = orchestrator
            .run(entries, store, cancel, &mut |result: &FetchResult| {
                done += 1;
                let ok = match &result.status {
                    FetchStatus::Success => {
                        state.set(&result.url, UrlStatus::Fetched);
                        true
                    }
                    FetchStatus::Failed(reason) => {
                        state.fail(&result.url, Stage::Fetch, reason.clone());
                        false
                    }
                };
                progress.page_fetched(&result.url, ok, done, total);
            })
            .await;

        for url in &summary.skipped {
            state.set(url, UrlStatus::Fetched);
        }
        for failed in &summary.failed {
            if !matches!(state.status(&failed.url), Some(UrlStatus::Failed { .. })) {
                state.fail(&failed.url, Stage::Fetch, failed.reason.clone());
            }
        }
        counts.fetched = summary.succeeded.len();
        counts.fetch_skipped = summary.skipped.len();
    }

    /// Every stored record for the sitemap's domain, or for all domains.
    async fn stored_records(
        &self,
        store: &ContentStore,
        sitemap_url: Option<&str>,
        state: &mut PipelineState,
    ) -> Result<Vec<ContentRecord>> {
        let domains = match sitemap_url {
            Some(raw) => {
                let url = Url::parse(raw).map_err(|e| {
                    SiteScribeError::validation(format!("invalid sitemap URL {raw}: {e}"))
                })?;
                vec![domain_of(&url)?]
            }
            None => store.list_domains().await?,
        };

        let mut records = Vec::new();
        for domain in &domains {
            records.extend(store.list(domain).await?);
        }
        for record in &records {
            state.set(&record.url, UrlStatus::Fetched);
        }
        info!(domains = domains.len(), pages = records.len(), "loaded stored pages");
        Ok(records)
    }

    async fn convert_phase(
        &self,
        records: &[ContentRecord],
        options: &RunOptions,
        cancel: &CancelSignal,
        progress: &dyn ProgressReporter,
        state: &mut PipelineState,
        counts: &mut RunCounts,
    ) {
        let orchestrator =
            ConversionOrchestrator::new(self.converter.clone(), self.conversion.clone());
        let writer = OutputWriter::new(&options.output_dir);
        let total = records.len();

        let (orchestrator, writer) = (&orchestrator, &writer);
        let mut outcomes = stream::iter(records)
            .map(|record| async move {
                let outcome = self.convert_page(record, orchestrator, writer, cancel).await;
                (record.url.as_str(), outcome)
            })
            .buffer_unordered(self.conversion.concurrency.max(1));

        let mut done = 0;
        while let Some((url, outcome)) = outcomes.next().await {
            done += 1;
            let ok = match outcome {
                PageOutcome::AlreadyComplete => {
                    counts.convert_skipped += 1;
                    state.set(url, UrlStatus::Written);
                    true
                }
                PageOutcome::Converted(doc) => {
                    counts.converted += 1;
                    state.set(url, UrlStatus::Converted);
                    match writer.write(&doc).await {
                        Ok(write) => {
                            match write {
                                WriteOutcome::Unchanged => counts.unchanged += 1,
                                _ => counts.written += 1,
                            }
                            state.set(url, UrlStatus::Written);
                            true
                        }
                        Err(e) => {
                            warn!(url, error = %e, "failed to write output");
                            state.fail(url, Stage::Write, e.to_string());
                            false
                        }
                    }
                }
                PageOutcome::ConversionFailed(reason) => {
                    state.fail(url, Stage::Convert, reason);
                    false
                }
                PageOutcome::Cancelled => continue,
            };
            progress.page_converted(url, ok, done, total);
        }
    }

    async fn convert_page(
        &self,
        record: &ContentRecord,
        orchestrator: &ConversionOrchestrator,
        writer: &OutputWriter,
        cancel: &CancelSignal,
    ) -> PageOutcome {
        if cancel.is_cancelled() {
            return PageOutcome::Cancelled;
        }
        if !self.conversion.force && writer.is_complete(&record.key).await {
            info!(url = %record.url, "output already complete, skipping");
            return PageOutcome::AlreadyComplete;
        }

        let doc = match orchestrator.convert(record, cancel).await {
            Ok(doc) => doc,
            Err(SiteScribeError::Cancelled) => return PageOutcome::Cancelled,
            Err(e) => return PageOutcome::ConversionFailed(e.to_string()),
        };

        if doc.frontmatter.status == DocumentStatus::Failed {
            let reason = doc.frontmatter.error.clone().unwrap_or_default();
            if let Err(e) = writer.write(&doc).await {
                warn!(url = %record.url, error = %e, "failed to write audit record");
            }
            return PageOutcome::ConversionFailed(reason);
        }
        PageOutcome::Converted(doc)
    }
}

/// Load the records for every URL the fetch phase left in `Fetched`.
async fn fetched_records(store: &ContentStore, state: &mut PipelineState) -> Vec<ContentRecord> {
    let urls: Vec<String> = state
        .urls_with(&UrlStatus::Fetched)
        .into_iter()
        .map(str::to_string)
        .collect();

    let mut records = Vec::with_capacity(urls.len());
    for url in urls {
        let loaded = match UrlKey::from_url(&url) {
            Ok(key) => store.get(&key).await,
            Err(e) => Err(e),
        };
        match loaded {
            Ok(Some(record)) => records.push(record),
            Ok(None) => state.fail(
                &url,
                Stage::Fetch,
                SiteScribeError::Persistence("stored page disappeared".into()).to_string(),
            ),
            Err(e) => state.fail(&url, Stage::Fetch, e.to_string()),
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use sitescribe_crawler::{FetchOptions, FetchResponse};
    use sitescribe_shared::{AppConfig, ConversionBackend};
    use uuid::Uuid;

    use crate::converter::{ConversionContext, LocalConverter};

    const SITEMAP: &str = "https://docs.example.com/sitemap.xml";

    /// Serves canned responses and counts requests per URL.
    struct MockFetcher {
        pages: HashMap<String, (u16, String)>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl MockFetcher {
        fn new(pages: &[(&str, u16, String)]) -> Self {
            Self {
                pages: pages
                    .iter()
                    .map(|(url, code, body)| (url.to_string(), (*code, body.clone())))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
            }
        }

        fn calls_to(&self, url: &str) -> usize {
            self.calls.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl PageFetcher for MockFetcher {
        async fn fetch(&self, url: &str, _options: &FetchOptions) -> Result<FetchResponse> {
            *self.calls.lock().unwrap().entry(url.to_string()).or_default() += 1;
            let (status_code, html) = self
                .pages
                .get(url)
                .cloned()
                .unwrap_or((404, String::new()));
            Ok(FetchResponse { html, status_code })
        }
    }

    /// Local conversion with a call counter. When `cancel_on_first` is set,
    /// the first call cancels the run and still returns its Markdown.
    #[derive(Default)]
    struct CountingConverter {
        calls: AtomicUsize,
        urls: Mutex<Vec<String>>,
        cancel_on_first: Option<CancelSignal>,
    }

    #[async_trait]
    impl MarkdownConverter for CountingConverter {
        fn name(&self) -> &str {
            "local"
        }

        async fn convert(&self, html: &str, context: &ConversionContext) -> Result<String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            self.urls.lock().unwrap().push(context.url.clone());
            if let Some(cancel) = &self.cancel_on_first {
                if call == 0 {
                    cancel.cancel();
                }
            }
            LocalConverter.convert(html, context).await
        }
    }

    fn site() -> Arc<MockFetcher> {
        let sitemap = r#"<?xml version="1.0" encoding="UTF-8"?>
<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
  <url><loc>https://docs.example.com/missing</loc></url>
  <url><loc>https://docs.example.com/small</loc></url>
  <url><loc>https://docs.example.com/large</loc></url>
</urlset>"#
            .to_string();
        let small = "<html><head><title>Small</title></head><body><main><h1>Small page</h1><p>Short text.</p><pre><code>import os\nprint(os.name)</code></pre></main></body></html>".to_string();
        let large = format!(
            "<html><head><title>Large</title></head><body><main><p>First {}</p><p>Second {}</p></main></body></html>",
            "a".repeat(150),
            "b".repeat(150)
        );
        Arc::new(MockFetcher::new(&[
            (SITEMAP, 200, sitemap),
            ("https://docs.example.com/small", 200, small),
            ("https://docs.example.com/large", 200, large),
        ]))
    }

    fn pipeline(fetcher: Arc<MockFetcher>, converter: Arc<CountingConverter>) -> Pipeline {
        let config = AppConfig::default();
        let mut fetch = FetchConfig::from(&config);
        fetch.rate_limit_ms = 0;
        fetch.backoff_base_ms = 1;
        fetch.backoff_max_ms = 5;
        let mut conversion = ConversionConfig::from(&config);
        conversion.backend = ConversionBackend::Local;
        conversion.chunk_threshold_bytes = 200;
        conversion.max_chunk_bytes = 5000;
        conversion.backoff_base_ms = 1;
        Pipeline::new(fetcher, converter, fetch, SitemapConfig::from(&config), conversion)
    }

    fn options(root: &Path, out: &str) -> RunOptions {
        RunOptions {
            sitemap_url: Some(SITEMAP.into()),
            skip_fetch: false,
            skip_convert: false,
            raw_dir: root.join("raw"),
            output_dir: root.join(out),
        }
    }

    fn temp_root() -> PathBuf {
        std::env::temp_dir().join(format!("sitescribe-pipeline-{}", Uuid::now_v7()))
    }

    /// File name → contents with the `date:` line removed.
    fn outputs(dir: &Path) -> HashMap<String, String> {
        let domain_dir = dir.join("docs.example.com");
        let Ok(entries) = std::fs::read_dir(&domain_dir) else {
            return HashMap::new();
        };
        entries
            .map(|e| e.unwrap().path())
            .map(|p| {
                let text = std::fs::read_to_string(&p).unwrap();
                let without_date: String = text
                    .lines()
                    .filter(|l| !l.starts_with("date: "))
                    .map(|l| format!("{l}\n"))
                    .collect();
                (p.file_name().unwrap().to_string_lossy().into_owned(), without_date)
            })
            .collect()
    }

    #[tokio::test]
    async fn end_to_end_mixed_results() {
        let root = temp_root();
        let converter = Arc::new(CountingConverter::default());
        let pipeline = pipeline(site(), converter.clone());

        let report = pipeline
            .run(&options(&root, "out"), &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.counts.resolved, 3);
        assert_eq!(report.counts.succeeded, 2);
        assert_eq!(report.counts.failed, 1);
        assert!(!report.is_success());
        assert_eq!(
            report.failures,
            vec![FailureRecord {
                url: "https://docs.example.com/missing".into(),
                stage: Stage::Fetch,
                reason: "PermanentFetchError: 404".into(),
            }]
        );

        let files = outputs(&root.join("out"));
        assert_eq!(files.len(), 2);
        let large = files
            .values()
            .find(|text| text.contains("url: \"https://docs.example.com/large\""))
            .unwrap();
        assert!(large.contains("chunk_count: 2\n"));
        assert!(large.contains("status: success\n"));
        let small = files
            .values()
            .find(|text| text.contains("url: \"https://docs.example.com/small\""))
            .unwrap();
        assert!(small.contains("chunk_count: 1\n"));
        assert!(small.contains("code_block_count: 1\n"));
        assert!(small.contains("```python\nimport os\nprint(os.name)\n```"));
        assert!(small.contains("title: \"Small page\"\n"));

        // one call for the small page, two for the large one
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["failures"][0]["stage"], "fetch");

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn rerun_skips_completed_work() {
        let root = temp_root();
        let fetcher = site();
        let converter = Arc::new(CountingConverter::default());
        let pipeline = pipeline(fetcher.clone(), converter.clone());
        let opts = options(&root, "out");

        pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.unwrap();
        let first = outputs(&root.join("out"));

        let report = pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.counts.fetch_skipped, 2);
        assert_eq!(report.counts.fetched, 0);
        assert_eq!(report.counts.convert_skipped, 2);
        assert_eq!(fetcher.calls_to("https://docs.example.com/small"), 1);
        assert_eq!(fetcher.calls_to("https://docs.example.com/large"), 1);
        // the failed URL is retried on the next run
        assert_eq!(fetcher.calls_to("https://docs.example.com/missing"), 2);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);
        assert_eq!(outputs(&root.join("out")), first);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn convert_only_run_matches_uninterrupted_run() {
        let full_root = temp_root();
        let split_root = temp_root();
        let converter = Arc::new(CountingConverter::default());

        pipeline(site(), converter.clone())
            .run(&options(&full_root, "out"), &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        let split = pipeline(site(), converter.clone());
        let mut fetch_only = options(&split_root, "out");
        fetch_only.skip_convert = true;
        let report = split.run(&fetch_only, &CancelSignal::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.counts.succeeded, 2);
        assert!(outputs(&split_root.join("out")).is_empty());

        let convert_only = RunOptions {
            sitemap_url: None,
            skip_fetch: true,
            skip_convert: false,
            raw_dir: split_root.join("raw"),
            output_dir: split_root.join("out"),
        };
        let report = split.run(&convert_only, &CancelSignal::new(), &SilentProgress).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.counts.converted, 2);

        assert_eq!(outputs(&split_root.join("out")), outputs(&full_root.join("out")));

        let _ = std::fs::remove_dir_all(&full_root);
        let _ = std::fs::remove_dir_all(&split_root);
    }

    #[tokio::test]
    async fn forced_conversion_rewrites_nothing_when_identical() {
        let root = temp_root();
        let converter = Arc::new(CountingConverter::default());
        let mut pipeline = pipeline(site(), converter.clone());
        let opts = options(&root, "out");
        pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.unwrap();

        pipeline.conversion.force = true;
        let report = pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.counts.converted, 2);
        assert_eq!(report.counts.unchanged, 2);
        assert_eq!(report.counts.written, 0);
        assert_eq!(converter.calls.load(Ordering::SeqCst), 6);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn cancel_during_conversion_leaves_rest_pending() {
        let root = temp_root();
        let cancel = CancelSignal::new();
        let converter = Arc::new(CountingConverter {
            cancel_on_first: Some(cancel.clone()),
            ..Default::default()
        });
        let mut pipeline = pipeline(site(), converter.clone());
        pipeline.conversion.concurrency = 1;
        let opts = options(&root, "out");

        let report = pipeline.run(&opts, &cancel, &SilentProgress).await.unwrap();

        // the page in flight when cancel fired finishes and is written
        assert_eq!(report.counts.converted, 1);
        assert_eq!(report.counts.written, 1);
        assert_eq!(report.counts.pending, 1);
        assert_eq!(report.pending, vec!["https://docs.example.com/large".to_string()]);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].stage, Stage::Fetch);
        assert_eq!(
            *converter.urls.lock().unwrap(),
            vec!["https://docs.example.com/small".to_string()]
        );
        let files = outputs(&root.join("out"));
        assert_eq!(files.len(), 1);
        assert!(files
            .values()
            .all(|text| text.contains("url: \"https://docs.example.com/small\"")));

        let report = pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.unwrap();
        assert_eq!(report.counts.convert_skipped, 1);
        assert_eq!(report.counts.converted, 1);
        assert_eq!(report.counts.pending, 0);
        assert_eq!(
            *converter.urls.lock().unwrap(),
            vec![
                "https://docs.example.com/small".to_string(),
                "https://docs.example.com/large".to_string(),
                "https://docs.example.com/large".to_string(),
            ]
        );
        assert_eq!(outputs(&root.join("out")).len(), 2);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn write_failure_is_reported_after_conversion() {
        let root = temp_root();
        std::fs::create_dir_all(&root).unwrap();
        // a regular file where the output directory should be
        std::fs::write(root.join("out"), "not a directory").unwrap();
        let converter = Arc::new(CountingConverter::default());
        let pipeline = pipeline(site(), converter.clone());

        let report = pipeline
            .run(&options(&root, "out"), &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap();

        assert_eq!(report.counts.converted, 2);
        assert_eq!(report.counts.written, 0);
        assert_eq!(report.counts.succeeded, 0);
        assert_eq!(report.counts.pending, 0);
        let write_failures: Vec<&str> = report
            .failures
            .iter()
            .filter(|f| f.stage == Stage::Write)
            .map(|f| f.url.as_str())
            .collect();
        assert_eq!(
            write_failures,
            vec!["https://docs.example.com/small", "https://docs.example.com/large"]
        );
        assert_eq!(converter.calls.load(Ordering::SeqCst), 3);

        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn empty_sitemap_is_fatal() {
        let root = temp_root();
        let fetcher = Arc::new(MockFetcher::new(&[(
            SITEMAP,
            200,
            r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9"></urlset>"#.to_string(),
        )]));
        let pipeline = pipeline(fetcher, Arc::new(CountingConverter::default()));
        let err = pipeline
            .run(&options(&root, "out"), &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteScribeError::Validation { .. }));
    }

    #[tokio::test]
    async fn unreachable_sitemap_is_fatal() {
        let root = temp_root();
        let fetcher = Arc::new(MockFetcher::new(&[]));
        let pipeline = pipeline(fetcher, Arc::new(CountingConverter::default()));
        let err = pipeline
            .run(&options(&root, "out"), &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteScribeError::UnreachableSitemap(_)));
    }

    #[tokio::test]
    async fn convert_only_without_store_fails() {
        let root = temp_root();
        let pipeline = pipeline(site(), Arc::new(CountingConverter::default()));
        let opts = RunOptions {
            sitemap_url: None,
            skip_fetch: true,
            skip_convert: false,
            raw_dir: root.join("raw"),
            output_dir: root.join("out"),
        };
        let err = pipeline
            .run(&opts, &CancelSignal::new(), &SilentProgress)
            .await
            .unwrap_err();
        assert!(matches!(err, SiteScribeError::Validation { .. }));
    }

    #[tokio::test]
    async fn fetch_requires_sitemap() {
        let root = temp_root();
        let pipeline = pipeline(site(), Arc::new(CountingConverter::default()));
        let mut opts = options(&root, "out");
        opts.sitemap_url = None;
        assert!(pipeline.run(&opts, &CancelSignal::new(), &SilentProgress).await.is_err());
    }
}
