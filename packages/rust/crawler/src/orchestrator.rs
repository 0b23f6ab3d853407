//! Concurrent fetch orchestrator.
//!
//! A fixed pool of workers pulls URLs from a shared queue and sends outcomes
//! over a channel. The orchestrator task is the only writer to the
//! [`ContentStore`]: a URL is reported fetched only after its record is
//! persisted, so store presence stays authoritative across crashes.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};

use sitescribe_shared::{
    CancelSignal, ContentRecord, FetchConfig, FetchResult, FetchStatus, SiteScribeError,
    SitemapEntry, UrlKey,
};
use sitescribe_storage::ContentStore;

use crate::fetcher::{FetchOptions, PageFetcher};
use crate::retry::{FetchOutcome, RateLimiter, RetryPolicy, fetch_with_retry};

// ---------------------------------------------------------------------------
// FetchSummary
// ---------------------------------------------------------------------------

/// A URL that ended the fetch phase in a failed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedFetch {
    pub url: String,
    /// Display string of the final error, e.g. `PermanentFetchError: 404`.
    pub reason: String,
}

/// Summary of one fetch phase.
#[derive(Debug, Clone, Default)]
pub struct FetchSummary {
    /// Fetched and persisted during this run.
    pub succeeded: Vec<String>,
    /// Already in the store; no request issued.
    pub skipped: Vec<String>,
    pub failed: Vec<FailedFetch>,
    /// Never started because the run was cancelled.
    pub pending: Vec<String>,
    /// Requests issued across all URLs, retries included.
    pub total_attempts: u32,
    pub elapsed: Duration,
}

// ---------------------------------------------------------------------------
// FetchOrchestrator
// ---------------------------------------------------------------------------

struct Job {
    url: String,
    key: UrlKey,
}

type JobQueue = Arc<Mutex<VecDeque<Job>>>;

/// Drives bounded-concurrency fetches into the content store.
pub struct FetchOrchestrator {
    fetcher: Arc<dyn PageFetcher>,
    config: FetchConfig,
    limiter: Arc<RateLimiter>,
}

impl FetchOrchestrator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: FetchConfig) -> Self {
        let limiter = Arc::new(RateLimiter::new(Duration::from_millis(config.rate_limit_ms)));
        Self {
            fetcher,
            config,
            limiter,
        }
    }

    /// Fetch every entry not yet in `store` (all of them when forced) with at
    /// most `concurrency` requests in flight.
    ///
    /// Per-URL failures are collected, never propagated. `on_result` sees each
    /// fetched or failed URL once, after any store write for it.
    #[instrument(skip_all, fields(urls = entries.len(), concurrency = self.config.concurrency))]
    pub async fn run(
        &self,
        entries: &[SitemapEntry],
        store: &ContentStore,
        cancel: &CancelSignal,
        on_result: &mut (dyn FnMut(&FetchResult) + Send),
    ) -> FetchSummary {
        let start = Instant::now();
        let mut summary = FetchSummary::default();
        let mut seen = HashSet::new();
        let mut jobs = VecDeque::new();

        for entry in entries {
            let key = match UrlKey::from_url(&entry.url) {
                Ok(key) => key,
                Err(e) => {
                    summary.failed.push(FailedFetch {
                        url: entry.url.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
            };
            if !seen.insert(key.clone()) {
                debug!(url = %entry.url, "duplicate entry, ignoring");
                continue;
            }
            if !self.config.force {
                match store.exists(&key).await {
                    Ok(true) => {
                        debug!(url = %entry.url, "already stored, skipping");
                        summary.skipped.push(entry.url.clone());
                        continue;
                    }
                    Ok(false) => {}
                    Err(e) => {
                        summary.failed.push(FailedFetch {
                            url: entry.url.clone(),
                            reason: e.to_string(),
                        });
                        continue;
                    }
                }
            }
            jobs.push_back(Job {
                url: entry.url.clone(),
                key,
            });
        }

        info!(
            queued = jobs.len(),
            skipped = summary.skipped.len(),
            force = self.config.force,
            "starting fetch phase"
        );

        let workers = self.config.concurrency.max(1).min(jobs.len());
        let queue: JobQueue = Arc::new(Mutex::new(jobs));
        let (tx, mut rx) = mpsc::channel::<(Job, FetchOutcome, DateTime<Utc>)>(workers.max(1));
        let mut set = JoinSet::new();

        for worker_id in 0..workers {
            let queue = queue.clone();
            let tx = tx.clone();
            let fetcher = self.fetcher.clone();
            let limiter = self.limiter.clone();
            let policy = RetryPolicy::from(&self.config);
            let options = FetchOptions::from(&self.config);
            let cancel = cancel.clone();

            set.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let Some(job) = queue.lock().await.pop_front() else {
                        break;
                    };
                    let outcome = fetch_with_retry(
                        fetcher.as_ref(),
                        &job.url,
                        &options,
                        &policy,
                        &limiter,
                        &cancel,
                    )
                    .await;
                    if tx.send((job, outcome, Utc::now())).await.is_err() {
                        break;
                    }
                }
                debug!(worker_id, "fetch worker finished");
            });
        }
        drop(tx);

        while let Some((job, outcome, fetched_at)) = rx.recv().await {
            self.record(job, outcome, fetched_at, store, &mut summary, on_result)
                .await;
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "fetch worker aborted");
            }
        }

        summary
            .pending
            .extend(queue.lock().await.drain(..).map(|job| job.url));
        summary.elapsed = start.elapsed();

        info!(
            succeeded = summary.succeeded.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            pending = summary.pending.len(),
            attempts = summary.total_attempts,
            duration_ms = summary.elapsed.as_millis() as u64,
            "fetch phase completed"
        );
        summary
    }

    /// Persist or record one worker outcome.
    async fn record(
        &self,
        job: Job,
        outcome: FetchOutcome,
        fetched_at: DateTime<Utc>,
        store: &ContentStore,
        summary: &mut FetchSummary,
        on_result: &mut (dyn FnMut(&FetchResult) + Send),
    ) {
        summary.total_attempts += outcome.attempts;

        let mut result = FetchResult {
            url: job.url.clone(),
            domain: job.key.domain.clone(),
            raw_content: String::new(),
            fetched_at,
            status_code: None,
            status: FetchStatus::Success,
            attempts: outcome.attempts,
        };

        match outcome.result {
            Ok(response) => {
                result.raw_content = response.html;
                result.status_code = Some(response.status_code);
                let persisted = match ContentRecord::from_fetch(&result) {
                    Ok(record) => store.put(&record).await,
                    Err(e) => Err(e),
                };
                match persisted {
                    Ok(()) => summary.succeeded.push(job.url),
                    Err(e) => {
                        let reason = match e {
                            SiteScribeError::Persistence(_) => e.to_string(),
                            other => SiteScribeError::Persistence(other.to_string()).to_string(),
                        };
                        warn!(url = %job.url, %reason, "failed to store page");
                        result.status = FetchStatus::Failed(reason.clone());
                        summary.failed.push(FailedFetch {
                            url: job.url,
                            reason,
                        });
                    }
                }
            }
            Err(SiteScribeError::Cancelled) => {
                summary.pending.push(job.url);
                return;
            }
            Err(e) => {
                let reason = e.to_string();
                result.status = FetchStatus::Failed(reason.clone());
                summary.failed.push(FailedFetch {
                    url: job.url,
                    reason,
                });
            }
        }

        on_result(&result);
    }
}
