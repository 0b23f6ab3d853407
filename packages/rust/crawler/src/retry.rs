//! Retry policy, courtesy rate limiting, and the retrying fetch loop.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, warn};

use sitescribe_shared::{CancelSignal, FetchConfig, Result, SiteScribeError};

use crate::fetcher::{FetchOptions, FetchResponse, PageFetcher};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded exponential backoff with deterministic jitter.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// Total attempts, first try included.
    pub fn max_attempts(&self) -> u32 {
        1 + self.max_retries
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    ///
    /// `base * 2^(attempt-1)` capped at `max_delay`, plus 0-50% jitter derived
    /// from `key` and `attempt`.
    pub fn delay_for(&self, key: &str, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let delay = self
            .base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay);

        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hasher.update(attempt.to_le_bytes());
        let digest = hasher.finalize();
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        let fraction = u64::from_le_bytes(seed) as f64 / u64::MAX as f64;

        delay + delay.mul_f64(fraction * 0.5)
    }
}

impl From<&FetchConfig> for RetryPolicy {
    fn from(config: &FetchConfig) -> Self {
        Self::new(
            config.max_retries,
            Duration::from_millis(config.backoff_base_ms),
            Duration::from_millis(config.backoff_max_ms),
        )
    }
}

// ---------------------------------------------------------------------------
// RateLimiter
// ---------------------------------------------------------------------------

/// Minimum spacing between request starts, shared by all workers.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            next_slot: Mutex::new(Instant::now()),
        }
    }

    /// Wait for this caller's slot. Slots are handed out in call order.
    pub async fn acquire(&self) {
        if self.interval.is_zero() {
            return;
        }
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = if *next > now { *next } else { now };
            *next = slot + self.interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

// ---------------------------------------------------------------------------
// Classification and retry loop
// ---------------------------------------------------------------------------

/// Turn a raw response into success or a classified failure.
///
/// 2xx with a body is success; 408, 429 and 5xx are transient; every other
/// status, and an empty 2xx body, is permanent.
pub fn classify_response(response: FetchResponse) -> Result<FetchResponse> {
    let code = response.status_code;
    match code {
        200..=299 if response.html.trim().is_empty() => Err(SiteScribeError::PermanentFetch(
            format!("empty response body ({code})"),
        )),
        200..=299 => Ok(response),
        408 | 429 | 500..=599 => Err(SiteScribeError::TransientFetch(code.to_string())),
        _ => Err(SiteScribeError::PermanentFetch(code.to_string())),
    }
}

/// Final outcome of [`fetch_with_retry`] for one URL.
#[derive(Debug)]
pub struct FetchOutcome {
    pub result: Result<FetchResponse>,
    /// Attempts actually issued.
    pub attempts: u32,
}

/// Fetch `url` through `fetcher`, retrying transient failures up to the
/// policy's bound.
///
/// Permanent failures return immediately. Cancellation is honored before each
/// attempt and during backoff; it never interrupts an in-flight request.
pub async fn fetch_with_retry(
    fetcher: &dyn PageFetcher,
    url: &str,
    options: &FetchOptions,
    policy: &RetryPolicy,
    limiter: &RateLimiter,
    cancel: &CancelSignal,
) -> FetchOutcome {
    let max_attempts = policy.max_attempts();
    let mut attempts = 0;

    loop {
        if cancel.is_cancelled() {
            return FetchOutcome {
                result: Err(SiteScribeError::Cancelled),
                attempts,
            };
        }

        limiter.acquire().await;
        attempts += 1;
        let result = match fetcher.fetch(url, options).await {
            Ok(response) => classify_response(response),
            Err(e) => Err(e),
        };

        let err = match result {
            Ok(response) => {
                debug!(%url, attempts, status = response.status_code, "fetched");
                return FetchOutcome {
                    result: Ok(response),
                    attempts,
                };
            }
            Err(e) => e,
        };

        if !err.is_retryable() || attempts >= max_attempts {
            warn!(%url, attempts, error = %err, "fetch failed");
            return FetchOutcome {
                result: Err(err),
                attempts,
            };
        }

        let delay = policy.delay_for(url, attempts);
        debug!(%url, attempt = attempts, delay_ms = delay.as_millis() as u64, error = %err, "retrying");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => {
                return FetchOutcome {
                    result: Err(SiteScribeError::Cancelled),
                    attempts,
                };
            }
        }
    }
}
