//! The fetch collaborator seam and its reqwest implementation.
//!
//! A [`PageFetcher`] returns whatever status the server answered with; turning
//! statuses into success, transient or permanent failures is done once, in
//! [`crate::retry::classify_response`]. Transport failures are classified here
//! because only the transport knows whether it timed out or was refused.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};
use url::Url;

use sitescribe_shared::{FetchConfig, Result, SiteScribeError};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("SiteScribe/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed per request.
const MAX_REDIRECTS: usize = 5;

/// Per-request options passed to the fetch collaborator.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// Upper bound on the whole request, body included.
    pub timeout: Duration,
}

impl From<&FetchConfig> for FetchOptions {
    fn from(config: &FetchConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }
}

/// Raw answer from the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub html: String,
    pub status_code: u16,
}

/// Anything that can retrieve a page by URL within a bounded time.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`. Any HTTP status is `Ok`; `Err` is reserved for transport
    /// failures, already classified as `TransientFetch` or `PermanentFetch`.
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse>;
}

// ---------------------------------------------------------------------------
// HttpFetcher
// ---------------------------------------------------------------------------

/// reqwest-backed fetcher with SSRF protection.
pub struct HttpFetcher {
    client: Client,
    /// Allow localhost/private IPs (for integration tests with mock servers).
    allow_private_hosts: bool,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteScribeError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            allow_private_hosts: config.allow_private_hosts,
        })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<FetchResponse> {
        let parsed = Url::parse(url)
            .map_err(|e| SiteScribeError::PermanentFetch(format!("invalid URL {url}: {e}")))?;

        if !self.allow_private_hosts && is_ssrf_target(&parsed) {
            warn!(%url, "SSRF protection: blocked");
            return Err(SiteScribeError::PermanentFetch(format!(
                "blocked non-public target {url}"
            )));
        }

        debug!(%url, "fetching page");
        let response = self
            .client
            .get(parsed)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        let status_code = response.status().as_u16();
        let html = response
            .text()
            .await
            .map_err(|e| classify_transport_error(url, &e))?;

        Ok(FetchResponse { html, status_code })
    }
}

/// Map a reqwest failure onto the fetch taxonomy.
fn classify_transport_error(url: &str, err: &reqwest::Error) -> SiteScribeError {
    if err.is_timeout() {
        SiteScribeError::TransientFetch(format!("timeout fetching {url}"))
    } else if err.is_redirect() {
        SiteScribeError::PermanentFetch(format!("too many redirects for {url}"))
    } else if err.is_builder() {
        SiteScribeError::PermanentFetch(format!("invalid request for {url}: {err}"))
    } else if err.is_connect() {
        SiteScribeError::TransientFetch(format!("connection failed for {url}: {err}"))
    } else {
        // Resets mid-body, decode hiccups and the like.
        SiteScribeError::TransientFetch(format!("{url}: {err}"))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Check if a URL targets a potentially dangerous resource.
pub fn is_ssrf_target(url: &Url) -> bool {
    // Block non-HTTP schemes
    match url.scheme() {
        "http" | "https" => {}
        _ => return true,
    }

    match url.host() {
        Some(url::Host::Ipv4(v4)) => is_private_ip(&IpAddr::V4(v4)),
        Some(url::Host::Ipv6(v6)) => is_private_ip(&IpAddr::V6(v6)),
        Some(url::Host::Domain(host)) => {
            host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
        }
        None => true,
    }
}

/// Check if an IP is in a private/reserved range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                // 100.64.0.0/10 (Carrier-grade NAT)
                || (v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64)
                // 192.0.0.0/24
                || (v4.octets()[0] == 192 && v4.octets()[1] == 0 && v4.octets()[2] == 0)
        }
        IpAddr::V6(v6) => v6.is_loopback() || v6.is_unspecified(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitescribe_shared::AppConfig;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config() -> FetchConfig {
        let mut config = FetchConfig::from(&AppConfig::default());
        config.allow_private_hosts = true;
        config.timeout_secs = 2;
        config
    }

    fn options() -> FetchOptions {
        FetchOptions {
            timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn ssrf_blocks_file_and_private_targets() {
        for blocked in [
            "file:///etc/passwd",
            "http://192.168.1.1/admin",
            "http://10.0.0.1/",
            "http://127.0.0.1:8080/",
            "http://localhost:3000/api",
            "http://[::1]/",
            "http://printer.local/",
        ] {
            let url = Url::parse(blocked).unwrap();
            assert!(is_ssrf_target(&url), "{blocked} should be blocked");
        }
    }

    #[test]
    fn ssrf_allows_public() {
        let url = Url::parse("https://docs.example.com/page").unwrap();
        assert!(!is_ssrf_target(&url));
    }

    #[tokio::test]
    async fn http_fetcher_returns_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>hello</p>"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("nope"))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let ok = fetcher
            .fetch(&format!("{}/ok", server.uri()), &options())
            .await
            .unwrap();
        assert_eq!(ok.status_code, 200);
        assert_eq!(ok.html, "<p>hello</p>");

        let missing = fetcher
            .fetch(&format!("{}/missing", server.uri()), &options())
            .await
            .unwrap();
        assert_eq!(missing.status_code, 404);
    }

    #[tokio::test]
    async fn http_fetcher_blocks_private_hosts_by_default() {
        let server = MockServer::start().await;
        let mut config = test_config();
        config.allow_private_hosts = false;
        let fetcher = HttpFetcher::new(&config).unwrap();

        let err = fetcher
            .fetch(&format!("{}/ok", server.uri()), &options())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "PermanentFetchError");
        assert!(server.received_requests().await.unwrap_or_default().is_empty());
    }

    #[tokio::test]
    async fn http_fetcher_times_out_as_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let fetcher = HttpFetcher::new(&test_config()).unwrap();
        let err = fetcher
            .fetch(
                &format!("{}/slow", server.uri()),
                &FetchOptions {
                    timeout: Duration::from_millis(50),
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "TransientFetchError");
    }
}
