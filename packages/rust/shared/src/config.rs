//! Application configuration for SiteScribe.
//!
//! User config lives at `~/.sitescribe/sitescribe.toml`.
//! CLI flags override config file values, which override defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SiteScribeError};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitescribe.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitescribe";

// ---------------------------------------------------------------------------
// Config structs (matching sitescribe.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Page fetching.
    #[serde(default)]
    pub fetch: FetchSection,

    /// Sitemap resolution.
    #[serde(default)]
    pub sitemap: SitemapSection,

    /// HTML to Markdown conversion.
    #[serde(default)]
    pub conversion: ConversionSection,

    /// OpenRouter settings.
    #[serde(default)]
    pub openrouter: OpenRouterConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Root of the Markdown output store.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,

    /// Directory holding the raw content database.
    #[serde(default = "default_raw_dir")]
    pub raw_dir: String,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            raw_dir: default_raw_dir(),
        }
    }
}

fn default_output_dir() -> String {
    "ai_markdown_pages".into()
}
fn default_raw_dir() -> String {
    "scraped_pages".into()
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchSection {
    /// Maximum concurrent page fetches.
    #[serde(default = "default_fetch_concurrency")]
    pub concurrency: usize,

    /// Per-request timeout.
    #[serde(default = "default_fetch_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first attempt for transient failures.
    #[serde(default = "default_fetch_retries")]
    pub max_retries: u32,

    #[serde(default = "default_fetch_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,

    /// Minimum ms between request starts.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,

    /// Allow fetching loopback/private hosts (off outside of tests).
    #[serde(default)]
    pub allow_private_hosts: bool,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            concurrency: default_fetch_concurrency(),
            timeout_secs: default_fetch_timeout(),
            max_retries: default_fetch_retries(),
            backoff_base_ms: default_fetch_backoff_base(),
            backoff_max_ms: default_backoff_max(),
            rate_limit_ms: default_rate_limit(),
            allow_private_hosts: false,
        }
    }
}

fn default_fetch_concurrency() -> usize {
    5
}
fn default_fetch_timeout() -> u64 {
    30
}
fn default_fetch_retries() -> u32 {
    3
}
fn default_fetch_backoff_base() -> u64 {
    500
}
fn default_backoff_max() -> u64 {
    30_000
}
fn default_rate_limit() -> u64 {
    200
}

/// `[sitemap]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SitemapSection {
    /// Maximum nesting of sitemap indexes below the root.
    #[serde(default = "default_sitemap_depth")]
    pub max_depth: u32,

    /// Upper bound on resolved page URLs.
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,

    /// URL include glob patterns.
    #[serde(default)]
    pub include_patterns: Vec<String>,

    /// URL exclude glob patterns.
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
}

impl Default for SitemapSection {
    fn default() -> Self {
        Self {
            max_depth: default_sitemap_depth(),
            max_urls: default_max_urls(),
            include_patterns: Vec::new(),
            exclude_patterns: Vec::new(),
        }
    }
}

fn default_sitemap_depth() -> u32 {
    3
}
fn default_max_urls() -> usize {
    10_000
}

/// Which conversion collaborator turns HTML into Markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversionBackend {
    /// OpenAI-compatible chat completions via OpenRouter.
    #[default]
    OpenRouter,
    /// Deterministic offline conversion (htmd + cleanup passes).
    Local,
}

impl fmt::Display for ConversionBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenRouter => write!(f, "openrouter"),
            Self::Local => write!(f, "local"),
        }
    }
}

impl FromStr for ConversionBackend {
    type Err = SiteScribeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "openrouter" => Ok(Self::OpenRouter),
            "local" => Ok(Self::Local),
            other => Err(SiteScribeError::config(format!(
                "unknown conversion backend '{other}' (expected 'openrouter' or 'local')"
            ))),
        }
    }
}

/// `[conversion]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionSection {
    #[serde(default)]
    pub backend: ConversionBackend,

    /// Maximum concurrent calls to the conversion service.
    #[serde(default = "default_conversion_concurrency")]
    pub concurrency: usize,

    /// Documents larger than this are split into chunks.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold_bytes: usize,

    /// Hard input limit of the conversion service.
    #[serde(default = "default_max_chunk")]
    pub max_chunk_bytes: usize,

    #[serde(default = "default_conversion_retries")]
    pub max_retries: u32,

    #[serde(default = "default_conversion_backoff_base")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_conversion_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConversionSection {
    fn default() -> Self {
        Self {
            backend: ConversionBackend::default(),
            concurrency: default_conversion_concurrency(),
            chunk_threshold_bytes: default_chunk_threshold(),
            max_chunk_bytes: default_max_chunk(),
            max_retries: default_conversion_retries(),
            backoff_base_ms: default_conversion_backoff_base(),
            timeout_secs: default_conversion_timeout(),
        }
    }
}

fn default_conversion_concurrency() -> usize {
    2
}
fn default_chunk_threshold() -> usize {
    30_000
}
fn default_max_chunk() -> usize {
    120_000
}
fn default_conversion_retries() -> u32 {
    2
}
fn default_conversion_backoff_base() -> u64 {
    1_000
}
fn default_conversion_timeout() -> u64 {
    120
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used for conversion.
    #[serde(default = "default_model")]
    pub default_model: String,

    /// API root; chat completions are posted to `{base_url}/chat/completions`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            base_url: default_base_url(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "google/gemini-2.0-flash-001".into()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".into()
}

impl AppConfig {
    /// Reject values that would stall or loop a run.
    pub fn validate(&self) -> Result<()> {
        if self.fetch.concurrency == 0 {
            return Err(SiteScribeError::config("fetch.concurrency must be at least 1"));
        }
        if self.conversion.concurrency == 0 {
            return Err(SiteScribeError::config(
                "conversion.concurrency must be at least 1",
            ));
        }
        if self.conversion.chunk_threshold_bytes == 0 {
            return Err(SiteScribeError::config(
                "conversion.chunk_threshold_bytes must be positive",
            ));
        }
        if self.conversion.chunk_threshold_bytes > self.conversion.max_chunk_bytes {
            return Err(SiteScribeError::config(format!(
                "conversion.chunk_threshold_bytes ({}) exceeds conversion.max_chunk_bytes ({})",
                self.conversion.chunk_threshold_bytes, self.conversion.max_chunk_bytes
            )));
        }
        if self.sitemap.max_urls == 0 {
            return Err(SiteScribeError::config("sitemap.max_urls must be positive"));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch configuration.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub concurrency: usize,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub rate_limit_ms: u64,
    pub allow_private_hosts: bool,
    /// Re-fetch URLs that are already in the content store.
    pub force: bool,
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            concurrency: config.fetch.concurrency,
            timeout_secs: config.fetch.timeout_secs,
            max_retries: config.fetch.max_retries,
            backoff_base_ms: config.fetch.backoff_base_ms,
            backoff_max_ms: config.fetch.backoff_max_ms,
            rate_limit_ms: config.fetch.rate_limit_ms,
            allow_private_hosts: config.fetch.allow_private_hosts,
            force: false,
        }
    }
}

/// Runtime sitemap resolution configuration.
#[derive(Debug, Clone)]
pub struct SitemapConfig {
    pub max_depth: u32,
    pub max_urls: usize,
    pub include_patterns: Vec<String>,
    pub exclude_patterns: Vec<String>,
}

impl From<&AppConfig> for SitemapConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            max_depth: config.sitemap.max_depth,
            max_urls: config.sitemap.max_urls,
            include_patterns: config.sitemap.include_patterns.clone(),
            exclude_patterns: config.sitemap.exclude_patterns.clone(),
        }
    }
}

/// Runtime conversion configuration.
#[derive(Debug, Clone)]
pub struct ConversionConfig {
    pub backend: ConversionBackend,
    pub concurrency: usize,
    pub chunk_threshold_bytes: usize,
    pub max_chunk_bytes: usize,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub timeout_secs: u64,
    pub model: String,
    pub base_url: String,
    pub api_key_env: String,
    /// Re-convert URLs whose output already reports success.
    pub force: bool,
}

impl From<&AppConfig> for ConversionConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            backend: config.conversion.backend,
            concurrency: config.conversion.concurrency,
            chunk_threshold_bytes: config.conversion.chunk_threshold_bytes,
            max_chunk_bytes: config.conversion.max_chunk_bytes,
            max_retries: config.conversion.max_retries,
            backoff_base_ms: config.conversion.backoff_base_ms,
            timeout_secs: config.conversion.timeout_secs,
            model: config.openrouter.default_model.clone(),
            base_url: config.openrouter.base_url.clone(),
            api_key_env: config.openrouter.api_key_env.clone(),
            force: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitescribe/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SiteScribeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitescribe/sitescribe.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SiteScribeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        SiteScribeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;
    config.validate()?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SiteScribeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SiteScribeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SiteScribeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the OpenRouter API key env var is set and non-empty, returning it.
pub fn validate_api_key(api_key_env: &str) -> Result<String> {
    match std::env::var(api_key_env) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SiteScribeError::config(format!(
            "OpenRouter API key not found. Set the {api_key_env} environment variable, \
             or use --backend local.\nGet a key at https://openrouter.ai/keys"
        ))),
    }
}
