//! The AI conversion collaborator seam and its two backends.
//!
//! A [`MarkdownConverter`] turns one HTML chunk into Markdown. Errors are
//! already classified: anything worth retrying is `ConversionService`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use sitescribe_shared::{
    ConversionBackend, ConversionConfig, Result, SiteScribeError, validate_api_key,
};

/// What the converter is told about the chunk it is converting.
#[derive(Debug, Clone, Default)]
pub struct ConversionContext {
    pub url: String,
    pub chunk_index: usize,
    pub chunk_count: usize,
    /// Languages the deterministic detector found in the chunk's `<pre>`
    /// blocks, in document order.
    pub language_hints: Vec<String>,
}

/// Anything that can convert an HTML chunk into Markdown.
#[async_trait]
pub trait MarkdownConverter: Send + Sync {
    /// Backend name recorded in frontmatter.
    fn name(&self) -> &str;

    /// Convert one chunk. An empty result is returned as-is; the caller
    /// decides whether that is an error.
    async fn convert(&self, html_chunk: &str, context: &ConversionContext) -> Result<String>;
}

/// Build the converter selected by `config.backend`.
///
/// The OpenRouter backend needs its API key in the environment and fails
/// fast with a config error when it is missing.
pub fn build_converter(config: &ConversionConfig) -> Result<Arc<dyn MarkdownConverter>> {
    match config.backend {
        ConversionBackend::Local => Ok(Arc::new(LocalConverter)),
        ConversionBackend::OpenRouter => {
            let api_key = validate_api_key(&config.api_key_env)?;
            Ok(Arc::new(OpenRouterConverter::new(config, api_key)?))
        }
    }
}

// ---------------------------------------------------------------------------
// LocalConverter
// ---------------------------------------------------------------------------

/// Deterministic htmd-based conversion. No network.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalConverter;

#[async_trait]
impl MarkdownConverter for LocalConverter {
    fn name(&self) -> &str {
        "local"
    }

    async fn convert(&self, html_chunk: &str, _context: &ConversionContext) -> Result<String> {
        sitescribe_markdown::convert_html(html_chunk)
    }
}

// ---------------------------------------------------------------------------
// OpenRouterConverter
// ---------------------------------------------------------------------------

const SYSTEM_PROMPT: &str = "You convert documentation HTML into clean Markdown. \
Keep headings, paragraphs, lists, tables, links and code. Drop navigation, \
cookie banners and other page chrome. Reply with the Markdown only.";

/// OpenAI-compatible chat completions client pointed at OpenRouter.
pub struct OpenRouterConverter {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl OpenRouterConverter {
    pub fn new(config: &ConversionConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteScribeError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl MarkdownConverter for OpenRouterConverter {
    fn name(&self) -> &str {
        "openrouter"
    }

    #[instrument(skip_all, fields(url = %context.url, chunk_index = context.chunk_index))]
    async fn convert(&self, html_chunk: &str, context: &ConversionContext) -> Result<String> {
        let prompt = build_prompt(html_chunk, context);
        let body = ChatRequest {
            model: &self.model,
            temperature: 0.0,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: &prompt,
                },
            ],
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(self.api_key.trim())
            .json(&body)
            .send()
            .await
            .map_err(|e| SiteScribeError::ConversionService(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let excerpt: String = text.chars().take(200).collect();
            return Err(match status.as_u16() {
                401 | 403 => SiteScribeError::config(format!(
                    "conversion service rejected the API key ({status}): {excerpt}"
                )),
                _ => SiteScribeError::ConversionService(format!("{status}: {excerpt}")),
            });
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            SiteScribeError::ConversionService(format!("invalid response body: {e}"))
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .unwrap_or_default();

        debug!(bytes = content.len(), "chunk converted");
        Ok(strip_wrapping_fence(&content).to_string())
    }
}

/// User prompt for one chunk.
fn build_prompt(html_chunk: &str, context: &ConversionContext) -> String {
    let mut prompt = format!(
        "Convert this HTML from {} (part {} of {}) into Markdown.\n\n\
         Code blocks:\n\
         - use fenced blocks with a language label\n\
         - keep indentation and spacing exactly as written\n\
         - never change the code itself\n",
        context.url,
        context.chunk_index + 1,
        context.chunk_count.max(1),
    );
    if !context.language_hints.is_empty() {
        prompt.push_str(&format!(
            "- languages detected in this part: {}\n",
            context.language_hints.join(", ")
        ));
    }
    prompt.push_str("\nHTML:\n```html\n");
    prompt.push_str(html_chunk);
    prompt.push_str("\n```\n");
    prompt
}

/// Models sometimes wrap the whole answer in a ```markdown fence.
fn strip_wrapping_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed
        .strip_prefix("```markdown\n")
        .or_else(|| trimmed.strip_prefix("```md\n"))
    else {
        return text;
    };
    match rest.strip_suffix("```") {
        Some(inner) if !inner.contains("\n```") => inner.trim_end(),
        _ => text,
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: AssistantMessage,
}

#[derive(Debug, Deserialize)]
struct AssistantMessage {
    #[serde(default)]
    content: Option<String>,
}
