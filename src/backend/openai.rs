//! Backend for OpenAI-compatible chat completion APIs.
//!
//! [`OpenAiBackend`] covers OpenAI itself and the many servers that mimic
//! it (vLLM, llama.cpp server, LM Studio, Together AI, Groq, Ollama's
//! `/v1/` endpoint). Endpoint: `/v1/chat/completions`.
//!
//! HTTP 429 maps to [`PipelineError::RateLimitExceeded`] with the parsed
//! `Retry-After` header; any other non-success status is a fatal
//! [`PipelineError::HttpError`].

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

/// Backend for any OpenAI-compatible API.
///
/// # Example
///
/// ```
/// use restatement::backend::OpenAiBackend;
///
/// let backend = OpenAiBackend::new("https://api.openai.com/v1").with_api_key("sk-...");
/// assert!(backend.has_api_key());
/// ```
#[derive(Clone)]
pub struct OpenAiBackend {
    client: Client,
    base_url: String,
    /// Optional API key. If set, sent as `Authorization: Bearer {key}`.
    api_key: Option<String>,
    /// Optional organization ID. If set, sent as `OpenAI-Organization: {org}`.
    organization: Option<String>,
}

impl std::fmt::Debug for OpenAiBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiBackend")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_deref().map(redact_key))
            .field("organization", &self.organization)
            .finish()
    }
}

/// First six characters of a key followed by `***`; short keys are fully hidden.
fn redact_key(key: &str) -> String {
    if key.chars().count() > 6 {
        format!("{}***", key.chars().take(6).collect::<String>())
    } else {
        "***".to_string()
    }
}

impl OpenAiBackend {
    /// Create a backend for `base_url` with a default client (120 s timeout).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self::with_client(client, base_url)
    }

    /// Create a backend that reuses an existing HTTP client.
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: normalize_base_url(&base_url.into()),
            api_key: None,
            organization: None,
        }
    }

    /// Set the API key for authentication.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Set the organization ID header.
    pub fn with_organization(mut self, org: impl Into<String>) -> Self {
        self.organization = Some(org.into());
        self
    }

    /// Returns `true` if an API key has been configured.
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the request body for `/v1/chat/completions`.
    fn build_body(request: &LlmRequest) -> Value {
        let mut messages = Vec::with_capacity(2);
        if !request.instructions.is_empty() {
            messages.push(json!({"role": "system", "content": request.instructions}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        json!({
            "model": request.model,
            "messages": messages,
            "temperature": request.config.temperature,
            "max_tokens": request.config.max_tokens,
            "stream": false,
        })
    }

    /// Parse a `Retry-After` header value as seconds.
    fn parse_retry_after(value: &str) -> Option<Duration> {
        value.trim().parse::<u64>().ok().map(Duration::from_secs)
    }

    /// Build the reqwest request with appropriate headers.
    fn build_http_request(&self, url: &str, body: &Value) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).json(body);

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }
        if let Some(ref org) = self.organization {
            req = req.header("OpenAI-Organization", org.as_str());
        }

        req
    }

    /// Pull the reply text, usage and metadata out of a response body.
    fn parse_response(json_resp: &Value) -> LlmResponse {
        let text = json_resp
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();

        let tokens_consumed = json_resp
            .get("usage")
            .and_then(|u| u.get("total_tokens"))
            .and_then(|v| v.as_u64())
            .map(|v| v as usize);

        let mut meta = serde_json::Map::new();
        for key in ["usage", "model", "id"] {
            if let Some(v) = json_resp.get(key) {
                meta.insert(key.into(), v.clone());
            }
        }

        LlmResponse {
            text,
            tokens_consumed,
            metadata: (!meta.is_empty()).then(|| Value::Object(meta)),
        }
    }
}

#[async_trait]
impl Backend for OpenAiBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = Self::build_body(request);

        let resp = self.build_http_request(&url, &body).send().await?;
        let status = resp.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(Self::parse_retry_after);
            return Err(PipelineError::RateLimitExceeded { retry_after });
        }

        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(PipelineError::HttpError {
                status: status.as_u16(),
                body: text,
            });
        }

        let json_resp: Value = resp.json().await?;
        let response = Self::parse_response(&json_resp);
        tracing::debug!(
            model = %request.model,
            tokens = ?response.tokens_consumed,
            "chat completion returned"
        );
        Ok(response)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Strip known path suffixes so the backend can append its own.
/// e.g., "https://api.openai.com/v1" -> "https://api.openai.com"
fn normalize_base_url(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    for suffix in ["/v1/chat/completions", "/v1/chat", "/v1"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix) {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}
