//! Model provider transport
//!
//! The innermost layer of the client stack: one async call to the remote
//! model, no resilience of its own. The Anthropic implementation mirrors
//! the messages API; HTTP statuses map onto the error taxonomy so the
//! retry policy and circuit breaker can act on kinds alone.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};

use crate::error::{Result, WeaverError};

use super::types::LlmRequest;

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One completion round trip. Implementations are stateless; the client
/// layer owns rate limiting, breaking, retry, and the per-attempt timeout.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn complete(&self, request: &LlmRequest, max_tokens: u32) -> Result<String>;

    fn model(&self) -> &str;
}

/// Anthropic messages API transport
pub struct AnthropicTransport {
    api_key: String,
    model: String,
    client: Client,
}

impl AnthropicTransport {
    /// Reads `ANTHROPIC_API_KEY` from the environment. The key is never
    /// persisted anywhere.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let api_key = std::env::var("ANTHROPIC_API_KEY").map_err(|_| WeaverError::Permission {
            reason: "ANTHROPIC_API_KEY not set".to_string(),
        })?;
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("weaver/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            api_key,
            model: model.into(),
            client,
        })
    }
}

#[async_trait]
impl Transport for AnthropicTransport {
    async fn complete(&self, request: &LlmRequest, max_tokens: u32) -> Result<String> {
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens.unwrap_or(max_tokens),
            "messages": [
                { "role": "user", "content": request.prompt }
            ]
        });
        if let Some(system) = &request.system {
            body["system"] = json!(system);
        }

        let response = self
            .client
            .post(ANTHROPIC_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let text = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, retry_after, &text));
        }

        let payload: Value = response.json().await?;
        payload["content"][0]["text"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                WeaverError::parse("provider response", "missing content[0].text")
            })
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Canned transport: every completion returns the same text. Backs offline
/// dry-runs and tests that stub the model.
pub struct StaticTransport {
    response: String,
    model: String,
}

impl StaticTransport {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            model: "static".to_string(),
        }
    }
}

#[async_trait]
impl Transport for StaticTransport {
    async fn complete(&self, _request: &LlmRequest, _max_tokens: u32) -> Result<String> {
        Ok(self.response.clone())
    }

    fn model(&self) -> &str {
        &self.model
    }
}

fn parse_retry_after(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|secs| secs * 1000)
}

/// Status → taxonomy. 5xx and 429 are retryable by kind; auth and client
/// errors are terminal.
fn map_http_error(status: StatusCode, retry_after_ms: Option<u64>, body: &str) -> WeaverError {
    let summary = summarize_body(body);
    match status.as_u16() {
        401 | 403 => WeaverError::Permission {
            reason: format!("provider rejected credentials: {}", summary),
        },
        429 => WeaverError::RateLimited {
            resource: "llm".to_string(),
            retry_after_ms,
        },
        408 => WeaverError::Timeout {
            operation: "llm completion".to_string(),
            duration_ms: 0,
        },
        code if code >= 500 => WeaverError::Transport {
            reason: format!("provider error: {}", summary),
            status: Some(code),
        },
        code => WeaverError::validation(format!("provider rejected request ({}): {}", code, summary)),
    }
}

fn summarize_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    let mut end = 200;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
