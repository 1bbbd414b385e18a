//! LLM client layer
//!
//! Process-wide client shared by rules and workflows. The resilience stack
//! wraps the transport outermost to innermost:
//!
//! ```text
//! rate limiter → circuit breaker → retry → per-attempt timeout → transport
//! ```
//!
//! Format parsing happens after the stack: a `Parse` failure is a property
//! of the reply, never retried and never counted against the circuit.

mod provider;
mod types;

pub use provider::{AnthropicTransport, StaticTransport, Transport};
pub use types::{LlmPayload, LlmReply, LlmRequest, ResponseFormat};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::config::LlmConfig;
use crate::error::{Result, WeaverError};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, RateLimiter, RateLimiterConfig, RetryConfig, RetryPolicy,
};

/// Rate-limited, circuit-broken, retrying model client
pub struct LlmClient {
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
    breaker: CircuitBreaker,
    retry: RetryPolicy,
    attempt_timeout: Duration,
    max_tokens: u32,
}

impl LlmClient {
    /// Production construction: Anthropic transport, key from environment.
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let transport = Arc::new(AnthropicTransport::new(config.model.clone())?);
        Ok(Self::with_transport(config, transport))
    }

    /// Construction with an explicit transport (tests, alternate providers).
    pub fn with_transport(config: &LlmConfig, transport: Arc<dyn Transport>) -> Self {
        let limiter = RateLimiter::new(
            "llm",
            RateLimiterConfig::per_minute(config.rate_limit_per_minute),
        );
        let breaker = CircuitBreaker::new(
            "llm",
            CircuitBreakerConfig::default()
                .with_failure_threshold(config.circuit_threshold)
                .with_cooldown(Duration::from_secs(config.circuit_cooldown_secs)),
        );
        let retry = RetryPolicy::new(
            RetryConfig::default().with_max_attempts(config.retry_max_attempts),
        );
        Self {
            transport,
            limiter,
            breaker,
            retry,
            attempt_timeout: Duration::from_secs(config.timeout_secs),
            max_tokens: config.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        self.transport.model()
    }

    /// Send a completion request through the full stack.
    pub async fn send(&self, request: LlmRequest) -> Result<LlmReply> {
        self.send_with_cancel(request, &CancellationToken::new())
            .await
    }

    /// Send, observing a cancellation signal at every suspension point.
    pub async fn send_with_cancel(
        &self,
        request: LlmRequest,
        cancel: &CancellationToken,
    ) -> Result<LlmReply> {
        let start = std::time::Instant::now();
        let cancelled = || WeaverError::Cancelled {
            operation: "llm completion".to_string(),
        };

        if cancel.is_cancelled() {
            return Err(cancelled());
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            acquired = self.limiter.acquire() => acquired?,
        }

        let raw = tokio::select! {
            _ = cancel.cancelled() => return Err(cancelled()),
            result = self.breaker.execute(|| async {
                self.retry
                    .execute(|| async { self.attempt(&request).await })
                    .await
            }) => result?,
        };

        let payload = parse_payload(request.format, &raw)?;
        Ok(LlmReply {
            payload,
            model: self.transport.model().to_string(),
            raw,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn attempt(&self, request: &LlmRequest) -> Result<String> {
        match tokio::time::timeout(
            self.attempt_timeout,
            self.transport.complete(request, self.max_tokens),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(WeaverError::Timeout {
                operation: "llm completion".to_string(),
                duration_ms: self.attempt_timeout.as_millis() as u64,
            }),
        }
    }

    /// Breaker state for the health surface.
    pub fn circuit_state(&self) -> crate::resilience::CircuitState {
        self.breaker.state()
    }
}

/// Strict format parsing. Models love code fences, so a single fenced block
/// around otherwise-valid JSON is tolerated; anything else that misses the
/// schema is a `Parse` error.
fn parse_payload(format: ResponseFormat, raw: &str) -> Result<LlmPayload> {
    match format {
        ResponseFormat::Text => Ok(LlmPayload::Text(raw.to_string())),
        ResponseFormat::Json => {
            let stripped = strip_code_fence(raw);
            let value: Value = serde_json::from_str(stripped).map_err(|e| {
                WeaverError::parse("llm response", format!("expected JSON object: {}", e))
            })?;
            if !value.is_object() {
                return Err(WeaverError::parse(
                    "llm response",
                    format!("expected a JSON object, got {}", json_type_name(&value)),
                ));
            }
            Ok(LlmPayload::Json(value))
        }
        ResponseFormat::List => {
            let stripped = strip_code_fence(raw);
            let value: Value = serde_json::from_str(stripped).map_err(|e| {
                WeaverError::parse("llm response", format!("expected JSON array: {}", e))
            })?;
            let items = value.as_array().ok_or_else(|| {
                WeaverError::parse(
                    "llm response",
                    format!("expected a JSON array, got {}", json_type_name(&value)),
                )
            })?;
            let mut list = Vec::with_capacity(items.len());
            for item in items {
                match item.as_str() {
                    Some(s) => list.push(s.to_string()),
                    None => {
                        return Err(WeaverError::parse(
                            "llm response",
                            "list items must be strings",
                        ))
                    }
                }
            }
            Ok(LlmPayload::List(list))
        }
    }
}

fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let Some(rest) = rest.split_once('\n').map(|(_, body)| body) else {
        return trimmed;
    };
    rest.rsplit_once("```")
        .map(|(body, _)| body.trim())
        .unwrap_or(trimmed)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a bool",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted transport: pops one canned result per call.
    pub(crate) struct ScriptedTransport {
        script: parking_lot::Mutex<Vec<Result<String>>>,
        pub calls: AtomicU32,
    }

    impl ScriptedTransport {
        pub fn new(script: Vec<Result<String>>) -> Self {
            let mut script = script;
            script.reverse();
            Self {
                script: parking_lot::Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn complete(&self, _request: &LlmRequest, _max_tokens: u32) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop()
                .unwrap_or_else(|| Ok("unscripted".to_string()))
        }

        fn model(&self) -> &str {
            "scripted"
        }
    }

    fn fast_config() -> LlmConfig {
        LlmConfig {
            rate_limit_per_minute: 6000,
            retry_max_attempts: 3,
            timeout_secs: 5,
            ..LlmConfig::default()
        }
    }

    fn client_with(script: Vec<Result<String>>) -> (LlmClient, Arc<ScriptedTransport>) {
        let transport = Arc::new(ScriptedTransport::new(script));
        let client = LlmClient::with_transport(&fast_config(), transport.clone());
        (client, transport)
    }

    #[tokio::test]
    async fn text_roundtrip() {
        let (client, _) = client_with(vec![Ok("hello".into())]);
        let reply = client.send(LlmRequest::text("hi")).await.unwrap();
        assert_eq!(reply.payload.as_text(), Some("hello"));
        assert_eq!(reply.model, "scripted");
    }

    #[tokio::test]
    async fn json_format_strict() {
        let (client, _) = client_with(vec![Ok(r#"{"tags": ["a"]}"#.into())]);
        let reply = client.send(LlmRequest::json("go")).await.unwrap();
        assert_eq!(reply.payload.as_json().unwrap()["tags"][0], "a");

        let (client, _) = client_with(vec![Ok("[1, 2]".into())]);
        let err = client.send(LlmRequest::json("go")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn list_format_strict() {
        let (client, _) = client_with(vec![Ok(r#"["cache","eviction","memory"]"#.into())]);
        let reply = client.send(LlmRequest::list("tags?")).await.unwrap();
        assert_eq!(
            reply.payload.as_list().unwrap(),
            &["cache", "eviction", "memory"]
        );

        let (client, _) = client_with(vec![Ok(r#"[1, "b"]"#.into())]);
        let err = client.send(LlmRequest::list("tags?")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Parse);
    }

    #[tokio::test]
    async fn fenced_json_tolerated() {
        let (client, _) =
            client_with(vec![Ok("```json\n[\"a\", \"b\"]\n```".into())]);
        let reply = client.send(LlmRequest::list("go")).await.unwrap();
        assert_eq!(reply.payload.as_list().unwrap(), &["a", "b"]);
    }

    #[tokio::test]
    async fn transient_errors_retry_then_succeed() {
        let (client, transport) = client_with(vec![
            Err(WeaverError::Transport {
                reason: "503".into(),
                status: Some(503),
            }),
            Err(WeaverError::Transport {
                reason: "502".into(),
                status: Some(502),
            }),
            Ok("recovered".into()),
        ]);
        // Shrink backoff for the test by using the retry policy as-is would
        // wait seconds; scripted transport failures still exercise the path
        // because the policy sleeps between attempts. Use a client with a
        // tight retry config instead.
        let tight = LlmClient {
            retry: RetryPolicy::new(
                RetryConfig::default()
                    .with_max_attempts(3)
                    .with_base_delay(Duration::from_millis(1))
                    .with_jitter(0.0),
            ),
            ..client
        };
        let reply = tight.send(LlmRequest::text("hi")).await.unwrap();
        assert_eq!(reply.payload.as_text(), Some("recovered"));
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_errors_never_retry() {
        let (client, transport) = client_with(vec![
            Err(WeaverError::Permission {
                reason: "bad key".into(),
            }),
            Ok("should not reach".into()),
        ]);
        let err = client.send(LlmRequest::text("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Permission);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn circuit_opens_after_consecutive_failures() {
        let failures: Vec<Result<String>> = (0..30)
            .map(|_| {
                Err(WeaverError::Transport {
                    reason: "down".into(),
                    status: Some(500),
                })
            })
            .collect();
        let transport = Arc::new(ScriptedTransport::new(failures));
        let config = LlmConfig {
            circuit_threshold: 2,
            ..fast_config()
        };
        let mut client = LlmClient::with_transport(&config, transport);
        client.retry = RetryPolicy::new(
            RetryConfig::default()
                .with_max_attempts(1)
                .with_base_delay(Duration::from_millis(1)),
        );

        for _ in 0..2 {
            let _ = client.send(LlmRequest::text("hi")).await;
        }
        let err = client.send(LlmRequest::text("hi")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }

    #[tokio::test]
    async fn cancelled_before_send() {
        let (client, transport) = client_with(vec![Ok("never".into())]);
        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .send_with_cancel(LlmRequest::text("hi"), &token)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn strip_fence_variants() {
        assert_eq!(strip_code_fence("[1]"), "[1]");
        assert_eq!(strip_code_fence("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }
}
