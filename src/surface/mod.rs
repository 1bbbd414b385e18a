//! Query surface
//!
//! The uniform request/response layer over the cache and the workflow
//! engine: a tool registry plus the request pipeline (batching → response
//! cache → retry → compression). Callers hand in a [`ToolRequest`] and get
//! the envelope back; errors never escape as `Err`, they become
//! `success: false` envelopes with sanitized messages.

pub mod middleware;
mod registry;
mod tools;
mod types;

pub use middleware::{Batcher, ResponseCache};
pub use registry::{ToolHandler, ToolRegistry};
pub use tools::register_builtin_tools;
pub use types::{ParamSpec, ParamType, ResponseMetadata, ToolRequest, ToolResponse, ToolSchema, WirePayload};

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::Value;

use crate::activity::ActivityLogger;
use crate::config::SurfaceConfig;
use crate::resilience::{RetryConfig, RetryPolicy};

/// The assembled pipeline around the registry
pub struct Dispatcher {
    registry: ToolRegistry,
    response_cache: Arc<ResponseCache>,
    retry: RetryPolicy,
    activity: Arc<ActivityLogger>,
    compression_threshold: usize,
}

impl Dispatcher {
    pub fn new(
        registry: ToolRegistry,
        config: &SurfaceConfig,
        activity: Arc<ActivityLogger>,
    ) -> Self {
        Self {
            registry,
            response_cache: Arc::new(ResponseCache::new(
                config.cache_capacity,
                Duration::from_millis(config.cache_ttl_ms),
            )),
            // Same backoff family as the LLM client; only transport-class
            // errors are retryable by kind, so validation and not-found
            // pass straight through.
            retry: RetryPolicy::new(RetryConfig::default().with_max_attempts(3)),
            activity,
            compression_threshold: config.compression_threshold,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn response_cache(&self) -> &Arc<ResponseCache> {
        &self.response_cache
    }

    /// Programmatic invalidation for mutating flows.
    pub fn invalidate(&self, tool: &str, params: Option<&Value>) {
        self.response_cache.invalidate(tool, params);
    }

    /// Execute one request through cache → retry → handler.
    pub async fn dispatch(&self, request: ToolRequest) -> ToolResponse {
        let start = Instant::now();
        let elapsed = |start: Instant| start.elapsed().as_millis() as u64;

        let Some(handler) = self.registry.get(&request.tool) else {
            let error = crate::error::WeaverError::NotFound {
                what: "tool",
                id: request.tool.clone(),
            };
            return ToolResponse::fail(&error, elapsed(start));
        };

        if let Err(error) = handler.schema().validate(&request.params) {
            self.activity
                .tool_call(&request.tool, &request.params, error.to_string(), elapsed(start), false);
            return ToolResponse::fail(&error, elapsed(start));
        }

        let cacheable = handler.schema().cacheable;
        let cache_key = cacheable.then(|| ResponseCache::key(&request.tool, &request.params));

        if let Some(key) = &cache_key {
            if let Some(data) = self.response_cache.get(key) {
                self.activity
                    .tool_call(&request.tool, &request.params, "cache hit", elapsed(start), true);
                return ToolResponse::ok(data, elapsed(start), Some(true));
            }
        }

        let params = request.params.clone();
        let result = self
            .retry
            .execute(|| handler.call(params.clone()))
            .await;

        match result {
            Ok(data) => {
                if let Some(key) = cache_key {
                    self.response_cache.put(key, data.clone());
                }
                self.activity.tool_call(
                    &request.tool,
                    &request.params,
                    summarize(&data),
                    elapsed(start),
                    true,
                );
                ToolResponse::ok(data, elapsed(start), cacheable.then_some(false))
            }
            Err(error) => {
                self.activity.tool_call(
                    &request.tool,
                    &request.params,
                    error.to_string(),
                    elapsed(start),
                    false,
                );
                ToolResponse::fail(&error, elapsed(start))
            }
        }
    }

    /// Execute a batch concurrently, responses in request order. Per-item
    /// failures stay per-item.
    pub async fn dispatch_batch(&self, requests: Vec<ToolRequest>) -> Vec<ToolResponse> {
        join_all(requests.into_iter().map(|r| self.dispatch(r))).await
    }

    /// Dispatch and serialize for the wire, compressing when the client
    /// accepts an encoding and the payload clears the threshold.
    pub async fn dispatch_wire(&self, request: ToolRequest) -> crate::error::Result<WirePayload> {
        let accept = request.accept_encoding.clone();
        let response = self.dispatch(request).await;
        let body = serde_json::to_vec(&response)?;
        middleware::compress::apply(body, &accept, self.compression_threshold)
    }
}

fn summarize(data: &Value) -> String {
    match data {
        Value::Null => "null".to_string(),
        Value::Array(items) => format!("{} items", items.len()),
        Value::Object(map) => format!("object with {} keys", map.len()),
        other => other.to_string(),
    }
}
