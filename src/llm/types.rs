//! LLM request/response types

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Requested shape of the model's reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    #[default]
    Text,
    /// A single JSON object
    Json,
    /// A JSON array of strings
    List,
}

/// One completion request
#[derive(Debug, Clone, Default)]
pub struct LlmRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub format: ResponseFormat,
    /// Overrides the client's configured max tokens when set
    pub max_tokens: Option<u32>,
    /// Short label for the activity log ("Auto-tag", "Commit summary", ...)
    pub label: Option<String>,
}

impl LlmRequest {
    pub fn text(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Self::default()
        }
    }

    pub fn json(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::Json,
            ..Self::default()
        }
    }

    pub fn list(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            format: ResponseFormat::List,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Parsed reply payload, matching the requested format
#[derive(Debug, Clone, PartialEq)]
pub enum LlmPayload {
    Text(String),
    Json(Value),
    List(Vec<String>),
}

impl LlmPayload {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One completed LLM interaction
#[derive(Debug, Clone)]
pub struct LlmReply {
    pub payload: LlmPayload,
    pub model: String,
    /// Raw text as returned by the transport, before format parsing
    pub raw: String,
    pub duration_ms: u64,
}
