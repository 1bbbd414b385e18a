//! Tool request/response envelope and schemas
//!
//! Every tool takes a JSON object validated against a small typed schema
//! and returns the uniform envelope. Validation failures carry a
//! parameter-level message.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, WeaverError};

/// One inbound tool call
#[derive(Debug, Clone, Deserialize)]
pub struct ToolRequest {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
    /// Content encodings the client can decode ("gzip", "br"); empty means
    /// uncompressed responses only
    #[serde(default)]
    pub accept_encoding: Vec<String>,
}

impl ToolRequest {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
            accept_encoding: Vec::new(),
        }
    }
}

/// The uniform response envelope
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResponseMetadata {
    pub execution_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_hit: Option<bool>,
}

impl ToolResponse {
    pub fn ok(data: Value, execution_time_ms: u64, cache_hit: Option<bool>) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            metadata: ResponseMetadata {
                execution_time_ms,
                cache_hit,
            },
        }
    }

    pub fn fail(error: &WeaverError, execution_time_ms: u64) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.envelope_message()),
            metadata: ResponseMetadata {
                execution_time_ms,
                cache_hit: None,
            },
        }
    }
}

/// Wire form after the compression middleware
#[derive(Debug, Clone)]
pub struct WirePayload {
    pub body: Vec<u8>,
    /// None = uncompressed JSON
    pub encoding: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Boolean,
    Object,
}

/// One declared parameter
#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<i64>,
    /// Allowed values for string parameters; empty = unconstrained
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<&'static str>,
}

impl ParamSpec {
    pub fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamType::String,
            required: false,
            min: None,
            max: None,
            one_of: Vec::new(),
        }
    }

    pub fn integer(name: &'static str) -> Self {
        Self {
            kind: ParamType::Integer,
            ..Self::string(name)
        }
    }

    pub fn boolean(name: &'static str) -> Self {
        Self {
            kind: ParamType::Boolean,
            ..Self::string(name)
        }
    }

    pub fn object(name: &'static str) -> Self {
        Self {
            kind: ParamType::Object,
            ..Self::string(name)
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn range(mut self, min: i64, max: i64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }

    pub fn one_of(mut self, values: &[&'static str]) -> Self {
        self.one_of = values.to_vec();
        self
    }
}

/// A tool's declared surface
#[derive(Debug, Clone, Serialize)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub params: Vec<ParamSpec>,
    /// Whether the response cache may serve and store this tool
    pub cacheable: bool,
}

impl ToolSchema {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            params: Vec::new(),
            cacheable: false,
        }
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn cacheable(mut self) -> Self {
        self.cacheable = true;
        self
    }

    /// Validate a params object against the declared specs. Unknown keys
    /// are rejected so typos fail loudly instead of being ignored.
    pub fn validate(&self, params: &Value) -> Result<()> {
        let empty = serde_json::Map::new();
        let object = match params {
            Value::Null => &empty,
            Value::Object(map) => map,
            other => {
                return Err(WeaverError::validation(format!(
                    "params for '{}' must be an object, got {}",
                    self.name,
                    type_name(other)
                )))
            }
        };

        for spec in &self.params {
            let value = object.get(spec.name);
            match value {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(self.param_error(spec.name, "is required"));
                    }
                }
                Some(value) => self.check_type(spec, value)?,
            }
        }

        for key in object.keys() {
            if !self.params.iter().any(|spec| spec.name == key) {
                return Err(self.param_error(key, "is not a recognized parameter"));
            }
        }
        Ok(())
    }

    fn check_type(&self, spec: &ParamSpec, value: &Value) -> Result<()> {
        match spec.kind {
            ParamType::String => {
                let Some(text) = value.as_str() else {
                    return Err(self.param_error(spec.name, "must be a string"));
                };
                if !spec.one_of.is_empty() && !spec.one_of.contains(&text) {
                    return Err(self.param_error(
                        spec.name,
                        &format!("must be one of {}", spec.one_of.join(", ")),
                    ));
                }
            }
            ParamType::Integer => {
                let Some(n) = value.as_i64() else {
                    return Err(self.param_error(spec.name, "must be an integer"));
                };
                if let Some(min) = spec.min {
                    if n < min {
                        return Err(
                            self.param_error(spec.name, &format!("must be at least {}", min))
                        );
                    }
                }
                if let Some(max) = spec.max {
                    if n > max {
                        return Err(
                            self.param_error(spec.name, &format!("must be at most {}", max))
                        );
                    }
                }
            }
            ParamType::Boolean => {
                if !value.is_boolean() {
                    return Err(self.param_error(spec.name, "must be a boolean"));
                }
            }
            ParamType::Object => {
                if !value.is_object() {
                    return Err(self.param_error(spec.name, "must be an object"));
                }
            }
        }
        Ok(())
    }

    fn param_error(&self, param: &str, reason: &str) -> WeaverError {
        WeaverError::InvalidParam {
            tool: self.name.to_string(),
            param: param.to_string(),
            reason: reason.to_string(),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
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
    use serde_json::json;

    fn schema() -> ToolSchema {
        ToolSchema::new("query_files", "list files")
            .cacheable()
            .param(ParamSpec::string("directory"))
            .param(ParamSpec::integer("limit").range(1, 500))
            .param(ParamSpec::string("direction").one_of(&["outgoing", "incoming", "both"]))
            .param(ParamSpec::string("path").required())
            .param(ParamSpec::boolean("sync"))
            .param(ParamSpec::object("params"))
    }

    #[test]
    fn accepts_valid_params() {
        schema()
            .validate(&json!({
                "path": "a.md",
                "limit": 10,
                "direction": "both",
                "sync": true,
                "params": {}
            }))
            .unwrap();
    }

    #[test]
    fn missing_required_param() {
        let err = schema().validate(&json!({"limit": 1})).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("path"));
        assert!(message.contains("required"));
    }

    #[test]
    fn range_enforced() {
        let err = schema()
            .validate(&json!({"path": "a", "limit": 501}))
            .unwrap_err();
        assert!(err.to_string().contains("at most 500"));
        assert!(schema().validate(&json!({"path": "a", "limit": 0})).is_err());
    }

    #[test]
    fn enum_enforced() {
        let err = schema()
            .validate(&json!({"path": "a", "direction": "sideways"}))
            .unwrap_err();
        assert!(err.to_string().contains("one of"));
    }

    #[test]
    fn unknown_param_rejected() {
        let err = schema()
            .validate(&json!({"path": "a", "lmit": 3}))
            .unwrap_err();
        assert!(err.to_string().contains("lmit"));
    }

    #[test]
    fn wrong_types_rejected() {
        assert!(schema().validate(&json!({"path": 5})).is_err());
        assert!(schema().validate(&json!({"path": "a", "sync": "yes"})).is_err());
        assert!(schema().validate(&json!("not an object")).is_err());
    }

    #[test]
    fn null_params_ok_when_nothing_required() {
        let optional = ToolSchema::new("get_stats", "stats").cacheable();
        optional.validate(&Value::Null).unwrap();
    }

    #[test]
    fn envelope_shapes() {
        let ok = ToolResponse::ok(json!({"x": 1}), 12, Some(true));
        let text = serde_json::to_string(&ok).unwrap();
        assert!(text.contains("\"success\":true"));
        assert!(text.contains("\"cache_hit\":true"));

        let err = ToolResponse::fail(&WeaverError::validation("bad limit"), 3);
        assert!(!err.success);
        assert!(err.error.as_deref().unwrap().starts_with("Validation:"));
    }
}
