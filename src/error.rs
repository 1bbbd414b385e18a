//! Weaver error types
//!
//! One enum for the whole crate, in layers:
//! - every variant maps to an [`ErrorKind`] from a fixed taxonomy
//! - `is_retryable()` drives the retry policies (LLM client, surface pipeline)
//! - `exit_code()` is the process-level consumer contract
//!
//! Stack traces and cause chains are captured by the activity logger only;
//! the display string is what crosses component boundaries.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, WeaverError>;

/// Fixed error taxonomy shared across components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad input (parameters, paths, config values)
    Validation,
    /// Referent absent (file, run, rule, tool)
    NotFound,
    /// State mismatch (schema version, repo state, duplicate id)
    Conflict,
    /// Authentication or authorization failure
    Permission,
    /// Wall-clock bound exceeded
    Timeout,
    /// Token bucket depleted or provider 429
    RateLimited,
    /// Circuit breaker failing fast
    CircuitOpen,
    /// Network or remote 5xx failure
    Transport,
    /// Malformed data (JSON, YAML, LLM response format)
    Parse,
    /// Embedded database failure
    Database,
    /// Operation observed its cancellation flag
    Cancelled,
    /// Everything else
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "Validation",
            Self::NotFound => "NotFound",
            Self::Conflict => "Conflict",
            Self::Permission => "Permission",
            Self::Timeout => "Timeout",
            Self::RateLimited => "RateLimited",
            Self::CircuitOpen => "CircuitOpen",
            Self::Transport => "Transport",
            Self::Parse => "Parse",
            Self::Database => "Database",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
pub enum WeaverError {
    // ═══════════════════════════════════════════
    // INPUT / CONFIG
    // ═══════════════════════════════════════════
    #[error("Validation: {message}")]
    Validation { message: String },

    #[error("Validation: parameter '{param}' of '{tool}': {reason}")]
    InvalidParam {
        tool: String,
        param: String,
        reason: String,
    },

    #[error("Config error: {reason}")]
    Config { reason: String },

    #[error("{what} not found: {id}")]
    NotFound { what: &'static str, id: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Permission denied: {reason}")]
    Permission { reason: String },

    // ═══════════════════════════════════════════
    // RESILIENCE / REMOTE
    // ═══════════════════════════════════════════
    #[error("Operation '{operation}' timed out after {duration_ms}ms")]
    Timeout { operation: String, duration_ms: u64 },

    #[error("Rate limit exceeded for '{resource}'")]
    RateLimited {
        resource: String,
        /// Server-provided hint, honored by the retry policy
        retry_after_ms: Option<u64>,
    },

    #[error("Circuit breaker open for '{service}'")]
    CircuitOpen { service: String },

    #[error("Transport error{}: {reason}", status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    Transport {
        reason: String,
        status: Option<u16>,
    },

    #[error("Retry budget exhausted after {attempts} attempts: {last_error}")]
    RetryExhausted { attempts: u32, last_error: String },

    // ═══════════════════════════════════════════
    // DATA
    // ═══════════════════════════════════════════
    #[error("Parse error in {what}: {reason}")]
    Parse { what: String, reason: String },

    #[error("Database error: {reason}")]
    Database { reason: String },

    #[error("Schema version mismatch: database has v{found}, crate expects v{expected}")]
    SchemaMismatch { found: i64, expected: i64 },

    // ═══════════════════════════════════════════
    // EXECUTION
    // ═══════════════════════════════════════════
    #[error("Operation '{operation}' cancelled")]
    Cancelled { operation: String },

    #[error("Workflow run '{run_id}' failed: {reason}")]
    WorkflowFailed { run_id: String, reason: String },

    #[error("Internal error: {reason}")]
    Internal { reason: String },

    // ═══════════════════════════════════════════
    // WRAPPED SOURCES
    // ═══════════════════════════════════════════
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl WeaverError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    pub fn database(reason: impl Into<String>) -> Self {
        Self::Database {
            reason: reason.into(),
        }
    }

    pub fn parse(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Parse {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Taxonomy bucket for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::InvalidParam { .. } | Self::Config { .. } => {
                ErrorKind::Validation
            }
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Conflict { .. } | Self::SchemaMismatch { .. } => ErrorKind::Conflict,
            Self::Permission { .. } => ErrorKind::Permission,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::Transport { .. } | Self::RetryExhausted { .. } => ErrorKind::Transport,
            Self::Parse { .. } | Self::Json(_) | Self::Yaml(_) => ErrorKind::Parse,
            Self::Database { .. } => ErrorKind::Database,
            Self::Cancelled { .. } => ErrorKind::Cancelled,
            Self::WorkflowFailed { .. } | Self::Internal { .. } | Self::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Whether a retry policy may re-attempt the operation.
    ///
    /// `RetryExhausted` is excluded even though its kind is `Transport`:
    /// a retry wrapper must not loop on its own terminal error.
    pub fn is_retryable(&self) -> bool {
        if matches!(self, Self::RetryExhausted { .. }) {
            return false;
        }
        matches!(
            self.kind(),
            ErrorKind::RateLimited | ErrorKind::Transport | ErrorKind::Timeout
        )
    }

    /// Process exit code for the CLI consumer contract.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config { .. } => 2,
            Self::WorkflowFailed { .. } => 10,
            _ => match self.kind() {
                ErrorKind::Validation | ErrorKind::Parse => 3,
                ErrorKind::Timeout | ErrorKind::RateLimited | ErrorKind::CircuitOpen => 4,
                ErrorKind::Transport => 5,
                ErrorKind::Database => 6,
                ErrorKind::Permission => 20,
                _ => 1,
            },
        }
    }

    /// Sanitized string for response envelopes: kind prefix + message,
    /// no cause chain, no stack.
    pub fn envelope_message(&self) -> String {
        match self.kind() {
            // The display string already leads with the kind for these
            ErrorKind::Validation => self.to_string(),
            kind => format!("{}: {}", kind, self),
        }
    }
}

impl From<rusqlite::Error> for WeaverError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Database {
            reason: e.to_string(),
        }
    }
}

impl From<reqwest::Error> for WeaverError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout {
                operation: "http request".to_string(),
                duration_ms: 0,
            }
        } else {
            Self::Transport {
                reason: e.to_string(),
                status: e.status().map(|s| s.as_u16()),
            }
        }
    }
}

impl From<notify::Error> for WeaverError {
    fn from(e: notify::Error) -> Self {
        Self::Internal {
            reason: format!("watcher: {}", e),
        }
    }
}

impl From<git2::Error> for WeaverError {
    fn from(e: git2::Error) -> Self {
        Self::Internal {
            reason: format!("git: {}", e.message()),
        }
    }
}

impl From<toml::de::Error> for WeaverError {
    fn from(e: toml::de::Error) -> Self {
        Self::Config {
            reason: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_covers_taxonomy() {
        assert_eq!(
            WeaverError::validation("bad").kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            WeaverError::NotFound {
                what: "file",
                id: "a.md".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            WeaverError::CircuitOpen {
                service: "llm".into()
            }
            .kind(),
            ErrorKind::CircuitOpen
        );
        assert_eq!(
            WeaverError::SchemaMismatch {
                found: 1,
                expected: 2
            }
            .kind(),
            ErrorKind::Conflict
        );
    }

    #[test]
    fn retryable_kinds() {
        assert!(WeaverError::RateLimited {
            resource: "llm".into(),
            retry_after_ms: None
        }
        .is_retryable());
        assert!(WeaverError::Transport {
            reason: "connection reset".into(),
            status: Some(503)
        }
        .is_retryable());
        assert!(WeaverError::Timeout {
            operation: "send".into(),
            duration_ms: 30_000
        }
        .is_retryable());

        assert!(!WeaverError::Permission {
            reason: "bad key".into()
        }
        .is_retryable());
        assert!(!WeaverError::parse("llm response", "not a JSON array").is_retryable());
        assert!(!WeaverError::RetryExhausted {
            attempts: 3,
            last_error: "503".into()
        }
        .is_retryable());
    }

    #[test]
    fn exit_codes_follow_consumer_contract() {
        assert_eq!(WeaverError::validation("x").exit_code(), 3);
        assert_eq!(
            WeaverError::Config { reason: "x".into() }.exit_code(),
            2
        );
        assert_eq!(WeaverError::database("locked").exit_code(), 6);
        assert_eq!(
            WeaverError::Transport {
                reason: "refused".into(),
                status: None
            }
            .exit_code(),
            5
        );
        assert_eq!(
            WeaverError::WorkflowFailed {
                run_id: "r".into(),
                reason: "step".into()
            }
            .exit_code(),
            10
        );
        assert_eq!(
            WeaverError::Permission {
                reason: "denied".into()
            }
            .exit_code(),
            20
        );
        assert_eq!(
            WeaverError::CircuitOpen {
                service: "llm".into()
            }
            .exit_code(),
            4
        );
    }

    #[test]
    fn envelope_message_leads_with_kind() {
        let err = WeaverError::NotFound {
            what: "file",
            id: "notes/a.md".into(),
        };
        let msg = err.envelope_message();
        assert!(msg.starts_with("NotFound:"), "got: {}", msg);

        let val = WeaverError::validation("limit must be <= 500");
        assert!(val.envelope_message().starts_with("Validation:"));
    }

    #[test]
    fn transport_display_includes_status() {
        let err = WeaverError::Transport {
            reason: "upstream".into(),
            status: Some(502),
        };
        assert!(err.to_string().contains("HTTP 502"));
    }
}
