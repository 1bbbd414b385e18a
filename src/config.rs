//! Weaver configuration
//!
//! Loaded from `weaver.toml` (vault root by default, or an explicit path),
//! then overlaid with environment variables. Defaults are chosen so a bare
//! `[vault] root = "..."` is a complete config.
//!
//! ## Priority order (highest to lowest)
//!
//! 1. Environment variables (`WEAVER_VAULT`, `WEAVER_DB_PATH`)
//! 2. Config file
//! 3. Defaults
//!
//! The LLM API key is never part of this struct: the client reads
//! `ANTHROPIC_API_KEY` from the environment at construction and the key is
//! never written to disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, WeaverError};

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct WeaverConfig {
    #[serde(default)]
    pub vault: VaultConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub workflow: WorkflowConfig,

    #[serde(default)]
    pub rules: RulesConfig,

    #[serde(default)]
    pub surface: SurfaceConfig,

    #[serde(default)]
    pub activity: ActivityConfig,

    #[serde(default)]
    pub git: GitConfig,
}

/// Vault location and watcher behavior
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultConfig {
    /// Absolute path watched and indexed
    pub root: PathBuf,

    /// File globs included in the watcher
    #[serde(default = "default_watch_patterns")]
    pub watch_patterns: Vec<String>,

    /// Milliseconds for event coalescing
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            watch_patterns: default_watch_patterns(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

/// Shadow cache storage
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CacheConfig {
    /// Location of the shadow-cache database file.
    /// Defaults to `<vault>/.weaver/cache.db`.
    pub db_path: Option<PathBuf>,
}

/// LLM client knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LlmConfig {
    /// Model identifier passed to the provider
    #[serde(default = "default_model")]
    pub model: String,

    /// Requests per minute through the token bucket
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,

    /// Consecutive failures before the circuit opens
    #[serde(default = "default_circuit_threshold")]
    pub circuit_threshold: u32,

    /// Open-state duration in seconds
    #[serde(default = "default_circuit_cooldown_secs")]
    pub circuit_cooldown_secs: u64,

    /// Cap across retry policies (attempts, not retries)
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,

    /// Per-attempt wall clock in seconds
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,

    /// Max tokens requested per completion
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Byte budget for file content embedded in prompts
    #[serde(default = "default_prompt_content_budget")]
    pub prompt_content_budget: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            rate_limit_per_minute: default_rate_limit(),
            circuit_threshold: default_circuit_threshold(),
            circuit_cooldown_secs: default_circuit_cooldown_secs(),
            retry_max_attempts: default_retry_max_attempts(),
            timeout_secs: default_llm_timeout_secs(),
            max_tokens: default_max_tokens(),
            prompt_content_budget: default_prompt_content_budget(),
        }
    }
}

/// Workflow engine knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowConfig {
    /// Location of durable-run JSON files.
    /// Defaults to `<vault>/.weaver/workflows`.
    pub store_path: Option<PathBuf>,

    /// Max parallel runs
    #[serde(default = "default_workflow_concurrency")]
    pub concurrency: usize,

    /// Default per-step retry attempts
    #[serde(default = "default_step_attempts")]
    pub step_max_attempts: u32,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            store_path: None,
            concurrency: default_workflow_concurrency(),
            step_max_attempts: default_step_attempts(),
        }
    }
}

/// Rule engine knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RulesConfig {
    /// Max parallel rule actions per event. 0 means unbounded.
    #[serde(default)]
    pub concurrency: usize,

    /// Execution log ring capacity
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,

    /// Execution log retention in hours
    #[serde(default = "default_log_retention_hours")]
    pub log_retention_hours: u64,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            concurrency: 0,
            log_capacity: default_log_capacity(),
            log_retention_hours: default_log_retention_hours(),
        }
    }
}

/// Query surface pipeline knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurfaceConfig {
    /// Milliseconds the batching middleware collects requests
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,

    /// Max requests per batch
    #[serde(default = "default_batch_max")]
    pub batch_max: usize,

    /// Milliseconds a response-cache entry stays fresh
    #[serde(default = "default_cache_ttl_ms")]
    pub cache_ttl_ms: u64,

    /// LRU entry count
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Bytes below which payloads are not compressed
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            batch_window_ms: default_batch_window_ms(),
            batch_max: default_batch_max(),
            cache_ttl_ms: default_cache_ttl_ms(),
            cache_capacity: default_cache_capacity(),
            compression_threshold: default_compression_threshold(),
        }
    }
}

/// Activity logger knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityConfig {
    /// Directory of session markdown files.
    /// Defaults to `<vault>/.weaver/activity`.
    pub dir: Option<PathBuf>,

    /// Ring capacity of unflushed entries
    #[serde(default = "default_activity_buffer")]
    pub buffer_size: usize,

    /// Milliseconds between buffer drains
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            dir: None,
            buffer_size: default_activity_buffer(),
            flush_interval_ms: default_flush_interval_ms(),
        }
    }
}

/// Git auto-commit knobs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Milliseconds of quiet before a batch commit
    #[serde(default = "default_git_debounce_ms")]
    pub debounce_ms: u64,

    /// Ask the LLM to summarize the diff for the commit message
    #[serde(default)]
    pub llm_messages: bool,

    #[serde(default = "default_git_author_name")]
    pub author_name: String,

    #[serde(default = "default_git_author_email")]
    pub author_email: String,
}

impl Default for GitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            debounce_ms: default_git_debounce_ms(),
            llm_messages: false,
            author_name: default_git_author_name(),
            author_email: default_git_author_email(),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// Serde defaults
// ═══════════════════════════════════════════════════════════════

fn default_watch_patterns() -> Vec<String> {
    vec!["**/*.md".to_string()]
}
fn default_debounce_ms() -> u64 {
    500
}
fn default_model() -> String {
    "claude-sonnet-4-20250514".to_string()
}
fn default_rate_limit() -> u32 {
    50
}
fn default_circuit_threshold() -> u32 {
    5
}
fn default_circuit_cooldown_secs() -> u64 {
    60
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_max_tokens() -> u32 {
    4096
}
fn default_prompt_content_budget() -> usize {
    16 * 1024
}
fn default_workflow_concurrency() -> usize {
    5
}
fn default_step_attempts() -> u32 {
    3
}
fn default_log_capacity() -> usize {
    1000
}
fn default_log_retention_hours() -> u64 {
    24
}
fn default_batch_window_ms() -> u64 {
    50
}
fn default_batch_max() -> usize {
    10
}
fn default_cache_ttl_ms() -> u64 {
    5 * 60 * 1000
}
fn default_cache_capacity() -> usize {
    1000
}
fn default_compression_threshold() -> usize {
    1024
}
fn default_activity_buffer() -> usize {
    1000
}
fn default_flush_interval_ms() -> u64 {
    5000
}
fn default_git_debounce_ms() -> u64 {
    30_000
}
fn default_git_author_name() -> String {
    "Weaver".to_string()
}
fn default_git_author_email() -> String {
    "weaver@localhost".to_string()
}

impl WeaverConfig {
    /// Load configuration from an explicit path, or from `weaver.toml` under
    /// the vault root when the vault is already known from the environment.
    ///
    /// A missing file yields defaults; a malformed file is a `Config` error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|e| WeaverError::Config {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| WeaverError::Config {
                reason: format!("failed to create {}: {}", dir.display(), e),
            })?;
        }
        let content = toml::to_string_pretty(self).map_err(|e| WeaverError::Config {
            reason: format!("failed to serialize config: {}", e),
        })?;
        fs::write(path, content).map_err(|e| WeaverError::Config {
            reason: format!("failed to write {}: {}", path.display(), e),
        })?;
        Ok(())
    }

    /// Merge with environment variables. Env values win.
    pub fn with_env(mut self) -> Self {
        if let Ok(root) = std::env::var("WEAVER_VAULT") {
            if !root.is_empty() {
                self.vault.root = PathBuf::from(root);
            }
        }
        if let Ok(db) = std::env::var("WEAVER_DB_PATH") {
            if !db.is_empty() {
                self.cache.db_path = Some(PathBuf::from(db));
            }
        }
        self
    }

    /// Check the config is usable for a live daemon.
    pub fn validate(&self) -> Result<()> {
        if self.vault.root.as_os_str().is_empty() {
            return Err(WeaverError::Config {
                reason: "vault.root is required".to_string(),
            });
        }
        if !self.vault.root.is_absolute() {
            return Err(WeaverError::Config {
                reason: format!(
                    "vault.root must be absolute, got '{}'",
                    self.vault.root.display()
                ),
            });
        }
        if self.vault.watch_patterns.is_empty() {
            return Err(WeaverError::Config {
                reason: "vault.watch_patterns must not be empty".to_string(),
            });
        }
        if self.workflow.concurrency == 0 {
            return Err(WeaverError::Config {
                reason: "workflow.concurrency must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Private state directory under the vault, excluded from watching.
    pub fn state_dir(&self) -> PathBuf {
        self.vault.root.join(".weaver")
    }

    pub fn db_path(&self) -> PathBuf {
        self.cache
            .db_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("cache.db"))
    }

    pub fn workflow_store_path(&self) -> PathBuf {
        self.workflow
            .store_path
            .clone()
            .unwrap_or_else(|| self.state_dir().join("workflows"))
    }

    pub fn activity_dir(&self) -> PathBuf {
        self.activity
            .dir
            .clone()
            .unwrap_or_else(|| self.state_dir().join("activity"))
    }
}

/// Mask an API key for display: keep prefix and last 4 chars.
pub fn mask_api_key(key: &str) -> String {
    if key.len() <= 12 {
        return "*".repeat(key.len());
    }
    format!("{}...{}", &key[..8], &key[key.len() - 4..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_contract() {
        let config = WeaverConfig::default();
        assert_eq!(config.vault.watch_patterns, vec!["**/*.md"]);
        assert_eq!(config.vault.debounce_ms, 500);
        assert_eq!(config.llm.rate_limit_per_minute, 50);
        assert_eq!(config.llm.circuit_threshold, 5);
        assert_eq!(config.llm.circuit_cooldown_secs, 60);
        assert_eq!(config.llm.retry_max_attempts, 3);
        assert_eq!(config.llm.timeout_secs, 30);
        assert_eq!(config.workflow.concurrency, 5);
        assert_eq!(config.surface.batch_window_ms, 50);
        assert_eq!(config.surface.batch_max, 10);
        assert_eq!(config.surface.cache_ttl_ms, 300_000);
        assert_eq!(config.surface.cache_capacity, 1000);
        assert_eq!(config.surface.compression_threshold, 1024);
        assert_eq!(config.activity.buffer_size, 1000);
        assert_eq!(config.activity.flush_interval_ms, 5000);
        assert_eq!(config.rules.concurrency, 0, "unbounded by default");
        assert_eq!(config.rules.log_capacity, 1000);
        assert_eq!(config.rules.log_retention_hours, 24);
    }

    #[test]
    fn minimal_toml_is_complete() {
        let config: WeaverConfig = toml::from_str(
            r#"
            [vault]
            root = "/tmp/vault"
            "#,
        )
        .unwrap();
        assert_eq!(config.vault.root, PathBuf::from("/tmp/vault"));
        assert_eq!(config.vault.debounce_ms, 500);
        assert_eq!(config.llm.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn roundtrip_through_toml() {
        let mut config = WeaverConfig::default();
        config.vault.root = PathBuf::from("/tmp/vault");
        config.git.enabled = true;
        config.surface.cache_capacity = 42;

        let text = toml::to_string_pretty(&config).unwrap();
        let back: WeaverConfig = toml::from_str(&text).unwrap();
        assert_eq!(config, back);
    }

    #[test]
    fn validate_rejects_missing_root() {
        let config = WeaverConfig::default();
        let err = config.validate().unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn validate_rejects_relative_root() {
        let mut config = WeaverConfig::default();
        config.vault.root = PathBuf::from("relative/vault");
        assert!(config.validate().is_err());
    }

    #[test]
    fn derived_paths_default_under_state_dir() {
        let mut config = WeaverConfig::default();
        config.vault.root = PathBuf::from("/tmp/vault");
        assert_eq!(config.db_path(), PathBuf::from("/tmp/vault/.weaver/cache.db"));
        assert_eq!(
            config.workflow_store_path(),
            PathBuf::from("/tmp/vault/.weaver/workflows")
        );
        assert_eq!(
            config.activity_dir(),
            PathBuf::from("/tmp/vault/.weaver/activity")
        );
    }

    #[test]
    fn mask_api_key_hides_middle() {
        assert_eq!(mask_api_key("sk-ant-api03-abcdef1234"), "sk-ant-a...1234");
        assert_eq!(mask_api_key("short"), "*****");
    }
}
