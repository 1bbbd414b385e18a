//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use weaver::activity::ActivityLogger;
use weaver::cache::ShadowCache;
use weaver::config::{LlmConfig, RulesConfig, WorkflowConfig};
use weaver::error::Result;
use weaver::llm::{LlmClient, LlmRequest, Transport};
use weaver::rules::RuleEngine;
use weaver::workflow::WorkflowEngine;

/// Transport that replays a fixed script of responses, then repeats the
/// last one. Records every prompt it saw.
pub struct SequenceTransport {
    script: Mutex<Vec<String>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicU32,
}

impl SequenceTransport {
    pub fn new(script: &[&str]) -> Self {
        let mut script: Vec<String> = script.iter().map(|s| s.to_string()).collect();
        script.reverse();
        Self {
            script: Mutex::new(script),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl Transport for SequenceTransport {
    async fn complete(&self, request: &LlmRequest, _max_tokens: u32) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().push(request.prompt.clone());
        let mut script = self.script.lock();
        let response = if script.len() > 1 {
            script.pop().unwrap()
        } else {
            script.last().cloned().unwrap_or_default()
        };
        Ok(response)
    }

    fn model(&self) -> &str {
        "sequence"
    }
}

/// A vault on disk plus the full in-process stack around it.
pub struct TestVault {
    pub dir: TempDir,
    pub cache: Arc<ShadowCache>,
    pub llm: Arc<LlmClient>,
    pub transport: Arc<SequenceTransport>,
    pub workflows: Arc<WorkflowEngine>,
    pub rules: Arc<RuleEngine>,
    pub activity: Arc<ActivityLogger>,
    pub cancel: CancellationToken,
}

impl TestVault {
    pub fn new(llm_script: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let cancel = CancellationToken::new();
        let cache = Arc::new(
            ShadowCache::open(&dir.path().join(".weaver/cache.db"), dir.path()).unwrap(),
        );
        let transport = Arc::new(SequenceTransport::new(llm_script));
        let llm = Arc::new(LlmClient::with_transport(
            &LlmConfig {
                rate_limit_per_minute: 6000,
                ..LlmConfig::default()
            },
            Arc::clone(&transport) as Arc<dyn Transport>,
        ));
        let workflows = Arc::new(
            WorkflowEngine::open(
                &dir.path().join(".weaver/workflows"),
                &WorkflowConfig::default(),
                &cancel,
            )
            .unwrap(),
        );
        let rules = Arc::new(RuleEngine::new(&RulesConfig::default()));
        let activity =
            Arc::new(ActivityLogger::open(&dir.path().join(".weaver/activity"), 1000).unwrap());
        Self {
            dir,
            cache,
            llm,
            transport,
            workflows,
            rules,
            activity,
            cancel,
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, rel: &str, content: &str) -> PathBuf {
        let abs = self.dir.path().join(rel);
        std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
        std::fs::write(&abs, content).unwrap();
        abs
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(rel)).unwrap()
    }

    pub fn register_builtins(&self) {
        weaver::rules::builtin::register_builtins(
            &self.rules,
            &self.workflows,
            Arc::clone(&self.cache),
            Arc::clone(&self.llm),
            Arc::clone(&self.activity),
            self.root().to_path_buf(),
            &weaver::rules::builtin::BuiltinConfig::default(),
        )
        .unwrap();
    }

    pub fn rule_context(&self, event: weaver::event::VaultEvent) -> weaver::rules::RuleContext {
        let file = event
            .path
            .as_deref()
            .and_then(|p| self.cache.get_file(p).ok().flatten());
        weaver::rules::RuleContext {
            event,
            file,
            cache: Arc::clone(&self.cache),
            llm: Arc::clone(&self.llm),
            workflows: Arc::clone(&self.workflows),
            activity: Arc::clone(&self.activity),
            vault_root: self.root().to_path_buf(),
            metadata: serde_json::Value::Null,
        }
    }

    /// The one session markdown file this vault's activity logger writes.
    pub fn activity_log(&self) -> String {
        self.activity.flush().unwrap();
        let dir = self.dir.path().join(".weaver/activity");
        let entry = std::fs::read_dir(dir).unwrap().next().unwrap().unwrap();
        std::fs::read_to_string(entry.path()).unwrap()
    }
}

/// A file event as the watcher would emit it.
pub fn file_event(kind: weaver::event::EventKind, rel: &str, root: &Path) -> weaver::event::VaultEvent {
    weaver::event::VaultEvent {
        kind,
        path: Some(rel.to_string()),
        absolute_path: Some(root.join(rel)),
        metadata: serde_json::Value::Null,
    }
}
