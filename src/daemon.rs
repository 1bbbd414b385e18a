//! Daemon orchestration
//!
//! Builds the process-wide singletons in dependency order, wires the
//! watcher fan-out (cache sync, rule dispatch, git), and coordinates
//! drain-and-stop through one root cancellation token. Startup order is
//! leaves-first: activity → cache → llm → workflows → rules → surface →
//! watcher.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::activity::ActivityLogger;
use crate::cache::ShadowCache;
use crate::config::WeaverConfig;
use crate::error::Result;
use crate::event::VaultEvent;
use crate::llm::LlmClient;
use crate::rules::builtin::{register_builtins, BuiltinConfig};
use crate::rules::{RuleContext, RuleEngine};
use crate::surface::{register_builtin_tools, Dispatcher, ToolRegistry};
use crate::vcs::GitAutoCommit;
use crate::watcher::{VaultWatcher, WatchEvent, WatchKind};
use crate::workflow::WorkflowEngine;

/// The running agent
pub struct Weaver {
    pub config: WeaverConfig,
    pub cache: Arc<ShadowCache>,
    pub llm: Arc<LlmClient>,
    pub workflows: Arc<WorkflowEngine>,
    pub rules: Arc<RuleEngine>,
    pub activity: Arc<ActivityLogger>,
    pub dispatcher: Arc<Dispatcher>,
    watcher: VaultWatcher,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl Weaver {
    /// Bring the whole stack up. Returns once the initial vault sync has
    /// completed and every background task is running.
    pub async fn start(config: WeaverConfig) -> Result<Self> {
        config.validate()?;
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let activity = Arc::new(ActivityLogger::open(
            &config.activity_dir(),
            config.activity.buffer_size,
        )?);
        tasks.push(Arc::clone(&activity).spawn_flusher(
            Duration::from_millis(config.activity.flush_interval_ms),
            cancel.clone(),
        ));

        let cache = Arc::new(ShadowCache::open(&config.db_path(), &config.vault.root)?);
        let report = cache.sync_vault()?;
        tracing::info!(
            scanned = report.scanned,
            updated = report.updated,
            deleted = report.deleted,
            "initial vault sync"
        );

        let llm = Arc::new(LlmClient::new(&config.llm)?);

        let workflows = Arc::new(WorkflowEngine::open(
            &config.workflow_store_path(),
            &config.workflow,
            &cancel,
        )?);
        let rules = Arc::new(RuleEngine::new(&config.rules));
        register_builtins(
            &rules,
            &workflows,
            Arc::clone(&cache),
            Arc::clone(&llm),
            Arc::clone(&activity),
            config.vault.root.clone(),
            &BuiltinConfig {
                content_budget: config.llm.prompt_content_budget,
                ..BuiltinConfig::default()
            },
        )?;
        let recovered = workflows.recover()?;
        if recovered > 0 {
            tracing::info!(recovered, "replaying interrupted workflow runs");
        }

        let registry = ToolRegistry::new();
        register_builtin_tools(
            &registry,
            Arc::clone(&cache),
            Arc::clone(&workflows),
            Arc::clone(&llm),
            config.vault.root.clone(),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            registry,
            &config.surface,
            Arc::clone(&activity),
        ));

        let watcher = VaultWatcher::start(
            &config.vault.root,
            &config.vault.watch_patterns,
            Duration::from_millis(config.vault.debounce_ms),
            &cancel,
        )?;

        // Fan-out one: keep the shadow cache in sync.
        tasks.push(spawn_cache_sync(
            watcher.subscribe(),
            Arc::clone(&cache),
            cancel.clone(),
        ));

        // Fan-out two: dispatch events to the rule engine.
        tasks.push(spawn_rule_dispatch(
            watcher.subscribe(),
            RuleFanout {
                cache: Arc::clone(&cache),
                llm: Arc::clone(&llm),
                workflows: Arc::clone(&workflows),
                rules: Arc::clone(&rules),
                activity: Arc::clone(&activity),
                vault_root: config.vault.root.clone(),
            },
            cancel.clone(),
        ));

        // Fan-out three: batch commits of vault mutations.
        if config.git.enabled {
            let auto = GitAutoCommit::new(
                config.vault.root.clone(),
                config.git.clone(),
                Some(Arc::clone(&llm)),
            );
            tasks.push(auto.spawn(watcher.subscribe(), cancel.clone()));
        }

        // Scheduled trigger: fire once per UTC day change.
        tasks.push(spawn_daily_tick(
            RuleFanout {
                cache: Arc::clone(&cache),
                llm: Arc::clone(&llm),
                workflows: Arc::clone(&workflows),
                rules: Arc::clone(&rules),
                activity: Arc::clone(&activity),
                vault_root: config.vault.root.clone(),
            },
            cancel.clone(),
        ));

        tracing::info!(vault = %config.vault.root.display(), "weaver is up");
        Ok(Self {
            config,
            cache,
            llm,
            workflows,
            rules,
            activity,
            dispatcher,
            watcher,
            cancel,
            tasks,
        })
    }

    /// Fire the root cancellation, drain every component, join the tasks.
    pub async fn shutdown(self) -> Result<()> {
        tracing::info!("shutting down");
        self.cancel.cancel();

        if let Err(e) = self.watcher.stop().await {
            tracing::warn!(error = %e, "watcher stop exceeded its bound");
        }
        if tokio::time::timeout(Duration::from_secs(10), self.workflows.drain())
            .await
            .is_err()
        {
            tracing::warn!(
                active = self.workflows.active_runs(),
                "workflow drain timed out; unfinished runs will replay on next start"
            );
        }
        for task in self.tasks {
            if tokio::time::timeout(Duration::from_secs(2), task).await.is_err() {
                tracing::warn!("background task did not stop in time");
            }
        }
        self.activity.shutdown()?;
        Ok(())
    }
}

/// Shared clones for event fan-out tasks
struct RuleFanout {
    cache: Arc<ShadowCache>,
    llm: Arc<LlmClient>,
    workflows: Arc<WorkflowEngine>,
    rules: Arc<RuleEngine>,
    activity: Arc<ActivityLogger>,
    vault_root: std::path::PathBuf,
}

impl RuleFanout {
    fn context_for(&self, event: VaultEvent) -> RuleContext {
        let file = event
            .path
            .as_deref()
            .and_then(|path| self.cache.get_file(path).ok().flatten());
        RuleContext {
            event,
            file,
            cache: Arc::clone(&self.cache),
            llm: Arc::clone(&self.llm),
            workflows: Arc::clone(&self.workflows),
            activity: Arc::clone(&self.activity),
            vault_root: self.vault_root.clone(),
            metadata: serde_json::Value::Null,
        }
    }
}

fn spawn_cache_sync(
    mut events: tokio::sync::broadcast::Receiver<WatchEvent>,
    cache: Arc<ShadowCache>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        if let Err(e) = cache.sync_path(&event.relative_path) {
                            tracing::warn!(path = %event.relative_path, error = %e, "incremental sync failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "cache sync lagged; running full sync");
                        if let Err(e) = cache.sync_vault() {
                            tracing::error!(error = %e, "catch-up full sync failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

fn spawn_rule_dispatch(
    mut events: tokio::sync::broadcast::Receiver<WatchEvent>,
    fanout: RuleFanout,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => match event {
                    Ok(event) => {
                        // The cache-sync fan-out races us for the same
                        // event; sync here first so rules observe the
                        // record for the content that triggered them.
                        if event.kind != WatchKind::Unlink {
                            let _ = fanout.cache.sync_path(&event.relative_path);
                        }
                        let ctx = fanout.context_for(VaultEvent::from_watch(&event));
                        let summary = fanout.rules.execute_rules(&ctx).await;
                        tracing::debug!(
                            kind = event.kind.as_str(),
                            path = %event.relative_path,
                            matched = summary.matched,
                            failed = summary.failed,
                            "rules dispatched"
                        );
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "rule dispatch lagged; events dropped");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Emits one `Scheduled` event when the UTC date changes.
fn spawn_daily_tick(fanout: RuleFanout, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut last_date = chrono::Utc::now().date_naive();
        let mut tick = tokio::time::interval(Duration::from_secs(60));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {
                    let today = chrono::Utc::now().date_naive();
                    if today != last_date {
                        last_date = today;
                        let event = VaultEvent::scheduled(serde_json::json!({
                            "job": "daily",
                            "date": today.format("%Y-%m-%d").to_string(),
                        }));
                        let ctx = fanout.context_for(event);
                        fanout.rules.execute_rules(&ctx).await;
                    }
                }
            }
        }
    })
}
