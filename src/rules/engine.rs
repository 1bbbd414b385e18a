//! Rule engine
//!
//! Event-driven dispatch: select enabled rules by trigger, order by
//! priority, evaluate guards and run actions concurrently, isolate every
//! failure. A rule that errors or panics produces a `failed` log entry and
//! nothing else; the event source never sees it.

use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::Semaphore;

use crate::config::RulesConfig;
use crate::error::{Result, WeaverError};
use crate::event::EventKind;

use super::log::{ExecutionLog, ExecutionRecord, ExecutionStatus, LogQuery};
use super::types::{ExecutionSummary, Rule, RuleContext, RuleStats};

enum Outcome {
    Success,
    Skipped,
    Failed(String),
}

/// Summary row for the admin surface
#[derive(Debug, Clone, serde::Serialize)]
pub struct RuleSummary {
    pub id: String,
    pub trigger: EventKind,
    pub priority: i32,
    pub enabled: bool,
    pub stats: RuleStats,
}

pub struct RuleEngine {
    rules: DashMap<String, Rule>,
    log: Arc<ExecutionLog>,
    stats: Arc<DashMap<String, RuleStats>>,
    /// None = unbounded action concurrency
    concurrency: Option<Arc<Semaphore>>,
}

impl RuleEngine {
    pub fn new(config: &RulesConfig) -> Self {
        let concurrency = if config.concurrency == 0 {
            None
        } else {
            Some(Arc::new(Semaphore::new(config.concurrency)))
        };
        Self {
            rules: DashMap::new(),
            log: Arc::new(ExecutionLog::new(
                config.log_capacity,
                std::time::Duration::from_secs(config.log_retention_hours * 3600),
            )),
            stats: Arc::new(DashMap::new()),
            concurrency,
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Registry
    // ═══════════════════════════════════════════════════════════════

    pub fn register_rule(&self, rule: Rule) -> Result<()> {
        if self.rules.contains_key(&rule.id) {
            return Err(WeaverError::Conflict {
                reason: format!("rule '{}' already registered", rule.id),
            });
        }
        tracing::info!(rule = %rule.id, trigger = %rule.trigger, "rule registered");
        self.rules.insert(rule.id.clone(), rule);
        Ok(())
    }

    pub fn unregister_rule(&self, id: &str) -> Result<()> {
        self.rules
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| WeaverError::NotFound {
                what: "rule",
                id: id.to_string(),
            })
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut entry = self.rules.get_mut(id).ok_or_else(|| WeaverError::NotFound {
            what: "rule",
            id: id.to_string(),
        })?;
        entry.enabled = enabled;
        Ok(())
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Registry and statistics view, ordered by id.
    pub fn summaries(&self) -> Vec<RuleSummary> {
        let mut rows: Vec<RuleSummary> = self
            .rules
            .iter()
            .map(|entry| RuleSummary {
                id: entry.id.clone(),
                trigger: entry.trigger,
                priority: entry.priority,
                enabled: entry.enabled,
                stats: self
                    .stats
                    .get(&entry.id)
                    .map(|s| s.clone())
                    .unwrap_or_default(),
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    pub fn get_execution_logs(&self, query: &LogQuery) -> Vec<ExecutionRecord> {
        self.log.query(query)
    }

    pub(super) fn log(&self) -> &ExecutionLog {
        &self.log
    }

    // ═══════════════════════════════════════════════════════════════
    // Dispatch
    // ═══════════════════════════════════════════════════════════════

    /// Dispatch one event to every matching rule. Returns once every
    /// scheduled action has finished (or failed); the summary is the only
    /// thing that escapes, never an error.
    pub async fn execute_rules(&self, ctx: &RuleContext) -> ExecutionSummary {
        let start = Instant::now();
        let kind = ctx.event.kind;

        let mut matched: Vec<Rule> = self
            .rules
            .iter()
            .filter(|entry| entry.enabled && entry.trigger == kind)
            .map(|entry| entry.clone())
            .collect();
        // Priority descending; id as the deterministic tiebreak.
        matched.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));

        let mut handles = Vec::with_capacity(matched.len());
        for rule in matched {
            self.log.record_started(&rule.id, kind);
            let ctx = ctx.clone();
            let log = Arc::clone(&self.log);
            let stats = Arc::clone(&self.stats);
            let semaphore = self.concurrency.clone();

            handles.push(tokio::spawn(async move {
                let _permit = match semaphore {
                    Some(semaphore) => semaphore.acquire_owned().await.ok(),
                    None => None,
                };
                let rule_start = Instant::now();
                let outcome = run_isolated(&rule, ctx).await;
                let duration_ms = rule_start.elapsed().as_millis() as u64;

                let mut rule_stats = stats.entry(rule.id.clone()).or_default();
                match &outcome {
                    Outcome::Success => {
                        log.record_terminal(&rule.id, kind, ExecutionStatus::Success, duration_ms, None);
                        rule_stats.record_success(duration_ms);
                    }
                    Outcome::Skipped => {
                        log.record_terminal(&rule.id, kind, ExecutionStatus::Skipped, duration_ms, None);
                        rule_stats.record_skip();
                    }
                    Outcome::Failed(error) => {
                        tracing::warn!(rule = %rule.id, error = %error, "rule execution failed");
                        log.record_terminal(
                            &rule.id,
                            kind,
                            ExecutionStatus::Failed,
                            duration_ms,
                            Some(error.clone()),
                        );
                        rule_stats.record_failure(duration_ms);
                    }
                }
                outcome
            }));
        }

        let mut summary = ExecutionSummary {
            matched: handles.len(),
            ..ExecutionSummary::default()
        };
        for handle in handles {
            match handle.await {
                Ok(Outcome::Success) => summary.succeeded += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Ok(Outcome::Failed(_)) => summary.failed += 1,
                // The wrapper task itself cannot panic; the body is fully
                // caught. Count it defensively anyway.
                Err(_) => summary.failed += 1,
            }
        }
        summary.duration_ms = start.elapsed().as_millis() as u64;
        summary
    }
}

/// Run guard and action in their own tasks so a panic in either surfaces
/// as a `JoinError` instead of tearing down the dispatcher.
async fn run_isolated(rule: &Rule, ctx: RuleContext) -> Outcome {
    if let Some(guard) = &rule.guard {
        let guard = Arc::clone(guard);
        let guard_ctx = ctx.clone();
        match tokio::spawn(async move { guard(guard_ctx).await }).await {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => return Outcome::Skipped,
            Ok(Err(e)) => return Outcome::Failed(format!("guard: {}", e)),
            Err(join) => return Outcome::Failed(panic_message(join, "guard")),
        }
    }

    let action = Arc::clone(&rule.action);
    match tokio::spawn(async move { action(ctx).await }).await {
        Ok(Ok(())) => Outcome::Success,
        Ok(Err(e)) => Outcome::Failed(e.to_string()),
        Err(join) => Outcome::Failed(panic_message(join, "action")),
    }
}

/// Non-`Error` thrown values coerce to their string form.
fn panic_message(join: tokio::task::JoinError, phase: &str) -> String {
    if join.is_cancelled() {
        return format!("{} cancelled", phase);
    }
    match join.try_into_panic() {
        Ok(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            format!("{} panicked: {}", phase, message)
        }
        Err(_) => format!("{} aborted", phase),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::ActivityLogger;
    use crate::cache::ShadowCache;
    use crate::config::{LlmConfig, WorkflowConfig};
    use crate::event::VaultEvent;
    use crate::llm::{LlmClient, StaticTransport};
    use crate::workflow::WorkflowEngine;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn test_context(dir: &TempDir) -> RuleContext {
        let cache = Arc::new(
            ShadowCache::open(&dir.path().join("cache.db"), dir.path()).unwrap(),
        );
        let llm = Arc::new(LlmClient::with_transport(
            &LlmConfig::default(),
            Arc::new(StaticTransport::new("stub")),
        ));
        let workflows = Arc::new(
            WorkflowEngine::open(
                &dir.path().join("wf"),
                &WorkflowConfig::default(),
                &CancellationToken::new(),
            )
            .unwrap(),
        );
        RuleContext {
            event: VaultEvent {
                kind: EventKind::FileAdd,
                path: Some("notes/a.md".into()),
                absolute_path: None,
                metadata: Value::Null,
            },
            file: None,
            cache,
            llm,
            workflows,
            activity: Arc::new(ActivityLogger::disabled()),
            vault_root: dir.path().to_path_buf(),
            metadata: json!(null),
        }
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(&RulesConfig::default())
    }

    #[tokio::test]
    async fn registry_lifecycle() {
        let engine = engine();
        engine
            .register_rule(Rule::builder("r1", EventKind::FileAdd).action(|_| async { Ok(()) }))
            .unwrap();

        let dup = engine
            .register_rule(Rule::builder("r1", EventKind::FileAdd).action(|_| async { Ok(()) }));
        assert!(dup.is_err());

        engine.set_enabled("r1", false).unwrap();
        assert!(!engine.summaries()[0].enabled);

        engine.unregister_rule("r1").unwrap();
        assert!(engine.unregister_rule("r1").is_err());
        assert_eq!(engine.rule_count(), 0);
    }

    #[tokio::test]
    async fn failure_isolation_three_rules() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = engine();

        // A fails immediately, B fails after a suspension, C succeeds
        // after ~80ms. One event, three independent outcomes.
        engine
            .register_rule(
                Rule::builder("a-throws", EventKind::FileAdd).action(|_| async {
                    Err(WeaverError::internal("sync boom"))
                }),
            )
            .unwrap();
        engine
            .register_rule(
                Rule::builder("b-throws-late", EventKind::FileAdd).action(|_| async {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    Err(WeaverError::internal("async boom"))
                }),
            )
            .unwrap();
        engine
            .register_rule(
                Rule::builder("c-succeeds", EventKind::FileAdd).action(|_| async {
                    tokio::time::sleep(Duration::from_millis(80)).await;
                    Ok(())
                }),
            )
            .unwrap();

        let summary = engine.execute_rules(&ctx).await;
        assert_eq!(summary.matched, 3);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.skipped, 0);

        let entries = engine.get_execution_logs(&LogQuery::default());
        assert_eq!(entries.len(), 6, "three started + three terminal");
        let started = entries
            .iter()
            .filter(|e| e.status == ExecutionStatus::Started)
            .count();
        assert_eq!(started, 3);

        let c_done: Vec<_> = entries
            .iter()
            .filter(|e| e.rule_id == "c-succeeds" && e.status.is_terminal())
            .collect();
        assert_eq!(c_done.len(), 1);
        assert_eq!(c_done[0].status, ExecutionStatus::Success);
        assert!(c_done[0].duration_ms.unwrap() >= 75);

        let summaries = engine.summaries();
        let stats_of = |id: &str| {
            summaries
                .iter()
                .find(|s| s.id == id)
                .map(|s| s.stats.clone())
                .unwrap()
        };
        assert_eq!(stats_of("a-throws").failures, 1);
        assert_eq!(stats_of("b-throws-late").failures, 1);
        assert_eq!(stats_of("c-succeeds").successes, 1);
    }

    #[tokio::test]
    async fn panicking_action_is_contained() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = engine();

        engine
            .register_rule(
                Rule::builder("panics", EventKind::FileAdd).action(|_| async {
                    panic!("thrown value");
                }),
            )
            .unwrap();
        engine
            .register_rule(Rule::builder("fine", EventKind::FileAdd).action(|_| async { Ok(()) }))
            .unwrap();

        let summary = engine.execute_rules(&ctx).await;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.succeeded, 1);

        let failed = engine.get_execution_logs(&LogQuery {
            status: Some(ExecutionStatus::Failed),
            ..Default::default()
        });
        assert_eq!(failed.len(), 1);
        assert!(failed[0].error.as_deref().unwrap().contains("thrown value"));
    }

    #[tokio::test]
    async fn guard_false_skips_guard_error_fails() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = engine();
        let ran = Arc::new(AtomicU32::new(0));

        let counter = Arc::clone(&ran);
        engine
            .register_rule(
                Rule::builder("guarded-off", EventKind::FileAdd)
                    .guard(|_| async { Ok(false) })
                    .action(move |_| {
                        counter.fetch_add(1, Ordering::SeqCst);
                        async { Ok(()) }
                    }),
            )
            .unwrap();
        engine
            .register_rule(
                Rule::builder("guard-errors", EventKind::FileAdd)
                    .guard(|_| async { Err(WeaverError::internal("guard broke")) })
                    .action(|_| async { Ok(()) }),
            )
            .unwrap();

        let summary = engine.execute_rules(&ctx).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        let skipped = engine.get_execution_logs(&LogQuery {
            status: Some(ExecutionStatus::Skipped),
            ..Default::default()
        });
        assert_eq!(skipped[0].rule_id, "guarded-off");
    }

    #[tokio::test]
    async fn trigger_and_enabled_filtering() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = engine();
        engine
            .register_rule(Rule::builder("on-add", EventKind::FileAdd).action(|_| async { Ok(()) }))
            .unwrap();
        engine
            .register_rule(
                Rule::builder("on-unlink", EventKind::FileUnlink).action(|_| async { Ok(()) }),
            )
            .unwrap();
        engine
            .register_rule(
                Rule::builder("disabled", EventKind::FileAdd)
                    .enabled(false)
                    .action(|_| async { Ok(()) }),
            )
            .unwrap();

        let summary = engine.execute_rules(&ctx).await;
        assert_eq!(summary.matched, 1);
    }

    #[tokio::test]
    async fn priority_orders_dispatch() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = engine();
        engine
            .register_rule(
                Rule::builder("low", EventKind::FileAdd)
                    .priority(1)
                    .action(|_| async { Ok(()) }),
            )
            .unwrap();
        engine
            .register_rule(
                Rule::builder("high", EventKind::FileAdd)
                    .priority(10)
                    .action(|_| async { Ok(()) }),
            )
            .unwrap();

        engine.execute_rules(&ctx).await;
        let started: Vec<_> = engine
            .get_execution_logs(&LogQuery {
                status: Some(ExecutionStatus::Started),
                ..Default::default()
            })
            .into_iter()
            .map(|e| e.rule_id)
            .collect();
        assert_eq!(started, vec!["high", "low"]);
    }

    #[tokio::test]
    async fn bounded_concurrency_is_respected() {
        let dir = TempDir::new().unwrap();
        let ctx = test_context(&dir);
        let engine = RuleEngine::new(&RulesConfig {
            concurrency: 1,
            ..RulesConfig::default()
        });

        let in_flight = Arc::new(AtomicU32::new(0));
        let peak = Arc::new(AtomicU32::new(0));
        for i in 0..3 {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            engine
                .register_rule(
                    Rule::builder(format!("r{i}"), EventKind::FileAdd).action(move |_| {
                        let in_flight = Arc::clone(&in_flight);
                        let peak = Arc::clone(&peak);
                        async move {
                            let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            in_flight.fetch_sub(1, Ordering::SeqCst);
                            Ok(())
                        }
                    }),
                )
                .unwrap();
        }

        engine.execute_rules(&ctx).await;
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }
}
