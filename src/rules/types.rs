//! Rule definitions and execution context

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::activity::ActivityLogger;
use crate::cache::{FileRecord, ShadowCache};
use crate::error::Result;
use crate::event::{EventKind, VaultEvent};
use crate::llm::LlmClient;
use crate::workflow::WorkflowEngine;

/// Optional async predicate deciding whether the action runs
pub type GuardFn = Arc<dyn Fn(RuleContext) -> BoxFuture<'static, Result<bool>> + Send + Sync>;

/// The rule body
pub type ActionFn = Arc<dyn Fn(RuleContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// One registered rule
#[derive(Clone)]
pub struct Rule {
    pub id: String,
    pub trigger: EventKind,
    /// Higher runs earlier in the dispatch ordering
    pub priority: i32,
    pub enabled: bool,
    pub guard: Option<GuardFn>,
    pub action: ActionFn,
}

impl Rule {
    pub fn builder(id: impl Into<String>, trigger: EventKind) -> RuleBuilder {
        RuleBuilder {
            id: id.into(),
            trigger,
            priority: 0,
            enabled: true,
            guard: None,
        }
    }
}

impl std::fmt::Debug for Rule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rule")
            .field("id", &self.id)
            .field("trigger", &self.trigger)
            .field("priority", &self.priority)
            .field("enabled", &self.enabled)
            .field("has_guard", &self.guard.is_some())
            .finish()
    }
}

pub struct RuleBuilder {
    id: String,
    trigger: EventKind,
    priority: i32,
    enabled: bool,
    guard: Option<GuardFn>,
}

impl RuleBuilder {
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn guard<F, Fut>(mut self, guard: F) -> Self
    where
        F: Fn(RuleContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<bool>> + Send + 'static,
    {
        self.guard = Some(Arc::new(move |ctx| Box::pin(guard(ctx))));
        self
    }

    /// Finish with the action body.
    pub fn action<F, Fut>(self, action: F) -> Rule
    where
        F: Fn(RuleContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        Rule {
            id: self.id,
            trigger: self.trigger,
            priority: self.priority,
            enabled: self.enabled,
            guard: self.guard,
            action: Arc::new(move |ctx| Box::pin(action(ctx))),
        }
    }
}

/// Everything a guard or action can reach
#[derive(Clone)]
pub struct RuleContext {
    pub event: VaultEvent,
    /// The file record behind the event, when the event names one that the
    /// cache knows
    pub file: Option<FileRecord>,
    pub cache: Arc<ShadowCache>,
    pub llm: Arc<LlmClient>,
    pub workflows: Arc<WorkflowEngine>,
    pub activity: Arc<ActivityLogger>,
    pub vault_root: PathBuf,
    pub metadata: Value,
}

/// Moving statistics per rule, updated as executions complete
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RuleStats {
    pub successes: u64,
    pub failures: u64,
    pub skips: u64,
    pub last_run: Option<DateTime<Utc>>,
    /// Exponential moving average over completed (non-skip) durations
    pub avg_duration_ms: f64,
}

impl RuleStats {
    const ALPHA: f64 = 0.2;

    pub fn record_success(&mut self, duration_ms: u64) {
        self.successes += 1;
        self.observe_duration(duration_ms);
    }

    pub fn record_failure(&mut self, duration_ms: u64) {
        self.failures += 1;
        self.observe_duration(duration_ms);
    }

    pub fn record_skip(&mut self) {
        self.skips += 1;
        self.last_run = Some(Utc::now());
    }

    fn observe_duration(&mut self, duration_ms: u64) {
        let sample = duration_ms as f64;
        self.avg_duration_ms = if self.successes + self.failures <= 1 {
            sample
        } else {
            Self::ALPHA * sample + (1.0 - Self::ALPHA) * self.avg_duration_ms
        };
        self.last_run = Some(Utc::now());
    }

    pub fn total(&self) -> u64 {
        self.successes + self.failures + self.skips
    }
}

/// What one event's dispatch produced
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExecutionSummary {
    pub matched: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
}
