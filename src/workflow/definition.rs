//! Workflow definitions
//!
//! A definition pairs declared metadata (triggers, step names, config) with
//! the handler closure that drives a run. Definitions are registered whole
//! and never mutated in place; re-registering an id bumps the version.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::event::EventKind;

use super::context::WorkflowContext;

/// Handler closure: one invocation drives one run to an output value.
pub type WorkflowHandler =
    Arc<dyn Fn(WorkflowContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// A registered workflow
#[derive(Clone)]
pub struct WorkflowDefinition {
    pub id: String,
    pub triggers: Vec<EventKind>,
    /// Declared step names, in order; documentation for operators and the
    /// admin surface (the handler is free to skip steps conditionally)
    pub steps: Vec<String>,
    pub enabled: bool,
    pub config: Value,
    pub handler: WorkflowHandler,
}

impl WorkflowDefinition {
    pub fn builder(id: impl Into<String>) -> WorkflowDefinitionBuilder {
        WorkflowDefinitionBuilder {
            id: id.into(),
            triggers: Vec::new(),
            steps: Vec::new(),
            enabled: true,
            config: Value::Null,
        }
    }
}

impl std::fmt::Debug for WorkflowDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowDefinition")
            .field("id", &self.id)
            .field("triggers", &self.triggers)
            .field("steps", &self.steps)
            .field("enabled", &self.enabled)
            .finish()
    }
}

pub struct WorkflowDefinitionBuilder {
    id: String,
    triggers: Vec<EventKind>,
    steps: Vec<String>,
    enabled: bool,
    config: Value,
}

impl WorkflowDefinitionBuilder {
    pub fn on(mut self, trigger: EventKind) -> Self {
        self.triggers.push(trigger);
        self
    }

    pub fn step(mut self, name: impl Into<String>) -> Self {
        self.steps.push(name.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Finish with the handler body.
    pub fn build<F, Fut>(self, handler: F) -> WorkflowDefinition
    where
        F: Fn(WorkflowContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value>> + Send + 'static,
    {
        WorkflowDefinition {
            id: self.id,
            triggers: self.triggers,
            steps: self.steps,
            enabled: self.enabled,
            config: self.config,
            handler: Arc::new(move |ctx| Box::pin(handler(ctx))),
        }
    }
}

/// Serializable projection of a definition, persisted under `metadata/`
/// and returned by `list`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowSnapshot {
    pub id: String,
    pub triggers: Vec<EventKind>,
    pub steps: Vec<String>,
    pub enabled: bool,
    pub config: Value,
    pub version: u32,
    pub registered_at: DateTime<Utc>,
}

impl WorkflowSnapshot {
    pub fn of(definition: &WorkflowDefinition, version: u32) -> Self {
        Self {
            id: definition.id.clone(),
            triggers: definition.triggers.clone(),
            steps: definition.steps.clone(),
            enabled: definition.enabled,
            config: definition.config.clone(),
            version,
            registered_at: Utc::now(),
        }
    }
}
