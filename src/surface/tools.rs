//! Builtin tool catalog
//!
//! Read tools are thin adapters over the shadow cache; workflow tools
//! drive the engine. Read tools return `success: true` with empty data
//! when nothing matches; only bad input is an error.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::cache::{normalize_rel_path, FileQuery, LinkDirection, LinkQuery, ShadowCache};
use crate::error::{Result, WeaverError};
use crate::llm::LlmClient;
use crate::parser::LinkKind;
use crate::resilience::CircuitState;
use crate::workflow::{HistoryQuery, WorkflowEngine};

use super::registry::{ToolHandler, ToolRegistry};
use super::types::{ParamSpec, ToolSchema};

/// Register every stock tool.
pub fn register_builtin_tools(
    registry: &ToolRegistry,
    cache: Arc<ShadowCache>,
    workflows: Arc<WorkflowEngine>,
    llm: Arc<LlmClient>,
    vault_root: PathBuf,
) {
    registry.register(Arc::new(QueryFilesTool::new(Arc::clone(&cache))));
    registry.register(Arc::new(GetFileTool::new(Arc::clone(&cache))));
    registry.register(Arc::new(GetFileContentTool::new(vault_root)));
    registry.register(Arc::new(SearchTagsTool::new(Arc::clone(&cache))));
    registry.register(Arc::new(SearchLinksTool::new(Arc::clone(&cache))));
    registry.register(Arc::new(GetStatsTool::new(Arc::clone(&cache))));
    registry.register(Arc::new(TriggerWorkflowTool::new(Arc::clone(&workflows))));
    registry.register(Arc::new(ListWorkflowsTool::new(Arc::clone(&workflows))));
    registry.register(Arc::new(GetWorkflowStatusTool::new(Arc::clone(&workflows))));
    registry.register(Arc::new(GetWorkflowHistoryTool::new(Arc::clone(&workflows))));
    registry.register(Arc::new(HealthCheckTool::new(cache, workflows, llm)));
}

fn opt_str(params: &Value, key: &str) -> Option<String> {
    params[key].as_str().map(str::to_string)
}

fn opt_usize(params: &Value, key: &str) -> Option<usize> {
    params[key].as_i64().map(|n| n.max(0) as usize)
}

// ═══════════════════════════════════════════════════════════════
// Shadow-cache reads
// ═══════════════════════════════════════════════════════════════

pub struct QueryFilesTool {
    cache: Arc<ShadowCache>,
    schema: ToolSchema,
}

impl QueryFilesTool {
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self {
            cache,
            schema: ToolSchema::new("query_files", "List indexed files with AND-combined filters")
                .cacheable()
                .param(ParamSpec::string("directory"))
                .param(ParamSpec::string("type"))
                .param(ParamSpec::string("status"))
                .param(ParamSpec::string("tag"))
                .param(ParamSpec::integer("limit").range(1, 500))
                .param(ParamSpec::integer("offset").range(0, i64::MAX)),
        }
    }
}

#[async_trait]
impl ToolHandler for QueryFilesTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let query = FileQuery {
            directory: opt_str(&params, "directory"),
            file_type: opt_str(&params, "type"),
            status: opt_str(&params, "status"),
            tag: opt_str(&params, "tag"),
            limit: opt_usize(&params, "limit"),
            offset: opt_usize(&params, "offset"),
        };
        let page = self.cache.query_files(&query)?;
        Ok(serde_json::to_value(page)?)
    }
}

pub struct GetFileTool {
    cache: Arc<ShadowCache>,
    schema: ToolSchema,
}

impl GetFileTool {
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self {
            cache,
            schema: ToolSchema::new("get_file", "Fetch one file record by vault-relative path")
                .cacheable()
                .param(ParamSpec::string("path").required()),
        }
    }
}

#[async_trait]
impl ToolHandler for GetFileTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let path = params["path"].as_str().unwrap_or_default();
        match self.cache.get_file(path)? {
            Some(record) => Ok(serde_json::to_value(record)?),
            None => Ok(Value::Null),
        }
    }
}

pub struct GetFileContentTool {
    vault_root: PathBuf,
    schema: ToolSchema,
}

impl GetFileContentTool {
    pub fn new(vault_root: PathBuf) -> Self {
        Self {
            vault_root,
            schema: ToolSchema::new("get_file_content", "Read a vault file's raw text")
                .cacheable()
                .param(ParamSpec::string("path").required()),
        }
    }
}

#[async_trait]
impl ToolHandler for GetFileContentTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let rel = normalize_rel_path(params["path"].as_str().unwrap_or_default())?;
        let abs = self.vault_root.join(&rel);
        match tokio::fs::read_to_string(&abs).await {
            Ok(content) => Ok(json!({ "path": rel, "content": content })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Value::Null),
            Err(e) => Err(e.into()),
        }
    }
}

pub struct SearchTagsTool {
    cache: Arc<ShadowCache>,
    schema: ToolSchema,
}

impl SearchTagsTool {
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self {
            cache,
            schema: ToolSchema::new("search_tags", "Search tags with * and ? wildcards")
                .cacheable()
                .param(ParamSpec::string("pattern").required())
                .param(ParamSpec::integer("limit").range(1, 500)),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchTagsTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let pattern = params["pattern"].as_str().unwrap_or_default();
        let limit = opt_usize(&params, "limit").unwrap_or(50);
        let matches = self.cache.search_tags(pattern, limit)?;
        Ok(serde_json::to_value(matches)?)
    }
}

pub struct SearchLinksTool {
    cache: Arc<ShadowCache>,
    schema: ToolSchema,
}

impl SearchLinksTool {
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self {
            cache,
            schema: ToolSchema::new("search_links", "Query the link graph")
                .cacheable()
                .param(ParamSpec::string("source"))
                .param(ParamSpec::string("target"))
                .param(
                    ParamSpec::string("direction").one_of(&["outgoing", "incoming", "both"]),
                )
                .param(ParamSpec::string("kind").one_of(&["wikilink", "markdown-link"]))
                .param(ParamSpec::integer("limit").range(1, 500)),
        }
    }
}

#[async_trait]
impl ToolHandler for SearchLinksTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let direction = match params["direction"].as_str() {
            Some("outgoing") => LinkDirection::Outgoing,
            Some("incoming") => LinkDirection::Incoming,
            _ => LinkDirection::Both,
        };
        let query = LinkQuery {
            source: opt_str(&params, "source"),
            target: opt_str(&params, "target"),
            direction,
            kind: params["kind"].as_str().and_then(LinkKind::from_str),
            limit: opt_usize(&params, "limit"),
        };
        let links = self.cache.search_links(&query)?;
        Ok(serde_json::to_value(links)?)
    }
}

pub struct GetStatsTool {
    cache: Arc<ShadowCache>,
    schema: ToolSchema,
}

impl GetStatsTool {
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self {
            cache,
            schema: ToolSchema::new("get_stats", "Aggregate vault statistics").cacheable(),
        }
    }
}

#[async_trait]
impl ToolHandler for GetStatsTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, _params: Value) -> Result<Value> {
        Ok(serde_json::to_value(self.cache.get_stats()?)?)
    }
}

// ═══════════════════════════════════════════════════════════════
// Workflow tools
// ═══════════════════════════════════════════════════════════════

pub struct TriggerWorkflowTool {
    workflows: Arc<WorkflowEngine>,
    schema: ToolSchema,
}

impl TriggerWorkflowTool {
    pub fn new(workflows: Arc<WorkflowEngine>) -> Self {
        Self {
            workflows,
            schema: ToolSchema::new(
                "trigger_workflow",
                "Start a workflow; sync mode awaits the output",
            )
            .param(ParamSpec::string("workflow_id").required())
            .param(ParamSpec::object("params"))
            .param(ParamSpec::boolean("sync")),
        }
    }
}

#[async_trait]
impl ToolHandler for TriggerWorkflowTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let workflow_id = params["workflow_id"].as_str().unwrap_or_default();
        let input = params.get("params").cloned().unwrap_or(Value::Null);
        let sync = params["sync"].as_bool().unwrap_or(false);

        let run_id = self.workflows.start(workflow_id, input)?;
        if !sync {
            return Ok(json!({ "run_id": run_id, "status": "started" }));
        }
        let output = self.workflows.return_value(&run_id).await?;
        Ok(json!({ "run_id": run_id, "status": "completed", "output": output }))
    }
}

pub struct ListWorkflowsTool {
    workflows: Arc<WorkflowEngine>,
    schema: ToolSchema,
}

impl ListWorkflowsTool {
    pub fn new(workflows: Arc<WorkflowEngine>) -> Self {
        Self {
            workflows,
            schema: ToolSchema::new("list_workflows", "Registered workflow definitions")
                .param(ParamSpec::boolean("enabled")),
        }
    }
}

#[async_trait]
impl ToolHandler for ListWorkflowsTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let enabled = params["enabled"].as_bool();
        Ok(serde_json::to_value(self.workflows.list(enabled))?)
    }
}

pub struct GetWorkflowStatusTool {
    workflows: Arc<WorkflowEngine>,
    schema: ToolSchema,
}

impl GetWorkflowStatusTool {
    pub fn new(workflows: Arc<WorkflowEngine>) -> Self {
        Self {
            workflows,
            schema: ToolSchema::new("get_workflow_status", "State record of one run")
                .param(ParamSpec::string("run_id").required()),
        }
    }
}

#[async_trait]
impl ToolHandler for GetWorkflowStatusTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let run_id = params["run_id"].as_str().unwrap_or_default();
        match self.workflows.status(run_id) {
            Ok(record) => Ok(serde_json::to_value(record)?),
            Err(WeaverError::NotFound { .. }) => Ok(Value::Null),
            Err(e) => Err(e),
        }
    }
}

pub struct GetWorkflowHistoryTool {
    workflows: Arc<WorkflowEngine>,
    schema: ToolSchema,
}

impl GetWorkflowHistoryTool {
    pub fn new(workflows: Arc<WorkflowEngine>) -> Self {
        Self {
            workflows,
            schema: ToolSchema::new("get_workflow_history", "Past runs, newest first")
                .param(ParamSpec::string("workflow_id"))
                .param(ParamSpec::integer("limit").range(1, 500))
                .param(ParamSpec::integer("offset").range(0, i64::MAX)),
        }
    }
}

#[async_trait]
impl ToolHandler for GetWorkflowHistoryTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, params: Value) -> Result<Value> {
        let query = HistoryQuery {
            workflow_id: opt_str(&params, "workflow_id"),
            limit: opt_usize(&params, "limit"),
            offset: opt_usize(&params, "offset"),
        };
        Ok(serde_json::to_value(self.workflows.history(&query)?)?)
    }
}

// ═══════════════════════════════════════════════════════════════
// Health
// ═══════════════════════════════════════════════════════════════

pub struct HealthCheckTool {
    cache: Arc<ShadowCache>,
    workflows: Arc<WorkflowEngine>,
    llm: Arc<LlmClient>,
    schema: ToolSchema,
}

impl HealthCheckTool {
    pub fn new(
        cache: Arc<ShadowCache>,
        workflows: Arc<WorkflowEngine>,
        llm: Arc<LlmClient>,
    ) -> Self {
        Self {
            cache,
            workflows,
            llm,
            schema: ToolSchema::new("health_check", "Component readiness"),
        }
    }
}

#[async_trait]
impl ToolHandler for HealthCheckTool {
    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    async fn call(&self, _params: Value) -> Result<Value> {
        let stats = self.cache.get_stats();
        let circuit = self.llm.circuit_state();
        let degraded = stats.is_err() || circuit != CircuitState::Closed;

        Ok(json!({
            "status": if degraded { "degraded" } else { "ok" },
            "components": {
                "cache": match stats {
                    Ok(stats) => json!({ "ready": true, "total_files": stats.total_files }),
                    Err(e) => json!({ "ready": false, "error": e.envelope_message() }),
                },
                "workflows": {
                    "ready": true,
                    "registered": self.workflows.list(None).len(),
                    "active_runs": self.workflows.active_runs(),
                },
                "llm": {
                    "ready": circuit == CircuitState::Closed,
                    "circuit": format!("{:?}", circuit).to_lowercase(),
                },
            },
        }))
    }
}
