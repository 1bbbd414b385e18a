//! Builtin automations
//!
//! The four stock behaviors shipped with the daemon. Auto-tag and
//! meeting-note do their real work inside durable workflows (LLM calls and
//! multi-file writes want replay); auto-link and the daily note are plain
//! rule actions over the cache and filesystem.

mod auto_link;
mod auto_tag;
mod daily_note;
mod meeting_note;

pub use auto_link::rules as auto_link_rules;
pub use auto_tag::{rules as auto_tag_rules, workflow as auto_tag_workflow, AUTO_TAG_WORKFLOW};
pub use daily_note::rule as daily_note_rule;
pub use meeting_note::{
    rule as meeting_note_rule, workflow as meeting_note_workflow, MEETING_NOTE_WORKFLOW,
};

use std::path::PathBuf;
use std::sync::Arc;

use crate::activity::ActivityLogger;
use crate::cache::ShadowCache;
use crate::error::Result;
use crate::llm::LlmClient;
use crate::workflow::WorkflowEngine;

use super::engine::RuleEngine;

/// Knobs for the stock automations
#[derive(Debug, Clone)]
pub struct BuiltinConfig {
    /// Directory watched by the meeting-note rule
    pub meeting_dir: String,
    /// Directory task files are created in
    pub tasks_dir: String,
    /// chrono format template for the daily note path
    pub daily_template: String,
    /// Byte budget for file content embedded in prompts
    pub content_budget: usize,
}

impl Default for BuiltinConfig {
    fn default() -> Self {
        Self {
            meeting_dir: "meetings".to_string(),
            tasks_dir: "tasks".to_string(),
            daily_template: "journal/%Y-%m-%d.md".to_string(),
            content_budget: 16 * 1024,
        }
    }
}

/// Register the stock workflows and rules.
pub fn register_builtins(
    rules: &RuleEngine,
    workflows: &WorkflowEngine,
    cache: Arc<ShadowCache>,
    llm: Arc<LlmClient>,
    activity: Arc<ActivityLogger>,
    vault_root: PathBuf,
    config: &BuiltinConfig,
) -> Result<()> {
    workflows.register(auto_tag_workflow(
        Arc::clone(&cache),
        Arc::clone(&llm),
        Arc::clone(&activity),
        vault_root.clone(),
        config.content_budget,
    ))?;
    workflows.register(meeting_note_workflow(
        Arc::clone(&cache),
        Arc::clone(&llm),
        Arc::clone(&activity),
        vault_root,
        config.tasks_dir.clone(),
        config.content_budget,
    ))?;

    for rule in auto_tag_rules() {
        rules.register_rule(rule)?;
    }
    for rule in auto_link_rules() {
        rules.register_rule(rule)?;
    }
    daily_note::validate_template(&config.daily_template)?;
    rules.register_rule(daily_note_rule(config.daily_template.clone()))?;
    rules.register_rule(meeting_note_rule(config.meeting_dir.clone()))?;
    Ok(())
}

/// Shared guard condition: the event names a markdown file.
pub(crate) fn event_is_markdown(path: Option<&str>) -> bool {
    path.is_some_and(|p| p.ends_with(".md"))
}
