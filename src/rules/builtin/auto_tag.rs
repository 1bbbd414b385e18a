//! Auto-tag: suggest tags for new or changed notes via the LLM and merge
//! them into frontmatter.
//!
//! The rule half is thin: it drives the `auto-tag` workflow synchronously
//! so the tagging survives crashes mid-way (the LLM suggestion is a
//! persisted step and is not re-billed on replay).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde_json::{json, Value};

use crate::activity::ActivityLogger;
use crate::cache::{normalize_rel_path, ShadowCache};
use crate::error::{Result, WeaverError};
use crate::event::EventKind;
use crate::llm::{LlmClient, LlmRequest};
use crate::parser;
use crate::rules::types::{Rule, RuleContext};
use crate::workflow::{WorkflowContext, WorkflowDefinition};

use super::event_is_markdown;

pub const AUTO_TAG_WORKFLOW: &str = "auto-tag";

/// The durable half: read → suggest → write.
pub fn workflow(
    cache: Arc<ShadowCache>,
    llm: Arc<LlmClient>,
    activity: Arc<ActivityLogger>,
    vault_root: PathBuf,
    content_budget: usize,
) -> WorkflowDefinition {
    WorkflowDefinition::builder(AUTO_TAG_WORKFLOW)
        .on(EventKind::FileAdd)
        .on(EventKind::FileChange)
        .step("read")
        .step("suggest")
        .step("write")
        .config(json!({ "content_budget": content_budget }))
        .build(move |ctx| {
            let cache = Arc::clone(&cache);
            let llm = Arc::clone(&llm);
            let activity = Arc::clone(&activity);
            let vault_root = vault_root.clone();
            async move { run(ctx, cache, llm, activity, vault_root, content_budget).await }
        })
}

async fn run(
    ctx: WorkflowContext,
    cache: Arc<ShadowCache>,
    llm: Arc<LlmClient>,
    activity: Arc<ActivityLogger>,
    vault_root: PathBuf,
    content_budget: usize,
) -> Result<Value> {
    let rel = input_path(&ctx.input)?;
    let abs = vault_root.join(&rel);

    let content = ctx
        .step_with_input("read", json!({ "path": rel }), || async {
            let text = tokio::fs::read_to_string(&abs).await?;
            Ok(Value::String(text))
        })
        .await?;
    let content = content.as_str().unwrap_or_default().to_string();

    let suggested = ctx
        .step("suggest", || {
            let prompt = suggestion_prompt(&content, content_budget);
            let llm = Arc::clone(&llm);
            let activity = Arc::clone(&activity);
            let cancel = ctx.cancellation_token();
            async move {
                let reply = llm
                    .send_with_cancel(
                        LlmRequest::list(prompt.clone()).with_label("Auto-tag"),
                        &cancel,
                    )
                    .await?;
                activity.llm_interaction(
                    &reply.model,
                    "Auto-tag",
                    &prompt,
                    &reply.raw,
                    reply.duration_ms,
                );
                let tags = reply.payload.as_list().unwrap_or_default();
                Ok(json!(tags))
            }
        })
        .await?;
    let suggested: Vec<String> = serde_json::from_value(suggested)?;

    let merged = ctx
        .step("write", || {
            let cache = Arc::clone(&cache);
            let rel = rel.clone();
            let abs = abs.clone();
            let suggested = suggested.clone();
            async move {
                // Re-read at write time: the note may have changed since
                // the read step, and the merge must stay idempotent.
                let current = tokio::fs::read_to_string(&abs).await?;
                let note = parser::parse(&current);
                let existing = existing_tags(&note.frontmatter);
                let merged = merge_tags(&existing, &suggested);

                let mut frontmatter = note.frontmatter;
                frontmatter.insert("tags".to_string(), json!(merged));
                let rewritten = parser::replace_frontmatter(&current, &frontmatter);
                tokio::fs::write(&abs, rewritten).await?;
                cache.sync_path(&rel)?;
                Ok(json!(merged))
            }
        })
        .await?;

    Ok(json!({ "path": rel, "tags": merged }))
}

/// Rule half: one instance per trigger kind.
pub fn rules() -> Vec<Rule> {
    [EventKind::FileAdd, EventKind::FileChange]
        .into_iter()
        .map(make_rule)
        .collect()
}

fn make_rule(kind: EventKind) -> Rule {
    let suffix = match kind {
        EventKind::FileAdd => "add",
        _ => "change",
    };
    Rule::builder(format!("auto-tag:{suffix}"), kind)
        .priority(10)
        .guard(|ctx| async move { Ok(event_is_markdown(ctx.event.path.as_deref())) })
        .action(trigger_auto_tag)
}

async fn trigger_auto_tag(ctx: RuleContext) -> Result<()> {
    let path = ctx
        .event
        .path
        .clone()
        .ok_or_else(|| WeaverError::validation("file event without a path"))?;
    let input = json!({ "path": path });
    let params = json!({ "workflow_id": AUTO_TAG_WORKFLOW, "params": input, "sync": true });

    let started = Instant::now();
    let run_id = ctx.workflows.start(AUTO_TAG_WORKFLOW, input)?;
    ctx.activity
        .workflow_event(&run_id, AUTO_TAG_WORKFLOW, "started");

    let result = ctx.workflows.return_value(&run_id).await;
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(output) => {
            ctx.activity.tool_call(
                "trigger_workflow",
                &params,
                output.to_string(),
                duration_ms,
                true,
            );
            ctx.activity
                .workflow_event(&run_id, AUTO_TAG_WORKFLOW, "completed");
            Ok(())
        }
        Err(e) => {
            ctx.activity
                .tool_call("trigger_workflow", &params, e.to_string(), duration_ms, false);
            ctx.activity
                .workflow_event(&run_id, AUTO_TAG_WORKFLOW, "failed");
            Err(e)
        }
    }
}

fn input_path(input: &Value) -> Result<String> {
    let path = input["path"]
        .as_str()
        .ok_or_else(|| WeaverError::validation("auto-tag input requires a 'path' string"))?;
    normalize_rel_path(path)
}

fn suggestion_prompt(content: &str, budget: usize) -> String {
    let mut end = content.len().min(budget);
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "Suggest 3 to 5 topical tags for the following note. Reply with a JSON \
         array of lowercase tag strings and nothing else.\n\n{}",
        &content[..end]
    )
}

/// Frontmatter tags exactly as written (order preserved, no normalization;
/// the file owns its own casing).
fn existing_tags(frontmatter: &serde_json::Map<String, Value>) -> Vec<String> {
    match frontmatter.get("tags") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Existing order preserved, suggestions appended, case-insensitive dedup.
fn merge_tags(existing: &[String], suggested: &[String]) -> Vec<String> {
    let mut merged = Vec::with_capacity(existing.len() + suggested.len());
    let mut seen = std::collections::HashSet::new();
    for tag in existing {
        let key = parser::normalize_tag(tag);
        let Some(key) = key else { continue };
        if seen.insert(key) {
            merged.push(tag.clone());
        }
    }
    for tag in suggested {
        let Some(key) = parser::normalize_tag(tag) else {
            continue;
        };
        if seen.insert(key.clone()) {
            merged.push(key);
        }
    }
    merged
}
