//! Meeting-note: extract action items from meeting notes via the LLM,
//! create one task file per item, and wikilink them from the source.
//!
//! Runs as the `meeting-note` workflow so half-created task sets heal on
//! replay instead of duplicating (task creation checks for existing files).

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

pub const MEETING_NOTE_WORKFLOW: &str = "meeting-note";

pub fn workflow(
    cache: Arc<ShadowCache>,
    llm: Arc<LlmClient>,
    activity: Arc<ActivityLogger>,
    vault_root: PathBuf,
    tasks_dir: String,
    content_budget: usize,
) -> WorkflowDefinition {
    WorkflowDefinition::builder(MEETING_NOTE_WORKFLOW)
        .on(EventKind::FileChange)
        .step("read")
        .step("extract")
        .step("create")
        .config(json!({ "tasks_dir": tasks_dir }))
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
    let rel = ctx.input["path"]
        .as_str()
        .ok_or_else(|| WeaverError::validation("meeting-note input requires a 'path' string"))
        .and_then(normalize_rel_path)?;
    let abs = vault_root.join(&rel);
    let tasks_dir = ctx.config["tasks_dir"].as_str().unwrap_or("tasks").to_string();

    let content = ctx
        .step_with_input("read", json!({ "path": rel }), || async {
            let text = tokio::fs::read_to_string(&abs).await?;
            Ok(Value::String(text))
        })
        .await?;
    let content = content.as_str().unwrap_or_default().to_string();

    let items = ctx
        .step("extract", || {
            let prompt = extraction_prompt(&content, content_budget);
            let llm = Arc::clone(&llm);
            let activity = Arc::clone(&activity);
            let cancel = ctx.cancellation_token();
            async move {
                let reply = llm
                    .send_with_cancel(
                        LlmRequest::list(prompt.clone()).with_label("Meeting-note"),
                        &cancel,
                    )
                    .await?;
                activity.llm_interaction(
                    &reply.model,
                    "Meeting-note",
                    &prompt,
                    &reply.raw,
                    reply.duration_ms,
                );
                let items = reply.payload.as_list().unwrap_or_default();
                Ok(json!(items))
            }
        })
        .await?;
    let items: Vec<String> = serde_json::from_value(items)?;

    let created = ctx
        .step("create", || {
            let cache = Arc::clone(&cache);
            let rel = rel.clone();
            let abs = abs.clone();
            let items = items.clone();
            let tasks_dir = tasks_dir.clone();
            let vault_root = vault_root.clone();
            async move {
                create_tasks(&cache, &vault_root, &abs, &rel, &tasks_dir, &items).await
            }
        })
        .await?;

    Ok(json!({ "path": rel, "tasks": created }))
}

/// One task file per action item, then a links section on the source.
/// Skips files that already exist, so a replay never duplicates.
async fn create_tasks(
    cache: &ShadowCache,
    vault_root: &std::path::Path,
    source_abs: &std::path::Path,
    source_rel: &str,
    tasks_dir: &str,
    items: &[String],
) -> Result<Value> {
    let source_target = parser::normalize_target(source_rel);
    let mut created = Vec::new();
    let mut links = Vec::new();

    for item in items {
        let slug = slugify(item);
        if slug.is_empty() {
            continue;
        }
        let task_rel = format!("{}/{}.md", tasks_dir, slug);
        let task_abs = vault_root.join(&task_rel);
        links.push(format!(
            "- [[{}|{}]]",
            parser::normalize_target(&task_rel),
            item
        ));

        if task_abs.exists() {
            continue;
        }
        if let Some(parent) = task_abs.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = format!(
            "---\ntype: task\nstatus: open\n---\n\n# {}\n\nFrom [[{}]].\n",
            item, source_target
        );
        tokio::fs::write(&task_abs, body).await?;
        cache.sync_path(&task_rel)?;
        created.push(task_rel);
    }

    if !links.is_empty() {
        let current = tokio::fs::read_to_string(source_abs).await?;
        if !current.contains("## Action items") {
            let appended = format!("{}\n## Action items\n\n{}\n", current, links.join("\n"));
            tokio::fs::write(source_abs, appended).await?;
            cache.sync_path(source_rel)?;
        }
    }

    Ok(json!(created))
}

pub fn rule(meeting_dir: String) -> Rule {
    let prefix = format!("{}/", meeting_dir.trim_end_matches('/'));
    Rule::builder("meeting-note", EventKind::FileChange)
        .priority(8)
        .guard(move |ctx| {
            let prefix = prefix.clone();
            async move {
                Ok(ctx
                    .event
                    .path
                    .as_deref()
                    .is_some_and(|p| p.starts_with(&prefix) && p.ends_with(".md")))
            }
        })
        .action(trigger_meeting_note)
}

async fn trigger_meeting_note(ctx: RuleContext) -> Result<()> {
    let path = ctx
        .event
        .path
        .clone()
        .ok_or_else(|| WeaverError::validation("file event without a path"))?;
    let input = json!({ "path": path });
    let params = json!({ "workflow_id": MEETING_NOTE_WORKFLOW, "params": input, "sync": true });

    let started = Instant::now();
    let run_id = ctx.workflows.start(MEETING_NOTE_WORKFLOW, input)?;
    ctx.activity
        .workflow_event(&run_id, MEETING_NOTE_WORKFLOW, "started");
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
                .workflow_event(&run_id, MEETING_NOTE_WORKFLOW, "completed");
            Ok(())
        }
        Err(e) => {
            ctx.activity
                .tool_call("trigger_workflow", &params, e.to_string(), duration_ms, false);
            ctx.activity
                .workflow_event(&run_id, MEETING_NOTE_WORKFLOW, "failed");
            Err(e)
        }
    }
}

fn extraction_prompt(content: &str, budget: usize) -> String {
    let mut end = content.len().min(budget);
    while end > 0 && !content.is_char_boundary(end) {
        end -= 1;
    }
    format!(
        "Extract the action items from this meeting note. Reply with a JSON \
         array of short imperative strings and nothing else.\n\n{}",
        &content[..end]
    )
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut last_was_hyphen = true;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_hyphen = false;
        } else if !last_was_hyphen {
            slug.push('-');
            last_was_hyphen = true;
        }
        if slug.len() >= 60 {
            break;
        }
    }
    slug.trim_matches('-').to_string()
}
