//! Daily note: on a scheduled trigger, create today's note and roll over
//! uncompleted tasks from the previous day.

use chrono::{Duration, NaiveDate, Utc};
use serde_json::json;

use crate::error::{Result, WeaverError};
use crate::event::EventKind;
use crate::parser;
use crate::rules::types::{Rule, RuleContext};

pub fn rule(path_template: String) -> Rule {
    Rule::builder("daily-note", EventKind::Scheduled)
        .priority(20)
        .action(move |ctx| {
            let template = path_template.clone();
            async move { ensure_daily_note(ctx, &template).await }
        })
}

async fn ensure_daily_note(ctx: RuleContext, template: &str) -> Result<()> {
    let today = Utc::now().date_naive();
    let rel = note_path(template, today);
    let abs = ctx.vault_root.join(&rel);
    if abs.exists() {
        return Ok(());
    }

    let yesterday_rel = note_path(template, today - Duration::days(1));
    let rolled = rollover_tasks(&ctx.vault_root.join(&yesterday_rel)).await;

    let mut content = String::new();
    content.push_str(&format!(
        "---\ntype: daily\ndate: {}\n---\n\n# {}\n",
        today.format("%Y-%m-%d"),
        today.format("%Y-%m-%d"),
    ));
    if !rolled.is_empty() {
        content.push_str("\n## Rolled over\n\n");
        for task in &rolled {
            content.push_str(&format!("- [ ] {}\n", task));
        }
    }

    if let Some(parent) = abs.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&abs, content).await?;
    ctx.cache.sync_path(&rel)?;

    tracing::info!(path = %rel, rolled = rolled.len(), "daily note created");
    ctx.activity.record(crate::activity::ActivityRecord::ToolCall {
        name: "daily_note".to_string(),
        params: json!({ "path": rel }),
        result_summary: format!("created with {} rolled-over tasks", rolled.len()),
        duration_ms: 0,
        success: true,
    });
    Ok(())
}

fn note_path(template: &str, date: NaiveDate) -> String {
    date.format(template).to_string()
}

/// Unchecked tasks from the previous day's note, empty when it is absent.
async fn rollover_tasks(abs: &std::path::Path) -> Vec<String> {
    let Ok(content) = tokio::fs::read_to_string(abs).await else {
        return Vec::new();
    };
    parser::parse(&content)
        .tasks
        .into_iter()
        .filter(|t| !t.done)
        .map(|t| t.text)
        .collect()
}

/// The template must produce a vault-relative markdown path.
pub fn validate_template(template: &str) -> Result<()> {
    let sample = note_path(template, NaiveDate::from_ymd_opt(2026, 1, 31).expect("valid date"));
    if !sample.ends_with(".md") || sample.starts_with('/') {
        return Err(WeaverError::Config {
            reason: format!(
                "daily note template must yield a relative .md path, got '{}'",
                sample
            ),
        });
    }
    Ok(())
}
