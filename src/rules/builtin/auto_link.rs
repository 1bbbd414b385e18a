//! Auto-link: turn plain mentions of other notes' titles into wikilinks.
//!
//! Candidate titles come from the cache. A mention qualifies when it is an
//! exact, word-bounded, case-insensitive match of a title long enough to be
//! unambiguous; the first qualifying mention per title gains the link. The
//! rewrite is idempotent because a linked mention sits inside `[[...]]` and
//! no longer matches as plain text.

use regex::Regex;

use crate::error::{Result, WeaverError};
use crate::event::EventKind;
use crate::parser;
use crate::rules::types::{Rule, RuleContext};

use super::event_is_markdown;

/// Titles shorter than this are too ambiguous to link ("a", "TODO").
const MIN_TITLE_LEN: usize = 4;

pub fn rules() -> Vec<Rule> {
    [EventKind::FileAdd, EventKind::FileChange]
        .into_iter()
        .map(|kind| {
            let suffix = match kind {
                EventKind::FileAdd => "add",
                _ => "change",
            };
            Rule::builder(format!("auto-link:{suffix}"), kind)
                .priority(5)
                .guard(|ctx| async move { Ok(event_is_markdown(ctx.event.path.as_deref())) })
                .action(link_mentions)
        })
        .collect()
}

async fn link_mentions(ctx: RuleContext) -> Result<()> {
    let rel = ctx
        .event
        .path
        .clone()
        .ok_or_else(|| WeaverError::validation("file event without a path"))?;
    let abs = ctx.vault_root.join(&rel);
    if !abs.exists() {
        return Ok(());
    }

    let content = tokio::fs::read_to_string(&abs).await?;
    let titles = ctx.cache.all_titles()?;

    let rewritten = insert_links(&content, &rel, &titles);
    if rewritten != content {
        tokio::fs::write(&abs, &rewritten).await?;
        ctx.cache.sync_path(&rel)?;
        tracing::debug!(path = %rel, "auto-link inserted wikilinks");
    }
    Ok(())
}

/// Pure rewrite: link the first plain mention of each other file's title.
fn insert_links(content: &str, own_path: &str, titles: &[(String, String)]) -> String {
    let (frontmatter, body_start) = body_offset(content);
    let mut body = content[body_start..].to_string();

    for (path, title) in titles {
        if path == own_path || title.len() < MIN_TITLE_LEN {
            continue;
        }
        let target = parser::normalize_target(path);
        if target.is_empty() {
            continue;
        }
        // Already referenced anywhere: leave the note alone for this target.
        if body.contains(&format!("[[{}", target)) || body.contains(&format!("[[{}", title)) {
            continue;
        }

        let Ok(pattern) = Regex::new(&format!(r"(?i)\b{}\b", regex::escape(title))) else {
            continue;
        };
        let Some(found) = pattern
            .find_iter(&body)
            .find(|m| is_plain_position(&body, m.start(), m.end()))
        else {
            continue;
        };

        let mention = &body[found.start()..found.end()];
        let link = format!("[[{}|{}]]", target, mention);
        body.replace_range(found.start()..found.end(), &link);
    }

    format!("{}{}", frontmatter, body)
}

/// Split off the frontmatter block so link insertion never touches it.
fn body_offset(content: &str) -> (&str, usize) {
    let (fm, body) = parser::split_frontmatter(content);
    match fm {
        Some(_) => {
            let offset = content.len() - body.len();
            (&content[..offset], offset)
        }
        None => ("", 0),
    }
}

/// A mention is plain when it is not already inside a wikilink and not in
/// code.
fn is_plain_position(body: &str, start: usize, end: usize) -> bool {
    let before = &body[..start];
    // Inside [[...]] when an opening fence is unclosed behind us.
    if before.rfind("[[").is_some_and(|open| {
        before[open..].find("]]").is_none()
    }) {
        return false;
    }
    // Markdown link label: immediately followed by "](".
    if body[end..].starts_with("](") {
        return false;
    }
    // Code fence parity: an odd number of fences before us means inside.
    let fences = before.matches("```").count();
    if fences % 2 == 1 {
        return false;
    }
    // Inline code span on the same line.
    let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
    let backticks = before[line_start..].matches('`').count();
    backticks % 2 == 0
}
