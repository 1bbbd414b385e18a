//! Inline extraction: tags, links, tasks, headings
//!
//! Regexes are precompiled once. All scanners run over a code-stripped
//! projection of the body so `#word` inside fenced blocks or inline spans
//! never counts.

use once_cell::sync::Lazy;
use regex::Regex;

use super::{LinkKind, ParsedLink, TaskItem};

/// `#tag` at a word boundary. First char alphabetic or `_`, rest may include
/// digits, `/`, `-`, `_`.
static INLINE_TAG: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:^|[^\w&#])#([A-Za-z_][\w/-]*)").expect("inline tag regex"));

/// `[[target]]` or `[[target|alias]]`
static WIKILINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("wikilink regex"));

/// `[label](target)` with a parenthesized, whitespace-free target
static MARKDOWN_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]*)\]\(([^()\s]+)\)").expect("markdown link regex"));

/// `- [ ] text` / `- [x] text` (also `*` bullets)
static TASK_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*[-*]\s+\[([ xX])\]\s+(.+?)\s*$").expect("task regex"));

/// Inline code span
static CODE_SPAN: Lazy<Regex> = Lazy::new(|| Regex::new(r"`[^`\n]*`").expect("code span regex"));

/// Remove fenced code blocks and inline code spans.
///
/// Fences toggle on lines whose trimmed start is ``` or ~~~; the fence lines
/// themselves are dropped too. Line structure outside code is preserved so
/// task and heading scans keep working on the original body instead.
pub fn strip_code(body: &str) -> String {
    let mut out = String::with_capacity(body.len());
    let mut in_fence = false;
    let mut fence_char = '`';

    for line in body.lines() {
        let trimmed = line.trim_start();
        let is_fence = trimmed.starts_with("```") || trimmed.starts_with("~~~");
        if is_fence {
            let this_char = trimmed.chars().next().unwrap_or('`');
            if !in_fence {
                in_fence = true;
                fence_char = this_char;
            } else if this_char == fence_char {
                in_fence = false;
            }
            continue;
        }
        if in_fence {
            continue;
        }
        out.push_str(&CODE_SPAN.replace_all(line, ""));
        out.push('\n');
    }
    out
}

/// Normalize a raw tag: strip a leading `#`, lowercase, collapse whitespace
/// and underscores to single hyphens. Returns `None` for empty results.
pub fn normalize_tag(raw: &str) -> Option<String> {
    let raw = raw.trim().trim_start_matches('#').trim();
    if raw.is_empty() {
        return None;
    }
    let mut tag = String::with_capacity(raw.len());
    let mut last_was_hyphen = false;
    for ch in raw.chars() {
        let mapped = if ch.is_whitespace() || ch == '_' { '-' } else { ch };
        if mapped == '-' {
            if last_was_hyphen {
                continue;
            }
            last_was_hyphen = true;
        } else {
            last_was_hyphen = false;
        }
        for lower in mapped.to_lowercase() {
            tag.push(lower);
        }
    }
    let tag = tag.trim_matches('-').to_string();
    if tag.is_empty() {
        None
    } else {
        Some(tag)
    }
}

/// Normalize a link target to vault-relative identity: forward slashes,
/// no leading `./`, no `.md` extension, no fragment.
pub fn normalize_target(raw: &str) -> String {
    let raw = raw.trim();
    let raw = raw.split('#').next().unwrap_or(raw);
    let mut target = raw.replace('\\', "/");
    while let Some(stripped) = target.strip_prefix("./") {
        target = stripped.to_string();
    }
    if let Some(stripped) = target.strip_suffix(".md") {
        target = stripped.to_string();
    }
    target.trim().to_string()
}

/// Inline `#tag` occurrences over code-stripped text, normalized.
pub fn inline_tags(stripped: &str) -> Vec<String> {
    INLINE_TAG
        .captures_iter(stripped)
        .filter_map(|cap| normalize_tag(&cap[1]))
        .collect()
}

/// Wikilinks and relative-`.md` markdown links, in document order.
pub fn extract_links(stripped: &str) -> Vec<ParsedLink> {
    // Collect with byte offsets so the two scans merge back into document
    // order.
    let mut found: Vec<(usize, ParsedLink)> = Vec::new();

    for cap in WIKILINK.captures_iter(stripped) {
        let target = normalize_target(&cap[1]);
        if target.is_empty() {
            continue;
        }
        let alias = cap.get(2).map(|m| m.as_str().trim().to_string());
        let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((
            start,
            ParsedLink {
                target,
                alias,
                kind: LinkKind::Wiki,
            },
        ));
    }

    for cap in MARKDOWN_LINK.captures_iter(stripped) {
        let raw_target = &cap[2];
        if !is_relative_md_target(raw_target) {
            continue;
        }
        let target = normalize_target(raw_target);
        if target.is_empty() {
            continue;
        }
        let label = cap[1].trim();
        let alias = if label.is_empty() {
            None
        } else {
            Some(label.to_string())
        };
        let start = cap.get(0).map(|m| m.start()).unwrap_or(0);
        found.push((
            start,
            ParsedLink {
                target,
                alias,
                kind: LinkKind::Markdown,
            },
        ));
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, link)| link).collect()
}

fn is_relative_md_target(target: &str) -> bool {
    if !target.ends_with(".md") {
        return false;
    }
    if target.contains("://") || target.starts_with('/') {
        return false;
    }
    true
}

/// Checkbox task lines from the raw body.
pub fn extract_tasks(body: &str) -> Vec<TaskItem> {
    TASK_LINE
        .captures_iter(body)
        .map(|cap| TaskItem {
            done: &cap[1] != " ",
            text: cap[2].to_string(),
        })
        .collect()
}

/// First `# ` heading in the body, trimmed.
pub fn first_heading(body: &str) -> Option<String> {
    body.lines().find_map(|line| {
        let trimmed = line.trim_start();
        trimmed
            .strip_prefix("# ")
            .map(|rest| rest.trim().to_string())
            .filter(|t| !t.is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn tag_normalization_rules() {
        assert_eq!(normalize_tag("Tag"), Some("tag".into()));
        assert_eq!(normalize_tag("#Deep Work"), Some("deep-work".into()));
        assert_eq!(normalize_tag("snake_case"), Some("snake-case".into()));
        assert_eq!(normalize_tag("a__b  c"), Some("a-b-c".into()));
        assert_eq!(normalize_tag("-edge-"), Some("edge".into()));
        assert_eq!(normalize_tag("  "), None);
        assert_eq!(normalize_tag("#"), None);
    }

    #[test]
    fn target_normalization_rules() {
        assert_eq!(normalize_target("notes/a.md"), "notes/a");
        assert_eq!(normalize_target("./notes/a"), "notes/a");
        assert_eq!(normalize_target("a\\b.md"), "a/b");
        assert_eq!(normalize_target("page.md#section"), "page");
        assert_eq!(normalize_target(" spaced "), "spaced");
    }

    #[test]
    fn inline_tags_respect_word_boundaries() {
        let tags = inline_tags("#start mid#no (#paren) x&#38; #ok end\n");
        assert_eq!(tags, vec!["start", "paren", "ok"]);
    }

    #[test]
    fn inline_tag_needs_alpha_start() {
        assert!(inline_tags("#123 #1abc\n").is_empty());
        assert_eq!(inline_tags("#a123\n"), vec!["a123"]);
    }

    #[test]
    fn strip_code_removes_fences_and_spans() {
        let body = "keep #a\n```\n#gone\n```\nalso `#gone` keep #b\n~~~\n#gone\n~~~\ntail\n";
        let stripped = strip_code(body);
        assert!(!stripped.contains("gone"));
        assert_eq!(inline_tags(&stripped), vec!["a", "b"]);
    }

    #[test]
    fn nested_fence_chars_do_not_close_each_other() {
        let body = "```\n~~~\nstill code #x\n```\nafter #y\n";
        let stripped = strip_code(body);
        assert_eq!(inline_tags(&stripped), vec!["y"]);
    }

    #[test]
    fn wikilink_variants() {
        let links = extract_links("[[plain]] [[path/to/note.md]] [[t|Alias Text]]\n");
        assert_eq!(links.len(), 3);
        assert_eq!(links[0].target, "plain");
        assert_eq!(links[1].target, "path/to/note");
        assert_eq!(links[2].alias.as_deref(), Some("Alias Text"));
        assert!(links.iter().all(|l| l.kind == LinkKind::Wiki));
    }

    #[test]
    fn markdown_link_must_be_relative_md() {
        let links =
            extract_links("[a](x.md) [b](https://e.com/x.md) [c](/abs.md) [d](img.png)\n");
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].target, "x");
        assert_eq!(links[0].kind, LinkKind::Markdown);
    }

    #[test]
    fn links_in_document_order() {
        let links = extract_links("[md](b.md) then [[a]]\n");
        assert_eq!(links[0].target, "b");
        assert_eq!(links[1].target, "a");
    }

    #[test]
    fn tasks_and_heading() {
        let body = "# Title\n- [ ] open item\n* [X] upper done\n  - [x] nested done\n- not a task\n";
        let tasks = extract_tasks(body);
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].text, "open item");
        assert!(!tasks[0].done);
        assert!(tasks[1].done);
        assert!(tasks[2].done);
        assert_eq!(first_heading(body).as_deref(), Some("Title"));
    }

    #[test]
    fn heading_skips_subheadings() {
        assert_eq!(first_heading("## h2\n# h1\n").as_deref(), Some("h1"));
        assert_eq!(first_heading("no heading\n"), None);
    }
}
