//! Markdown note parser
//!
//! Pure extraction of the structures Weaver indexes: frontmatter, tags,
//! links, checkbox tasks, a derived title, and a plain-text projection for
//! keyword search. Operates on file text, never touches the filesystem,
//! never fails: malformed frontmatter degrades to an empty mapping plus a
//! warning on the result.

mod frontmatter;
mod inline;

pub use frontmatter::{render_frontmatter, replace_frontmatter, split_frontmatter};
pub use inline::{normalize_tag, normalize_target};

use serde_json::{Map, Value};

/// Link flavor found in note text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkKind {
    /// `[[target]]` or `[[target|alias]]`
    Wiki,
    /// `[label](relative/path.md)`
    Markdown,
}

impl LinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wiki => "wikilink",
            Self::Markdown => "markdown-link",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "wikilink" => Some(Self::Wiki),
            "markdown-link" => Some(Self::Markdown),
            _ => None,
        }
    }
}

/// One outgoing link extracted from a note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLink {
    /// Vault-relative target, normalized (forward slashes, no `.md`)
    pub target: String,
    /// Display alias, when the link carries one
    pub alias: Option<String>,
    pub kind: LinkKind,
}

/// One checkbox task line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskItem {
    pub text: String,
    pub done: bool,
}

/// Everything the parser extracts from one note
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedNote {
    /// Frontmatter mapped to JSON values; empty when absent or malformed
    pub frontmatter: Map<String, Value>,
    /// Normalized, deduplicated tags (frontmatter `tags` + inline `#tag`)
    pub tags: Vec<String>,
    /// Outgoing links in document order
    pub links: Vec<ParsedLink>,
    /// Checkbox tasks in document order
    pub tasks: Vec<TaskItem>,
    /// Frontmatter `title`, else first `# ` heading
    pub title: Option<String>,
    /// Body with frontmatter, fenced code, and inline code removed
    pub plain_text: String,
    /// Soft-error notes (malformed frontmatter and the like)
    pub warnings: Vec<String>,
}

/// Parse a note. Pure and deterministic; never errors.
pub fn parse(source: &str) -> ParsedNote {
    let mut note = ParsedNote::default();

    let (frontmatter_src, body) = split_frontmatter(source);

    if let Some(fm) = frontmatter_src {
        match frontmatter::parse_frontmatter(fm) {
            Ok(map) => note.frontmatter = map,
            Err(reason) => note
                .warnings
                .push(format!("malformed frontmatter: {}", reason)),
        }
    }

    // Tags: frontmatter first (order preserved), then inline occurrences.
    let mut tags: Tags = frontmatter::frontmatter_tags(&note.frontmatter)
        .into_iter()
        .collect();

    let stripped = inline::strip_code(body);
    for tag in inline::inline_tags(&stripped) {
        tags.push(tag);
    }
    tags.dedup_keep_first();
    note.tags = tags.0;

    note.links = inline::extract_links(&stripped);
    note.tasks = inline::extract_tasks(body);

    note.title = note
        .frontmatter
        .get("title")
        .and_then(Value::as_str)
        .map(str::to_string)
        .or_else(|| inline::first_heading(body));

    note.plain_text = stripped;
    note
}

/// Ordered, case-insensitive dedup helper for tag accumulation.
struct Tags(Vec<String>);

impl Tags {
    fn push(&mut self, tag: String) {
        self.0.push(tag);
    }

    fn dedup_keep_first(&mut self) {
        let mut seen = std::collections::HashSet::new();
        self.0.retain(|t| seen.insert(t.clone()));
    }
}

impl FromIterator<String> for Tags {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Tags(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn full_note_extraction() {
        let source = "---\ntitle: Caching Notes\ntags: [Systems, LRU Cache]\nstatus: draft\n---\n\n# Heading\n\nAbout #eviction policies, see [[concepts/caching|caching]] and [details](notes/details.md).\n\n- [ ] write benchmarks\n- [x] read the paper\n";
        let note = parse(source);

        assert_eq!(note.title.as_deref(), Some("Caching Notes"));
        assert_eq!(note.frontmatter.get("status"), Some(&json!("draft")));
        assert_eq!(
            note.tags,
            vec!["systems", "lru-cache", "eviction"],
            "frontmatter order preserved, inline appended"
        );
        assert_eq!(
            note.links,
            vec![
                ParsedLink {
                    target: "concepts/caching".into(),
                    alias: Some("caching".into()),
                    kind: LinkKind::Wiki,
                },
                ParsedLink {
                    target: "notes/details".into(),
                    alias: Some("details".into()),
                    kind: LinkKind::Markdown,
                },
            ]
        );
        assert_eq!(note.tasks.len(), 2);
        assert!(!note.tasks[0].done);
        assert!(note.tasks[1].done);
        assert!(note.warnings.is_empty());
    }

    #[test]
    fn no_frontmatter_is_fine() {
        let note = parse("# Just a heading\n\nBody with #one-tag.\n");
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.title.as_deref(), Some("Just a heading"));
        assert_eq!(note.tags, vec!["one-tag"]);
        assert!(note.warnings.is_empty());
    }

    #[test]
    fn malformed_frontmatter_soft_errors() {
        let note = parse("---\ntags: [unclosed\n---\nbody\n");
        assert!(note.frontmatter.is_empty());
        assert_eq!(note.warnings.len(), 1);
        assert!(note.warnings[0].contains("malformed frontmatter"));
    }

    #[test]
    fn comma_string_tags() {
        let note = parse("---\ntags: Alpha, Beta Gamma , alpha\n---\n");
        assert_eq!(note.tags, vec!["alpha", "beta-gamma"]);
    }

    #[test]
    fn tags_inside_code_are_ignored() {
        let source = "Real #tag here.\n\n```rust\nlet x = \"#not-a-tag\";\n```\n\nAnd `#also-not` inline.\n";
        let note = parse(source);
        assert_eq!(note.tags, vec!["tag"]);
    }

    #[test]
    fn dedup_is_case_insensitive_via_normalization() {
        let note = parse("---\ntags: [Cache]\n---\n#cache and #CACHE again\n");
        assert_eq!(note.tags, vec!["cache"]);
    }

    #[test]
    fn external_markdown_links_excluded() {
        let note = parse("[site](https://example.com/page.md) [abs](/etc/x.md) [ok](a/b.md)\n");
        assert_eq!(note.links.len(), 1);
        assert_eq!(note.links[0].target, "a/b");
    }

    #[test]
    fn parse_is_deterministic() {
        let source = "---\ntags: [a, b]\n---\n#c [[x]] [[y|Y]]\n";
        assert_eq!(parse(source), parse(source));
    }

    #[test]
    fn empty_source() {
        let note = parse("");
        assert!(note.tags.is_empty());
        assert!(note.links.is_empty());
        assert!(note.title.is_none());
    }
}
