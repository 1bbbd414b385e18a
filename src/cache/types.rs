//! Shadow cache record and query types

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::parser::LinkKind;

/// One indexed vault file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileRecord {
    /// Vault-relative path, normalized (forward slashes)
    pub path: String,
    /// Size in bytes at last sync
    pub size: u64,
    /// Filesystem modification time at last sync
    pub mtime: DateTime<Utc>,
    /// When the sync last confirmed this file on disk
    pub seen_at: DateTime<Utc>,
    /// Content hash (xxh3, hex)
    pub hash: String,
    /// Parsed frontmatter
    pub frontmatter: Map<String, Value>,
    /// Frontmatter title, first heading, or file stem
    pub title: String,
}

impl FileRecord {
    /// Frontmatter `type` field, when present and scalar.
    pub fn file_type(&self) -> Option<&str> {
        self.frontmatter.get("type").and_then(Value::as_str)
    }

    /// Frontmatter `status` field, when present and scalar.
    pub fn status(&self) -> Option<&str> {
        self.frontmatter.get("status").and_then(Value::as_str)
    }
}

/// Counts from a full vault scan
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncReport {
    pub scanned: usize,
    pub updated: usize,
    pub deleted: usize,
    pub duration_ms: u64,
}

/// Result of a single-path incremental sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// File row and derived rows replaced
    Updated,
    /// Hash matched the record; nothing written except `seen_at`
    Unchanged,
    /// File gone from disk; row and derived rows removed
    Removed,
}

/// Filters for `query_files`; all present filters AND together
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FileQuery {
    /// Prefix directory, vault-relative
    pub directory: Option<String>,
    /// Frontmatter `type`
    pub file_type: Option<String>,
    /// Frontmatter `status`
    pub status: Option<String>,
    /// Normalized tag (joins the tag relation)
    pub tag: Option<String>,
    /// Page size, clamped to 500 (default 100)
    pub limit: Option<usize>,
    /// Page offset
    pub offset: Option<usize>,
}

/// One page of file records
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FilePage {
    pub files: Vec<FileRecord>,
    /// Total matches ignoring pagination
    pub total: usize,
    pub has_more: bool,
}

/// One tag matched by a wildcard search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagMatch {
    pub tag: String,
    pub count: usize,
    /// Paths of files carrying the tag
    pub files: Vec<String>,
}

/// Link graph query direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkDirection {
    Outgoing,
    Incoming,
    Both,
}

impl Default for LinkDirection {
    fn default() -> Self {
        Self::Both
    }
}

/// Filters for `search_links`
#[derive(Debug, Clone, Default)]
pub struct LinkQuery {
    /// Anchor file for outgoing links
    pub source: Option<String>,
    /// Anchor target for incoming links
    pub target: Option<String>,
    pub direction: LinkDirection,
    pub kind: Option<LinkKind>,
    pub limit: Option<usize>,
}

/// One edge of the link graph
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LinkRecord {
    /// Source file path
    pub source: String,
    /// Raw normalized target (no `.md`)
    pub target: String,
    /// Resolved target file path, when the target exists
    pub resolved_path: Option<String>,
    pub kind: String,
    /// True when no file record matches the target
    pub broken: bool,
}

/// Aggregate vault statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VaultStats {
    pub total_files: usize,
    pub total_tags: usize,
    pub total_links: usize,
    /// Most frequent tags, descending, capped at 10
    pub top_tags: Vec<TagCount>,
    pub files_by_type: BTreeMap<String, usize>,
    pub files_by_status: BTreeMap<String, usize>,
    pub vault_size_bytes: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

/// Tag with its usage count
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: usize,
}

/// One full-text search hit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContentMatch {
    pub path: String,
    pub title: String,
    /// Highlighted excerpt around the match
    pub snippet: String,
}
