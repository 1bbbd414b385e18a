//! Shadow cache
//!
//! The durable, queryable projection of the vault: one SQLite file holding
//! file records, tag relations, the link graph, and a full-text index.
//! Everything else in the crate reads the vault through this module.
//!
//! Concurrency: a single write connection serializes all mutations; a
//! separate read connection proceeds under WAL without blocking the writer.
//! Derived rows (tags, links, FTS) are replaced in the same transaction as
//! their parent file row, so no cross-table invariant is ever observable in
//! a broken state.

mod query;
mod schema;
mod store;
mod types;

pub use store::ShadowCache;
pub use query::MAX_PAGE_SIZE;
pub use types::{
    ContentMatch, FilePage, FileQuery, FileRecord, LinkDirection, LinkQuery, LinkRecord,
    SyncOutcome, SyncReport, TagCount, TagMatch, VaultStats,
};

/// Content hash used for change detection: xxh3-64, fixed-width hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:016x}", xxhash_rust::xxh3::xxh3_64(bytes))
}

/// Normalize a vault-relative path to its canonical identity: forward
/// slashes, no leading `./`. Rejects absolute paths and traversal outside
/// the vault root.
pub fn normalize_rel_path(raw: &str) -> crate::error::Result<String> {
    let mut path = raw.replace('\\', "/");
    while let Some(stripped) = path.strip_prefix("./") {
        path = stripped.to_string();
    }
    if path.is_empty() {
        return Err(crate::error::WeaverError::validation("path is empty"));
    }
    if path.starts_with('/') || path.contains(':') {
        return Err(crate::error::WeaverError::validation(format!(
            "path must be vault-relative: '{}'",
            raw
        )));
    }
    for component in path.split('/') {
        if component == ".." {
            return Err(crate::error::WeaverError::validation(format!(
                "path escapes the vault root: '{}'",
                raw
            )));
        }
    }
    Ok(path)
}
