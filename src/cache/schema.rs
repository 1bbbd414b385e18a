//! Schema definition and versioning
//!
//! One version number persisted in `meta`; a mismatch at open is a
//! `SchemaMismatch` error and the caller must migrate. All statements in
//! this crate bind values through parameters; none are built by string
//! concatenation.

use rusqlite::Connection;

use crate::error::{Result, WeaverError};

/// Bumped on any breaking change to the tables below.
pub const SCHEMA_VERSION: i64 = 1;

const CREATE_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS files (
    id          INTEGER PRIMARY KEY,
    path        TEXT NOT NULL UNIQUE,
    size        INTEGER NOT NULL,
    mtime       INTEGER NOT NULL,
    seen_at     INTEGER NOT NULL,
    hash        TEXT NOT NULL,
    frontmatter TEXT NOT NULL,
    title       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS file_tags (
    file_id INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    tag     TEXT NOT NULL,
    PRIMARY KEY (file_id, tag)
);

CREATE INDEX IF NOT EXISTS idx_file_tags_tag ON file_tags(tag);

CREATE TABLE IF NOT EXISTS links (
    id          INTEGER PRIMARY KEY,
    source_id   INTEGER NOT NULL REFERENCES files(id) ON DELETE CASCADE,
    target_path TEXT NOT NULL,
    kind        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_links_source ON links(source_id);
CREATE INDEX IF NOT EXISTS idx_links_target ON links(target_path);

CREATE VIRTUAL TABLE IF NOT EXISTS files_fts USING fts5(
    path UNINDEXED,
    title,
    body
);
"#;

/// Apply pragmas every connection needs.
pub fn configure_connection(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    Ok(())
}

/// Create tables on first open; verify the persisted version otherwise.
pub fn initialize(conn: &Connection) -> Result<()> {
    conn.execute_batch(CREATE_TABLES)?;

    let existing: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(other),
        })?;

    match existing {
        None => {
            conn.execute(
                "INSERT INTO meta (key, value) VALUES ('schema_version', ?1)",
                [SCHEMA_VERSION.to_string()],
            )?;
            Ok(())
        }
        Some(value) => {
            let found: i64 = value.parse().map_err(|_| {
                WeaverError::database(format!("unreadable schema version '{}'", value))
            })?;
            if found == SCHEMA_VERSION {
                Ok(())
            } else {
                Err(WeaverError::SchemaMismatch {
                    found,
                    expected: SCHEMA_VERSION,
                })
            }
        }
    }
}
