//! ShadowCache: open, transactions, vault sync
//!
//! A write connection and a read connection to the same WAL database. The
//! writer is the single mutation path; `with_transaction` is the only way
//! to reach it. Sync batches group files into one transaction per chunk to
//! amortize fsync.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, Transaction};
use walkdir::WalkDir;

use crate::error::{Result, WeaverError};
use crate::parser;

use super::types::{SyncOutcome, SyncReport};
use super::{content_hash, normalize_rel_path, schema};

/// Files are grouped into transactions of this size during batch sync.
const SYNC_BATCH: usize = 100;

/// The SQLite-backed index of the vault.
pub struct ShadowCache {
    vault_root: PathBuf,
    writer: Mutex<Connection>,
    pub(super) reader: Mutex<Connection>,
}

/// One markdown file found on disk during a scan
struct DiskEntry {
    rel: String,
    abs: PathBuf,
    size: u64,
    mtime_ms: i64,
}

impl ShadowCache {
    /// Open (or create) the cache database. Fails on schema mismatch.
    pub fn open(db_path: &Path, vault_root: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let writer = Connection::open(db_path)?;
        schema::configure_connection(&writer)?;
        schema::initialize(&writer)?;

        let reader = Connection::open(db_path)?;
        schema::configure_connection(&reader)?;

        Ok(Self {
            vault_root: vault_root.to_path_buf(),
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    pub fn vault_root(&self) -> &Path {
        &self.vault_root
    }

    /// The only write path. The closure runs inside one transaction that
    /// commits on `Ok` and rolls back on `Err`. No user code is ever called
    /// back while the lock is held.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Transaction) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                // Drop rolls the transaction back.
                Err(e)
            }
        }
    }

    // ═══════════════════════════════════════════════════════════════
    // Full sync
    // ═══════════════════════════════════════════════════════════════

    /// Full scan: insert/update changed files, remove tombstoned entries.
    pub fn sync_vault(&self) -> Result<SyncReport> {
        let start = Instant::now();
        let disk = self.scan_disk();
        let known = self.known_files()?;

        let now_ms = Utc::now().timestamp_millis();
        let mut report = SyncReport {
            scanned: disk.len(),
            ..SyncReport::default()
        };

        for chunk in disk.chunks(SYNC_BATCH) {
            let updated = self.with_transaction(|tx| {
                let mut updated = 0usize;
                for entry in chunk {
                    match Self::sync_entry(tx, entry, known.get(&entry.rel), now_ms) {
                        Ok(true) => updated += 1,
                        Ok(false) => {}
                        Err(e) => {
                            // A locked or unreadable file aborts that file
                            // only, never the batch.
                            tracing::warn!(path = %entry.rel, error = %e, "skipping file during sync");
                        }
                    }
                }
                Ok(updated)
            })?;
            report.updated += updated;
        }

        // Tombstones: recorded paths that no longer exist on disk.
        let on_disk: HashSet<&str> = disk.iter().map(|e| e.rel.as_str()).collect();
        let gone: Vec<String> = known
            .keys()
            .filter(|path| !on_disk.contains(path.as_str()))
            .cloned()
            .collect();
        for chunk in gone.chunks(SYNC_BATCH) {
            let deleted = self.with_transaction(|tx| {
                let mut deleted = 0usize;
                for path in chunk {
                    deleted += Self::delete_file(tx, path)?;
                }
                Ok(deleted)
            })?;
            report.deleted += deleted;
        }

        report.duration_ms = start.elapsed().as_millis() as u64;
        tracing::info!(
            scanned = report.scanned,
            updated = report.updated,
            deleted = report.deleted,
            duration_ms = report.duration_ms,
            "vault sync complete"
        );
        Ok(report)
    }

    /// Incremental: reparse one file, or cascade-delete it when gone.
    pub fn sync_path(&self, rel_path: &str) -> Result<SyncOutcome> {
        let rel = normalize_rel_path(rel_path)?;
        let abs = self.vault_root.join(&rel);
        let now_ms = Utc::now().timestamp_millis();

        if !abs.exists() {
            self.with_transaction(|tx| {
                Self::delete_file(tx, &rel)?;
                Ok(())
            })?;
            return Ok(SyncOutcome::Removed);
        }

        let meta = std::fs::metadata(&abs)?;
        let content = std::fs::read_to_string(&abs)?;
        let hash = content_hash(content.as_bytes());
        let existing = self.recorded_hash(&rel)?;

        self.with_transaction(|tx| {
            if existing.as_deref() == Some(hash.as_str()) {
                tx.execute(
                    "UPDATE files SET seen_at = ?1, size = ?2, mtime = ?3 WHERE path = ?4",
                    params![now_ms, meta.len() as i64, system_time_ms(&meta), rel],
                )?;
                Ok(SyncOutcome::Unchanged)
            } else {
                Self::upsert_file(
                    tx,
                    &rel,
                    &content,
                    &hash,
                    meta.len() as i64,
                    system_time_ms(&meta),
                    now_ms,
                )?;
                Ok(SyncOutcome::Updated)
            }
        })
    }

    // ═══════════════════════════════════════════════════════════════
    // Internals
    // ═══════════════════════════════════════════════════════════════

    /// Walk the vault for markdown files, skipping dot-directories (which
    /// includes `.weaver` and `.git`).
    fn scan_disk(&self) -> Vec<DiskEntry> {
        let mut entries = Vec::new();
        let walker = WalkDir::new(&self.vault_root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| {
                !e.file_name()
                    .to_str()
                    .map(|name| name.starts_with('.') && e.depth() > 0)
                    .unwrap_or(false)
            });

        for entry in walker {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(error = %e, "unreadable entry during vault scan");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let abs = entry.path();
            if abs.extension().and_then(|e| e.to_str()) != Some("md") {
                continue;
            }
            let rel = match abs.strip_prefix(&self.vault_root) {
                Ok(p) => p.to_string_lossy().replace('\\', "/"),
                Err(_) => continue,
            };
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(path = %rel, error = %e, "unreadable metadata");
                    continue;
                }
            };
            entries.push(DiskEntry {
                rel,
                abs: abs.to_path_buf(),
                size: meta.len(),
                mtime_ms: system_time_ms(&meta),
            });
        }
        entries
    }

    /// Snapshot of recorded (path, hash, mtime, size) for change detection.
    fn known_files(&self) -> Result<HashMap<String, (String, i64, i64)>> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare("SELECT path, hash, mtime, size FROM files")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                (row.get::<_, String>(1)?, row.get::<_, i64>(2)?, row.get::<_, i64>(3)?),
            ))
        })?;
        let mut map = HashMap::new();
        for row in rows {
            let (path, value) = row?;
            map.insert(path, value);
        }
        Ok(map)
    }

    fn recorded_hash(&self, rel: &str) -> Result<Option<String>> {
        let conn = self.reader.lock();
        let hash = conn
            .query_row(
                "SELECT hash FROM files WHERE path = ?1",
                [rel],
                |row| row.get::<_, String>(0),
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(hash)
    }

    /// Sync one disk entry inside an open transaction. Returns whether the
    /// file row (not just `seen_at`) was rewritten.
    fn sync_entry(
        tx: &Transaction,
        entry: &DiskEntry,
        known: Option<&(String, i64, i64)>,
        now_ms: i64,
    ) -> Result<bool> {
        // Fast path: recorded mtime and size match the filesystem.
        if let Some((_, mtime, size)) = known {
            if *mtime == entry.mtime_ms && *size == entry.size as i64 {
                tx.execute(
                    "UPDATE files SET seen_at = ?1 WHERE path = ?2",
                    params![now_ms, entry.rel],
                )?;
                return Ok(false);
            }
        }

        let content = std::fs::read_to_string(&entry.abs)?;
        let hash = content_hash(content.as_bytes());
        if let Some((recorded_hash, _, _)) = known {
            if recorded_hash == &hash {
                tx.execute(
                    "UPDATE files SET seen_at = ?1, mtime = ?2, size = ?3 WHERE path = ?4",
                    params![now_ms, entry.mtime_ms, entry.size as i64, entry.rel],
                )?;
                return Ok(false);
            }
        }

        Self::upsert_file(
            tx,
            &entry.rel,
            &content,
            &hash,
            entry.size as i64,
            entry.mtime_ms,
            now_ms,
        )?;
        Ok(true)
    }

    /// Replace the file row and every derived row in one transaction scope.
    fn upsert_file(
        tx: &Transaction,
        rel: &str,
        content: &str,
        hash: &str,
        size: i64,
        mtime_ms: i64,
        now_ms: i64,
    ) -> Result<()> {
        let note = parser::parse(content);
        for warning in &note.warnings {
            tracing::warn!(path = %rel, warning = %warning, "parse warning");
        }
        let title = note
            .title
            .clone()
            .unwrap_or_else(|| file_stem(rel).to_string());
        let frontmatter_json = serde_json::to_string(&note.frontmatter)?;

        tx.execute(
            "INSERT INTO files (path, size, mtime, seen_at, hash, frontmatter, title)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(path) DO UPDATE SET
                 size = excluded.size,
                 mtime = excluded.mtime,
                 seen_at = excluded.seen_at,
                 hash = excluded.hash,
                 frontmatter = excluded.frontmatter,
                 title = excluded.title",
            params![rel, size, mtime_ms, now_ms, hash, frontmatter_json, title],
        )?;
        let file_id: i64 = tx.query_row(
            "SELECT id FROM files WHERE path = ?1",
            [rel],
            |row| row.get(0),
        )?;

        tx.execute("DELETE FROM file_tags WHERE file_id = ?1", [file_id])?;
        {
            let mut insert_tag = tx.prepare_cached(
                "INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?1, ?2)",
            )?;
            for tag in &note.tags {
                insert_tag.execute(params![file_id, tag])?;
            }
        }

        tx.execute("DELETE FROM links WHERE source_id = ?1", [file_id])?;
        {
            let mut insert_link = tx.prepare_cached(
                "INSERT INTO links (source_id, target_path, kind) VALUES (?1, ?2, ?3)",
            )?;
            for link in &note.links {
                insert_link.execute(params![file_id, link.target, link.kind.as_str()])?;
            }
        }

        tx.execute("DELETE FROM files_fts WHERE path = ?1", [rel])?;
        tx.execute(
            "INSERT INTO files_fts (path, title, body) VALUES (?1, ?2, ?3)",
            params![rel, title, note.plain_text],
        )?;
        Ok(())
    }

    /// Cascade-delete one file row. Returns the number of file rows removed.
    fn delete_file(tx: &Transaction, rel: &str) -> Result<usize> {
        tx.execute("DELETE FROM files_fts WHERE path = ?1", [rel])?;
        let n = tx.execute("DELETE FROM files WHERE path = ?1", [rel])?;
        Ok(n)
    }
}

fn system_time_ms(meta: &std::fs::Metadata) -> i64 {
    meta.modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn file_stem(rel: &str) -> &str {
    let name = rel.rsplit('/').next().unwrap_or(rel);
    name.strip_suffix(".md").unwrap_or(name)
}

impl std::fmt::Debug for ShadowCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowCache")
            .field("vault_root", &self.vault_root)
            .finish()
    }
}
