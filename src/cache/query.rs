//! Read-side queries over the shadow cache
//!
//! Every query goes through the read connection and binds values as
//! parameters. Wildcard tag patterns translate `*`/`?` into SQL `LIKE`
//! metacharacters with explicit escaping of literal `%`, `_`, `\`.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, params_from_iter, Row};
use serde_json::{Map, Value};

use crate::error::Result;

use super::store::ShadowCache;
use super::types::{
    ContentMatch, FilePage, FileQuery, FileRecord, LinkDirection, LinkQuery, LinkRecord,
    TagCount, TagMatch, VaultStats,
};

/// Hard cap on `query_files` page size.
pub const MAX_PAGE_SIZE: usize = 500;
const DEFAULT_PAGE_SIZE: usize = 100;
const DEFAULT_SEARCH_LIMIT: usize = 50;

impl ShadowCache {
    /// Fetch one file record by its vault-relative path.
    pub fn get_file(&self, rel_path: &str) -> Result<Option<FileRecord>> {
        let rel = super::normalize_rel_path(rel_path)?;
        let conn = self.reader.lock();
        let record = conn
            .query_row(
                "SELECT path, size, mtime, seen_at, hash, frontmatter, title
                 FROM files WHERE path = ?1",
                [rel],
                row_to_record,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        Ok(record)
    }

    /// Paged, filtered file listing. Filters AND together.
    pub fn query_files(&self, query: &FileQuery) -> Result<FilePage> {
        let limit = query
            .limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .min(MAX_PAGE_SIZE);
        let offset = query.offset.unwrap_or(0);

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(dir) = &query.directory {
            let dir = super::normalize_rel_path(dir)?;
            let prefix = format!("{}/%", escape_like_literal(dir.trim_end_matches('/')));
            clauses.push(format!(
                "f.path LIKE ?{} ESCAPE '\\'",
                binds.len() + 1
            ));
            binds.push(prefix.into());
        }
        if let Some(file_type) = &query.file_type {
            clauses.push(format!(
                "json_extract(f.frontmatter, '$.type') = ?{}",
                binds.len() + 1
            ));
            binds.push(file_type.clone().into());
        }
        if let Some(status) = &query.status {
            clauses.push(format!(
                "json_extract(f.frontmatter, '$.status') = ?{}",
                binds.len() + 1
            ));
            binds.push(status.clone().into());
        }
        if let Some(tag) = &query.tag {
            clauses.push(format!(
                "EXISTS (SELECT 1 FROM file_tags t WHERE t.file_id = f.id AND t.tag = ?{})",
                binds.len() + 1
            ));
            binds.push(tag.clone().into());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let conn = self.reader.lock();

        let total: usize = conn.query_row(
            &format!("SELECT COUNT(*) FROM files f{}", where_clause),
            params_from_iter(binds.iter()),
            |row| row.get::<_, i64>(0).map(|n| n as usize),
        )?;

        let sql = format!(
            "SELECT f.path, f.size, f.mtime, f.seen_at, f.hash, f.frontmatter, f.title
             FROM files f{}
             ORDER BY f.path
             LIMIT ?{} OFFSET ?{}",
            where_clause,
            binds.len() + 1,
            binds.len() + 2
        );
        let mut all_binds = binds;
        all_binds.push((limit as i64).into());
        all_binds.push((offset as i64).into());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(all_binds.iter()), row_to_record)?;
        let mut files = Vec::new();
        for row in rows {
            files.push(row?);
        }

        Ok(FilePage {
            has_more: offset + files.len() < total,
            files,
            total,
        })
    }

    /// Tag search with `*` (any run) and `?` (single char) wildcards.
    /// Results group by tag, each carrying its file list, ordered by
    /// descending count then name.
    pub fn search_tags(&self, pattern: &str, limit: usize) -> Result<Vec<TagMatch>> {
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
        let like = wildcard_to_like(pattern);
        let conn = self.reader.lock();

        let mut stmt = conn.prepare(
            "SELECT t.tag, f.path
             FROM file_tags t
             JOIN files f ON f.id = t.file_id
             WHERE t.tag LIKE ?1 ESCAPE '\\'
             ORDER BY t.tag, f.path",
        )?;
        let rows = stmt.query_map([like], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for row in rows {
            let (tag, path) = row?;
            grouped.entry(tag).or_default().push(path);
        }

        let mut matches: Vec<TagMatch> = grouped
            .into_iter()
            .map(|(tag, files)| TagMatch {
                tag,
                count: files.len(),
                files,
            })
            .collect();
        matches.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
        matches.truncate(limit);
        Ok(matches)
    }

    /// Link graph query. The broken flag is computed at read time from
    /// target existence; a target resolves when `target` or `target.md`
    /// names a recorded file.
    pub fn search_links(&self, query: &LinkQuery) -> Result<Vec<LinkRecord>> {
        let limit = query.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
        let conn = self.reader.lock();

        let mut clauses: Vec<String> = Vec::new();
        let mut binds: Vec<rusqlite::types::Value> = Vec::new();

        // Either field anchors the query; direction decides which side of
        // the edge the anchor matches.
        let anchor = query.source.as_deref().or(query.target.as_deref());
        if let Some(anchor) = anchor {
            let as_source = super::normalize_rel_path(anchor)?;
            let as_target = crate::parser::normalize_target(&as_source);
            match query.direction {
                LinkDirection::Outgoing => {
                    clauses.push(format!("src.path = ?{}", binds.len() + 1));
                    binds.push(as_source.into());
                }
                LinkDirection::Incoming => {
                    clauses.push(format!("l.target_path = ?{}", binds.len() + 1));
                    binds.push(as_target.into());
                }
                LinkDirection::Both => {
                    clauses.push(format!(
                        "(src.path = ?{} OR l.target_path = ?{})",
                        binds.len() + 1,
                        binds.len() + 2
                    ));
                    binds.push(as_source.into());
                    binds.push(as_target.into());
                }
            }
        }

        if let Some(kind) = query.kind {
            clauses.push(format!("l.kind = ?{}", binds.len() + 1));
            binds.push(kind.as_str().to_string().into());
        }

        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", clauses.join(" AND "))
        };

        let sql = format!(
            "SELECT src.path, l.target_path, l.kind, dst.path
             FROM links l
             JOIN files src ON src.id = l.source_id
             LEFT JOIN files dst
                    ON dst.path = l.target_path OR dst.path = l.target_path || '.md'
             {}
             ORDER BY src.path, l.id
             LIMIT ?{}",
            where_clause,
            binds.len() + 1
        );
        binds.push((limit as i64).into());

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(binds.iter()), |row| {
            let resolved: Option<String> = row.get(3)?;
            Ok(LinkRecord {
                source: row.get(0)?,
                target: row.get(1)?,
                kind: row.get(2)?,
                broken: resolved.is_none(),
                resolved_path: resolved,
            })
        })?;

        let mut links = Vec::new();
        for row in rows {
            links.push(row?);
        }
        Ok(links)
    }

    /// Aggregate statistics for the whole vault.
    pub fn get_stats(&self) -> Result<VaultStats> {
        let conn = self.reader.lock();

        let total_files: i64 = conn.query_row("SELECT COUNT(*) FROM files", [], |r| r.get(0))?;
        let total_tags: i64 =
            conn.query_row("SELECT COUNT(DISTINCT tag) FROM file_tags", [], |r| r.get(0))?;
        let total_links: i64 = conn.query_row("SELECT COUNT(*) FROM links", [], |r| r.get(0))?;
        let vault_size: i64 = conn.query_row(
            "SELECT COALESCE(SUM(size), 0) FROM files",
            [],
            |r| r.get(0),
        )?;
        let last_updated_ms: Option<i64> =
            conn.query_row("SELECT MAX(seen_at) FROM files", [], |r| r.get(0))?;

        let mut top_tags = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT tag, COUNT(*) AS n FROM file_tags
                 GROUP BY tag ORDER BY n DESC, tag LIMIT 10",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(TagCount {
                    tag: row.get(0)?,
                    count: row.get::<_, i64>(1)? as usize,
                })
            })?;
            for row in rows {
                top_tags.push(row?);
            }
        }

        let files_by_type = group_by_frontmatter_field(&conn, "$.type")?;
        let files_by_status = group_by_frontmatter_field(&conn, "$.status")?;

        Ok(VaultStats {
            total_files: total_files as usize,
            total_tags: total_tags as usize,
            total_links: total_links as usize,
            top_tags,
            files_by_type,
            files_by_status,
            vault_size_bytes: vault_size as u64,
            last_updated: last_updated_ms.map(ms_to_datetime),
        })
    }

    /// FTS5 keyword search over titles and plain-text bodies.
    pub fn search_content(&self, text: &str, limit: usize) -> Result<Vec<ContentMatch>> {
        let limit = if limit == 0 { DEFAULT_SEARCH_LIMIT } else { limit };
        // Quote the user text as one FTS string literal per column-free
        // match; embedded quotes double.
        let fts_query = format!("\"{}\"", text.replace('"', "\"\""));

        let conn = self.reader.lock();
        let mut stmt = conn.prepare(
            "SELECT path, title, snippet(files_fts, 2, '[', ']', ' … ', 12)
             FROM files_fts WHERE files_fts MATCH ?1
             ORDER BY rank LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![fts_query, limit as i64], |row| {
            Ok(ContentMatch {
                path: row.get(0)?,
                title: row.get(1)?,
                snippet: row.get(2)?,
            })
        })?;
        let mut matches = Vec::new();
        for row in rows {
            matches.push(row?);
        }
        Ok(matches)
    }

    /// All (path, title) pairs; the auto-link rule scans these for mentions.
    pub fn all_titles(&self) -> Result<Vec<(String, String)>> {
        let conn = self.reader.lock();
        let mut stmt = conn.prepare("SELECT path, title FROM files ORDER BY path")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut titles = Vec::new();
        for row in rows {
            titles.push(row?);
        }
        Ok(titles)
    }
}

fn group_by_frontmatter_field(
    conn: &rusqlite::Connection,
    json_path: &str,
) -> Result<BTreeMap<String, usize>> {
    let mut stmt = conn.prepare(
        "SELECT COALESCE(json_extract(frontmatter, ?1), 'none') AS v, COUNT(*)
         FROM files GROUP BY v",
    )?;
    let rows = stmt.query_map([json_path], |row| {
        Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
    })?;
    let mut map = BTreeMap::new();
    for row in rows {
        let (key, count) = row?;
        map.insert(key, count);
    }
    Ok(map)
}

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<FileRecord> {
    let frontmatter_json: String = row.get(5)?;
    let frontmatter: Map<String, Value> =
        serde_json::from_str(&frontmatter_json).unwrap_or_default();
    Ok(FileRecord {
        path: row.get(0)?,
        size: row.get::<_, i64>(1)? as u64,
        mtime: ms_to_datetime(row.get(2)?),
        seen_at: ms_to_datetime(row.get(3)?),
        hash: row.get(4)?,
        frontmatter,
        title: row.get(6)?,
    })
}

fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Translate a `*`/`?` wildcard pattern to a `LIKE` pattern, escaping SQL
/// metacharacters in the literal parts.
fn wildcard_to_like(pattern: &str) -> String {
    let mut like = String::with_capacity(pattern.len() + 4);
    for ch in pattern.chars() {
        match ch {
            '*' => like.push('%'),
            '?' => like.push('_'),
            '%' | '_' | '\\' => {
                like.push('\\');
                like.push(ch);
            }
            other => like.push(other),
        }
    }
    like
}

fn escape_like_literal(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    for ch in text.chars() {
        match ch {
            '%' | '_' | '\\' => {
                out.push('\\');
                out.push(ch);
            }
            other => out.push(other),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SyncOutcome;
    use tempfile::TempDir;

    fn seeded_cache(files: &[(&str, &str)]) -> (TempDir, ShadowCache) {
        let dir = TempDir::new().unwrap();
        for (rel, content) in files {
            let abs = dir.path().join(rel);
            std::fs::create_dir_all(abs.parent().unwrap()).unwrap();
            std::fs::write(abs, content).unwrap();
        }
        let cache = ShadowCache::open(&dir.path().join(".weaver/cache.db"), dir.path()).unwrap();
        cache.sync_vault().unwrap();
        (dir, cache)
    }

    #[test]
    fn wildcard_translation() {
        assert_eq!(wildcard_to_like("python*"), "python%");
        assert_eq!(wildcard_to_like("*-ml"), "%-ml");
        assert_eq!(wildcard_to_like("?l"), "_l");
        assert_eq!(wildcard_to_like("100%"), "100\\%");
        assert_eq!(wildcard_to_like("a_b"), "a\\_b");
    }

    #[test]
    fn empty_vault_boundary() {
        let (_dir, cache) = seeded_cache(&[]);
        let page = cache
            .query_files(&FileQuery {
                limit: Some(500),
                offset: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert!(page.files.is_empty());
        assert_eq!(page.total, 0);
        assert!(!page.has_more);
    }

    #[test]
    fn query_filters_combine_with_and() {
        let (_dir, cache) = seeded_cache(&[
            (
                "notes/a.md",
                "---\ntype: note\nstatus: draft\ntags: [rust]\n---\n",
            ),
            (
                "notes/b.md",
                "---\ntype: note\nstatus: done\ntags: [rust]\n---\n",
            ),
            ("journal/c.md", "---\ntype: daily\nstatus: draft\n---\n"),
        ]);

        let page = cache
            .query_files(&FileQuery {
                directory: Some("notes".into()),
                status: Some("draft".into()),
                tag: Some("rust".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.files[0].path, "notes/a.md");
    }

    #[test]
    fn pagination_and_has_more() {
        let files: Vec<(String, String)> = (0..7)
            .map(|i| (format!("f{}.md", i), format!("# {}\n", i)))
            .collect();
        let refs: Vec<(&str, &str)> = files
            .iter()
            .map(|(a, b)| (a.as_str(), b.as_str()))
            .collect();
        let (_dir, cache) = seeded_cache(&refs);

        let page = cache
            .query_files(&FileQuery {
                limit: Some(3),
                offset: Some(0),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.files.len(), 3);
        assert_eq!(page.total, 7);
        assert!(page.has_more);

        let last = cache
            .query_files(&FileQuery {
                limit: Some(3),
                offset: Some(6),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(last.files.len(), 1);
        assert!(!last.has_more);
    }

    #[test]
    fn limit_clamped_to_max() {
        let (_dir, cache) = seeded_cache(&[("a.md", "x")]);
        // Oversized limit must not error; it clamps.
        let page = cache
            .query_files(&FileQuery {
                limit: Some(10_000),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(page.total, 1);
    }

    #[test]
    fn tag_wildcards_match_spec_scenarios() {
        let (_dir, cache) = seeded_cache(&[
            ("1.md", "---\ntags: [python-ml]\n---\n"),
            ("2.md", "---\ntags: [python-web]\n---\n"),
            ("3.md", "---\ntags: [neural-ml]\n---\n"),
            ("4.md", "---\ntags: [al]\n---\n"),
            ("5.md", "---\ntags: [ml]\n---\n"),
        ]);

        let prefix = cache.search_tags("python*", 50).unwrap();
        let names: Vec<_> = prefix.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"python-ml") && names.contains(&"python-web"));

        let suffix = cache.search_tags("*-ml", 50).unwrap();
        let names: Vec<_> = suffix.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"python-ml") && names.contains(&"neural-ml"));

        let single = cache.search_tags("?l", 50).unwrap();
        let names: Vec<_> = single.iter().map(|t| t.tag.as_str()).collect();
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"al") && names.contains(&"ml"));

        let literal = cache.search_tags("ml", 50).unwrap();
        assert_eq!(literal.len(), 1);
        assert_eq!(literal[0].files, vec!["5.md"]);
    }

    #[test]
    fn link_graph_with_broken_flag() {
        let (_dir, cache) = seeded_cache(&[
            ("a.md", "[[b]] [[missing]]\n"),
            ("b.md", "[[a]]\n"),
        ]);

        let outgoing = cache
            .search_links(&LinkQuery {
                source: Some("a.md".into()),
                direction: LinkDirection::Outgoing,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(outgoing.len(), 2);
        let by_target: std::collections::HashMap<_, _> = outgoing
            .iter()
            .map(|l| (l.target.as_str(), l.broken))
            .collect();
        assert!(!by_target["b"]);
        assert!(by_target["missing"]);

        let incoming = cache
            .search_links(&LinkQuery {
                target: Some("a".into()),
                direction: LinkDirection::Incoming,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(incoming.len(), 1);
        assert_eq!(incoming[0].source, "b.md");
    }

    #[test]
    fn broken_flag_recomputed_when_target_appears() {
        let (dir, cache) = seeded_cache(&[("a.md", "[[new-note]]\n")]);
        let before = cache
            .search_links(&LinkQuery {
                source: Some("a.md".into()),
                direction: LinkDirection::Outgoing,
                ..Default::default()
            })
            .unwrap();
        assert!(before[0].broken);

        std::fs::write(dir.path().join("new-note.md"), "# New\n").unwrap();
        assert_eq!(
            cache.sync_path("new-note.md").unwrap(),
            SyncOutcome::Updated
        );

        let after = cache
            .search_links(&LinkQuery {
                source: Some("a.md".into()),
                direction: LinkDirection::Outgoing,
                ..Default::default()
            })
            .unwrap();
        assert!(!after[0].broken);
        assert_eq!(after[0].resolved_path.as_deref(), Some("new-note.md"));
    }

    #[test]
    fn stats_aggregate() {
        let (_dir, cache) = seeded_cache(&[
            ("a.md", "---\ntype: note\nstatus: draft\ntags: [x, y]\n---\n[[b]]\n"),
            ("b.md", "---\ntype: note\n---\n#x\n"),
        ]);
        let stats = cache.get_stats().unwrap();
        assert_eq!(stats.total_files, 2);
        assert_eq!(stats.total_tags, 2);
        assert_eq!(stats.total_links, 1);
        assert_eq!(stats.top_tags[0].tag, "x");
        assert_eq!(stats.top_tags[0].count, 2);
        assert_eq!(stats.files_by_type.get("note"), Some(&2));
        assert_eq!(stats.files_by_status.get("draft"), Some(&1));
        assert_eq!(stats.files_by_status.get("none"), Some(&1));
        assert!(stats.vault_size_bytes > 0);
        assert!(stats.last_updated.is_some());
    }

    #[test]
    fn content_search_hits_body() {
        let (_dir, cache) = seeded_cache(&[
            ("a.md", "# Caching\nAbout eviction policies.\n"),
            ("b.md", "# Unrelated\nNothing here.\n"),
        ]);
        let hits = cache.search_content("eviction", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, "a.md");
        assert!(hits[0].snippet.contains("[eviction]"));
    }
}
