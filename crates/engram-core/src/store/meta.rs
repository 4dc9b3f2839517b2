//! Metadata Index
//!
//! SQLite-backed index over semantic artifacts: O(1) active-decision lookup
//! per (target, namespace), keyword search, hit counters and the scalar
//! config store. Uses separate reader/writer connections so all methods take
//! `&self` and the store is `Send + Sync`.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::artifact::{Artifact, ArtifactContext, ArtifactKind, ArtifactStatus};
use crate::error::{MemoryError, Result};
use crate::search::sanitize_fts_query;

// ============================================================================
// ROW TYPE
// ============================================================================

/// One metadata row per artifact
#[derive(Debug, Clone)]
pub struct MetaRow {
    pub fid: String,
    pub target: String,
    pub namespace: String,
    pub status: ArtifactStatus,
    pub kind: ArtifactKind,
    pub timestamp: DateTime<Utc>,
    pub superseded_by: Option<String>,
    pub decision_id: Option<String>,
    pub title: String,
    pub keywords: Vec<String>,
    pub content: String,
    /// Full artifact context, serialized
    pub context_json: String,
    pub hits: i64,
}

impl MetaRow {
    /// Build the row for an artifact.
    pub fn from_artifact(artifact: &Artifact) -> Self {
        let ctx = &artifact.context;
        Self {
            fid: artifact.fid.clone(),
            target: ctx.target.clone(),
            namespace: ctx.namespace.clone(),
            status: ctx.status,
            kind: artifact.kind,
            timestamp: artifact.timestamp,
            superseded_by: ctx.superseded_by.clone(),
            decision_id: ctx.decision_id.clone(),
            title: ctx.title.clone(),
            keywords: ctx.keywords.clone(),
            content: artifact.content.clone(),
            context_json: serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string()),
            hits: 0,
        }
    }

    /// Deserialize the stored context.
    pub fn context(&self) -> ArtifactContext {
        serde_json::from_str(&self.context_json).unwrap_or_default()
    }
}

// ============================================================================
// FILTER
// ============================================================================

/// Filter for metadata listings; `None` fields match everything.
#[derive(Debug, Clone, Default)]
pub struct MetaFilter {
    pub target: Option<String>,
    pub namespace: Option<String>,
    pub status: Option<ArtifactStatus>,
    pub kind: Option<ArtifactKind>,
}

// ============================================================================
// META STORE
// ============================================================================

/// Metadata index over semantic artifacts
pub struct MetaStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl MetaStore {
    /// Apply performance PRAGMAs to a connection.
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -16000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (and migrate) the metadata database at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let writer = Connection::open(path)?;
        Self::configure_connection(&writer)?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        Self::configure_connection(&reader)?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Integrity("Metadata writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::Integrity("Metadata reader lock poisoned".into()))
    }

    /// Idempotent upsert of an artifact's row. Hit counters survive upserts.
    pub fn upsert(&self, row: &MetaRow) -> Result<()> {
        let keywords_json =
            serde_json::to_string(&row.keywords).unwrap_or_else(|_| "[]".to_string());
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO semantic_meta (
                fid, target, namespace, status, kind, timestamp,
                superseded_by, decision_id, title, keywords, content, context_json, hits
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)
            ON CONFLICT(fid) DO UPDATE SET
                target = excluded.target,
                namespace = excluded.namespace,
                status = excluded.status,
                kind = excluded.kind,
                timestamp = excluded.timestamp,
                superseded_by = excluded.superseded_by,
                decision_id = excluded.decision_id,
                title = excluded.title,
                keywords = excluded.keywords,
                content = excluded.content,
                context_json = excluded.context_json",
            params![
                row.fid,
                row.target,
                row.namespace,
                row.status.as_str(),
                row.kind.as_str(),
                row.timestamp.to_rfc3339(),
                row.superseded_by,
                row.decision_id,
                row.title,
                keywords_json,
                row.content,
                row.context_json,
            ],
        )?;
        Ok(())
    }

    /// The unique active decision for a (target, namespace) pair, if any.
    pub fn get_active_fid(&self, target: &str, namespace: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        let fid = reader
            .query_row(
                "SELECT fid FROM semantic_meta
                 WHERE target = ?1 AND namespace = ?2 AND status = 'active' AND kind = 'decision'
                 ORDER BY timestamp DESC
                 LIMIT 1",
                params![target, namespace],
                |row| row.get(0),
            )
            .optional()?;
        Ok(fid)
    }

    /// Fetch one row by fid.
    pub fn get(&self, fid: &str) -> Result<Option<MetaRow>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT fid, target, namespace, status, kind, timestamp, superseded_by,
                    decision_id, title, keywords, content, context_json, hits
             FROM semantic_meta WHERE fid = ?1",
        )?;
        let row = stmt
            .query_row(params![fid], Self::row_to_meta)
            .optional()?;
        Ok(row)
    }

    /// All rows, most recent first.
    pub fn list_all(&self) -> Result<Vec<MetaRow>> {
        self.list_by_filter(&MetaFilter::default())
    }

    /// Rows matching a filter, most recent first.
    pub fn list_by_filter(&self, filter: &MetaFilter) -> Result<Vec<MetaRow>> {
        let reader = self.reader()?;
        let mut sql = String::from(
            "SELECT fid, target, namespace, status, kind, timestamp, superseded_by,
                    decision_id, title, keywords, content, context_json, hits
             FROM semantic_meta WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(target) = &filter.target {
            sql.push_str(&format!(" AND target = ?{}", args.len() + 1));
            args.push(target.clone());
        }
        if let Some(namespace) = &filter.namespace {
            sql.push_str(&format!(" AND namespace = ?{}", args.len() + 1));
            args.push(namespace.clone());
        }
        if let Some(status) = filter.status {
            sql.push_str(&format!(" AND status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        if let Some(kind) = filter.kind {
            sql.push_str(&format!(" AND kind = ?{}", args.len() + 1));
            args.push(kind.as_str().to_string());
        }
        sql.push_str(" ORDER BY timestamp DESC");

        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), Self::row_to_meta)?;

        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Ranked keyword search over title + keywords + content.
    ///
    /// Two tiers: native FTS5 where the index is healthy, otherwise a
    /// case-insensitive word-AND scan. Scores are positional (1/(1+rank)).
    pub fn keyword_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        match self.fts_search(query, limit) {
            Ok(hits) => Ok(hits),
            Err(e) => {
                tracing::warn!("FTS5 keyword search failed, using scan fallback: {}", e);
                self.scan_search(query, limit)
            }
        }
    }

    fn fts_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let sanitized = sanitize_fts_query(query);
        if sanitized.is_empty() {
            return Ok(Vec::new());
        }
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT fid FROM semantic_fts
             WHERE semantic_fts MATCH ?1
             ORDER BY bm25(semantic_fts)
             LIMIT ?2",
        )?;
        let fids = stmt.query_map(params![sanitized, limit as i64], |row| {
            row.get::<_, String>(0)
        })?;

        let mut hits = Vec::new();
        for (rank, fid) in fids.enumerate() {
            hits.push((fid?, 1.0 / (1.0 + rank as f32)));
        }
        Ok(hits)
    }

    /// Word-AND scan fallback, used when FTS is corrupt or unavailable.
    fn scan_search(&self, query: &str, limit: usize) -> Result<Vec<(String, f32)>> {
        let words: Vec<String> = query
            .split_whitespace()
            .map(|w| w.to_lowercase())
            .filter(|w| !w.is_empty())
            .collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let reader = self.reader()?;
        let mut stmt = reader
            .prepare("SELECT fid, title, keywords, content FROM semantic_meta")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut scored: Vec<(String, f32)> = Vec::new();
        for row in rows {
            let (fid, title, keywords, content) = row?;
            let haystack = format!("{} {} {}", title, keywords, content).to_lowercase();
            if words.iter().all(|w| haystack.contains(w.as_str())) {
                let occurrences: usize =
                    words.iter().map(|w| haystack.matches(w.as_str()).count()).sum();
                scored.push((fid, occurrences as f32));
            }
        }
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);

        // Normalise to positional scores so both tiers rank alike
        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (fid, _))| (fid, 1.0 / (1.0 + rank as f32)))
            .collect())
    }

    /// Bump the hit counter for a retrieved artifact.
    pub fn increment_hit(&self, fid: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "UPDATE semantic_meta SET hits = hits + 1 WHERE fid = ?1",
            params![fid],
        )?;
        Ok(())
    }

    /// Remove a row.
    pub fn delete(&self, fid: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute("DELETE FROM semantic_meta WHERE fid = ?1", params![fid])?;
        Ok(())
    }

    /// Drop all metadata rows (admin only; config survives).
    pub fn clear(&self) -> Result<()> {
        let writer = self.writer()?;
        writer.execute("DELETE FROM semantic_meta", [])?;
        Ok(())
    }

    /// All fids present in the index.
    pub fn all_fids(&self) -> Result<HashSet<String>> {
        let reader = self.reader()?;
        let mut stmt = reader.prepare("SELECT fid FROM semantic_meta")?;
        let fids = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut set = HashSet::new();
        for fid in fids {
            set.insert(fid?);
        }
        Ok(set)
    }

    // ========================================================================
    // CONFIG STORE
    // ========================================================================

    pub fn get_config(&self, key: &str) -> Result<Option<String>> {
        let reader = self.reader()?;
        let value = reader
            .query_row(
                "SELECT value FROM config WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn get_config_i64(&self, key: &str, default: i64) -> Result<i64> {
        Ok(self
            .get_config(key)?
            .and_then(|v| v.parse().ok())
            .unwrap_or(default))
    }

    pub fn set_config(&self, key: &str, value: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute(
            "INSERT INTO config (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    // ========================================================================
    // ROW MAPPING
    // ========================================================================

    fn row_to_meta(row: &rusqlite::Row) -> rusqlite::Result<MetaRow> {
        let status_raw: String = row.get("status")?;
        let kind_raw: String = row.get("kind")?;
        let timestamp_raw: String = row.get("timestamp")?;
        let keywords_raw: String = row.get("keywords")?;

        let timestamp = DateTime::parse_from_rfc3339(&timestamp_raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(std::io::Error::new(
                        std::io::ErrorKind::InvalidData,
                        format!("Invalid timestamp '{}': {}", timestamp_raw, e),
                    )),
                )
            })?;

        Ok(MetaRow {
            fid: row.get("fid")?,
            target: row.get("target")?,
            namespace: row.get("namespace")?,
            status: ArtifactStatus::parse_name(&status_raw).unwrap_or(ArtifactStatus::Deprecated),
            kind: ArtifactKind::parse_name(&kind_raw).unwrap_or(ArtifactKind::Decision),
            timestamp,
            superseded_by: row.get("superseded_by")?,
            decision_id: row.get("decision_id")?,
            title: row.get("title")?,
            keywords: serde_json::from_str(&keywords_raw).unwrap_or_default(),
            content: row.get("content")?,
            context_json: row.get("context_json")?,
            hits: row.get("hits")?,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
