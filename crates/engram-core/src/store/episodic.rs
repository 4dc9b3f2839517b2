//! Episodic Log
//!
//! Append-only ordered sequence of observations. Events may be linked to
//! semantic artifacts as evidence; a linked event is immortal - it is never
//! archived and never physically pruned, no matter how old it gets.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::artifact::Source;
use crate::error::{MemoryError, Result};

/// Well-known episodic event kinds. The set is open; adapters may append
/// kinds of their own.
pub mod event_kind {
    pub const TASK: &str = "task";
    pub const CALL: &str = "call";
    pub const RESULT: &str = "result";
    pub const ERROR: &str = "error";
    pub const PROMPT: &str = "prompt";
    pub const CONTEXT_SNAPSHOT: &str = "context_snapshot";
    pub const PROPOSAL: &str = "proposal";
    pub const DECISION: &str = "decision";
    pub const SUPERSEDE: &str = "supersede";
}

/// Event lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    #[default]
    Active,
    Archived,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Active => "active",
            EventStatus::Archived => "archived",
        }
    }

    pub fn parse_name(s: &str) -> Option<Self> {
        match s {
            "active" => Some(EventStatus::Active),
            "archived" => Some(EventStatus::Archived),
            _ => None,
        }
    }
}

/// A stored episodic event
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodicEvent {
    pub id: i64,
    pub source: Source,
    pub kind: String,
    pub content: String,
    /// Arbitrary structured context (may carry `success`, `target`, ...)
    pub context: serde_json::Map<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
    pub status: EventStatus,
    /// Artifact fids this event is evidence for
    pub linked: Vec<String>,
}

impl EpisodicEvent {
    /// `context.success == true`
    pub fn is_success(&self) -> bool {
        self.context.get("success") == Some(&serde_json::Value::Bool(true))
    }
}

/// Input for appending an event
#[derive(Debug, Clone, Default)]
pub struct NewEvent {
    pub source: Source,
    pub kind: String,
    pub content: String,
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Defaults to now
    pub timestamp: Option<DateTime<Utc>>,
}

/// Query parameters for the log
#[derive(Debug, Clone)]
pub struct EventQuery {
    pub limit: usize,
    pub status: Option<EventStatus>,
    pub kind: Option<String>,
    /// Only events with id strictly greater than this
    pub after_id: Option<i64>,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            limit: 100,
            status: Some(EventStatus::Active),
            kind: None,
            after_id: None,
        }
    }
}

// ============================================================================
// EPISODIC LOG
// ============================================================================

/// Append-only episodic store
pub struct EpisodicLog {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl EpisodicLog {
    /// Open the episodic log; shares the metadata database file.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = Connection::open(path)?;
        writer.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )?;
        super::migrations::apply_migrations(&writer)?;

        let reader = Connection::open(path)?;
        reader.execute_batch("PRAGMA busy_timeout = 5000;")?;

        Ok(Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        })
    }

    fn writer(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.writer
            .lock()
            .map_err(|_| MemoryError::Integrity("Episodic writer lock poisoned".into()))
    }

    fn reader(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.reader
            .lock()
            .map_err(|_| MemoryError::Integrity("Episodic reader lock poisoned".into()))
    }

    /// Append an event, optionally linking it to artifacts. Exact repeats of
    /// (source, kind, content, timestamp) collapse onto the existing row and
    /// return its id.
    pub fn append(&self, event: NewEvent, linked: &[String]) -> Result<i64> {
        let timestamp = event.timestamp.unwrap_or_else(Utc::now);
        let context_json =
            serde_json::to_string(&event.context).unwrap_or_else(|_| "{}".to_string());
        let ts = timestamp.to_rfc3339();

        let id = {
            let writer = self.writer()?;
            let inserted = writer.execute(
                "INSERT OR IGNORE INTO episodic_events
                     (source, kind, content, context_json, timestamp, status)
                 VALUES (?1, ?2, ?3, ?4, ?5, 'active')",
                params![event.source.as_str(), event.kind, event.content, context_json, ts],
            )?;
            if inserted > 0 {
                writer.last_insert_rowid()
            } else {
                // Duplicate within the same millisecond; reuse the original
                writer
                    .query_row(
                        "SELECT id FROM episodic_events
                         WHERE source = ?1 AND kind = ?2 AND content = ?3 AND timestamp = ?4",
                        params![event.source.as_str(), event.kind, event.content, ts],
                        |row| row.get(0),
                    )
                    .optional()?
                    .ok_or_else(|| {
                        MemoryError::Integrity("Suppressed duplicate event vanished".into())
                    })?
            }
        };

        for fid in linked {
            self.link_to_semantic(id, fid)?;
        }
        Ok(id)
    }

    /// Attach an event to an artifact as evidence.
    pub fn link_to_semantic(&self, event_id: i64, fid: &str) -> Result<()> {
        let exists: Option<i64> = {
            let reader = self.reader()?;
            reader
                .query_row(
                    "SELECT id FROM episodic_events WHERE id = ?1",
                    params![event_id],
                    |row| row.get(0),
                )
                .optional()?
        };
        if exists.is_none() {
            return Err(MemoryError::NotFound(format!("event {}", event_id)));
        }

        let writer = self.writer()?;
        writer.execute(
            "INSERT OR IGNORE INTO event_links (event_id, fid) VALUES (?1, ?2)",
            params![event_id, fid],
        )?;
        Ok(())
    }

    /// Query events, newest first.
    pub fn query(&self, query: &EventQuery) -> Result<Vec<EpisodicEvent>> {
        self.query_ordered(query, false)
    }

    /// Query events in ascending id order (for reflection scans).
    pub fn query_ascending(&self, query: &EventQuery) -> Result<Vec<EpisodicEvent>> {
        self.query_ordered(query, true)
    }

    fn query_ordered(&self, query: &EventQuery, ascending: bool) -> Result<Vec<EpisodicEvent>> {
        let reader = self.reader()?;
        let mut sql = String::from(
            "SELECT e.id, e.source, e.kind, e.content, e.context_json, e.timestamp, e.status
             FROM episodic_events e WHERE 1=1",
        );
        let mut args: Vec<String> = Vec::new();
        if let Some(status) = query.status {
            sql.push_str(&format!(" AND e.status = ?{}", args.len() + 1));
            args.push(status.as_str().to_string());
        }
        if let Some(kind) = &query.kind {
            sql.push_str(&format!(" AND e.kind = ?{}", args.len() + 1));
            args.push(kind.clone());
        }
        if let Some(after) = query.after_id {
            sql.push_str(&format!(" AND e.id > ?{}", args.len() + 1));
            args.push(after.to_string());
        }
        sql.push_str(if ascending {
            " ORDER BY e.id ASC"
        } else {
            " ORDER BY e.id DESC"
        });
        sql.push_str(&format!(" LIMIT {}", query.limit));

        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (id, source, kind, content, context_json, timestamp, status) = row?;
            events.push(EpisodicEvent {
                id,
                source: Source::parse_name(&source).unwrap_or_default(),
                kind,
                content,
                context: serde_json::from_str(&context_json).unwrap_or_default(),
                timestamp: DateTime::parse_from_rfc3339(&timestamp)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
                status: EventStatus::parse_name(&status).unwrap_or_default(),
                linked: Vec::new(),
            });
        }
        drop(stmt);
        drop(reader);

        // Hydrate link sets in one pass
        let ids: Vec<i64> = events.iter().map(|e| e.id).collect();
        let links = self.links_for_events(&ids)?;
        for event in &mut events {
            if let Some(fids) = links.get(&event.id) {
                event.linked = fids.clone();
            }
        }
        Ok(events)
    }

    /// Fetch one event by id.
    pub fn get(&self, id: i64) -> Result<Option<EpisodicEvent>> {
        let events = self.query_ordered(
            &EventQuery {
                limit: 1,
                status: None,
                kind: None,
                after_id: Some(id - 1),
            },
            true,
        )?;
        Ok(events.into_iter().find(|e| e.id == id))
    }

    /// Archive events. Linked events are silently retained.
    pub fn mark_archived(&self, ids: &[i64]) -> Result<usize> {
        let writer = self.writer()?;
        let mut archived = 0;
        for id in ids {
            archived += writer.execute(
                "UPDATE episodic_events SET status = 'archived'
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM event_links l WHERE l.event_id = ?1)",
                params![id],
            )?;
        }
        Ok(archived)
    }

    /// Physically delete events. Linked events are silently retained.
    pub fn physical_prune(&self, ids: &[i64]) -> Result<usize> {
        let writer = self.writer()?;
        let mut pruned = 0;
        for id in ids {
            pruned += writer.execute(
                "DELETE FROM episodic_events
                 WHERE id = ?1
                   AND NOT EXISTS (SELECT 1 FROM event_links l WHERE l.event_id = ?1)",
                params![id],
            )?;
        }
        Ok(pruned)
    }

    /// Evidence stats for one artifact: link count and a recency score in
    /// (0, 1] that decays with the age of the newest linked event.
    pub fn count_links_for_semantic(&self, fid: &str) -> Result<(i64, f64)> {
        let map = self.count_links_batch(std::slice::from_ref(&fid.to_string()))?;
        Ok(map.get(fid).copied().unwrap_or((0, 0.0)))
    }

    /// Batched evidence stats.
    pub fn count_links_batch(&self, fids: &[String]) -> Result<HashMap<String, (i64, f64)>> {
        let mut result = HashMap::new();
        if fids.is_empty() {
            return Ok(result);
        }
        let reader = self.reader()?;
        let mut stmt = reader.prepare(
            "SELECT l.fid, COUNT(*), MAX(e.timestamp)
             FROM event_links l
             JOIN episodic_events e ON e.id = l.event_id
             WHERE l.fid = ?1
             GROUP BY l.fid",
        )?;
        let now = Utc::now();
        for fid in fids {
            let row: Option<(String, i64, String)> = stmt
                .query_row(params![fid], |row| {
                    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
                })
                .optional()?;
            if let Some((fid, count, newest)) = row {
                let age_days = DateTime::parse_from_rfc3339(&newest)
                    .map(|dt| (now - dt.with_timezone(&Utc)).num_days().max(0))
                    .unwrap_or(i64::MAX);
                let recency = 1.0 / (1.0 + age_days as f64);
                result.insert(fid, (count, recency));
            }
        }
        Ok(result)
    }

    /// Ids of events linked to an artifact.
    pub fn linked_event_ids(&self, fid: &str) -> Result<Vec<i64>> {
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT event_id FROM event_links WHERE fid = ?1 ORDER BY event_id")?;
        let ids = stmt.query_map(params![fid], |row| row.get(0))?;
        let mut result = Vec::new();
        for id in ids {
            result.push(id?);
        }
        Ok(result)
    }

    /// Drop all links pointing at an artifact (admin purge path).
    pub fn unlink_all_for(&self, fid: &str) -> Result<()> {
        let writer = self.writer()?;
        writer.execute("DELETE FROM event_links WHERE fid = ?1", params![fid])?;
        Ok(())
    }

    /// Highest event id ever assigned, 0 when empty.
    pub fn latest_event_id(&self) -> Result<i64> {
        let reader = self.reader()?;
        let id: i64 = reader.query_row(
            "SELECT COALESCE(MAX(id), 0) FROM episodic_events",
            [],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Rewrite an event's timestamp. Admin/test affordance for backdating.
    pub fn set_timestamp(&self, event_id: i64, timestamp: DateTime<Utc>) -> Result<()> {
        let writer = self.writer()?;
        let changed = writer.execute(
            "UPDATE episodic_events SET timestamp = ?1 WHERE id = ?2",
            params![timestamp.to_rfc3339(), event_id],
        )?;
        if changed == 0 {
            return Err(MemoryError::NotFound(format!("event {}", event_id)));
        }
        Ok(())
    }

    /// Event counts by status: (active, archived, linked).
    pub fn counts(&self) -> Result<(i64, i64, i64)> {
        let reader = self.reader()?;
        let active: i64 = reader.query_row(
            "SELECT COUNT(*) FROM episodic_events WHERE status = 'active'",
            [],
            |row| row.get(0),
        )?;
        let archived: i64 = reader.query_row(
            "SELECT COUNT(*) FROM episodic_events WHERE status = 'archived'",
            [],
            |row| row.get(0),
        )?;
        let linked: i64 = reader.query_row(
            "SELECT COUNT(DISTINCT event_id) FROM event_links",
            [],
            |row| row.get(0),
        )?;
        Ok((active, archived, linked))
    }

    fn links_for_events(&self, ids: &[i64]) -> Result<HashMap<i64, Vec<String>>> {
        let mut map: HashMap<i64, Vec<String>> = HashMap::new();
        if ids.is_empty() {
            return Ok(map);
        }
        let reader = self.reader()?;
        let mut stmt =
            reader.prepare("SELECT fid FROM event_links WHERE event_id = ?1 ORDER BY fid")?;
        for id in ids {
            let fids = stmt.query_map(params![id], |row| row.get::<_, String>(0))?;
            let mut collected = Vec::new();
            for fid in fids {
                collected.push(fid?);
            }
            if !collected.is_empty() {
                map.insert(*id, collected);
            }
        }
        Ok(map)
    }
}

// ============================================================================
// TESTS
// ============================================================================
