//! Database Migrations
//!
//! Schema migration definitions for the metadata index and episodic log.

use rusqlite::Connection;

use crate::error::Result;

/// Migration definitions
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: semantic metadata, FTS5, episodic log, config",
    up: MIGRATION_V1_UP,
}];

/// A database migration
#[derive(Debug, Clone)]
pub struct Migration {
    /// Version number
    pub version: u32,
    /// Description
    pub description: &'static str,
    /// SQL to apply
    pub up: &'static str,
}

/// V1: Initial schema
const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS semantic_meta (
    fid TEXT PRIMARY KEY,
    target TEXT NOT NULL,
    namespace TEXT NOT NULL DEFAULT 'default',
    status TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'decision',
    timestamp TEXT NOT NULL,
    superseded_by TEXT,
    decision_id TEXT,
    title TEXT NOT NULL DEFAULT '',
    keywords TEXT NOT NULL DEFAULT '[]',
    content TEXT NOT NULL DEFAULT '',
    context_json TEXT NOT NULL DEFAULT '{}',
    hits INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_meta_target ON semantic_meta(target, namespace, status);
CREATE INDEX IF NOT EXISTS idx_meta_status ON semantic_meta(status);
CREATE INDEX IF NOT EXISTS idx_meta_decision ON semantic_meta(decision_id);

-- FTS5 virtual table for keyword search over title + keywords + content
CREATE VIRTUAL TABLE IF NOT EXISTS semantic_fts USING fts5(
    fid,
    title,
    keywords,
    content,
    content='semantic_meta',
    content_rowid='rowid'
);

-- Triggers to keep FTS in sync
CREATE TRIGGER IF NOT EXISTS semantic_ai AFTER INSERT ON semantic_meta BEGIN
    INSERT INTO semantic_fts(rowid, fid, title, keywords, content)
    VALUES (NEW.rowid, NEW.fid, NEW.title, NEW.keywords, NEW.content);
END;

CREATE TRIGGER IF NOT EXISTS semantic_ad AFTER DELETE ON semantic_meta BEGIN
    INSERT INTO semantic_fts(semantic_fts, rowid, fid, title, keywords, content)
    VALUES ('delete', OLD.rowid, OLD.fid, OLD.title, OLD.keywords, OLD.content);
END;

CREATE TRIGGER IF NOT EXISTS semantic_au AFTER UPDATE ON semantic_meta BEGIN
    INSERT INTO semantic_fts(semantic_fts, rowid, fid, title, keywords, content)
    VALUES ('delete', OLD.rowid, OLD.fid, OLD.title, OLD.keywords, OLD.content);
    INSERT INTO semantic_fts(rowid, fid, title, keywords, content)
    VALUES (NEW.rowid, NEW.fid, NEW.title, NEW.keywords, NEW.content);
END;

-- Append-only episodic log
CREATE TABLE IF NOT EXISTS episodic_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    source TEXT NOT NULL,
    kind TEXT NOT NULL,
    content TEXT NOT NULL,
    context_json TEXT NOT NULL DEFAULT '{}',
    timestamp TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
);

-- Exact repeats within the same millisecond are collapsed
CREATE UNIQUE INDEX IF NOT EXISTS idx_events_dedup
    ON episodic_events(source, kind, content, timestamp);
CREATE INDEX IF NOT EXISTS idx_events_status ON episodic_events(status);
CREATE INDEX IF NOT EXISTS idx_events_kind ON episodic_events(kind);

-- Evidence links, many-to-many
CREATE TABLE IF NOT EXISTS event_links (
    event_id INTEGER NOT NULL,
    fid TEXT NOT NULL,
    PRIMARY KEY (event_id, fid)
);

CREATE INDEX IF NOT EXISTS idx_links_event ON event_links(event_id);
CREATE INDEX IF NOT EXISTS idx_links_fid ON event_links(fid);

-- Scalar key/value config (reflection cursor, gc timestamps, ...)
CREATE TABLE IF NOT EXISTS config (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Apply all pending migrations to the connection.
pub fn apply_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );",
    )?;

    let current: u32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    for migration in MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        tracing::info!(
            "Applying schema migration v{}: {}",
            migration.version,
            migration.description
        );
        conn.execute_batch(migration.up)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (?1, datetime('now'))",
            [migration.version],
        )?;
    }

    Ok(())
}
