//! The SQLite schema: core tables, the FTS5 index over record
//! content, and the triggers that keep that index in lock-step with
//! the `records` table.

use rusqlite::{Connection, Result};

/// Stamped into `schema_migrations` so future releases can tell what
/// an existing database file already has.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Everything the store needs, as one DDL script.
///
/// Timestamps are INTEGER Unix milliseconds throughout. State columns
/// carry CHECK constraints so the enumerations hold even against a
/// stray write from outside this crate.
pub const SCHEMA_SQL: &str = r#"
-- ====================
-- Schema Version Tracking
-- ====================

CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at INTEGER NOT NULL
);

-- ====================
-- Core Tables
-- ====================

-- Projects: tick domain and tenant-scoped grouping
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    tick INTEGER NOT NULL DEFAULT 0 CHECK (tick >= 0),
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_projects_tenant ON projects(tenant_id, created_at);

-- Records: the reasoning tree nodes
CREATE TABLE IF NOT EXISTS records (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    record_type TEXT NOT NULL,
    title TEXT NOT NULL,
    summary TEXT NOT NULL,
    body TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'open'
        CHECK (state IN ('open', 'later', 'resolved', 'discarded')),
    parent_id TEXT,
    resolved_by TEXT,
    created_at INTEGER NOT NULL,
    modified_at INTEGER NOT NULL,
    tick INTEGER NOT NULL,
    FOREIGN KEY (project_id) REFERENCES projects(id),
    FOREIGN KEY (parent_id) REFERENCES records(id)
);

CREATE INDEX IF NOT EXISTS idx_records_tenant_project ON records(tenant_id, project_id);
CREATE INDEX IF NOT EXISTS idx_records_parent ON records(parent_id);
CREATE INDEX IF NOT EXISTS idx_records_state ON records(state);
CREATE INDEX IF NOT EXISTS idx_records_created ON records(created_at DESC);

-- Relation edges: directed storage, symmetric meaning
CREATE TABLE IF NOT EXISTS record_relations (
    from_record_id TEXT NOT NULL,
    to_record_id TEXT NOT NULL,
    PRIMARY KEY (from_record_id, to_record_id),
    FOREIGN KEY (from_record_id) REFERENCES records(id) ON DELETE CASCADE,
    FOREIGN KEY (to_record_id) REFERENCES records(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_relations_to ON record_relations(to_record_id);

-- Sessions: agent working contexts, one project each
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'active'
        CHECK (status IN ('active', 'stale', 'closed')),
    focus_record TEXT,
    parent_session TEXT,
    last_sync_tick INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    last_activity INTEGER NOT NULL,
    closed_at INTEGER,
    FOREIGN KEY (project_id) REFERENCES projects(id)
);

CREATE INDEX IF NOT EXISTS idx_sessions_tenant_project ON sessions(tenant_id, project_id);
CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status);

-- Activation edges: session intent to write a record, with the tick
-- observed at activation
CREATE TABLE IF NOT EXISTS session_activations (
    session_id TEXT NOT NULL,
    record_id TEXT NOT NULL,
    activation_tick INTEGER NOT NULL,
    activated_at INTEGER NOT NULL,
    PRIMARY KEY (session_id, record_id),
    FOREIGN KEY (session_id) REFERENCES sessions(id) ON DELETE CASCADE,
    FOREIGN KEY (record_id) REFERENCES records(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_activations_record ON session_activations(record_id);

-- Activity log: append-only event stream tied to ticks
CREATE TABLE IF NOT EXISTS activity_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    tenant_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    session_id TEXT,
    record_id TEXT,
    activity_type TEXT NOT NULL,
    summary TEXT NOT NULL,
    details TEXT,
    created_at INTEGER NOT NULL,
    tick INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_activity_tenant_project ON activity_log(tenant_id, project_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_activity_record ON activity_log(record_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_activity_session ON activity_log(session_id);

-- API keys: SHA-256 hex digest of the bearer token -> tenant
CREATE TABLE IF NOT EXISTS api_keys (
    key_hash TEXT PRIMARY KEY,
    tenant_id TEXT NOT NULL,
    label TEXT,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_api_keys_tenant ON api_keys(tenant_id);

-- ====================
-- Full-Text Search
-- ====================

-- External-content FTS5 table over record title/summary/body, keyed by
-- the records rowid. Maintained by the triggers below so the index is
-- written inside the same transaction as the record row.
CREATE VIRTUAL TABLE IF NOT EXISTS records_fts USING fts5(
    title,
    summary,
    body,
    content='records',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS records_fts_ai AFTER INSERT ON records BEGIN
    INSERT INTO records_fts(rowid, title, summary, body)
    VALUES (new.rowid, new.title, new.summary, new.body);
END;

CREATE TRIGGER IF NOT EXISTS records_fts_ad AFTER DELETE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, summary, body)
    VALUES ('delete', old.rowid, old.title, old.summary, old.body);
END;

CREATE TRIGGER IF NOT EXISTS records_fts_au AFTER UPDATE ON records BEGIN
    INSERT INTO records_fts(records_fts, rowid, title, summary, body)
    VALUES ('delete', old.rowid, old.title, old.summary, old.body);
    INSERT INTO records_fts(rowid, title, summary, body)
    VALUES (new.rowid, new.title, new.summary, new.body);
END;
"#;

/// Bring a connection's database up to the current schema.
///
/// Safe to run on every open: the DDL is `IF NOT EXISTS` throughout
/// and the version stamp is `INSERT OR IGNORE`.
pub fn apply_schema(conn: &Connection) -> Result<()> {
    // Tuning must precede the DDL: WAL shapes how the file is created,
    // and the FK pragma is per-connection.
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "cache_size", "-64000")?;

    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations (version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![
            format!("v{CURRENT_SCHEMA_VERSION}"),
            chrono::Utc::now().timestamp_millis()
        ],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_schema() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).expect("schema applies to an empty database");

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>>>()
            .unwrap();

        assert!(tables.contains(&"projects".to_string()));
        assert!(tables.contains(&"records".to_string()));
        assert!(tables.contains(&"record_relations".to_string()));
        assert!(tables.contains(&"sessions".to_string()));
        assert!(tables.contains(&"session_activations".to_string()));
        assert!(tables.contains(&"activity_log".to_string()));
        assert!(tables.contains(&"api_keys".to_string()));
        assert!(tables.contains(&"records_fts".to_string()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        apply_schema(&conn).expect("fresh apply");
        apply_schema(&conn).expect("re-apply over existing schema");
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }

    #[test]
    fn test_state_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO projects (id, tenant_id, name, created_at) VALUES ('p1', 't', 'P', 0)",
            [],
        )
        .unwrap();

        // Valid state
        let ok = conn.execute(
            "INSERT INTO records (id, tenant_id, project_id, record_type, title, summary, body, state, created_at, modified_at, tick)
             VALUES ('r1', 't', 'p1', 'note', 'T', 'S', 'B', 'open', 0, 0, 1)",
            [],
        );
        assert!(ok.is_ok());

        // Invalid state rejected by CHECK
        let bad = conn.execute(
            "INSERT INTO records (id, tenant_id, project_id, record_type, title, summary, body, state, created_at, modified_at, tick)
             VALUES ('r2', 't', 'p1', 'note', 'T', 'S', 'B', 'pending', 0, 0, 1)",
            [],
        );
        assert!(bad.is_err());
    }

    #[test]
    fn test_fts_triggers_track_writes() {
        let conn = Connection::open_in_memory().unwrap();
        apply_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO projects (id, tenant_id, name, created_at) VALUES ('p1', 't', 'P', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO records (id, tenant_id, project_id, record_type, title, summary, body, state, created_at, modified_at, tick)
             VALUES ('r1', 't', 'p1', 'note', 'Caching strategy', 'S', 'B', 'open', 0, 0, 1)",
            [],
        )
        .unwrap();

        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records_fts WHERE records_fts MATCH 'caching'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 1);

        // Update is reflected
        conn.execute("UPDATE records SET title = 'Sharding plan' WHERE id = 'r1'", [])
            .unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records_fts WHERE records_fts MATCH 'caching'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);

        // Delete is reflected
        conn.execute("DELETE FROM records WHERE id = 'r1'", []).unwrap();
        let hits: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM records_fts WHERE records_fts MATCH 'sharding'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(hits, 0);
    }
}
