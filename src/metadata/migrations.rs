//! Idempotent, numbered schema migrations.
//!
//! Grounded in the teacher's `storage::migrations::run_migrations`: a
//! `schema_version` table tracks the highest applied migration, and each
//! migration is only applied once, in order, on every `Storage::open`.

use rusqlite::Connection;

use crate::error::Result;

pub const SCHEMA_VERSION: i32 = 1;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ma_schema_version (version INTEGER NOT NULL);",
    )?;
    let current: i32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM ma_schema_version", [], |r| {
            r.get(0)
        })
        .unwrap_or(0);

    if current < 1 {
        migrate_v1(conn)?;
        conn.execute("INSERT INTO ma_schema_version (version) VALUES (1)", [])?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS ma_memories (
            id            TEXT PRIMARY KEY,
            content       TEXT NOT NULL,
            layer         TEXT NOT NULL,
            category      TEXT,
            confidence    REAL NOT NULL,
            created_at    TEXT NOT NULL,
            valid_at      TEXT,
            expires_at    TEXT,
            created_by    TEXT NOT NULL,
            session_id    TEXT,
            related_files TEXT NOT NULL DEFAULT '[]',
            is_active     INTEGER NOT NULL DEFAULT 1
        );
        CREATE INDEX IF NOT EXISTS idx_ma_memories_layer ON ma_memories(layer);
        CREATE INDEX IF NOT EXISTS idx_ma_memories_category ON ma_memories(category);
        CREATE INDEX IF NOT EXISTS idx_ma_memories_session ON ma_memories(session_id);
        CREATE INDEX IF NOT EXISTS idx_ma_memories_active ON ma_memories(is_active);

        CREATE TABLE IF NOT EXISTS ma_memory_versions (
            version_id     INTEGER PRIMARY KEY AUTOINCREMENT,
            memory_id      TEXT NOT NULL,
            content        TEXT NOT NULL,
            metadata       TEXT NOT NULL,
            change_summary TEXT,
            created_at     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ma_memory_versions_memory ON ma_memory_versions(memory_id);

        CREATE TABLE IF NOT EXISTS ma_pending_memories (
            id            TEXT PRIMARY KEY,
            content       TEXT NOT NULL,
            layer         TEXT NOT NULL,
            category      TEXT,
            confidence    REAL NOT NULL,
            valid_at      TEXT,
            expires_at    TEXT,
            session_id    TEXT,
            related_files TEXT NOT NULL DEFAULT '[]',
            is_active     INTEGER NOT NULL DEFAULT 1,
            status        TEXT NOT NULL,
            proposer      TEXT NOT NULL,
            reason        TEXT,
            target_id     TEXT,
            change_type   TEXT NOT NULL,
            approvals     TEXT NOT NULL DEFAULT '[]',
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ma_pending_status ON ma_pending_memories(status);

        CREATE TABLE IF NOT EXISTS ma_identity_changes (
            change_id        TEXT PRIMARY KEY,
            target_id        TEXT,
            change_type       TEXT NOT NULL,
            proposed_content  TEXT NOT NULL,
            reason            TEXT,
            category          TEXT,
            status            TEXT NOT NULL,
            approvals         TEXT NOT NULL DEFAULT '[]',
            created_at        TEXT NOT NULL,
            updated_at        TEXT NOT NULL,
            applied_at        TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_ma_identity_status ON ma_identity_changes(status);

        CREATE TABLE IF NOT EXISTS ma_checklist_items (
            id           TEXT PRIMARY KEY,
            project_id   TEXT NOT NULL,
            content      TEXT NOT NULL,
            status       TEXT NOT NULL,
            scope        TEXT NOT NULL,
            priority     INTEGER NOT NULL,
            tags         TEXT NOT NULL DEFAULT '[]',
            created_at   TEXT NOT NULL,
            updated_at   TEXT NOT NULL,
            completed_at TEXT,
            expires_at   TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_ma_checklist_project ON ma_checklist_items(project_id);
        CREATE INDEX IF NOT EXISTS idx_ma_checklist_status ON ma_checklist_items(status);

        CREATE TABLE IF NOT EXISTS ma_session_archive (
            session_id       TEXT PRIMARY KEY,
            started_at       TEXT NOT NULL,
            source_files     TEXT NOT NULL DEFAULT '[]',
            memory_ops_count INTEGER NOT NULL DEFAULT 0,
            file_mods_count  INTEGER NOT NULL DEFAULT 0,
            ended_at         TEXT
        );

        CREATE TABLE IF NOT EXISTS ma_audit_log (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            action    TEXT NOT NULL,
            actor     TEXT NOT NULL,
            memory_id TEXT,
            diff      TEXT,
            timestamp TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ma_audit_memory ON ma_audit_log(memory_id);

        CREATE TABLE IF NOT EXISTS ma_event_promotions (
            event_id   TEXT PRIMARY KEY,
            fact_id    TEXT NOT NULL,
            promoted_at TEXT NOT NULL
        );",
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM ma_schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }
}
