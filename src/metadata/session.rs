//! CRUD for `ma_session_archive` — working-session state (§3.1 SessionState).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::types::SessionState;

fn row_to_session(row: &Row) -> rusqlite::Result<SessionState> {
    let source_files: String = row.get("source_files")?;
    let started_at: String = row.get("started_at")?;
    let ended_at: Option<String> = row.get("ended_at")?;
    Ok(SessionState {
        session_id: row.get("session_id")?,
        started_at: DateTime::parse_from_rfc3339(&started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        source_files: serde_json::from_str(&source_files).unwrap_or_default(),
        memory_ops_count: row.get("memory_ops_count")?,
        file_mods_count: row.get("file_mods_count")?,
        ended_at: ended_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
    })
}

pub fn start(conn: &Connection, session_id: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_session_archive (session_id, started_at, source_files, memory_ops_count, file_mods_count, ended_at)
         VALUES (?1, ?2, '[]', 0, 0, NULL)",
        params![session_id, now.to_rfc3339()],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, session_id: &str) -> Result<Option<SessionState>> {
    Ok(conn
        .query_row(
            "SELECT * FROM ma_session_archive WHERE session_id = ?1",
            params![session_id],
            row_to_session,
        )
        .optional()?)
}

pub fn record_memory_op(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE ma_session_archive SET memory_ops_count = memory_ops_count + 1 WHERE session_id = ?1",
        params![session_id],
    )?;
    Ok(())
}

pub fn record_file_touch(conn: &Connection, session_id: &str, path: &str) -> Result<()> {
    let Some(mut session) = get(conn, session_id)? else {
        return Ok(());
    };
    if !session.source_files.iter().any(|p| p == path) {
        session.source_files.push(path.to_string());
    }
    conn.execute(
        "UPDATE ma_session_archive SET source_files = ?1, file_mods_count = file_mods_count + 1 WHERE session_id = ?2",
        params![serde_json::to_string(&session.source_files)?, session_id],
    )?;
    Ok(())
}

pub fn end(conn: &Connection, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
    Ok(conn.execute(
        "UPDATE ma_session_archive SET ended_at = ?1 WHERE session_id = ?2 AND ended_at IS NULL",
        params![now.to_rfc3339(), session_id],
    )? == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_record_end_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        start(&conn, "s1", Utc::now()).unwrap();
        record_memory_op(&conn, "s1").unwrap();
        record_file_touch(&conn, "s1", "src/lib.rs").unwrap();
        end(&conn, "s1", Utc::now()).unwrap();

        let session = get(&conn, "s1").unwrap().unwrap();
        assert_eq!(session.memory_ops_count, 1);
        assert_eq!(session.file_mods_count, 1);
        assert_eq!(session.source_files, vec!["src/lib.rs".to_string()]);
        assert!(session.ended_at.is_some());
    }
}
