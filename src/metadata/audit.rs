//! Append-only audit log (ambient, grounded in the teacher's
//! `storage::audit` module): every Kernel mutation is recorded here
//! regardless of which Non-goals exclude the outer façade.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub action: String,
    pub actor: String,
    pub memory_id: Option<String>,
    pub diff: Option<String>,
    pub timestamp: DateTime<Utc>,
}

fn row_to_entry(row: &Row) -> rusqlite::Result<AuditEntry> {
    let timestamp: String = row.get("timestamp")?;
    Ok(AuditEntry {
        id: row.get("id")?,
        action: row.get("action")?,
        actor: row.get("actor")?,
        memory_id: row.get("memory_id")?,
        diff: row.get("diff")?,
        timestamp: DateTime::parse_from_rfc3339(&timestamp)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

pub fn log(
    conn: &Connection,
    action: &str,
    actor: &str,
    memory_id: Option<&str>,
    diff: Option<&serde_json::Value>,
    now: DateTime<Utc>,
) -> Result<i64> {
    conn.execute(
        "INSERT INTO ma_audit_log (action, actor, memory_id, diff, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            action,
            actor,
            memory_id,
            diff.map(|d| d.to_string()),
            now.to_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<AuditEntry>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM ma_audit_log WHERE memory_id = ?1 ORDER BY timestamp ASC",
    )?;
    let rows = stmt.query_map(params![memory_id], row_to_entry)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn logs_and_queries_by_memory() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        log(&conn, "create", "agent", Some("m1"), None, Utc::now()).unwrap();
        log(&conn, "update", "agent", Some("m1"), None, Utc::now()).unwrap();
        log(&conn, "create", "agent", Some("m2"), None, Utc::now()).unwrap();

        let entries = for_memory(&conn, "m1").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "create");
    }
}
