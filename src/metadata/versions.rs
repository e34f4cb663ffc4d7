//! Read side of `ma_memory_versions` (writes live in
//! [`crate::metadata::memories::record_version`]) — content/metadata
//! history for every update, mirroring the audit trail spec.md already
//! requires for L0 entries extended to all layers (§3 supplement).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};

use crate::error::Result;

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemoryVersionRecord {
    pub version_id: i64,
    pub memory_id: String,
    pub content: String,
    pub metadata: serde_json::Value,
    pub change_summary: Option<String>,
    pub created_at: DateTime<Utc>,
}

fn row_to_version(row: &Row) -> rusqlite::Result<MemoryVersionRecord> {
    let metadata: String = row.get("metadata")?;
    let created_at: String = row.get("created_at")?;
    Ok(MemoryVersionRecord {
        version_id: row.get("version_id")?,
        memory_id: row.get("memory_id")?,
        content: row.get("content")?,
        metadata: serde_json::from_str(&metadata).unwrap_or(serde_json::Value::Null),
        change_summary: row.get("change_summary")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

pub fn history(conn: &Connection, memory_id: &str) -> Result<Vec<MemoryVersionRecord>> {
    let mut stmt = conn.prepare(
        "SELECT * FROM ma_memory_versions WHERE memory_id = ?1 ORDER BY created_at ASC",
    )?;
    let rows = stmt.query_map(params![memory_id], row_to_version)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::memories::record_version;

    #[test]
    fn history_accumulates_in_order() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        record_version(&conn, &"m1".to_string(), "v1", &serde_json::json!({}), Some("initial"), Utc::now()).unwrap();
        record_version(&conn, &"m1".to_string(), "v2", &serde_json::json!({}), Some("correction"), Utc::now()).unwrap();

        let versions = history(&conn, "m1").unwrap();
        assert_eq!(versions.len(), 2);
        assert_eq!(versions[1].content, "v2");
    }
}
