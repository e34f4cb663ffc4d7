//! CRUD for the `ma_memories` table — the relational half of each
//! persisted [`Memory`] (§3.1).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::types::{Category, Layer, Memory, MemoryId};

fn row_to_memory(row: &Row) -> rusqlite::Result<Memory> {
    let layer: String = row.get("layer")?;
    let category: Option<String> = row.get("category")?;
    let related_files: String = row.get("related_files")?;
    let created_at: String = row.get("created_at")?;
    let valid_at: Option<String> = row.get("valid_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        layer: layer.parse().unwrap_or(Layer::OperationalKnowledge),
        category: category.and_then(|c| c.parse::<Category>().ok()),
        confidence: row.get("confidence")?,
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        valid_at: valid_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        expires_at: expires_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        created_by: row.get("created_by")?,
        session_id: row.get("session_id")?,
        related_files: serde_json::from_str(&related_files).unwrap_or_default(),
        is_active: row.get::<_, i64>("is_active")? != 0,
    })
}

pub fn insert(conn: &Connection, memory: &Memory) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_memories
            (id, content, layer, category, confidence, created_at, valid_at, expires_at,
             created_by, session_id, related_files, is_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            memory.id,
            memory.content,
            memory.layer.as_str(),
            memory.category.map(|c| c.as_str()),
            memory.confidence,
            memory.created_at.to_rfc3339(),
            memory.valid_at.map(|t| t.to_rfc3339()),
            memory.expires_at.map(|t| t.to_rfc3339()),
            memory.created_by,
            memory.session_id,
            serde_json::to_string(&memory.related_files)?,
            memory.is_active as i64,
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Memory>> {
    Ok(conn
        .query_row("SELECT * FROM ma_memories WHERE id = ?1", params![id], row_to_memory)
        .optional()?)
}

pub fn update_content(
    conn: &Connection,
    id: &str,
    content: &str,
    confidence: f32,
) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE ma_memories SET content = ?1, confidence = ?2 WHERE id = ?3",
        params![content, confidence, id],
    )?;
    Ok(changed == 1)
}

pub fn set_active(conn: &Connection, id: &str, active: bool) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE ma_memories SET is_active = ?1 WHERE id = ?2",
        params![active as i64, id],
    )?;
    Ok(changed == 1)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM ma_memories WHERE id = ?1", params![id])?;
    Ok(changed == 1)
}

pub fn list_by_layer(conn: &Connection, layer: Layer, include_inactive: bool) -> Result<Vec<Memory>> {
    let sql = if include_inactive {
        "SELECT * FROM ma_memories WHERE layer = ?1 ORDER BY created_at DESC"
    } else {
        "SELECT * FROM ma_memories WHERE layer = ?1 AND is_active = 1 ORDER BY created_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![layer.as_str()], row_to_memory)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

pub fn all_active_identity_schema(conn: &Connection) -> Result<Vec<Memory>> {
    list_by_layer(conn, Layer::IdentitySchema, false)
}

pub fn record_version(
    conn: &Connection,
    memory_id: &MemoryId,
    content: &str,
    metadata: &serde_json::Value,
    change_summary: Option<&str>,
    now: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_memory_versions (memory_id, content, metadata, change_summary, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            memory_id,
            content,
            serde_json::to_string(metadata)?,
            change_summary,
            now.to_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;

    fn sample() -> Memory {
        Memory {
            id: new_id(),
            content: "likes tea".into(),
            layer: Layer::OperationalKnowledge,
            category: Some(Category::Person),
            confidence: 0.95,
            created_at: Utc::now(),
            valid_at: None,
            expires_at: None,
            created_by: "agent".into(),
            session_id: None,
            related_files: vec![],
            is_active: true,
        }
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let m = sample();
        insert(&conn, &m).unwrap();
        let fetched = get(&conn, &m.id).unwrap().unwrap();
        assert_eq!(fetched.content, m.content);
        assert_eq!(fetched.layer, Layer::OperationalKnowledge);
    }

    #[test]
    fn set_active_toggles_soft_delete() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let m = sample();
        insert(&conn, &m).unwrap();
        assert!(set_active(&conn, &m.id, false).unwrap());
        let fetched = get(&conn, &m.id).unwrap().unwrap();
        assert!(!fetched.is_active);
    }
}
