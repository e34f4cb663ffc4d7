//! CRUD for `ma_checklist_items` backing the Checklist Engine (C13, §4.12).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::types::{ChecklistItem, ChecklistScope, ChecklistStatus};

fn row_to_item(row: &Row) -> rusqlite::Result<ChecklistItem> {
    let status: String = row.get("status")?;
    let scope: String = row.get("scope")?;
    let tags: String = row.get("tags")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    Ok(ChecklistItem {
        id: row.get("id")?,
        project_id: row.get("project_id")?,
        content: row.get("content")?,
        status: status.parse().unwrap_or(ChecklistStatus::Open),
        scope: scope.parse().unwrap_or(ChecklistScope::Project),
        priority: row.get::<_, i64>("priority")? as u8,
        tags: serde_json::from_str(&tags).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        completed_at: completed_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        expires_at: expires_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
    })
}

pub fn insert(conn: &Connection, item: &ChecklistItem) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_checklist_items
            (id, project_id, content, status, scope, priority, tags, created_at, updated_at,
             completed_at, expires_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            item.id,
            item.project_id,
            item.content,
            item.status.as_str(),
            item.scope.as_str(),
            item.priority as i64,
            serde_json::to_string(&item.tags)?,
            item.created_at.to_rfc3339(),
            item.updated_at.to_rfc3339(),
            item.completed_at.map(|t| t.to_rfc3339()),
            item.expires_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<ChecklistItem>> {
    Ok(conn
        .query_row("SELECT * FROM ma_checklist_items WHERE id = ?1", params![id], row_to_item)
        .optional()?)
}

pub fn update(
    conn: &Connection,
    id: &str,
    status: Option<ChecklistStatus>,
    priority: Option<u8>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let Some(mut item) = get(conn, id)? else {
        return Ok(false);
    };
    if let Some(s) = status {
        item.status = s;
        item.completed_at = if s == ChecklistStatus::Done { Some(now) } else { item.completed_at };
    }
    if let Some(p) = priority {
        item.priority = p;
    }
    item.updated_at = now;
    conn.execute(
        "UPDATE ma_checklist_items
         SET status = ?1, priority = ?2, updated_at = ?3, completed_at = ?4
         WHERE id = ?5",
        params![
            item.status.as_str(),
            item.priority as i64,
            item.updated_at.to_rfc3339(),
            item.completed_at.map(|t| t.to_rfc3339()),
            id,
        ],
    )?;
    Ok(true)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM ma_checklist_items WHERE id = ?1", params![id])? == 1)
}

pub fn list(conn: &Connection, project_id: &str, include_done: bool) -> Result<Vec<ChecklistItem>> {
    let sql = if include_done {
        "SELECT * FROM ma_checklist_items WHERE project_id = ?1 ORDER BY priority ASC, created_at ASC"
    } else {
        "SELECT * FROM ma_checklist_items WHERE project_id = ?1 AND status = 'open' ORDER BY priority ASC, created_at ASC"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![project_id], row_to_item)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;

    fn sample(project: &str, priority: u8) -> ChecklistItem {
        ChecklistItem {
            id: new_id(),
            project_id: project.into(),
            content: "write tests".into(),
            status: ChecklistStatus::Open,
            scope: ChecklistScope::Project,
            priority,
            tags: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            completed_at: None,
            expires_at: None,
        }
    }

    #[test]
    fn list_orders_by_priority_then_created_at() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        insert(&conn, &sample("p1", 5)).unwrap();
        insert(&conn, &sample("p1", 1)).unwrap();

        let items = list(&conn, "p1", false).unwrap();
        assert_eq!(items[0].priority, 1);
        assert_eq!(items[1].priority, 5);
    }

    #[test]
    fn update_to_done_sets_completed_at() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let item = sample("p1", 1);
        insert(&conn, &item).unwrap();

        update(&conn, &item.id, Some(ChecklistStatus::Done), None, Utc::now()).unwrap();
        let fetched = get(&conn, &item.id).unwrap().unwrap();
        assert_eq!(fetched.status, ChecklistStatus::Done);
        assert!(fetched.completed_at.is_some());
    }
}
