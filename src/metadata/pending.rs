//! CRUD + transitions for `ma_pending_memories` (§3.1 pending-approval
//! lifecycle): memories written below the auto-save confidence threshold
//! but at or above the pending threshold land here until a human approves
//! or rejects them, or they expire.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::Result;
use crate::metadata::lock;
use crate::types::{Approval, Category, ChangeType, Layer, PendingMemory, PendingStatus};

fn row_to_pending(row: &Row) -> rusqlite::Result<PendingMemory> {
    let layer: String = row.get("layer")?;
    let category: Option<String> = row.get("category")?;
    let status: String = row.get("status")?;
    let change_type: String = row.get("change_type")?;
    let approvals: String = row.get("approvals")?;
    let valid_at: Option<String> = row.get("valid_at")?;
    let expires_at: Option<String> = row.get("expires_at")?;
    let related_files: String = row.get("related_files")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(PendingMemory {
        id: row.get("id")?,
        content: row.get("content")?,
        layer: layer.parse().unwrap_or(Layer::OperationalKnowledge),
        category: category.and_then(|c| c.parse::<Category>().ok()),
        confidence: row.get("confidence")?,
        valid_at: valid_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        expires_at: expires_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
        session_id: row.get("session_id")?,
        related_files: serde_json::from_str(&related_files).unwrap_or_default(),
        is_active: row.get("is_active")?,
        status: status.parse().unwrap_or(PendingStatus::Pending),
        proposer: row.get("proposer")?,
        reason: row.get("reason")?,
        target_id: row.get("target_id")?,
        change_type: change_type.parse().unwrap_or(ChangeType::Create),
        approvals: serde_json::from_str(&approvals).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}

pub fn insert(conn: &Connection, pending: &PendingMemory) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_pending_memories
            (id, content, layer, category, confidence, valid_at, expires_at, session_id,
             related_files, is_active, status, proposer, reason, target_id,
             change_type, approvals, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)",
        params![
            pending.id,
            pending.content,
            pending.layer.as_str(),
            pending.category.map(|c| c.as_str()),
            pending.confidence,
            pending.valid_at.map(|t| t.to_rfc3339()),
            pending.expires_at.map(|t| t.to_rfc3339()),
            pending.session_id,
            serde_json::to_string(&pending.related_files)?,
            pending.is_active,
            pending.status.as_str(),
            pending.proposer,
            pending.reason,
            pending.target_id,
            pending.change_type.as_str(),
            serde_json::to_string(&pending.approvals)?,
            pending.created_at.to_rfc3339(),
            pending.updated_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<PendingMemory>> {
    Ok(conn
        .query_row(
            "SELECT * FROM ma_pending_memories WHERE id = ?1",
            params![id],
            row_to_pending,
        )
        .optional()?)
}

pub fn list_by_status(conn: &Connection, status: PendingStatus) -> Result<Vec<PendingMemory>> {
    let mut stmt = conn.prepare("SELECT * FROM ma_pending_memories WHERE status = ?1 ORDER BY created_at ASC")?;
    let rows = stmt.query_map(params![status.as_str()], row_to_pending)?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// Attempt the atomic `pending -> processing` lock ahead of a write-and-commit flow.
pub fn try_lock_for_commit(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_pending_memories",
        "id",
        id,
        PendingStatus::Pending.as_str(),
        PendingStatus::Processing.as_str(),
        Some("updated_at"),
        now,
    )
}

/// Roll back a failed commit attempt: `processing -> pending`, so the item
/// remains eligible for a later approval attempt.
pub fn unlock_to_pending(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_pending_memories",
        "id",
        id,
        PendingStatus::Processing.as_str(),
        PendingStatus::Pending.as_str(),
        Some("updated_at"),
        now,
    )
}

/// Reject a pending memory still awaiting approval (§3.2 transition table).
pub fn reject(conn: &Connection, id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_pending_memories",
        "id",
        id,
        PendingStatus::Pending.as_str(),
        PendingStatus::Rejected.as_str(),
        Some("updated_at"),
        now,
    )
}

/// Remove a pending row once it has been approved and committed (§4.10
/// approval-commit flow, step 4: "delete the pending row"). The approval
/// history already lives in `ma_audit_log` via the Kernel's own logging, so
/// nothing is lost by reclaiming the row.
pub fn delete(conn: &Connection, id: &str) -> Result<bool> {
    let changed = conn.execute("DELETE FROM ma_pending_memories WHERE id = ?1", params![id])?;
    Ok(changed == 1)
}

pub fn finalize(conn: &Connection, id: &str, status: PendingStatus, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_pending_memories",
        "id",
        id,
        PendingStatus::Processing.as_str(),
        status.as_str(),
        Some("updated_at"),
        now,
    )
}

pub fn add_approval(conn: &Connection, id: &str, approval: &Approval, now: DateTime<Utc>) -> Result<()> {
    let mut pending = get(conn, id)?.ok_or_else(|| {
        crate::error::MemoryAnchorError::NotFound(format!("pending memory '{id}' not found"))
    })?;
    pending.approvals.push(approval.clone());
    conn.execute(
        "UPDATE ma_pending_memories SET approvals = ?1, updated_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(&pending.approvals)?, now.to_rfc3339(), id],
    )?;
    Ok(())
}

pub fn expire_stale(conn: &Connection, older_than: DateTime<Utc>, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE ma_pending_memories SET status = ?1, updated_at = ?2
         WHERE status = ?3 AND created_at < ?4",
        params![
            PendingStatus::Expired.as_str(),
            now.to_rfc3339(),
            PendingStatus::Pending.as_str(),
            older_than.to_rfc3339(),
        ],
    )?;
    Ok(changed)
}

/// Startup recovery: any row stuck in `processing` past a crash is rolled
/// back to `pending` so it can be retried (§4.8 recovery note).
pub fn recover_stuck_processing(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE ma_pending_memories SET status = ?1, updated_at = ?2 WHERE status = ?3",
        params![
            PendingStatus::Pending.as_str(),
            now.to_rfc3339(),
            PendingStatus::Processing.as_str(),
        ],
    )?;
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;

    fn sample() -> PendingMemory {
        PendingMemory {
            id: new_id(),
            content: "maybe likes coffee".into(),
            layer: Layer::OperationalKnowledge,
            category: None,
            confidence: 0.75,
            valid_at: None,
            expires_at: None,
            session_id: None,
            related_files: vec![],
            is_active: true,
            status: PendingStatus::Pending,
            proposer: "agent".into(),
            reason: None,
            target_id: None,
            change_type: ChangeType::Create,
            approvals: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn lock_then_commit_then_cannot_relock() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let p = sample();
        insert(&conn, &p).unwrap();

        assert!(try_lock_for_commit(&conn, &p.id, Utc::now()).unwrap());
        assert!(!try_lock_for_commit(&conn, &p.id, Utc::now()).unwrap());

        assert!(finalize(&conn, &p.id, PendingStatus::Approved, Utc::now()).unwrap());
        let fetched = get(&conn, &p.id).unwrap().unwrap();
        assert_eq!(fetched.status, PendingStatus::Approved);
    }

    #[test]
    fn reject_then_delete() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let p = sample();
        insert(&conn, &p).unwrap();

        assert!(reject(&conn, &p.id, Utc::now()).unwrap());
        assert_eq!(get(&conn, &p.id).unwrap().unwrap().status, PendingStatus::Rejected);

        assert!(delete(&conn, &p.id).unwrap());
        assert!(get(&conn, &p.id).unwrap().is_none());
    }

    #[test]
    fn unlock_allows_retry() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let p = sample();
        insert(&conn, &p).unwrap();

        assert!(try_lock_for_commit(&conn, &p.id, Utc::now()).unwrap());
        assert!(unlock_to_pending(&conn, &p.id, Utc::now()).unwrap());
        assert!(try_lock_for_commit(&conn, &p.id, Utc::now()).unwrap());
    }
}
