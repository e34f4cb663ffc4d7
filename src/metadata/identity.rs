//! CRUD + transitions for `ma_identity_changes` — the L0 (identity-schema)
//! three-approval proposal queue (§4.8).

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{MemoryAnchorError, Result};
use crate::metadata::lock;
use crate::types::{Approval, Category, ChangeType, IdentityChange, PendingStatus};

fn row_to_change(row: &Row) -> rusqlite::Result<IdentityChange> {
    let change_type: String = row.get("change_type")?;
    let category: Option<String> = row.get("category")?;
    let status: String = row.get("status")?;
    let approvals: String = row.get("approvals")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    let applied_at: Option<String> = row.get("applied_at")?;
    Ok(IdentityChange {
        change_id: row.get("change_id")?,
        target_id: row.get("target_id")?,
        change_type: change_type.parse().unwrap_or(ChangeType::Create),
        proposed_content: row.get("proposed_content")?,
        reason: row.get("reason")?,
        category: category.and_then(|c| c.parse::<Category>().ok()),
        status: status.parse().unwrap_or(PendingStatus::Pending),
        approvals: serde_json::from_str(&approvals).unwrap_or_default(),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
        applied_at: applied_at.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)),
    })
}

pub fn insert(conn: &Connection, change: &IdentityChange) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_identity_changes
            (change_id, target_id, change_type, proposed_content, reason, category, status,
             approvals, created_at, updated_at, applied_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            change.change_id,
            change.target_id,
            change.change_type.as_str(),
            change.proposed_content,
            change.reason,
            change.category.map(|c| c.as_str()),
            change.status.as_str(),
            serde_json::to_string(&change.approvals)?,
            change.created_at.to_rfc3339(),
            change.updated_at.to_rfc3339(),
            change.applied_at.map(|t| t.to_rfc3339()),
        ],
    )?;
    Ok(())
}

pub fn get(conn: &Connection, change_id: &str) -> Result<Option<IdentityChange>> {
    Ok(conn
        .query_row(
            "SELECT * FROM ma_identity_changes WHERE change_id = ?1",
            params![change_id],
            row_to_change,
        )
        .optional()?)
}

/// Cast one approval, enforcing that the same approver may not count
/// twice toward the same change (§4.8 distinct-approver rule). Returns the
/// updated approval count.
pub fn add_approval(conn: &Connection, change_id: &str, approval: Approval, now: DateTime<Utc>) -> Result<usize> {
    let mut change = get(conn, change_id)?
        .ok_or_else(|| MemoryAnchorError::NotFound(format!("identity change '{change_id}' not found")))?;

    if change.status != PendingStatus::Pending {
        return Err(MemoryAnchorError::Governance(format!(
            "identity change '{change_id}' is not pending (status={})",
            change.status.as_str()
        )));
    }
    if change.approvals.iter().any(|a| a.approver == approval.approver) {
        return Err(MemoryAnchorError::Governance(format!(
            "'{}' has already approved this change",
            approval.approver
        )));
    }

    change.approvals.push(approval);
    conn.execute(
        "UPDATE ma_identity_changes SET approvals = ?1, updated_at = ?2 WHERE change_id = ?3",
        params![
            serde_json::to_string(&change.approvals)?,
            now.to_rfc3339(),
            change_id
        ],
    )?;
    Ok(change.approvals.len())
}

pub fn reject(conn: &Connection, change_id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_identity_changes",
        "change_id",
        change_id,
        PendingStatus::Pending.as_str(),
        PendingStatus::Rejected.as_str(),
        Some("updated_at"),
        now,
    )
}

/// `pending -> processing`: claim the change ahead of the dual-store commit.
pub fn try_lock_for_commit(conn: &Connection, change_id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_identity_changes",
        "change_id",
        change_id,
        PendingStatus::Pending.as_str(),
        PendingStatus::Processing.as_str(),
        Some("updated_at"),
        now,
    )
}

pub fn unlock_to_pending(conn: &Connection, change_id: &str, now: DateTime<Utc>) -> Result<bool> {
    lock::try_transition(
        conn,
        "ma_identity_changes",
        "change_id",
        change_id,
        PendingStatus::Processing.as_str(),
        PendingStatus::Pending.as_str(),
        Some("updated_at"),
        now,
    )
}

pub fn mark_applied(conn: &Connection, change_id: &str, now: DateTime<Utc>) -> Result<bool> {
    let changed = conn.execute(
        "UPDATE ma_identity_changes SET status = ?1, updated_at = ?2, applied_at = ?2
         WHERE change_id = ?3 AND status = ?4",
        params![
            PendingStatus::Approved.as_str(),
            now.to_rfc3339(),
            change_id,
            PendingStatus::Processing.as_str(),
        ],
    )?;
    Ok(changed == 1)
}

pub fn recover_stuck_processing(conn: &Connection, now: DateTime<Utc>) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE ma_identity_changes SET status = ?1, updated_at = ?2 WHERE status = ?3",
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

    fn sample() -> IdentityChange {
        IdentityChange {
            change_id: new_id(),
            target_id: None,
            change_type: ChangeType::Create,
            proposed_content: "user's name is Alex".into(),
            reason: Some("confirmed in conversation".into()),
            category: Some(Category::Person),
            status: PendingStatus::Pending,
            approvals: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
            applied_at: None,
        }
    }

    fn approval(who: &str) -> Approval {
        Approval {
            approver: who.into(),
            comment: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn same_approver_cannot_double_approve() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let c = sample();
        insert(&conn, &c).unwrap();

        add_approval(&conn, &c.change_id, approval("alice"), Utc::now()).unwrap();
        let err = add_approval(&conn, &c.change_id, approval("alice"), Utc::now()).unwrap_err();
        assert!(matches!(err, MemoryAnchorError::Governance(_)));
    }

    #[test]
    fn three_distinct_approvals_then_commit_flow() {
        let conn = Connection::open_in_memory().unwrap();
        crate::metadata::migrations::run_migrations(&conn).unwrap();
        let c = sample();
        insert(&conn, &c).unwrap();

        let n1 = add_approval(&conn, &c.change_id, approval("alice"), Utc::now()).unwrap();
        let n2 = add_approval(&conn, &c.change_id, approval("bob"), Utc::now()).unwrap();
        let n3 = add_approval(&conn, &c.change_id, approval("carol"), Utc::now()).unwrap();
        assert_eq!((n1, n2, n3), (1, 2, 3));

        assert!(try_lock_for_commit(&conn, &c.change_id, Utc::now()).unwrap());
        assert!(mark_applied(&conn, &c.change_id, Utc::now()).unwrap());
        let fetched = get(&conn, &c.change_id).unwrap().unwrap();
        assert_eq!(fetched.status, PendingStatus::Approved);
        assert!(fetched.applied_at.is_some());
    }
}
