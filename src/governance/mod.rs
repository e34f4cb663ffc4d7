//! Identity Schema Governor (C9, §4.8) — the three-approval state machine
//! gating every write to the `identity_schema` layer (L0).
//!
//! The state machine itself is the atomic `try_lock` primitive in
//! [`crate::metadata::lock`]; this module adds the business rules on top:
//! distinct-approver enforcement, the fixed approvals-needed count, and the
//! commit flow (`pending -> processing -> applied`, with rollback to
//! `pending` on a failed dual-store write).

use chrono::Utc;

use crate::error::{MemoryAnchorError, Result};
use crate::metadata::{identity, Storage};
use crate::types::{Approval, ChangeType, Category, IdentityChange, PendingStatus, APPROVALS_NEEDED};

pub struct IdentityGovernor {
    storage: Storage,
}

impl IdentityGovernor {
    pub fn new(storage: Storage) -> Self {
        IdentityGovernor { storage }
    }

    /// Roll any change stuck in `processing` (from a crash mid-commit) back
    /// to `pending`, called once at Kernel startup (§4.8 recovery note).
    pub fn recover(&self) -> Result<usize> {
        self.storage
            .with_connection(|conn| identity::recover_stuck_processing(conn, Utc::now()))
    }

    pub fn propose(
        &self,
        target_id: Option<String>,
        change_type: ChangeType,
        proposed_content: String,
        reason: Option<String>,
        category: Option<Category>,
    ) -> Result<IdentityChange> {
        let now = Utc::now();
        let change = IdentityChange {
            change_id: crate::types::new_id(),
            target_id,
            change_type,
            proposed_content,
            reason,
            category,
            status: PendingStatus::Pending,
            approvals: vec![],
            created_at: now,
            updated_at: now,
            applied_at: None,
        };
        self.storage.with_connection(|conn| identity::insert(conn, &change))?;
        Ok(change)
    }

    /// Cast one approval. Returns the change's new approval count; once it
    /// reaches [`APPROVALS_NEEDED`] the caller should invoke `commit` with
    /// the dual-store write closure.
    pub fn approve(&self, change_id: &str, approver: &str, comment: Option<String>) -> Result<usize> {
        let approval = Approval { approver: approver.to_string(), comment, timestamp: Utc::now() };
        self.storage
            .with_connection(|conn| identity::add_approval(conn, change_id, approval, Utc::now()))
    }

    pub fn reject(&self, change_id: &str) -> Result<bool> {
        self.storage.with_connection(|conn| identity::reject(conn, change_id, Utc::now()))
    }

    pub fn get(&self, change_id: &str) -> Result<Option<IdentityChange>> {
        self.storage.with_connection(|conn| identity::get(conn, change_id))
    }

    pub fn is_ready_to_commit(&self, change_id: &str) -> Result<bool> {
        let change = self
            .get(change_id)?
            .ok_or_else(|| MemoryAnchorError::NotFound(format!("identity change '{change_id}' not found")))?;
        Ok(change.status == PendingStatus::Pending && change.approvals.len() >= APPROVALS_NEEDED)
    }

    /// Commit a fully-approved change: atomically lock it (`pending ->
    /// processing`), run the caller's dual-store write, and either finalize
    /// to `approved` or roll back to `pending` on failure (§4.8).
    pub fn commit<F>(&self, change_id: &str, write: F) -> Result<()>
    where
        F: FnOnce(&IdentityChange) -> Result<()>,
    {
        if !self.is_ready_to_commit(change_id)? {
            return Err(MemoryAnchorError::Governance(format!(
                "identity change '{change_id}' does not have {APPROVALS_NEEDED} distinct approvals yet"
            )));
        }

        let locked = self
            .storage
            .with_connection(|conn| identity::try_lock_for_commit(conn, change_id, Utc::now()))?;
        if !locked {
            return Err(MemoryAnchorError::Conflict(format!(
                "identity change '{change_id}' was already claimed for commit"
            )));
        }

        let change = self
            .get(change_id)?
            .ok_or_else(|| MemoryAnchorError::NotFound(format!("identity change '{change_id}' not found")))?;

        match write(&change) {
            Ok(()) => {
                self.storage
                    .with_connection(|conn| identity::mark_applied(conn, change_id, Utc::now()))?;
                Ok(())
            }
            Err(e) => {
                self.storage
                    .with_connection(|conn| identity::unlock_to_pending(conn, change_id, Utc::now()))?;
                Err(e)
            }
        }
    }
}
