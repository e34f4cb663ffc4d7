//! The optimistic-lock primitive underlying every governed state
//! transition (§4.8 approval flow, §3.1 pending-memory transitions).
//!
//! A "lock" here is nothing more than an atomic conditional `UPDATE ...
//! SET status = <new> WHERE id = ? AND status = <expected>`: SQLite's
//! single-writer model makes the row-count check on this statement a
//! reliable compare-and-swap, with no separate locking API needed.

use rusqlite::{params, Connection};

use crate::error::Result;

/// Attempt to transition `table.status` for `id` from `expected` to `next`.
/// Returns `true` iff the row existed with `status = expected` and was
/// updated; `false` means someone else already moved it (or it doesn't
/// exist), and the caller must not treat that as a hard error — reject or
/// retry with a fresh read are both expected callers.
pub fn try_transition(
    conn: &Connection,
    table: &str,
    id_column: &str,
    id: &str,
    expected: &str,
    next: &str,
    updated_at_column: Option<&str>,
    now: chrono::DateTime<chrono::Utc>,
) -> Result<bool> {
    let sql = match updated_at_column {
        Some(col) => format!(
            "UPDATE {table} SET status = ?1, {col} = ?2 WHERE {id_column} = ?3 AND status = ?4"
        ),
        None => format!("UPDATE {table} SET status = ?1 WHERE {id_column} = ?2 AND status = ?3"),
    };
    let changed = match updated_at_column {
        Some(_) => conn.execute(&sql, params![next, now.to_rfc3339(), id, expected])?,
        None => conn.execute(&sql, params![next, id, expected])?,
    };
    Ok(changed == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn transition_fails_when_status_mismatches() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE t (id TEXT PRIMARY KEY, status TEXT NOT NULL, updated_at TEXT);
             INSERT INTO t (id, status, updated_at) VALUES ('a', 'pending', 'x');",
        )
        .unwrap();

        let ok = try_transition(&conn, "t", "id", "a", "processing", "approved", Some("updated_at"), Utc::now())
            .unwrap();
        assert!(!ok);

        let ok = try_transition(&conn, "t", "id", "a", "pending", "processing", Some("updated_at"), Utc::now())
            .unwrap();
        assert!(ok);

        // Second attempt from the same expected state now fails — it already moved.
        let ok = try_transition(&conn, "t", "id", "a", "pending", "processing", Some("updated_at"), Utc::now())
            .unwrap();
        assert!(!ok);
    }
}
