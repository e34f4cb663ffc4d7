//! Connection management for the Metadata Store.
//!
//! Grounded in the teacher's `storage::connection::Storage`: a single
//! `rusqlite::Connection` behind a `parking_lot::Mutex`, opened with WAL
//! pragmas for durability and concurrent-reader friendliness, with
//! migrations applied once at open time.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::Connection;

use crate::error::Result;
use crate::metadata::migrations;

/// A handle to the Metadata Store's single SQLite connection.
///
/// Cloning shares the same underlying connection (matches the teacher's
/// `impl Clone for Storage`, which clones the `Arc<Mutex<Connection>>`).
#[derive(Clone)]
pub struct Storage {
    conn: Arc<Mutex<Connection>>,
    db_path: Option<PathBuf>,
}

impl Storage {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::configure_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Storage {
            conn: Arc::new(Mutex::new(conn)),
            db_path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure_pragmas(&conn)?;
        migrations::run_migrations(&conn)?;
        Ok(Storage {
            conn: Arc::new(Mutex::new(conn)),
            db_path: None,
        })
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA busy_timeout=5000;
             PRAGMA foreign_keys=ON;
             PRAGMA temp_store=MEMORY;",
        )?;
        Ok(())
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Run a closure with exclusive access to the connection.
    pub fn with_connection<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Run a closure inside a SQLite transaction, committing on `Ok`.
    pub fn with_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }

    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .lock()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_runs_migrations() {
        let storage = Storage::open_in_memory().unwrap();
        storage
            .with_connection(|conn| {
                let version: i64 =
                    conn.query_row("SELECT MAX(version) FROM ma_schema_version", [], |r| {
                        r.get(0)
                    })?;
                assert_eq!(version, migrations::SCHEMA_VERSION as i64);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn clone_shares_connection() {
        let storage = Storage::open_in_memory().unwrap();
        let clone = storage.clone();
        storage
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO ma_checklist_items (id, project_id, content, status, scope, priority, tags, created_at, updated_at, completed_at, expires_at) VALUES ('x','p','c','open','project',5,'[]','2024-01-01T00:00:00Z','2024-01-01T00:00:00Z',NULL,NULL)",
                    [],
                )?;
                Ok(())
            })
            .unwrap();
        clone
            .with_connection(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM ma_checklist_items", [], |r| r.get(0))?;
                assert_eq!(count, 1);
                Ok(())
            })
            .unwrap();
    }
}
