//! Embedded local-file Vector Store backend (§4.1, local-file mode).
//!
//! Grounded in the teacher's `storage::connection` (single connection behind
//! a `parking_lot::Mutex`, WAL-style pragmas) repurposed here for vectors
//! rather than metadata, using the `sqlite-vec` virtual table extension the
//! teacher already depends on for its own embedded ANN search.

use std::path::Path;
use std::sync::Once;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{MemoryAnchorError, Result};
use crate::types::Payload;
use crate::vector::{
    dimension_error, sanitize_ident, Filter, ScoredPoint, ScrollPage, UpsertOutcome, VectorPoint,
    VectorStore,
};

static REGISTER_EXTENSION: Once = Once::new();

fn register_vec_extension() {
    REGISTER_EXTENSION.call_once(|| unsafe {
        // Documented sqlite-vec registration pattern: load the extension's
        // entry point as a connection-wide auto-extension before any
        // `Connection::open` call.
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite_vec::sqlite3_vec_init as *const (),
        )));
    });
}

pub struct LocalVectorStore {
    conn: Mutex<Connection>,
}

impl LocalVectorStore {
    pub fn open(path: &Path) -> Result<Self> {
        register_vec_extension();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        register_vec_extension();
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA foreign_keys=ON;
             CREATE TABLE IF NOT EXISTS ma_vector_collections (
                 name TEXT PRIMARY KEY,
                 dim  INTEGER NOT NULL
             );",
        )?;
        Ok(LocalVectorStore {
            conn: Mutex::new(conn),
        })
    }

    fn table_names(name: &str) -> (String, String) {
        let ident = sanitize_ident(name);
        (format!("ma_vec_{ident}"), format!("ma_meta_{ident}"))
    }

    fn known_dim(conn: &Connection, name: &str) -> Result<Option<usize>> {
        let dim: Option<i64> = conn
            .query_row(
                "SELECT dim FROM ma_vector_collections WHERE name = ?1",
                params![name],
                |r| r.get(0),
            )
            .optional()?;
        Ok(dim.map(|d| d as usize))
    }

    fn row_to_point(id: String, payload_json: String, score: f32) -> Result<ScoredPoint> {
        let payload: Payload = serde_json::from_str(&payload_json)?;
        Ok(ScoredPoint { id, score, payload })
    }
}

impl VectorStore for LocalVectorStore {
    fn ensure_collection(&self, name: &str, dim: usize) -> Result<()> {
        let conn = self.conn.lock();
        if let Some(existing) = Self::known_dim(&conn, name)? {
            if existing != dim {
                return Err(dimension_error(existing, dim));
            }
            return Ok(());
        }
        let (vec_table, meta_table) = Self::table_names(name);
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {vec_table} USING vec0(
                 embedding float[{dim}] distance_metric=cosine
             );
             CREATE TABLE IF NOT EXISTS {meta_table} (
                 rowid  INTEGER PRIMARY KEY,
                 id     TEXT UNIQUE NOT NULL,
                 payload TEXT NOT NULL
             );"
        ))?;
        conn.execute(
            "INSERT INTO ma_vector_collections (name, dim) VALUES (?1, ?2)",
            params![name, dim as i64],
        )?;
        Ok(())
    }

    fn upsert(&self, name: &str, point: VectorPoint) -> Result<()> {
        self.batch_upsert(name, vec![point]).map(|_| ())
    }

    fn batch_upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<Vec<UpsertOutcome>> {
        let conn = self.conn.lock();
        let dim = Self::known_dim(&conn, name)?.ok_or_else(|| {
            MemoryAnchorError::NotFound(format!("vector collection '{name}' not found"))
        })?;
        let (vec_table, meta_table) = Self::table_names(name);
        let mut outcomes = Vec::with_capacity(points.len());

        for point in points {
            let id = point.id.clone();
            let outcome = (|| -> Result<()> {
                if point.vector.len() != dim {
                    return Err(dimension_error(dim, point.vector.len()));
                }
                let existing_rowid: Option<i64> = conn
                    .query_row(
                        &format!("SELECT rowid FROM {meta_table} WHERE id = ?1"),
                        params![point.id],
                        |r| r.get(0),
                    )
                    .optional()?;
                if let Some(rowid) = existing_rowid {
                    conn.execute(
                        &format!("DELETE FROM {vec_table} WHERE rowid = ?1"),
                        params![rowid],
                    )?;
                    conn.execute(
                        &format!("DELETE FROM {meta_table} WHERE rowid = ?1"),
                        params![rowid],
                    )?;
                }
                let payload_json = serde_json::to_string(&point.payload)?;
                conn.execute(
                    &format!("INSERT INTO {meta_table} (id, payload) VALUES (?1, ?2)"),
                    params![point.id, payload_json],
                )?;
                let new_rowid = conn.last_insert_rowid();
                let vector_bytes: Vec<u8> = point
                    .vector
                    .iter()
                    .flat_map(|f| f.to_le_bytes())
                    .collect();
                conn.execute(
                    &format!("INSERT INTO {vec_table} (rowid, embedding) VALUES (?1, ?2)"),
                    params![new_rowid, vector_bytes],
                )?;
                Ok(())
            })();

            match outcome {
                Ok(()) => outcomes.push(UpsertOutcome {
                    id,
                    ok: true,
                    error: None,
                }),
                Err(e) => outcomes.push(UpsertOutcome {
                    id,
                    ok: false,
                    error: Some(e.to_string()),
                }),
            }
        }
        Ok(outcomes)
    }

    fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>> {
        let conn = self.conn.lock();
        let dim = Self::known_dim(&conn, name)?.ok_or_else(|| {
            MemoryAnchorError::NotFound(format!("vector collection '{name}' not found"))
        })?;
        if query_vector.len() != dim {
            return Err(dimension_error(dim, query_vector.len()));
        }
        let (vec_table, meta_table) = Self::table_names(name);
        // Oversample when a payload filter is present: vec0 only ranks by
        // distance, so filtering happens after the fact in Rust.
        let fetch_k = if filter.is_some() { (k * 8).max(k) } else { k };
        let query_bytes: Vec<u8> = query_vector.iter().flat_map(|f| f.to_le_bytes()).collect();

        let sql = format!(
            "SELECT v.rowid, m.id, m.payload, v.distance
             FROM {vec_table} v JOIN {meta_table} m ON m.rowid = v.rowid
             WHERE v.embedding MATCH ?1 AND k = ?2
             ORDER BY v.distance"
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![query_bytes, fetch_k as i64], |r| {
            let id: String = r.get(1)?;
            let payload_json: String = r.get(2)?;
            let distance: f64 = r.get(3)?;
            Ok((id, payload_json, distance))
        })?;

        let mut results = Vec::new();
        for row in rows {
            let (id, payload_json, distance) = row?;
            let point = Self::row_to_point(id, payload_json, (1.0 - distance) as f32)?;
            if filter.map(|f| f.matches(&point.payload)).unwrap_or(true) {
                results.push(point);
            }
            if results.len() >= k {
                break;
            }
        }
        Ok(results)
    }

    fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        page_size: usize,
    ) -> Result<ScrollPage> {
        let conn = self.conn.lock();
        Self::known_dim(&conn, name)?.ok_or_else(|| {
            MemoryAnchorError::NotFound(format!("vector collection '{name}' not found"))
        })?;
        let (_, meta_table) = Self::table_names(name);
        let start_rowid: i64 = cursor.as_deref().and_then(|c| c.parse().ok()).unwrap_or(0);

        let mut stmt = conn.prepare(&format!(
            "SELECT rowid, id, payload FROM {meta_table} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
        ))?;
        // Fetch one extra row to know whether another page follows.
        let rows = stmt.query_map(params![start_rowid, (page_size + 1) as i64], |r| {
            let rowid: i64 = r.get(0)?;
            let id: String = r.get(1)?;
            let payload_json: String = r.get(2)?;
            Ok((rowid, id, payload_json))
        })?;

        let mut points = Vec::new();
        let mut next_cursor = None;
        for row in rows {
            let (rowid, id, payload_json) = row?;
            if points.len() == page_size {
                next_cursor = Some(rowid.to_string());
                break;
            }
            let point = Self::row_to_point(id, payload_json, 0.0)?;
            if filter.map(|f| f.matches(&point.payload)).unwrap_or(true) {
                points.push(point);
            }
        }
        Ok(ScrollPage { points, next_cursor })
    }

    fn update_payload(&self, name: &str, id: &str, partial: Payload) -> Result<()> {
        let conn = self.conn.lock();
        let (_, meta_table) = Self::table_names(name);
        let existing: Option<String> = conn
            .query_row(
                &format!("SELECT payload FROM {meta_table} WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(existing) = existing else {
            return Err(MemoryAnchorError::NotFound(format!(
                "point '{id}' not found in '{name}'"
            )));
        };
        let mut payload: Payload = serde_json::from_str(&existing)?;
        payload.extend(partial);
        let payload_json = serde_json::to_string(&payload)?;
        conn.execute(
            &format!("UPDATE {meta_table} SET payload = ?1 WHERE id = ?2"),
            params![payload_json, id],
        )?;
        Ok(())
    }

    fn delete(&self, name: &str, id: &str) -> Result<()> {
        let conn = self.conn.lock();
        let (vec_table, meta_table) = Self::table_names(name);
        let rowid: Option<i64> = conn
            .query_row(
                &format!("SELECT rowid FROM {meta_table} WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        if let Some(rowid) = rowid {
            conn.execute(
                &format!("DELETE FROM {vec_table} WHERE rowid = ?1"),
                params![rowid],
            )?;
            conn.execute(
                &format!("DELETE FROM {meta_table} WHERE rowid = ?1"),
                params![rowid],
            )?;
        }
        Ok(())
    }

    fn get_vector(&self, name: &str, id: &str) -> Result<Option<Vec<f32>>> {
        let conn = self.conn.lock();
        let (vec_table, meta_table) = Self::table_names(name);
        let rowid: Option<i64> = conn
            .query_row(
                &format!("SELECT rowid FROM {meta_table} WHERE id = ?1"),
                params![id],
                |r| r.get(0),
            )
            .optional()?;
        let Some(rowid) = rowid else { return Ok(None) };
        let bytes: Vec<u8> = conn.query_row(
            &format!("SELECT embedding FROM {vec_table} WHERE rowid = ?1"),
            params![rowid],
            |r| r.get(0),
        )?;
        Ok(Some(
            bytes
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        ))
    }

    fn ping(&self) -> Result<()> {
        self.conn.lock().execute_batch("SELECT 1;")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn point(id: &str, v: f32) -> VectorPoint {
        let mut payload = Payload::new();
        payload.insert("valid_at".into(), json!(null));
        payload.insert("expires_at".into(), json!(null));
        VectorPoint {
            id: id.to_string(),
            vector: vec![v, 1.0 - v],
            payload,
        }
    }

    #[test]
    fn ensure_collection_rejects_dimension_change() {
        let store = LocalVectorStore::open_in_memory().unwrap();
        store.ensure_collection("notes", 2).unwrap();
        let err = store.ensure_collection("notes", 3).unwrap_err();
        assert!(matches!(err, MemoryAnchorError::DimensionMismatch { .. }));
    }

    #[test]
    fn upsert_then_search_returns_nearest() {
        let store = LocalVectorStore::open_in_memory().unwrap();
        store.ensure_collection("notes", 2).unwrap();
        store.upsert("notes", point("a", 1.0)).unwrap();
        store.upsert("notes", point("b", 0.0)).unwrap();

        let hits = store.search("notes", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[test]
    fn get_vector_roundtrips_the_stored_embedding() {
        let store = LocalVectorStore::open_in_memory().unwrap();
        store.ensure_collection("notes", 2).unwrap();
        store.upsert("notes", point("a", 0.25)).unwrap();

        let v = store.get_vector("notes", "a").unwrap().unwrap();
        assert!((v[0] - 0.25).abs() < 1e-6);
        assert!(store.get_vector("notes", "missing").unwrap().is_none());
    }

    #[test]
    fn delete_removes_point() {
        let store = LocalVectorStore::open_in_memory().unwrap();
        store.ensure_collection("notes", 2).unwrap();
        store.upsert("notes", point("a", 1.0)).unwrap();
        store.delete("notes", "a").unwrap();
        let hits = store.search("notes", &[1.0, 0.0], 5, None).unwrap();
        assert!(hits.is_empty());
    }
}
