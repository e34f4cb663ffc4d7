//! Vector Store (C2, spec §4.1)
//!
//! Namespaced collections of `(id, vector, payload)` points with ANN search
//! and payload filters. Two backends exist: [`local::LocalVectorStore`]
//! (embedded, single-process) and, behind the `qdrant` feature,
//! [`qdrant_backend::QdrantVectorStore`] (network mode).

pub mod local;
#[cfg(feature = "qdrant")]
pub mod qdrant_backend;

use crate::error::{MemoryAnchorError, Result};
use crate::types::Payload;
use serde_json::Value;

/// A point to be written to a collection.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// A scored search hit.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Payload,
}

/// Outcome of one point within a batch upsert (§4.1 at-least-once semantics).
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub id: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// One page of a `scroll` enumeration.
#[derive(Debug, Clone)]
pub struct ScrollPage {
    pub points: Vec<ScoredPoint>,
    pub next_cursor: Option<String>,
}

/// A single equality/range/null-check predicate over a payload field.
#[derive(Debug, Clone)]
pub enum FieldPredicate {
    Eq(Value),
    Gte(Value),
    Lte(Value),
    Gt(Value),
    Lt(Value),
    IsNull,
    IsNotNull,
}

/// DNF-composable payload filter (§4.1: "equality, range, and is-null predicates").
#[derive(Debug, Clone)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Field(String, FieldPredicate),
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: Value) -> Self {
        Filter::Field(field.into(), FieldPredicate::Eq(value))
    }

    pub fn is_null(field: impl Into<String>) -> Self {
        Filter::Field(field.into(), FieldPredicate::IsNull)
    }

    pub fn is_not_null(field: impl Into<String>) -> Self {
        Filter::Field(field.into(), FieldPredicate::IsNotNull)
    }

    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::And(filters)
    }

    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Or(filters)
    }

    /// Evaluate this filter against a materialized payload map.
    ///
    /// `valid_at`/`expires_at` must always be present in payload (value may be
    /// null) — this is the hard-won invariant from §9; `IsNull`/`IsNotNull`
    /// therefore check the *value*, never key absence (a missing key is
    /// treated the same as an explicit null).
    pub fn matches(&self, payload: &Payload) -> bool {
        match self {
            Filter::And(fs) => fs.iter().all(|f| f.matches(payload)),
            Filter::Or(fs) => fs.iter().any(|f| f.matches(payload)),
            Filter::Field(field, pred) => {
                let value = payload.get(field);
                match pred {
                    FieldPredicate::IsNull => value.is_none_or_null(),
                    FieldPredicate::IsNotNull => !value.is_none_or_null(),
                    FieldPredicate::Eq(want) => value.map(|v| v == want).unwrap_or(false),
                    FieldPredicate::Gte(want) => compare(value, want, |o| o.is_ge()),
                    FieldPredicate::Lte(want) => compare(value, want, |o| o.is_le()),
                    FieldPredicate::Gt(want) => compare(value, want, |o| o.is_gt()),
                    FieldPredicate::Lt(want) => compare(value, want, |o| o.is_lt()),
                }
            }
        }
    }
}

trait OptionValueExt {
    fn is_none_or_null(&self) -> bool;
}

impl OptionValueExt for Option<&Value> {
    fn is_none_or_null(&self) -> bool {
        match self {
            None => true,
            Some(Value::Null) => true,
            Some(_) => false,
        }
    }
}

fn compare(value: Option<&Value>, want: &Value, ok: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    let (Some(a), Some(b)) = (value.and_then(Value::as_f64), want.as_f64()) else {
        // RFC3339 timestamps compare lexicographically when numeric comparison fails.
        return match (value.and_then(Value::as_str), want.as_str()) {
            (Some(a), Some(b)) => ok(a.cmp(b)),
            _ => false,
        };
    };
    match a.partial_cmp(&b) {
        Some(o) => ok(o),
        None => false,
    }
}

/// Storage backend trait for the Vector Store (§4.1).
pub trait VectorStore: Send + Sync {
    /// Create the collection if absent; error if an existing collection has a
    /// different dimension (§3.2 invariant).
    fn ensure_collection(&self, name: &str, dim: usize) -> Result<()>;

    fn upsert(&self, name: &str, point: VectorPoint) -> Result<()>;

    fn batch_upsert(&self, name: &str, points: Vec<VectorPoint>) -> Result<Vec<UpsertOutcome>>;

    fn search(
        &self,
        name: &str,
        query_vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredPoint>>;

    fn scroll(
        &self,
        name: &str,
        filter: Option<&Filter>,
        cursor: Option<String>,
        page_size: usize,
    ) -> Result<ScrollPage>;

    fn update_payload(&self, name: &str, id: &str, partial: Payload) -> Result<()>;

    fn delete(&self, name: &str, id: &str) -> Result<()>;

    /// Fetch the raw vector for one point, for the JSON-lines export
    /// contract (§6) — `search`/`scroll` return payloads only, since the
    /// read/conflict paths never need the vector itself back.
    fn get_vector(&self, name: &str, id: &str) -> Result<Option<Vec<f32>>>;

    /// Readiness check used by the Kernel to select/validate a backend (§4.1).
    fn ping(&self) -> Result<()>;
}

/// Cosine similarity between two equal-length vectors (higher = closer, §4.1).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// Sanitize a project/collection name into a valid SQLite identifier fragment.
pub fn sanitize_ident(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

pub(crate) fn dimension_error(expected: usize, actual: usize) -> MemoryAnchorError {
    MemoryAnchorError::DimensionMismatch { expected, actual }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_with(valid_at: Value, expires_at: Value) -> Payload {
        let mut p = Payload::new();
        p.insert("valid_at".to_string(), valid_at);
        p.insert("expires_at".to_string(), expires_at);
        p
    }

    #[test]
    fn is_null_matches_explicit_null_and_absent_key() {
        let f = Filter::is_null("expires_at");
        assert!(f.matches(&payload_with(json!(null), json!(null))));

        let mut p = Payload::new();
        p.insert("valid_at".to_string(), json!(null));
        assert!(f.matches(&p));
    }

    #[test]
    fn and_or_compose() {
        let p = payload_with(json!("2024-01-01T00:00:00Z"), json!(null));
        let f = Filter::and(vec![
            Filter::is_not_null("valid_at"),
            Filter::or(vec![Filter::is_null("expires_at"), Filter::eq("layer", json!("x"))]),
        ]);
        assert!(f.matches(&p));
    }

    #[test]
    fn cosine_similarity_basic() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }
}
