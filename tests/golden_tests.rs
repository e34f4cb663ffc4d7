//! End-to-end scenarios against the public Kernel API.
//!
//! These lock the literal scenarios a conforming Memory Kernel must satisfy:
//! auto-save, pending-approval staging, three-approval governance, bi-temporal
//! visibility, and safety redaction. Each test builds its own in-memory
//! Kernel so scenarios never share state.
//!
//! Run with: cargo test --test golden_tests

use chrono::{Duration, TimeZone, Utc};
use pretty_assertions::assert_eq;
use std::sync::Arc;

use memory_anchor::config::EffectiveConfig;
use memory_anchor::embedding::HashingEmbedder;
use memory_anchor::kernel::Kernel;
use memory_anchor::metadata::Storage;
use memory_anchor::types::{ChangeType, PendingStatus};
use memory_anchor::vector::local::LocalVectorStore;
use memory_anchor::{AddMemoryRequest, SearchRequest};

fn kernel() -> Kernel {
    Kernel::new(
        EffectiveConfig::default(),
        Storage::open_in_memory().unwrap(),
        Arc::new(LocalVectorStore::open_in_memory().unwrap()),
        Arc::new(HashingEmbedder::default()),
    )
    .unwrap()
}

fn request(content: &str, layer: &str, confidence: f32) -> AddMemoryRequest {
    AddMemoryRequest {
        content: content.to_string(),
        layer: layer.to_string(),
        category: None,
        confidence,
        valid_at: None,
        expires_at: None,
        created_by: "agent".to_string(),
        session_id: None,
        related_files: vec![],
    }
}

/// S1 — auto-save path: a high-confidence write lands immediately and is
/// findable by a query sharing its vocabulary.
#[test]
fn s1_auto_save_path() {
    let kernel = kernel();
    let mut req = request("vector database choice is to use Qdrant", "verified_fact", 0.95);
    req.valid_at = Some(Utc.with_ymd_and_hms(2025, 1, 15, 0, 0, 0).unwrap());

    let result = kernel.add_memory(req).unwrap();
    assert!(!result.pending);
    assert_eq!(result.layer.as_str(), "verified_fact");
    assert_eq!(result.confidence, 0.95);
    assert!(result.conflict_warning.is_none());

    let hits = kernel
        .search_memory(SearchRequest {
            query: "vector database choice".to_string(),
            limit: Some(5),
            ..Default::default()
        })
        .unwrap();
    assert!(hits.iter().any(|h| h.id == result.id));
}

/// S2 — pending path: a mid-confidence write creates no vector point and
/// shows up in the pending queue instead.
#[test]
fn s2_pending_path() {
    let kernel = kernel();
    let req = request("possibly switch to Redis", "verified_fact", 0.8);

    let result = kernel.add_memory(req).unwrap();
    assert!(result.pending);

    let pending = kernel.list_pending(Some(PendingStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].status, PendingStatus::Pending);
    assert_eq!(pending[0].id, result.id);
}

/// S3 — three-approval governance: two approvals leave the change pending,
/// the third applies it and the committed content shows up in the
/// constitution snapshot.
#[test]
fn s3_three_approval_commit() {
    let kernel = kernel();
    let change = kernel
        .propose_identity_change(None, ChangeType::Create, "Project is Memory Anchor".to_string(), None, None)
        .unwrap();

    assert!(!kernel.approve_identity_change(&change.change_id, "a", None).unwrap());
    assert!(!kernel.approve_identity_change(&change.change_id, "b", None).unwrap());
    assert!(kernel.approve_identity_change(&change.change_id, "c", None).unwrap());

    let constitution = kernel.get_constitution().unwrap();
    assert!(constitution.iter().any(|m| m.content == "Project is Memory Anchor"));
}

/// Property 5 — a fourth approval after commit is a no-op (the change is no
/// longer `pending`, so `approve` on the Governor directly rejects it).
#[test]
fn fourth_approval_after_commit_is_rejected() {
    let kernel = kernel();
    let change = kernel
        .propose_identity_change(None, ChangeType::Create, "Fourth approval test".to_string(), None, None)
        .unwrap();
    kernel.approve_identity_change(&change.change_id, "a", None).unwrap();
    kernel.approve_identity_change(&change.change_id, "b", None).unwrap();
    kernel.approve_identity_change(&change.change_id, "c", None).unwrap();

    let err = kernel.governor().approve(&change.change_id, "d", None).unwrap_err();
    assert!(matches!(err, memory_anchor::MemoryAnchorError::Governance(_)));
}

/// S5 — bi-temporal visibility: as-of queries respect `valid_at`/`expires_at`,
/// and `include_expired` overrides that window.
#[test]
fn s5_bi_temporal_visibility() {
    let kernel = kernel();
    let mut req = request("bi-temporal visibility marker content", "verified_fact", 0.95);
    req.valid_at = Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
    req.expires_at = Some(Utc.with_ymd_and_hms(2024, 12, 31, 0, 0, 0).unwrap());
    let result = kernel.add_memory(req).unwrap();

    let during = kernel
        .search_memory(SearchRequest {
            query: "bi-temporal visibility marker".to_string(),
            limit: Some(5),
            as_of: Some(Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert!(during.iter().any(|h| h.id == result.id));

    let after_expiry = kernel
        .search_memory(SearchRequest {
            query: "bi-temporal visibility marker".to_string(),
            limit: Some(5),
            as_of: Some(Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert!(!after_expiry.iter().any(|h| h.id == result.id));

    let with_expired = kernel
        .search_memory(SearchRequest {
            query: "bi-temporal visibility marker".to_string(),
            limit: Some(5),
            include_expired: true,
            ..Default::default()
        })
        .unwrap();
    assert!(with_expired.iter().any(|h| h.id == result.id));
}

/// S6 — safety redaction: an email address is masked in the stored content
/// and reported as a redact-kind finding, not blocked outright.
#[test]
fn s6_safety_redact() {
    let kernel = kernel();
    let req = request("Contact alice@example.com for details", "operational_knowledge", 0.95);

    let result = kernel.add_memory(req).unwrap();
    assert!(!result.pending);
    assert_eq!(result.safety_findings.len(), 1);
    assert_eq!(result.safety_findings[0].kind, "email");

    let stored = kernel.get_memory(&result.id).unwrap().unwrap();
    assert!(!stored.content.contains("alice@example.com"));
}

/// Property 1: an unfiltered `search_memory` call only ever returns active,
/// unexpired memories.
#[test]
fn search_excludes_inactive_and_expired_by_default() {
    let kernel = kernel();
    let mut expired = request("expired marker content for property one", "verified_fact", 0.95);
    expired.expires_at = Some(Utc::now() - Duration::days(1));
    kernel.add_memory(expired).unwrap();

    let live = kernel.add_memory(request("live marker content for property one", "verified_fact", 0.95)).unwrap();
    kernel.delete_memory(&live.id).unwrap();

    let hits = kernel
        .search_memory(SearchRequest { query: "marker content for property one".to_string(), limit: Some(10), ..Default::default() })
        .unwrap();
    assert!(hits.is_empty());
}

/// The dedup guard (C14) applies uniformly on the approval-commit path, not
/// just the direct auto-save path: approving a pending memory that now
/// collides with content already committed surfaces `Conflict` and leaves
/// the pending row retryable rather than silently creating a duplicate.
#[test]
fn approve_pending_rejects_content_already_committed_elsewhere() {
    let kernel = kernel();
    kernel.add_memory(request("duplicate content for compensation test", "operational_knowledge", 0.95)).unwrap();

    let staged = kernel
        .add_memory(request("duplicate content for compensation test", "operational_knowledge", 0.8))
        .unwrap();
    assert!(staged.pending);

    let err = kernel.approve_pending(&staged.id, "reviewer", None).unwrap_err();
    assert!(matches!(err, memory_anchor::MemoryAnchorError::Conflict(_)));

    let pending = kernel.list_pending(Some(PendingStatus::Pending)).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, staged.id);
}

/// Export/import round-trip (property 3): re-importing an export is
/// idempotent and introduces no duplicates.
#[test]
fn export_import_round_trip_is_idempotent() {
    let kernel = kernel();
    kernel.add_memory(request("export round trip marker", "verified_fact", 0.95)).unwrap();

    let exported = kernel.export_jsonl().unwrap();
    assert_eq!(exported.lines().count(), 1);

    let imported_once = kernel.import_jsonl(&exported).unwrap();
    let imported_twice = kernel.import_jsonl(&exported).unwrap();
    assert_eq!(imported_once, 1);
    assert_eq!(imported_twice, 1);

    let reexported = kernel.export_jsonl().unwrap();
    assert_eq!(reexported.lines().count(), 1);
}
