//! The Memory Kernel (§4.10) — the single orchestration point that ties the
//! Vector Store, Metadata Store, Safety Filter, Conflict Detector,
//! Governor, Checklist Engine and Event Bus together behind two operations:
//! `add_memory` and `search_memory`. Grounded in the teacher's
//! `MemoryAnchor`/engine façade: one struct holding `Arc`'d collaborators,
//! constructed once per process via [`singleton::get_or_init`].

pub mod singleton;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

use crate::budget::{self, BudgetLimits};
use crate::checklist::ChecklistEngine;
use crate::config::EffectiveConfig;
use crate::conflict::{self, NeighborInfo};
use crate::embedding::Embedder;
use crate::error::{MemoryAnchorError, Result};
use crate::events::{EventBus, KernelEvent};
use crate::governance::IdentityGovernor;
use crate::metadata::{self, Storage};
use crate::safety::{SafetyConfig, SafetyFilter, SafetyOutcome};
use crate::temporal::TemporalQuery;
use crate::types::{
    new_id, AddMemoryRequest, AddMemoryResult, Category, ChangeType, ConflictWarning,
    IdentityChange, Layer, Memory, MemoryId, Payload, PendingMemory, PendingStatus, SafetyFinding,
    SearchHit, SearchRequest, SessionState,
};
use crate::vector::{Filter, VectorPoint, VectorStore};
use base64::Engine as _;

/// Number of same-layer recent candidates pulled for the content-hash dedup
/// check (§3 supplement, C14). Deliberately small: this is an exact-match
/// guard against accidental re-submission, not near-duplicate detection.
const DEDUP_CANDIDATE_WINDOW: usize = 50;

/// How many ANN neighbors the Conflict Detector is given per write (§4.6).
const CONFLICT_CANDIDATE_K: usize = 10;

pub struct Kernel {
    config: EffectiveConfig,
    storage: Storage,
    vector_store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    safety_filter: SafetyFilter,
    governor: IdentityGovernor,
    checklist: ChecklistEngine,
    events: Mutex<EventBus>,
}

impl Kernel {
    /// Construct and wire a Kernel instance: ensures the collection exists
    /// at the configured dimension, then runs crash-recovery for any
    /// identity change or pending memory stuck mid-commit from a prior
    /// process (§4.8/§4.9 recovery notes).
    pub fn new(
        config: EffectiveConfig,
        storage: Storage,
        vector_store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        vector_store.ensure_collection(&config.collection_name, config.vector_dim)?;

        let governor = IdentityGovernor::new(storage.clone());
        governor.recover()?;
        storage.with_connection(|conn| metadata::pending::recover_stuck_processing(conn, Utc::now()))?;

        let safety_filter = SafetyFilter::new(SafetyConfig::with_overrides(
            config.safety_enabled,
            config.safety_max_chars,
            config.safety_rules.as_ref(),
        ));
        let checklist = ChecklistEngine::new(storage.clone());

        Ok(Kernel {
            config,
            storage,
            vector_store,
            embedder,
            safety_filter,
            governor,
            checklist,
            events: Mutex::new(EventBus::default()),
        })
    }

    pub fn config(&self) -> &EffectiveConfig {
        &self.config
    }

    pub fn governor(&self) -> &IdentityGovernor {
        &self.governor
    }

    pub fn checklist(&self) -> &ChecklistEngine {
        &self.checklist
    }

    fn emit(&self, event: KernelEvent) {
        self.events.lock().emit(event);
    }

    /// Write a memory through the full pipeline: layer/category parsing,
    /// L0 policy gate, safety scan, confidence routing, dedup guard,
    /// conflict detection, and the compensated dual-store commit (§4.10
    /// steps 1-8).
    pub fn add_memory(&self, req: AddMemoryRequest) -> Result<AddMemoryResult> {
        if !(0.0..=1.0).contains(&req.confidence) {
            return Err(MemoryAnchorError::InvalidArgument(format!(
                "confidence must be within [0, 1], got {}",
                req.confidence
            )));
        }

        if req.content.trim().is_empty() {
            return Err(MemoryAnchorError::InvalidArgument(
                "content must not be empty".to_string(),
            ));
        }

        let layer: Layer = req
            .layer
            .parse()
            .map_err(|e| MemoryAnchorError::InvalidArgument(format!("{e}")))?;

        if layer == Layer::IdentitySchema {
            return Err(MemoryAnchorError::PolicyViolation(
                "identity_schema writes must go through IdentityGovernor::propose".to_string(),
            ));
        }

        let category: Option<Category> = req
            .category
            .as_deref()
            .map(|c| c.parse::<Category>())
            .transpose()
            .map_err(|e| MemoryAnchorError::InvalidArgument(format!("{e}")))?;

        let (content, safety_findings) = match self.safety_filter.check(&req.content) {
            SafetyOutcome::Blocked { findings } => {
                return Err(MemoryAnchorError::PolicyViolation(format!(
                    "content blocked by safety filter: {} finding(s)",
                    findings.len()
                )));
            }
            SafetyOutcome::Redacted { sanitized_content, findings } => (sanitized_content, findings),
            SafetyOutcome::Allow => (req.content.clone(), Vec::new()),
        };

        if req.confidence < self.config.pending_min_confidence {
            return Err(MemoryAnchorError::LowConfidence {
                confidence: req.confidence,
                pending_min: self.config.pending_min_confidence,
            });
        }

        if req.confidence < self.config.auto_save_confidence {
            let pending = self.stage_pending(&req, &content, layer, category)?;
            return Ok(AddMemoryResult {
                id: pending,
                layer,
                confidence: req.confidence,
                conflict_warning: None,
                safety_findings,
                pending: true,
            });
        }

        self.commit_memory(&req, &content, layer, category, safety_findings)
    }

    fn stage_pending(
        &self,
        req: &AddMemoryRequest,
        content: &str,
        layer: Layer,
        category: Option<Category>,
    ) -> Result<MemoryId> {
        use crate::types::{ChangeType, PendingMemory, PendingStatus};

        let now = Utc::now();
        let pending = PendingMemory {
            id: crate::types::new_id(),
            content: content.to_string(),
            layer,
            category,
            confidence: req.confidence,
            valid_at: req.valid_at,
            expires_at: req.expires_at,
            session_id: req.session_id.clone(),
            related_files: req.related_files.clone(),
            is_active: true,
            status: PendingStatus::Pending,
            proposer: req.created_by.clone(),
            reason: None,
            target_id: None,
            change_type: ChangeType::Create,
            approvals: vec![],
            created_at: now,
            updated_at: now,
        };
        self.storage
            .with_connection(|conn| metadata::pending::insert(conn, &pending))?;
        Ok(pending.id)
    }

    fn commit_memory(
        &self,
        req: &AddMemoryRequest,
        content: &str,
        layer: Layer,
        category: Option<Category>,
        safety_findings: Vec<SafetyFinding>,
    ) -> Result<AddMemoryResult> {
        if self.is_duplicate(layer, content)? {
            return Err(MemoryAnchorError::Conflict(
                "identical content already recorded in this layer".to_string(),
            ));
        }

        let embedding = self.embedder.embed(content)?;
        if embedding.len() != self.config.vector_dim {
            return Err(MemoryAnchorError::DimensionMismatch {
                expected: self.config.vector_dim,
                actual: embedding.len(),
            });
        }

        let conflict_warning = self.detect_conflict(&embedding, category, req.confidence, &req.created_by, req.valid_at)?;

        let created_at = Utc::now();
        let expires_at = req.expires_at.or_else(|| {
            (layer == Layer::EventLog).then(|| crate::events::default_expiry(created_at))
        });
        let (valid_at, expires_at) = resolve_temporal(req.valid_at, expires_at, created_at)?;

        let memory = Memory {
            id: crate::types::new_id(),
            content: content.to_string(),
            layer,
            category,
            confidence: req.confidence,
            created_at,
            valid_at: Some(valid_at),
            expires_at,
            created_by: req.created_by.clone(),
            session_id: req.session_id.clone(),
            related_files: req.related_files.clone(),
            is_active: true,
        };

        self.write_dual_store(&memory, &embedding)?;

        self.storage.with_connection(|conn| {
            metadata::audit::log(
                conn,
                "create",
                &memory.created_by,
                Some(&memory.id),
                Some(&json!({ "layer": memory.layer.as_str(), "confidence": memory.confidence })),
                Utc::now(),
            )?;
            metadata::memories::record_version(
                conn,
                &memory.id,
                &memory.content,
                &json!({ "confidence": memory.confidence }),
                Some("initial"),
                Utc::now(),
            )
        })?;

        if let Some(session_id) = &memory.session_id {
            self.storage
                .with_connection(|conn| metadata::session::record_memory_op(conn, session_id))?;
        }

        self.emit(KernelEvent::MemoryAdded { id: memory.id.clone() });

        Ok(AddMemoryResult {
            id: memory.id,
            layer: memory.layer,
            confidence: memory.confidence,
            conflict_warning: conflict_warning.has_conflict.then_some(conflict_warning),
            safety_findings,
            pending: false,
        })
    }

    /// Write the vector point first (the Vector Store is the harder side to
    /// roll back once other readers may observe it via search), then the
    /// metadata row; if the metadata write fails, compensate by deleting
    /// the vector point rather than leaving an orphaned ANN entry (§4.1/§9
    /// compensating-transaction resolution).
    fn write_dual_store(&self, memory: &Memory, embedding: &[f32]) -> Result<()> {
        let point = VectorPoint {
            id: memory.id.clone(),
            vector: embedding.to_vec(),
            payload: memory_to_payload(memory),
        };
        self.vector_store.upsert(&self.config.collection_name, point)?;

        if let Err(e) = self.storage.with_connection(|conn| metadata::memories::insert(conn, memory)) {
            let _ = self.vector_store.delete(&self.config.collection_name, &memory.id);
            return Err(e);
        }
        Ok(())
    }

    /// Exact-content-hash dedup guard (§3 supplement, C14): rejects a write
    /// whose content is byte-identical to a recent active memory in the
    /// same layer. Near-duplicate detection at the embedding level is
    /// already covered, advisorily, by the Conflict Detector.
    fn is_duplicate(&self, layer: Layer, content: &str) -> Result<bool> {
        let recent = self
            .storage
            .with_connection(|conn| metadata::memories::list_by_layer(conn, layer, false))?;
        Ok(recent
            .into_iter()
            .take(DEDUP_CANDIDATE_WINDOW)
            .any(|m| m.content == content))
    }

    fn detect_conflict(
        &self,
        embedding: &[f32],
        category: Option<Category>,
        confidence: f32,
        created_by: &str,
        valid_at: Option<chrono::DateTime<Utc>>,
    ) -> Result<ConflictWarning> {
        // Deliberately not filtered by category here: the source-divergence and
        // confidence-delta rules apply across categories, so `conflict::detect`
        // needs to see the full neighborhood and apply the category
        // restriction itself, scoped to only the temporal rule (§4.6).
        let filter = Filter::eq("is_active", json!(true));

        let hits = self.vector_store.search(
            &self.config.collection_name,
            embedding,
            CONFLICT_CANDIDATE_K,
            Some(&filter),
        )?;

        let neighbors: Vec<NeighborInfo> = hits
            .iter()
            .filter_map(|hit| payload_to_neighbor(&hit.id, &hit.payload, hit.score))
            .collect();

        Ok(conflict::detect(category, confidence, created_by, valid_at, &neighbors))
    }

    /// Query across the Vector Store with bi-temporal filtering, then
    /// pack the surviving hits into the token budget (§4.10 steps 1-8).
    pub fn search_memory(&self, req: SearchRequest) -> Result<Vec<SearchHit>> {
        let query_embedding = self.embedder.embed(&req.query)?;

        let layer: Option<Layer> = req
            .layer
            .as_deref()
            .map(|l| l.parse())
            .transpose()
            .map_err(|e| MemoryAnchorError::InvalidArgument(format!("{e}")))?;
        let category: Option<Category> = req
            .category
            .as_deref()
            .map(|c| c.parse())
            .transpose()
            .map_err(|e| MemoryAnchorError::InvalidArgument(format!("{e}")))?;

        let mut extra_clauses = Vec::new();
        if let Some(layer) = layer {
            extra_clauses.push(Filter::eq("layer", json!(layer.as_str())));
        }
        if let Some(category) = category {
            extra_clauses.push(Filter::eq("category", json!(category.as_str())));
        }
        let extra = (!extra_clauses.is_empty()).then(|| Filter::and(extra_clauses));

        let mut temporal = match (req.as_of, req.range_start, req.range_end) {
            (Some(as_of), _, _) => TemporalQuery::as_of(as_of),
            (None, Some(start), Some(end)) => TemporalQuery::in_range(start, end),
            _ => TemporalQuery::only_valid(),
        };
        if req.include_expired {
            temporal = temporal.include_expired();
        }
        let filter = temporal.to_filter(extra);

        let limit = req.limit.unwrap_or(10).max(1) as usize;
        let overshoot = limit.saturating_mul(2).max(limit);

        let scored = self.vector_store.search(
            &self.config.collection_name,
            &query_embedding,
            overshoot,
            Some(&filter),
        )?;

        let mut hits: Vec<SearchHit> = scored
            .into_iter()
            .filter(|p| p.score >= self.config.min_search_score)
            .filter_map(|p| payload_to_search_hit(p.id, p.payload, p.score))
            .collect();
        hits.truncate(limit);

        if req.include_identity_schema {
            let identity_memories = self
                .storage
                .with_connection(metadata::memories::all_active_identity_schema)?;
            let mut prefixed: Vec<SearchHit> = identity_memories.into_iter().map(|m| memory_to_search_hit(&m, 1.0)).collect();
            prefixed.extend(hits);
            hits = prefixed;
        }

        let limits = BudgetLimits {
            l0: self.config.budget_l0,
            l1: self.config.budget_l1,
            l2: self.config.budget_l2,
            l3: self.config.budget_l3,
            l4: self.config.budget_l4,
            total: self.config.budget_total,
        };
        let packed = budget::pack(hits, &limits, self.embedder.model_name());
        Ok(packed.packed.into_iter().map(|p| p.hit).collect())
    }

    /// Fetch a single memory straight from the Metadata Store (the payload
    /// mirror in the Vector Store is the search-path source of truth; this
    /// is the point-lookup path instead).
    pub fn get_memory(&self, id: &str) -> Result<Option<Memory>> {
        self.storage.with_connection(|conn| metadata::memories::get(conn, id))
    }

    /// Soft-delete a memory in both stores (§3.3 lifecycle: "space not
    /// reclaimed"). Returns `false` if the id is unknown to the Metadata
    /// Store.
    pub fn delete_memory(&self, id: &str) -> Result<bool> {
        if self.get_memory(id)?.is_none() {
            return Ok(false);
        }
        let mut partial = Payload::new();
        partial.insert("is_active".to_string(), json!(false));
        self.vector_store.update_payload(&self.config.collection_name, id, partial)?;
        self.storage.with_connection(|conn| metadata::memories::set_active(conn, id, false))?;
        self.storage.with_connection(|conn| {
            metadata::audit::log(conn, "delete", "kernel", Some(id), None, Utc::now())
        })?;
        self.emit(KernelEvent::MemoryDeleted { id: id.to_string() });
        Ok(true)
    }

    /// List pending memories, optionally filtered to one status (§4.10
    /// confidence-routed staging). With no filter, returns every status —
    /// callers that only want the approval queue should pass
    /// `Some(PendingStatus::Pending)`.
    pub fn list_pending(&self, status: Option<PendingStatus>) -> Result<Vec<PendingMemory>> {
        match status {
            Some(status) => self.storage.with_connection(|conn| metadata::pending::list_by_status(conn, status)),
            None => {
                let mut all = Vec::new();
                for status in [
                    PendingStatus::Pending,
                    PendingStatus::Processing,
                    PendingStatus::Approved,
                    PendingStatus::Rejected,
                    PendingStatus::Expired,
                ] {
                    all.extend(self.storage.with_connection(|conn| metadata::pending::list_by_status(conn, status))?);
                }
                Ok(all)
            }
        }
    }

    /// Approve a confidence-routed pending memory: a single approval is
    /// sufficient (unlike the three-approval L0 governance flow) to lock
    /// `pending -> processing`, embed the content, and run the compensated
    /// dual-store commit. On success the pending row is deleted; on
    /// failure it is unlocked back to `pending` so the caller may retry
    /// (§4.10 approval-commit flow).
    pub fn approve_pending(&self, id: &str, approver: &str, comment: Option<String>) -> Result<AddMemoryResult> {
        let approval = crate::types::Approval {
            approver: approver.to_string(),
            comment,
            timestamp: Utc::now(),
        };
        self.storage.with_connection(|conn| metadata::pending::add_approval(conn, id, &approval, Utc::now()))?;

        let locked = self
            .storage
            .with_connection(|conn| metadata::pending::try_lock_for_commit(conn, id, Utc::now()))?;
        if !locked {
            return Err(MemoryAnchorError::Conflict(format!(
                "pending memory '{id}' is not awaiting approval"
            )));
        }

        let pending = match self.storage.with_connection(|conn| metadata::pending::get(conn, id))? {
            Some(p) => p,
            None => {
                return Err(MemoryAnchorError::NotFound(format!("pending memory '{id}' not found")));
            }
        };

        let outcome = self.finish_pending_commit(&pending);
        match outcome {
            Ok(result) => {
                self.storage.with_connection(|conn| metadata::pending::finalize(conn, id, PendingStatus::Approved, Utc::now()))?;
                self.storage.with_connection(|conn| metadata::pending::delete(conn, id))?;
                self.emit(KernelEvent::MemoryAdded { id: result.id.clone() });
                Ok(result)
            }
            Err(e) => {
                self.storage.with_connection(|conn| metadata::pending::unlock_to_pending(conn, id, Utc::now()))?;
                Err(e)
            }
        }
    }

    fn finish_pending_commit(&self, pending: &PendingMemory) -> Result<AddMemoryResult> {
        if self.is_duplicate(pending.layer, &pending.content)? {
            return Err(MemoryAnchorError::Conflict(
                "identical content already recorded in this layer".to_string(),
            ));
        }

        let embedding = self.embedder.embed(&pending.content)?;
        if embedding.len() != self.config.vector_dim {
            return Err(MemoryAnchorError::DimensionMismatch {
                expected: self.config.vector_dim,
                actual: embedding.len(),
            });
        }
        let conflict_warning = self.detect_conflict(
            &embedding,
            pending.category,
            pending.confidence,
            &pending.proposer,
            pending.valid_at,
        )?;

        let created_at = Utc::now();
        let expires_at = pending.expires_at.or_else(|| {
            (pending.layer == Layer::EventLog).then(|| crate::events::default_expiry(created_at))
        });
        let (valid_at, expires_at) = resolve_temporal(pending.valid_at, expires_at, created_at)?;

        let memory = Memory {
            id: new_id(),
            content: pending.content.clone(),
            layer: pending.layer,
            category: pending.category,
            confidence: pending.confidence,
            created_at,
            valid_at: Some(valid_at),
            expires_at,
            created_by: pending.proposer.clone(),
            session_id: pending.session_id.clone(),
            related_files: pending.related_files.clone(),
            is_active: true,
        };
        self.write_dual_store(&memory, &embedding)?;

        Ok(AddMemoryResult {
            id: memory.id,
            layer: memory.layer,
            confidence: memory.confidence,
            conflict_warning: conflict_warning.has_conflict.then_some(conflict_warning),
            safety_findings: vec![],
            pending: false,
        })
    }

    /// Reject a pending memory still awaiting approval.
    pub fn reject_pending(&self, id: &str) -> Result<bool> {
        self.storage.with_connection(|conn| metadata::pending::reject(conn, id, Utc::now()))
    }

    /// Propose an L0 (identity-schema) change; routes straight to the
    /// Governor rather than the confidence-routing pipeline (§4.10 step 2).
    pub fn propose_identity_change(
        &self,
        target_id: Option<String>,
        change_type: ChangeType,
        proposed_content: String,
        reason: Option<String>,
        category: Option<Category>,
    ) -> Result<IdentityChange> {
        let change = self.governor.propose(target_id, change_type, proposed_content, reason, category)?;
        self.emit(KernelEvent::IdentityProposed { change_id: change.change_id.clone() });
        Ok(change)
    }

    /// Cast one approval toward an L0 change; once the third distinct
    /// approver signs off, commits the change against both stores and
    /// returns `true`. Returns `false` while the change is still pending.
    pub fn approve_identity_change(&self, change_id: &str, approver: &str, comment: Option<String>) -> Result<bool> {
        self.governor.approve(change_id, approver, comment)?;
        if !self.governor.is_ready_to_commit(change_id)? {
            return Ok(false);
        }

        let vector_store = self.vector_store.clone();
        let storage = self.storage.clone();
        let embedder = self.embedder.clone();
        let collection_name = self.config.collection_name.clone();
        let vector_dim = self.config.vector_dim;

        self.governor.commit(change_id, move |change| {
            apply_identity_change(change, &vector_store, &storage, &embedder, &collection_name, vector_dim)
        })?;
        self.emit(KernelEvent::IdentityApplied { change_id: change_id.to_string() });
        Ok(true)
    }

    /// Reject an L0 change still awaiting approval.
    pub fn reject_identity_change(&self, change_id: &str) -> Result<bool> {
        let ok = self.governor.reject(change_id)?;
        if ok {
            self.emit(KernelEvent::IdentityRejected { change_id: change_id.to_string() });
        }
        Ok(ok)
    }

    /// The live L0 snapshot: every active `identity_schema` memory, used
    /// both by `search_memory`'s `include_identity_schema` prepend and by
    /// external callers that just want "the constitution" (§9 Open
    /// Question #3).
    pub fn get_constitution(&self) -> Result<Vec<Memory>> {
        self.storage.with_connection(metadata::memories::all_active_identity_schema)
    }

    /// Begin a new working session archive (§3.1 SessionState, §6 events).
    pub fn start_session(&self, session_id: &str) -> Result<()> {
        self.storage.with_connection(|conn| metadata::session::start(conn, session_id, Utc::now()))?;
        self.emit(KernelEvent::SessionStarted { session_id: session_id.to_string() });
        Ok(())
    }

    /// Close a working session and return its final archived state.
    pub fn end_session(&self, session_id: &str) -> Result<SessionState> {
        self.storage.with_connection(|conn| metadata::session::end(conn, session_id, Utc::now()))?;
        let state = self
            .storage
            .with_connection(|conn| metadata::session::get(conn, session_id))?
            .ok_or_else(|| MemoryAnchorError::NotFound(format!("session '{session_id}' not found")))?;
        self.emit(KernelEvent::SessionEnded { session_id: session_id.to_string() });
        Ok(state)
    }

    /// Record a source file touched during the session, for the briefing
    /// / archive surfaced at session end.
    pub fn touch_session_file(&self, session_id: &str, path: &str) -> Result<()> {
        self.storage.with_connection(|conn| metadata::session::record_file_touch(conn, session_id, path))
    }

    /// Append an L2 (`event_log`) observation (§4.9). `location` and `who`
    /// are folded into `content`/`created_by` respectively since the core
    /// data model (§3.1) has no dedicated fields for them; `ttl_days`
    /// overrides the default 30-day event TTL.
    #[allow(clippy::too_many_arguments)]
    pub fn log_event(
        &self,
        content: &str,
        when: Option<chrono::DateTime<Utc>>,
        location: Option<&str>,
        who: &[String],
        ttl_days: Option<i64>,
        created_by: &str,
        session_id: Option<String>,
    ) -> Result<MemoryId> {
        let now = Utc::now();
        let valid_at = when.unwrap_or(now);
        let expires_at = ttl_days
            .map(|days| valid_at + chrono::Duration::days(days))
            .or_else(|| Some(crate::events::default_expiry(now)));
        let content = match location {
            Some(loc) if !loc.is_empty() => format!("{content} (at {loc})"),
            _ => content.to_string(),
        };
        let created_by = if who.is_empty() { created_by.to_string() } else { who.join(",") };

        let embedding = self.embedder.embed(&content)?;
        if embedding.len() != self.config.vector_dim {
            return Err(MemoryAnchorError::DimensionMismatch {
                expected: self.config.vector_dim,
                actual: embedding.len(),
            });
        }
        let memory = Memory {
            id: new_id(),
            content,
            layer: Layer::EventLog,
            category: None,
            confidence: 1.0,
            created_at: now,
            valid_at: Some(valid_at),
            expires_at,
            created_by,
            session_id,
            related_files: vec![],
            is_active: true,
        };
        self.write_dual_store(&memory, &embedding)?;
        self.emit(KernelEvent::MemoryAdded { id: memory.id.clone() });
        Ok(memory.id)
    }

    /// Bi-temporal range search scoped to the event log (§4.9 `search_events`).
    pub fn search_events(
        &self,
        query: &str,
        start: Option<chrono::DateTime<Utc>>,
        end: Option<chrono::DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<SearchHit>> {
        self.search_memory(SearchRequest {
            query: query.to_string(),
            limit: Some(limit),
            layer: Some(Layer::EventLog.as_str().to_string()),
            range_start: start,
            range_end: end,
            include_expired: start.is_some() || end.is_some(),
            ..Default::default()
        })
    }

    /// Promote an L2 event to an L3 verified fact: idempotent per
    /// `event_id`, writes the fact through the full compensated dual-store
    /// commit, and tags the source event's payload with `promoted_to`
    /// (§4.9).
    pub fn promote_event_to_fact(&self, event_id: &str, reviewer: &str, confidence: f32) -> Result<MemoryId> {
        if let Some(existing) = self.storage.with_connection(|conn| crate::events::already_promoted(conn, event_id))? {
            return Ok(existing);
        }

        let event = self
            .get_memory(event_id)?
            .ok_or_else(|| MemoryAnchorError::NotFound(format!("event '{event_id}' not found")))?;

        let fact = Memory {
            id: new_id(),
            content: event.content.clone(),
            layer: Layer::VerifiedFact,
            category: event.category,
            confidence,
            created_at: Utc::now(),
            valid_at: event.valid_at.or(Some(event.created_at)),
            expires_at: None,
            created_by: reviewer.to_string(),
            session_id: event.session_id.clone(),
            related_files: event.related_files.clone(),
            is_active: true,
        };

        let embedding = self.embedder.embed(&fact.content)?;
        if embedding.len() != self.config.vector_dim {
            return Err(MemoryAnchorError::DimensionMismatch {
                expected: self.config.vector_dim,
                actual: embedding.len(),
            });
        }
        self.write_dual_store(&fact, &embedding)?;

        if let Err(e) = self.storage.with_connection(|conn| crate::events::record_promotion(conn, event_id, &fact.id, Utc::now())) {
            let _ = self.vector_store.update_payload(&self.config.collection_name, &fact.id, {
                let mut p = Payload::new();
                p.insert("is_active".to_string(), json!(false));
                p
            });
            let _ = self.storage.with_connection(|conn| metadata::memories::set_active(conn, &fact.id, false));
            return Err(e);
        }

        let mut tag = Payload::new();
        tag.insert("promoted_to".to_string(), json!(fact.id));
        let _ = self.vector_store.update_payload(&self.config.collection_name, event_id, tag);

        self.emit(KernelEvent::MemoryAdded { id: fact.id.clone() });
        Ok(fact.id)
    }

    /// Export every active-or-not memory as JSON-lines, one line per memory
    /// with `vector` base64-encoded little-endian float32 (§6). Records are
    /// order-independent; re-importing is an upsert, so duplicates from a
    /// re-export are harmless.
    pub fn export_jsonl(&self) -> Result<String> {
        let mut out = String::new();
        let mut cursor = None;
        loop {
            let page = self
                .vector_store
                .scroll(&self.config.collection_name, None, cursor.clone(), 256)?;
            if page.points.is_empty() {
                break;
            }
            for point in &page.points {
                let Some(vector) = self.vector_store.get_vector(&self.config.collection_name, &point.id)? else {
                    continue;
                };
                let mut record = point.payload.clone();
                record.insert("id".to_string(), json!(point.id));
                record.insert("vector".to_string(), json!(encode_vector(&vector)));
                out.push_str(&serde_json::to_string(&record)?);
                out.push('\n');
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
        Ok(out)
    }

    /// Import JSON-lines produced by [`Self::export_jsonl`] (or a
    /// compatible external producer). Each line is upserted by id into both
    /// stores; importing the same export twice yields no duplicates (§8
    /// testable property 3).
    pub fn import_jsonl(&self, data: &str) -> Result<usize> {
        let mut count = 0;
        for line in data.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut record: Payload = serde_json::from_str(line)?;
            let id = record
                .remove("id")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| MemoryAnchorError::InvalidArgument("export record missing 'id'".to_string()))?;
            let vector_b64 = record
                .remove("vector")
                .and_then(|v| v.as_str().map(str::to_string))
                .ok_or_else(|| MemoryAnchorError::InvalidArgument("export record missing 'vector'".to_string()))?;
            let vector = decode_vector(&vector_b64)?;

            let point = VectorPoint { id: id.clone(), vector, payload: record.clone() };
            self.vector_store.upsert(&self.config.collection_name, point)?;

            if let Some(memory) = payload_to_memory(id, record) {
                self.storage.with_connection(|conn| {
                    if metadata::memories::get(conn, &memory.id)?.is_some() {
                        metadata::memories::update_content(conn, &memory.id, &memory.content, memory.confidence)?;
                        metadata::memories::set_active(conn, &memory.id, memory.is_active)?;
                        Ok(())
                    } else {
                        metadata::memories::insert(conn, &memory)
                    }
                })?;
            }
            count += 1;
        }
        Ok(count)
    }
}

/// Default `valid_at` to `created_at` when the caller left it unset, and
/// reject a request whose `valid_at` falls after its own `expires_at`.
fn resolve_temporal(
    valid_at: Option<chrono::DateTime<Utc>>,
    expires_at: Option<chrono::DateTime<Utc>>,
    created_at: chrono::DateTime<Utc>,
) -> Result<(chrono::DateTime<Utc>, Option<chrono::DateTime<Utc>>)> {
    let valid_at = valid_at.unwrap_or(created_at);
    if let Some(expires) = expires_at {
        if valid_at > expires {
            return Err(MemoryAnchorError::InvalidArgument(
                "valid_at must be <= expires_at".to_string(),
            ));
        }
    }
    Ok((valid_at, expires_at))
}

/// Apply a fully-approved identity change to both stores (§4.8: "performs
/// the underlying create/update/delete... using the §4.10 write-compensation
/// pattern"). Free function so it can be handed to `IdentityGovernor::commit`
/// as a `'static`-friendly closure without borrowing `&Kernel`.
fn apply_identity_change(
    change: &IdentityChange,
    vector_store: &Arc<dyn VectorStore>,
    storage: &Storage,
    embedder: &Arc<dyn Embedder>,
    collection_name: &str,
    vector_dim: usize,
) -> Result<()> {
    match change.change_type {
        ChangeType::Create => {
            let embedding = embedder.embed(&change.proposed_content)?;
            if embedding.len() != vector_dim {
                return Err(MemoryAnchorError::DimensionMismatch { expected: vector_dim, actual: embedding.len() });
            }
            let memory = Memory {
                id: new_id(),
                content: change.proposed_content.clone(),
                layer: Layer::IdentitySchema,
                category: change.category,
                confidence: 1.0,
                created_at: Utc::now(),
                valid_at: Some(Utc::now()),
                expires_at: None,
                created_by: "governance".to_string(),
                session_id: None,
                related_files: vec![],
                is_active: true,
            };
            let point = VectorPoint { id: memory.id.clone(), vector: embedding, payload: memory_to_payload(&memory) };
            vector_store.upsert(collection_name, point)?;
            if let Err(e) = storage.with_connection(|conn| metadata::memories::insert(conn, &memory)) {
                let _ = vector_store.delete(collection_name, &memory.id);
                return Err(e);
            }
            Ok(())
        }
        ChangeType::Update => {
            let target_id = change.target_id.clone().ok_or_else(|| {
                MemoryAnchorError::InvalidArgument("identity update change missing target_id".to_string())
            })?;
            let embedding = embedder.embed(&change.proposed_content)?;
            if embedding.len() != vector_dim {
                return Err(MemoryAnchorError::DimensionMismatch { expected: vector_dim, actual: embedding.len() });
            }
            let mut partial = Payload::new();
            partial.insert("content".to_string(), json!(change.proposed_content));
            partial.insert("confidence".to_string(), json!(1.0));
            vector_store.update_payload(collection_name, &target_id, partial)?;
            storage.with_connection(|conn| metadata::memories::update_content(conn, &target_id, &change.proposed_content, 1.0))?;
            Ok(())
        }
        ChangeType::Delete => {
            let target_id = change.target_id.clone().ok_or_else(|| {
                MemoryAnchorError::InvalidArgument("identity delete change missing target_id".to_string())
            })?;
            let mut partial = Payload::new();
            partial.insert("is_active".to_string(), json!(false));
            vector_store.update_payload(collection_name, &target_id, partial)?;
            storage.with_connection(|conn| metadata::memories::set_active(conn, &target_id, false))?;
            Ok(())
        }
    }
}

/// Base64 little-endian float32 encoding for the export contract (§6).
fn encode_vector(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|f| f.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn decode_vector(encoded: &str) -> Result<Vec<f32>> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|e| MemoryAnchorError::InvalidArgument(format!("invalid base64 vector: {e}")))?;
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

/// Reconstruct a [`Memory`] from an export/import payload record. Returns
/// `None` if required fields are missing (the record is malformed rather
/// than simply partial, which `import_jsonl` treats as a skip).
fn payload_to_memory(id: MemoryId, payload: Payload) -> Option<Memory> {
    let hit = payload_to_search_hit(id, payload.clone(), 0.0)?;
    let is_active = payload.get("is_active").and_then(|v| v.as_bool()).unwrap_or(true);
    Some(Memory {
        id: hit.id,
        content: hit.content,
        layer: hit.layer,
        category: hit.category,
        confidence: hit.confidence,
        created_at: hit.created_at,
        valid_at: hit.valid_at,
        expires_at: hit.expires_at,
        created_by: payload_str(&payload, "created_by").unwrap_or_else(|| "unknown".to_string()),
        session_id: hit.session_id,
        related_files: hit.related_files,
        is_active,
    })
}

/// The fields the read path needs to reconstruct a [`SearchHit`] directly
/// from a vector-store payload, without a second Metadata Store round trip
/// (§4.1: the payload is the single source of truth read side).
fn memory_to_payload(memory: &Memory) -> Payload {
    let mut payload: Payload = HashMap::new();
    payload.insert("content".to_string(), json!(memory.content));
    payload.insert("layer".to_string(), json!(memory.layer.as_str()));
    payload.insert("category".to_string(), memory.category.map(|c| json!(c.as_str())).unwrap_or(Value::Null));
    payload.insert("confidence".to_string(), json!(memory.confidence));
    payload.insert("created_at".to_string(), json!(memory.created_at.to_rfc3339()));
    payload.insert(
        "valid_at".to_string(),
        memory.valid_at.map(|t| json!(t.to_rfc3339())).unwrap_or(Value::Null),
    );
    payload.insert(
        "expires_at".to_string(),
        memory.expires_at.map(|t| json!(t.to_rfc3339())).unwrap_or(Value::Null),
    );
    payload.insert("created_by".to_string(), json!(memory.created_by));
    payload.insert(
        "session_id".to_string(),
        memory.session_id.clone().map(Value::String).unwrap_or(Value::Null),
    );
    payload.insert("related_files".to_string(), json!(memory.related_files));
    payload.insert("is_active".to_string(), json!(memory.is_active));
    payload
}

fn payload_str(payload: &Payload, key: &str) -> Option<String> {
    payload.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn payload_datetime(payload: &Payload, key: &str) -> Option<chrono::DateTime<Utc>> {
    payload_str(payload, key).and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn payload_to_search_hit(id: MemoryId, payload: Payload, score: f32) -> Option<SearchHit> {
    let content = payload_str(&payload, "content")?;
    let layer: Layer = payload_str(&payload, "layer")?.parse().ok()?;
    let category = payload_str(&payload, "category").and_then(|c| c.parse::<Category>().ok());
    let confidence = payload.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32;
    let created_at = payload_datetime(&payload, "created_at").unwrap_or_else(Utc::now);
    let valid_at = payload_datetime(&payload, "valid_at");
    let expires_at = payload_datetime(&payload, "expires_at");
    let session_id = payload_str(&payload, "session_id");
    let related_files = payload
        .get("related_files")
        .and_then(|v| serde_json::from_value::<Vec<String>>(v.clone()).ok())
        .unwrap_or_default();

    Some(SearchHit {
        id,
        content,
        layer,
        category,
        confidence,
        created_at,
        valid_at,
        expires_at,
        score,
        session_id,
        related_files,
    })
}

fn memory_to_search_hit(memory: &Memory, score: f32) -> SearchHit {
    SearchHit {
        id: memory.id.clone(),
        content: memory.content.clone(),
        layer: memory.layer,
        category: memory.category,
        confidence: memory.confidence,
        created_at: memory.created_at,
        valid_at: memory.valid_at,
        expires_at: memory.expires_at,
        score,
        session_id: memory.session_id.clone(),
        related_files: memory.related_files.clone(),
    }
}

fn payload_to_neighbor(id: &str, payload: &Payload, similarity: f32) -> Option<NeighborInfo> {
    Some(NeighborInfo {
        id: id.to_string(),
        category: payload_str(payload, "category").and_then(|c| c.parse::<Category>().ok()),
        confidence: payload.get("confidence").and_then(|v| v.as_f64()).unwrap_or(0.0) as f32,
        created_at: payload_datetime(payload, "created_at").unwrap_or_else(Utc::now),
        valid_at: payload_datetime(payload, "valid_at"),
        created_by: payload_str(payload, "created_by").unwrap_or_default(),
        similarity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingEmbedder;
    use crate::vector::local::LocalVectorStore;

    fn kernel() -> Kernel {
        Kernel::new(
            EffectiveConfig::default(),
            Storage::open_in_memory().unwrap(),
            Arc::new(LocalVectorStore::open_in_memory().unwrap()),
            Arc::new(HashingEmbedder::default()),
        )
        .unwrap()
    }

    fn request(content: &str, confidence: f32) -> AddMemoryRequest {
        AddMemoryRequest {
            content: content.to_string(),
            layer: "operational_knowledge".to_string(),
            category: Some("routine".to_string()),
            confidence,
            valid_at: None,
            expires_at: None,
            created_by: "agent".to_string(),
            session_id: None,
            related_files: vec![],
        }
    }

    #[test]
    fn auto_save_path_persists_and_is_searchable() {
        let kernel = kernel();
        let result = kernel.add_memory(request("user prefers dark mode in the editor", 0.95)).unwrap();
        assert!(!result.pending);

        let hits = kernel
            .search_memory(SearchRequest {
                query: "user prefers dark mode".to_string(),
                limit: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert!(hits.iter().any(|h| h.id == result.id));
    }

    #[test]
    fn mid_confidence_write_is_staged_pending() {
        let kernel = kernel();
        let result = kernel.add_memory(request("maybe the user lives in Lisbon", 0.8)).unwrap();
        assert!(result.pending);
    }

    #[test]
    fn low_confidence_write_is_rejected() {
        let kernel = kernel();
        let err = kernel.add_memory(request("a vague guess", 0.1)).unwrap_err();
        assert!(matches!(err, MemoryAnchorError::LowConfidence { .. }));
    }

    #[test]
    fn direct_identity_schema_write_is_rejected() {
        let kernel = kernel();
        let mut req = request("the agent is named Nova", 0.99);
        req.layer = "identity_schema".to_string();
        let err = kernel.add_memory(req).unwrap_err();
        assert!(matches!(err, MemoryAnchorError::PolicyViolation(_)));
    }

    #[test]
    fn duplicate_content_in_same_layer_is_rejected() {
        let kernel = kernel();
        kernel.add_memory(request("the standup is at 9am daily", 0.95)).unwrap();
        let err = kernel.add_memory(request("the standup is at 9am daily", 0.95)).unwrap_err();
        assert!(matches!(err, MemoryAnchorError::Conflict(_)));
    }

    #[test]
    fn search_excludes_expired_memories_by_default() {
        let kernel = kernel();
        let mut req = request("short lived note", 0.95);
        req.expires_at = Some(Utc::now() - chrono::Duration::days(1));
        kernel.add_memory(req).unwrap();

        let hits = kernel
            .search_memory(SearchRequest { query: "short lived note".to_string(), limit: Some(5), ..Default::default() })
            .unwrap();
        assert!(hits.is_empty());
    }
}
