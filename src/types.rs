//! Core data model for Memory Anchor (spec §3)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Opaque globally-unique memory identifier (a UUIDv4 string).
pub type MemoryId = String;

/// Generate a fresh opaque identifier.
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The five memory layers (§3.1). Legacy aliases are normalized at parse time (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    IdentitySchema,
    ActiveContext,
    EventLog,
    VerifiedFact,
    OperationalKnowledge,
}

impl Layer {
    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::IdentitySchema => "identity_schema",
            Layer::ActiveContext => "active_context",
            Layer::EventLog => "event_log",
            Layer::VerifiedFact => "verified_fact",
            Layer::OperationalKnowledge => "operational_knowledge",
        }
    }

    /// Budget key used by the Context Budget Manager (§4.5): L0..L4.
    pub fn budget_key(&self) -> &'static str {
        match self {
            Layer::IdentitySchema => "l0",
            Layer::ActiveContext => "l1",
            Layer::EventLog => "l2",
            Layer::VerifiedFact => "l3",
            Layer::OperationalKnowledge => "l4",
        }
    }
}

impl std::str::FromStr for Layer {
    type Err = String;

    /// Normalizes legacy aliases: constitution->identity_schema, fact->verified_fact,
    /// session->event_log (§3.1).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "identity_schema" | "constitution" => Ok(Layer::IdentitySchema),
            "active_context" => Ok(Layer::ActiveContext),
            "event_log" | "session" => Ok(Layer::EventLog),
            "verified_fact" | "fact" => Ok(Layer::VerifiedFact),
            "operational_knowledge" => Ok(Layer::OperationalKnowledge),
            _ => Err(format!("Unknown memory layer: {}", s)),
        }
    }
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Closed category set (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Person,
    Place,
    Event,
    Item,
    Routine,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Person => "person",
            Category::Place => "place",
            Category::Event => "event",
            Category::Item => "item",
            Category::Routine => "routine",
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "person" => Ok(Category::Person),
            "place" => Ok(Category::Place),
            "event" => Ok(Category::Event),
            "item" => Ok(Category::Item),
            "routine" => Ok(Category::Routine),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// A persisted memory record (§3.1 "Memory (Note)").
///
/// The `vector` field is never duplicated here: it lives solely in the
/// Vector Store, keyed by `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    pub id: MemoryId,
    pub content: String,
    pub layer: Layer,
    pub category: Option<Category>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub valid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

/// Pending-approval lifecycle state (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Processing,
    Approved,
    Rejected,
    Expired,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Processing => "processing",
            PendingStatus::Approved => "approved",
            PendingStatus::Rejected => "rejected",
            PendingStatus::Expired => "expired",
        }
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "processing" => Ok(PendingStatus::Processing),
            "approved" => Ok(PendingStatus::Approved),
            "rejected" => Ok(PendingStatus::Rejected),
            "expired" => Ok(PendingStatus::Expired),
            _ => Err(format!("Unknown pending status: {}", s)),
        }
    }
}

/// Kind of mutation a pending/identity-change record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Create => "create",
            ChangeType::Update => "update",
            ChangeType::Delete => "delete",
        }
    }
}

impl std::str::FromStr for ChangeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(ChangeType::Create),
            "update" => Ok(ChangeType::Update),
            "delete" => Ok(ChangeType::Delete),
            _ => Err(format!("Unknown change type: {}", s)),
        }
    }
}

/// A single approval cast against a pending change (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Approval {
    pub approver: String,
    pub comment: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A staged record awaiting confidence- or governance-based approval (§3.1:
/// "same fields as Memory plus" the approval-flow fields below).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingMemory {
    pub id: MemoryId,
    pub content: String,
    pub layer: Layer,
    pub category: Option<Category>,
    pub confidence: f32,
    pub valid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub status: PendingStatus,
    pub proposer: String,
    pub reason: Option<String>,
    pub target_id: Option<MemoryId>,
    pub change_type: ChangeType,
    pub approvals: Vec<Approval>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fixed number of distinct approvals required for an L0 change (§4.8).
pub const APPROVALS_NEEDED: usize = 3;

/// An L0 (identity-schema) change proposal tracked by the Governor (§4.8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityChange {
    pub change_id: String,
    pub target_id: Option<MemoryId>,
    pub change_type: ChangeType,
    pub proposed_content: String,
    pub reason: Option<String>,
    pub category: Option<Category>,
    pub status: PendingStatus,
    pub approvals: Vec<Approval>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
}

/// Checklist item status (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistStatus {
    Open,
    Done,
    Cancelled,
}

impl ChecklistStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistStatus::Open => "open",
            ChecklistStatus::Done => "done",
            ChecklistStatus::Cancelled => "cancelled",
        }
    }
}

impl std::str::FromStr for ChecklistStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(ChecklistStatus::Open),
            "done" => Ok(ChecklistStatus::Done),
            "cancelled" => Ok(ChecklistStatus::Cancelled),
            _ => Err(format!("Unknown checklist status: {}", s)),
        }
    }
}

/// Checklist item scope (§3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecklistScope {
    Project,
    Session,
    Global,
}

impl ChecklistScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecklistScope::Project => "project",
            ChecklistScope::Session => "session",
            ChecklistScope::Global => "global",
        }
    }
}

impl std::str::FromStr for ChecklistScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "project" => Ok(ChecklistScope::Project),
            "session" => Ok(ChecklistScope::Session),
            "global" => Ok(ChecklistScope::Global),
            _ => Err(format!("Unknown checklist scope: {}", s)),
        }
    }
}

/// A persistent, prioritized task list entry (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub project_id: String,
    pub content: String,
    pub status: ChecklistStatus,
    pub scope: ChecklistScope,
    pub priority: u8,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Working-session state (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub source_files: Vec<String>,
    pub memory_ops_count: i64,
    pub file_mods_count: i64,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Flat payload map stored alongside each vector point (§4.1).
pub type Payload = HashMap<String, serde_json::Value>;

/// Request to create a memory via the Kernel (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemoryRequest {
    pub content: String,
    pub layer: String,
    pub category: Option<String>,
    pub confidence: f32,
    pub valid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_created_by")]
    pub created_by: String,
    pub session_id: Option<String>,
    #[serde(default)]
    pub related_files: Vec<String>,
}

fn default_created_by() -> String {
    "agent".to_string()
}

/// Safety-filter findings surfaced alongside a write result (§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyFinding {
    pub kind: String,
    pub span: (usize, usize),
}

/// Conflict-detector outcome attached to a write result (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictWarning {
    pub has_conflict: bool,
    pub kind: ConflictKind,
    pub related_ids: Vec<MemoryId>,
    pub hint: String,
}

impl ConflictWarning {
    pub fn none() -> Self {
        ConflictWarning {
            has_conflict: false,
            kind: ConflictKind::None,
            related_ids: vec![],
            hint: String::new(),
        }
    }
}

/// The kind of conflict detected (§4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConflictKind {
    Temporal,
    Source,
    Confidence,
    None,
}

/// Result returned from `Kernel::add_memory` (§4.10 step 8).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddMemoryResult {
    pub id: MemoryId,
    pub layer: Layer,
    pub confidence: f32,
    pub conflict_warning: Option<ConflictWarning>,
    pub safety_findings: Vec<SafetyFinding>,
    pub pending: bool,
}

/// Request for `Kernel::search_memory` (§4.10).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<i64>,
    pub layer: Option<String>,
    pub category: Option<String>,
    pub as_of: Option<DateTime<Utc>>,
    pub range_start: Option<DateTime<Utc>>,
    pub range_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub include_expired: bool,
    #[serde(default)]
    pub include_identity_schema: bool,
}

/// A single scored hit from `Kernel::search_memory` (§4.10 step 7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: MemoryId,
    pub content: String,
    pub layer: Layer,
    pub category: Option<Category>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub valid_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub score: f32,
    pub session_id: Option<String>,
    pub related_files: Vec<String>,
}
