//! Error types for Memory Anchor

use thiserror::Error;

/// Result type alias for Memory Anchor operations
pub type Result<T> = std::result::Result<T, MemoryAnchorError>;

/// Crate-wide error taxonomy (spec §7)
#[derive(Error, Debug)]
pub enum MemoryAnchorError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Policy violation: {0}")]
    PolicyViolation(String),

    #[error("Confidence too low to persist (confidence={confidence}, pending_min={pending_min})")]
    LowConfidence { confidence: f32, pending_min: f32 },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Governance violation: {0}")]
    Governance(String),

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MemoryAnchorError {
    /// Whether the caller may safely retry this operation (spec §7 propagation policy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MemoryAnchorError::Conflict(_)
                | MemoryAnchorError::DeadlineExceeded
                | MemoryAnchorError::StorageUnavailable(_)
        )
    }

    /// Stable integer code, for façades that need one (the core never transports these itself).
    pub fn code(&self) -> i64 {
        match self {
            MemoryAnchorError::InvalidArgument(_) => -32602,
            MemoryAnchorError::PolicyViolation(_) => -32010,
            MemoryAnchorError::LowConfidence { .. } => -32011,
            MemoryAnchorError::Conflict(_) => -32012,
            MemoryAnchorError::NotFound(_) => -32001,
            MemoryAnchorError::StorageUnavailable(_) => -32013,
            MemoryAnchorError::DimensionMismatch { .. } => -32014,
            MemoryAnchorError::Governance(_) => -32015,
            MemoryAnchorError::DeadlineExceeded => -32016,
            _ => -32000,
        }
    }
}
