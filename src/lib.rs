//! Memory Anchor: a persistent, queryable memory substrate for AI agents.
//!
//! Five memory layers (identity schema, active context, event log, verified
//! fact, operational knowledge) are written and queried through a single
//! [`kernel::Kernel`], which pairs a Vector Store (ANN search) with a
//! Metadata Store (durable relational state) behind compensating dual-store
//! writes, a three-approval governance gate for identity-schema changes,
//! and a bi-temporal query engine.

pub mod budget;
pub mod checklist;
pub mod config;
pub mod conflict;
pub mod embedding;
pub mod error;
pub mod events;
pub mod governance;
pub mod kernel;
pub mod metadata;
pub mod safety;
pub mod temporal;
pub mod types;
pub mod vector;

pub use error::{MemoryAnchorError, Result};
pub use kernel::Kernel;
pub use types::{
    AddMemoryRequest, AddMemoryResult, Approval, Category, ChangeType, ChecklistItem,
    ChecklistScope, ChecklistStatus, ConflictKind, ConflictWarning, IdentityChange, Layer, Memory,
    MemoryId, PendingMemory, PendingStatus, SafetyFinding, SearchHit, SearchRequest, SessionState,
};

/// The crate's own version, as published to crates.io.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Construct the effective configuration and process-wide Kernel in one
/// call: resolves the project from `cwd` (env, project-local, then global
/// config), opens the Metadata Store at `<cwd>/.memory-anchor/memory.db`,
/// and selects the Vector Store backend (Qdrant if `vector_url` resolves
/// and the `qdrant` feature is enabled, otherwise the embedded local file
/// store colocated with the Metadata Store).
#[cfg(feature = "qdrant")]
pub fn open(cwd: &std::path::Path, embedder: std::sync::Arc<dyn embedding::Embedder>) -> Result<std::sync::Arc<Kernel>> {
    let cfg = config::resolve(cwd)?;
    let db_path = cwd.join(".memory-anchor").join("memory.db");
    let storage = metadata::Storage::open(&db_path)?;

    let vector_store: std::sync::Arc<dyn vector::VectorStore> = match &cfg.vector_url {
        Some(url) => std::sync::Arc::new(vector::qdrant_backend::QdrantVectorStore::connect(url)?),
        None => {
            let vec_path = cwd.join(".memory-anchor").join("vectors.db");
            std::sync::Arc::new(vector::local::LocalVectorStore::open(&vec_path)?)
        }
    };

    kernel::singleton::get_or_init(move || Kernel::new(cfg, storage, vector_store, embedder))
}

#[cfg(not(feature = "qdrant"))]
pub fn open(cwd: &std::path::Path, embedder: std::sync::Arc<dyn embedding::Embedder>) -> Result<std::sync::Arc<Kernel>> {
    let cfg = config::resolve(cwd)?;
    let db_path = cwd.join(".memory-anchor").join("memory.db");
    let storage = metadata::Storage::open(&db_path)?;
    let vec_path = cwd.join(".memory-anchor").join("vectors.db");
    let vector_store: std::sync::Arc<dyn vector::VectorStore> =
        std::sync::Arc::new(vector::local::LocalVectorStore::open(&vec_path)?);

    kernel::singleton::get_or_init(move || Kernel::new(cfg, storage, vector_store, embedder))
}
