//! Property-based tests against the public Kernel API and its core data
//! types.
//!
//! These verify invariants that must hold for all inputs, not just the
//! literal scenarios locked in `golden_tests.rs`:
//! - confidence routing always lands in exactly one of reject/pending/auto-save
//! - `Layer`/`Category` string round-trip through every variant
//! - `search_memory` with no explicit time params never returns inactive or
//!   expired memories
//! - the budget packer never exceeds its configured total
//!
//! Run with: cargo test --test property_tests

use proptest::prelude::*;
use std::str::FromStr;
use std::sync::Arc;

use memory_anchor::budget::{pack, BudgetLimits};
use memory_anchor::config::EffectiveConfig;
use memory_anchor::embedding::HashingEmbedder;
use memory_anchor::kernel::Kernel;
use memory_anchor::metadata::Storage;
use memory_anchor::vector::local::LocalVectorStore;
use memory_anchor::{AddMemoryRequest, Category, Layer, MemoryAnchorError, SearchHit};

fn kernel() -> Kernel {
    Kernel::new(
        EffectiveConfig::default(),
        Storage::open_in_memory().unwrap(),
        Arc::new(LocalVectorStore::open_in_memory().unwrap()),
        Arc::new(HashingEmbedder::default()),
    )
    .unwrap()
}

fn request(content: String, confidence: f32) -> AddMemoryRequest {
    AddMemoryRequest {
        content,
        layer: "operational_knowledge".to_string(),
        category: None,
        confidence,
        valid_at: None,
        expires_at: None,
        created_by: "agent".to_string(),
        session_id: None,
        related_files: vec![],
    }
}

fn hit(layer: Layer, content: &str) -> SearchHit {
    use chrono::Utc;
    SearchHit {
        id: memory_anchor::types::new_id(),
        content: content.to_string(),
        layer,
        category: None,
        confidence: 0.9,
        created_at: Utc::now(),
        valid_at: None,
        expires_at: None,
        score: 0.5,
        session_id: None,
        related_files: vec![],
    }
}

proptest! {
    /// Invariant: confidence routing is total and mutually exclusive —
    /// every confidence value either lands auto-saved, staged pending, or
    /// rejected as low-confidence, never more than one.
    #[test]
    fn confidence_routing_is_total(confidence in 0.0f32..=1.0f32, body in "[a-z ]{10,40}") {
        let kernel = kernel();
        let content = format!("confidence routing probe {body}");
        let result = kernel.add_memory(request(content, confidence));

        let cfg = EffectiveConfig::default();
        if confidence < cfg.pending_min_confidence {
            prop_assert!(matches!(result, Err(MemoryAnchorError::LowConfidence { .. })));
        } else if confidence < cfg.auto_save_confidence {
            let result = result.unwrap();
            prop_assert!(result.pending);
        } else {
            let result = result.unwrap();
            prop_assert!(!result.pending);
        }
    }

    /// Invariant: `Layer::as_str()` and `Layer::from_str()` round-trip for
    /// every variant.
    #[test]
    fn layer_round_trips(idx in 0usize..5) {
        const LAYERS: [Layer; 5] = [
            Layer::IdentitySchema,
            Layer::ActiveContext,
            Layer::EventLog,
            Layer::VerifiedFact,
            Layer::OperationalKnowledge,
        ];
        let layer = LAYERS[idx];
        let parsed = Layer::from_str(layer.as_str()).unwrap();
        prop_assert_eq!(parsed, layer);
    }

    /// Invariant: `Category::as_str()` and `Category::from_str()` round-trip
    /// for every variant.
    #[test]
    fn category_round_trips(idx in 0usize..5) {
        const CATEGORIES: [Category; 5] = [
            Category::Person,
            Category::Place,
            Category::Event,
            Category::Item,
            Category::Routine,
        ];
        let category = CATEGORIES[idx];
        let parsed = Category::from_str(category.as_str()).unwrap();
        prop_assert_eq!(parsed, category);
    }

    /// Invariant: the budget packer never returns more than `limits.total`
    /// tokens' worth of content, for arbitrary hit counts and sizes.
    #[test]
    fn pack_never_exceeds_total_budget(sizes in prop::collection::vec(4usize..400, 0..20)) {
        let limits = BudgetLimits { l0: 10_000, l1: 10_000, l2: 10_000, l3: 10_000, l4: 10_000, total: 500 };
        let hits: Vec<SearchHit> = sizes
            .iter()
            .map(|&n| hit(Layer::OperationalKnowledge, &"x".repeat(n)))
            .collect();

        let result = pack(hits, &limits, "unknown-model");
        let used: usize = result.packed.iter().map(|p| p.tokens).sum();
        prop_assert!(used <= limits.total);
    }

    /// Invariant: `search_memory` with no explicit time parameters never
    /// surfaces a soft-deleted memory, regardless of content.
    #[test]
    fn deleted_memory_never_resurfaces(body in "[a-z]{10,30}") {
        use memory_anchor::SearchRequest;

        let kernel = kernel();
        let content = format!("deletion probe unique marker {body}");
        let added = kernel.add_memory(request(content.clone(), 0.95)).unwrap();
        kernel.delete_memory(&added.id).unwrap();

        let hits = kernel
            .search_memory(SearchRequest { query: content, limit: Some(5), ..Default::default() })
            .unwrap();
        prop_assert!(!hits.iter().any(|h| h.id == added.id));
    }
}
