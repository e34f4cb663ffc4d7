//! Context Budget Manager (C6, §4.5) — per-layer token budgets applied
//! when packing search/briefing results into a bounded context window.
//!
//! Grounded in the teacher's `intelligence::compression` module: token
//! counting goes through `tiktoken-rs` when a model's encoding is known,
//! falling back to a deterministic `chars/4` estimate otherwise.

use crate::types::{Layer, SearchHit};

/// Default per-layer and total budgets (§4.5), overridable via `MA_BUDGET_*`
/// env vars through [`crate::config::EffectiveConfig`].
#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    pub l0: usize,
    pub l1: usize,
    pub l2: usize,
    pub l3: usize,
    pub l4: usize,
    pub total: usize,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        BudgetLimits { l0: 500, l1: 200, l2: 500, l3: 2000, l4: 300, total: 4000 }
    }
}

impl BudgetLimits {
    fn for_layer(&self, layer: Layer) -> usize {
        match layer {
            Layer::IdentitySchema => self.l0,
            Layer::ActiveContext => self.l1,
            Layer::EventLog => self.l2,
            Layer::VerifiedFact => self.l3,
            Layer::OperationalKnowledge => self.l4,
        }
    }
}

/// Token encoding used for counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenEncoding {
    Cl100kBase,
    O200kBase,
}

impl TokenEncoding {
    /// Pick an encoding by model name, matching the teacher's
    /// `detect_encoding` heuristic (gpt-4o family -> o200k, everything else
    /// recognized -> cl100k).
    pub fn detect(model: &str) -> Option<Self> {
        let m = model.to_lowercase();
        if m.contains("gpt-4o") || m.contains("o1") {
            Some(TokenEncoding::O200kBase)
        } else if m.contains("gpt-4")
            || m.contains("gpt-3.5")
            || m.contains("text-embedding")
            || m.contains("claude")
        {
            Some(TokenEncoding::Cl100kBase)
        } else {
            None
        }
    }
}

/// Count tokens in `text` for `model`, using a real tokenizer when the
/// model's encoding is known and a `chars/4` estimate otherwise — this
/// crate, unlike the teacher, never treats an unknown model as a hard
/// error, since the Kernel must always be able to produce a budget
/// estimate (§4.5).
pub fn count_tokens(text: &str, model: &str) -> usize {
    match TokenEncoding::detect(model) {
        Some(TokenEncoding::Cl100kBase) => tiktoken_rs::cl100k_base()
            .ok()
            .map(|bpe| bpe.encode_ordinary(text).len())
            .unwrap_or_else(|| estimate_tokens(text)),
        Some(TokenEncoding::O200kBase) => tiktoken_rs::o200k_base()
            .ok()
            .map(|bpe| bpe.encode_ordinary(text).len())
            .unwrap_or_else(|| estimate_tokens(text)),
        None => estimate_tokens(text),
    }
}

/// Deterministic fixed-ratio fallback estimator (§4.5).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + 3) / 4
}

/// One hit after budget truncation, with its token cost attached.
#[derive(Debug, Clone)]
pub struct PackedHit {
    pub hit: SearchHit,
    pub tokens: usize,
}

/// Result of packing a set of hits into the budget.
#[derive(Debug, Clone, Default)]
pub struct PackResult {
    pub packed: Vec<PackedHit>,
    pub dropped_count: usize,
}

/// Pack `hits` into the configured per-layer and total budgets.
///
/// Packing order is L0 -> L3 -> L2 -> L4 -> L1 (§4.5 cross-layer order: the
/// identity schema and verified facts are prioritized over transient
/// context and raw events). Within a layer, hits are already assumed
/// sorted by relevance; ties are not re-sorted here. Truncation never
/// splits a hit: an item that would not fit is dropped whole and counted.
pub fn pack(hits: Vec<SearchHit>, limits: &BudgetLimits, model: &str) -> PackResult {
    const ORDER: [Layer; 5] = [
        Layer::IdentitySchema,
        Layer::VerifiedFact,
        Layer::EventLog,
        Layer::OperationalKnowledge,
        Layer::ActiveContext,
    ];

    let mut by_layer: std::collections::HashMap<Layer, Vec<SearchHit>> = std::collections::HashMap::new();
    for hit in hits {
        by_layer.entry(hit.layer).or_default().push(hit);
    }

    let mut packed = Vec::new();
    let mut dropped_count = 0;
    let mut total_used = 0usize;

    for layer in ORDER {
        let layer_limit = limits.for_layer(layer);
        let mut layer_used = 0usize;
        let Some(layer_hits) = by_layer.remove(&layer) else {
            continue;
        };
        for hit in layer_hits {
            let tokens = count_tokens(&hit.content, model);
            if layer_used + tokens > layer_limit || total_used + tokens > limits.total {
                dropped_count += 1;
                continue;
            }
            layer_used += tokens;
            total_used += tokens;
            packed.push(PackedHit { hit, tokens });
        }
    }

    PackResult { packed, dropped_count }
}
