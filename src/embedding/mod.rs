//! Embedding (C1, §4) — an external collaborator in the spec: the model and
//! tokenizer choice are explicitly out of scope, but the Kernel needs a
//! trait seam to call through and a deterministic test double to exercise
//! it. Grounded in the teacher's `embedding::Embedder` trait shape.

use crate::error::Result;

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

/// A deterministic, dependency-free embedder for tests and local
/// development: hashes the text into a fixed-size unit vector. Never
/// intended for production semantic search quality — just enough structure
/// (identical text -> identical vector, similar prefixes -> higher cosine
/// similarity than unrelated text) to exercise the Kernel's write/search
/// paths end to end.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        HashingEmbedder { dim }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        HashingEmbedder::new(384)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0f32; self.dim];
        for (i, token) in text.split_whitespace().enumerate() {
            let mut hasher = std::collections::hash_map::DefaultHasher::new();
            std::hash::Hash::hash(&token, &mut hasher);
            std::hash::Hash::hash(&i, &mut hasher);
            let h = std::hash::Hasher::finish(&hasher);
            let slot = (h as usize) % self.dim;
            let sign = if h & 1 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }
        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        Ok(vector)
    }

    fn dimensions(&self) -> usize {
        self.dim
    }

    fn model_name(&self) -> &str {
        "hashing-embedder-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::cosine_similarity;

    #[test]
    fn identical_text_embeds_identically() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("the user prefers dark mode").unwrap();
        let b = embedder.embed("the user prefers dark mode").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn distinct_text_is_less_similar_than_identical() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("the user prefers dark mode").unwrap();
        let b = embedder.embed("the user prefers dark mode").unwrap();
        let c = embedder.embed("completely unrelated sentence about weather").unwrap();
        assert!(cosine_similarity(&a, &b) > cosine_similarity(&a, &c));
    }

    #[test]
    fn output_is_unit_length() {
        let embedder = HashingEmbedder::new(32);
        let v = embedder.embed("some content to embed").unwrap();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }
}
