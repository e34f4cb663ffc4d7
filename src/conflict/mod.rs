//! Conflict Detector (C7, §4.6) — advisory, non-blocking checks run
//! against candidate neighbors before a write commits. Grounded
//! conceptually in the teacher's `sync::conflict::detector::ConflictDetector`
//! (there applied to sync merges; here applied to same-store neighbors).

use chrono::{DateTime, Duration, Utc};

use crate::types::{Category, ConflictKind, ConflictWarning, MemoryId};

const TEMPORAL_WINDOW_DAYS: i64 = 7;
const TEMPORAL_SIMILARITY_THRESHOLD: f32 = 0.85;
const SOURCE_SIMILARITY_THRESHOLD: f32 = 0.9;
const CONFIDENCE_SIMILARITY_THRESHOLD: f32 = 0.9;
const CONFIDENCE_DELTA_THRESHOLD: f32 = 0.3;

/// A candidate neighbor considered during conflict detection: just the
/// fields the three rules need, plus the cosine similarity the caller's ANN
/// search already computed (so the detector never recomputes it).
#[derive(Debug, Clone)]
pub struct NeighborInfo {
    pub id: MemoryId,
    pub category: Option<Category>,
    pub confidence: f32,
    pub created_at: DateTime<Utc>,
    pub valid_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub similarity: f32,
}

/// Check a new memory against its candidate neighbors (already filtered to
/// the same category and a reasonable ANN radius by the caller) and return
/// the single most relevant conflict, if any. The three rules are checked
/// in order; the first to fire wins — this is advisory, not exhaustive.
pub fn detect(
    new_category: Option<Category>,
    new_confidence: f32,
    new_created_by: &str,
    new_valid_at: Option<DateTime<Utc>>,
    candidates: &[NeighborInfo],
) -> ConflictWarning {
    let mut temporal_hits: Vec<MemoryId> = Vec::new();
    let mut source_hits: Vec<MemoryId> = Vec::new();
    let mut confidence_hits: Vec<MemoryId> = Vec::new();

    for candidate in candidates {
        let similarity = candidate.similarity;

        // Only the temporal rule is scoped to same-category neighbors (§4.6);
        // source divergence and confidence delta apply regardless of category.
        if candidate.category == new_category && similarity >= TEMPORAL_SIMILARITY_THRESHOLD {
            if let (Some(a), Some(b)) = (new_valid_at, candidate.valid_at) {
                if (a - b).num_days().abs() <= TEMPORAL_WINDOW_DAYS {
                    temporal_hits.push(candidate.id.clone());
                }
            } else {
                let age = Utc::now() - candidate.created_at;
                if age <= Duration::days(TEMPORAL_WINDOW_DAYS) {
                    temporal_hits.push(candidate.id.clone());
                }
            }
        }

        if similarity >= SOURCE_SIMILARITY_THRESHOLD && candidate.created_by != new_created_by {
            source_hits.push(candidate.id.clone());
        }

        if similarity >= CONFIDENCE_SIMILARITY_THRESHOLD
            && (candidate.confidence - new_confidence).abs() > CONFIDENCE_DELTA_THRESHOLD
        {
            confidence_hits.push(candidate.id.clone());
        }
    }

    if !temporal_hits.is_empty() {
        return ConflictWarning {
            has_conflict: true,
            kind: ConflictKind::Temporal,
            related_ids: temporal_hits,
            hint: "highly similar memory recorded within the last 7 days".to_string(),
        };
    }
    if !source_hits.is_empty() {
        return ConflictWarning {
            has_conflict: true,
            kind: ConflictKind::Source,
            related_ids: source_hits,
            hint: "highly similar memory was recorded by a different source".to_string(),
        };
    }
    if !confidence_hits.is_empty() {
        return ConflictWarning {
            has_conflict: true,
            kind: ConflictKind::Confidence,
            related_ids: confidence_hits,
            hint: "highly similar memory has a substantially different confidence".to_string(),
        };
    }

    ConflictWarning::none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::new_id;

    fn neighbor(confidence: f32, created_by: &str, created_at: DateTime<Utc>, similarity: f32) -> NeighborInfo {
        NeighborInfo {
            id: new_id(),
            category: Some(Category::Person),
            confidence,
            created_at,
            valid_at: None,
            created_by: created_by.to_string(),
            similarity,
        }
    }

    #[test]
    fn no_conflict_below_similarity_threshold() {
        let neighbors = vec![neighbor(0.9, "agent", Utc::now(), 0.5)];
        let warning = detect(Some(Category::Person), 0.9, "agent", None, &neighbors);
        assert!(!warning.has_conflict);
    }

    #[test]
    fn temporal_conflict_on_recent_near_duplicate() {
        let neighbors = vec![neighbor(0.9, "agent", Utc::now(), 0.95)];
        let warning = detect(Some(Category::Person), 0.9, "agent", None, &neighbors);
        assert!(warning.has_conflict);
        assert_eq!(warning.kind, ConflictKind::Temporal);
    }

    #[test]
    fn source_conflict_on_differing_creator() {
        let neighbors = vec![neighbor(0.9, "user", Utc::now() - Duration::days(60), 0.95)];
        let warning = detect(Some(Category::Person), 0.9, "agent", None, &neighbors);
        assert_eq!(warning.kind, ConflictKind::Source);
    }

    #[test]
    fn confidence_conflict_on_large_delta() {
        let neighbors = vec![neighbor(0.95, "agent", Utc::now() - Duration::days(60), 0.95)];
        let warning = detect(Some(Category::Person), 0.5, "agent", None, &neighbors);
        assert_eq!(warning.kind, ConflictKind::Confidence);
    }

    #[test]
    fn source_conflict_fires_across_differing_categories() {
        let mut candidate = neighbor(0.9, "user", Utc::now() - Duration::days(60), 0.95);
        candidate.category = Some(Category::Place);
        let warning = detect(Some(Category::Person), 0.9, "agent", None, &[candidate]);
        assert_eq!(warning.kind, ConflictKind::Source);
    }

    #[test]
    fn temporal_rule_does_not_fire_across_differing_categories() {
        let mut candidate = neighbor(0.9, "agent", Utc::now(), 0.95);
        candidate.category = Some(Category::Place);
        let warning = detect(Some(Category::Person), 0.9, "agent", None, &[candidate]);
        assert!(!warning.has_conflict);
    }
}
