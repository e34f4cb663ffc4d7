//! Bi-temporal Query Engine (C8, §4.7) — composes `as_of`, `in_range`,
//! `only_valid`, and `include_expired` into the payload [`Filter`] DSL that
//! the Vector Store already understands, so temporal semantics are
//! enforced without a second query language.

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::vector::{FieldPredicate, Filter};

/// Temporal query options composed by the Kernel ahead of a search (§4.7).
#[derive(Debug, Clone, Default)]
pub struct TemporalQuery {
    /// Snapshot the world as of this instant: only memories whose
    /// `valid_at <= as_of` (or unset) and whose `expires_at > as_of` (or
    /// unset) are visible.
    pub as_of: Option<DateTime<Utc>>,
    /// Restrict to memories whose `valid_at` falls within `[start, end]`.
    pub range: Option<(DateTime<Utc>, DateTime<Utc>)>,
    /// Exclude expired memories (default true unless `include_expired`).
    pub include_expired: bool,
}

impl TemporalQuery {
    pub fn as_of(instant: DateTime<Utc>) -> Self {
        TemporalQuery { as_of: Some(instant), ..Default::default() }
    }

    pub fn in_range(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        TemporalQuery { range: Some((start, end)), ..Default::default() }
    }

    pub fn only_valid() -> Self {
        TemporalQuery::default()
    }

    pub fn include_expired(mut self) -> Self {
        self.include_expired = true;
        self
    }

    /// Build the payload filter for this query, ANDed with `is_active = true`
    /// and an optional extra `layer`/`category` filter — the default
    /// composition is `only_valid() AND is_active = true` (§9 resolution).
    pub fn to_filter(&self, extra: Option<Filter>) -> Filter {
        let mut clauses = vec![Filter::eq("is_active", json!(true))];

        if let Some(as_of) = self.as_of {
            let as_of_str = as_of.to_rfc3339();
            clauses.push(Filter::or(vec![
                Filter::is_null("valid_at"),
                Filter::Field("valid_at".into(), FieldPredicate::Lte(json!(as_of_str.clone()))),
            ]));
            if !self.include_expired {
                clauses.push(Filter::or(vec![
                    Filter::is_null("expires_at"),
                    Filter::Field("expires_at".into(), FieldPredicate::Gt(json!(as_of_str))),
                ]));
            }
        } else if !self.include_expired {
            let now = Utc::now().to_rfc3339();
            clauses.push(Filter::or(vec![
                Filter::is_null("expires_at"),
                Filter::Field("expires_at".into(), FieldPredicate::Gt(json!(now))),
            ]));
        }

        if let Some((start, end)) = self.range {
            clauses.push(Filter::Field("valid_at".into(), FieldPredicate::Lte(json!(end.to_rfc3339()))));
            clauses.push(Filter::or(vec![
                Filter::is_null("expires_at"),
                Filter::Field("expires_at".into(), FieldPredicate::Gt(json!(start.to_rfc3339()))),
            ]));
        }

        if let Some(extra) = extra {
            clauses.push(extra);
        }

        Filter::and(clauses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Payload;
    use chrono::Duration;

    fn payload(valid_at: Option<DateTime<Utc>>, expires_at: Option<DateTime<Utc>>, active: bool) -> Payload {
        let mut p = Payload::new();
        p.insert("valid_at".into(), valid_at.map(|t| json!(t.to_rfc3339())).unwrap_or(json!(null)));
        p.insert("expires_at".into(), expires_at.map(|t| json!(t.to_rfc3339())).unwrap_or(json!(null)));
        p.insert("is_active".into(), json!(active));
        p
    }

    #[test]
    fn only_valid_excludes_inactive_and_expired() {
        let filter = TemporalQuery::only_valid().to_filter(None);
        assert!(filter.matches(&payload(None, None, true)));
        assert!(!filter.matches(&payload(None, None, false)));
        assert!(!filter.matches(&payload(None, Some(Utc::now() - Duration::days(1)), true)));
        assert!(filter.matches(&payload(None, Some(Utc::now() + Duration::days(1)), true)));
    }

    #[test]
    fn include_expired_allows_past_expiry() {
        let filter = TemporalQuery::only_valid().include_expired().to_filter(None);
        assert!(filter.matches(&payload(None, Some(Utc::now() - Duration::days(1)), true)));
    }

    #[test]
    fn as_of_snapshots_a_past_instant() {
        let as_of = Utc::now() - Duration::days(10);
        let filter = TemporalQuery::as_of(as_of).to_filter(None);

        // valid_at in the future relative to as_of -> not yet visible.
        assert!(!filter.matches(&payload(Some(Utc::now()), None, true)));
        // valid_at before as_of, not yet expired at that time -> visible.
        assert!(filter.matches(&payload(Some(as_of - Duration::days(5)), None, true)));
    }

    #[test]
    fn in_range_restricts_to_window() {
        let start = Utc::now() - Duration::days(10);
        let end = Utc::now() - Duration::days(5);
        let filter = TemporalQuery::in_range(start, end).to_filter(None);
        assert!(filter.matches(&payload(Some(start + Duration::days(1)), None, true)));
        assert!(!filter.matches(&payload(Some(end + Duration::days(1)), None, true)));
    }

    #[test]
    fn in_range_includes_long_lived_record_spanning_into_window() {
        let start = Utc::now() - Duration::days(10);
        let end = Utc::now() - Duration::days(5);
        let filter = TemporalQuery::in_range(start, end).to_filter(None);
        // valid_at predates the window entirely, but expires_at falls after
        // the window's start -> the record overlaps the window and matches.
        assert!(filter.matches(&payload(Some(start - Duration::days(100)), Some(start + Duration::days(1)), true)));
        // expires_at at or before the window's start -> no overlap.
        assert!(!filter.matches(&payload(Some(start - Duration::days(100)), Some(start - Duration::days(1)), true)));
    }
}
