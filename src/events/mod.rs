//! Event Log & Promotion (C12, §4.10/§4.11) plus the Kernel event-emission
//! contract. Events are ordinary L2 (`event_log`) memories with a TTL;
//! promotion copies one into a new `verified_fact` (L3) memory, recorded
//! idempotently per `event_id`.

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{MemoryAnchorError, Result};
use crate::metadata::Storage;
use crate::types::{new_id, Category, Memory, MemoryId};

/// A Kernel lifecycle event delivered synchronously to subscribers. Never
/// blocks the caller that emitted it on a slow subscriber — subscribers run
/// inline but are expected to be cheap (logging, cache invalidation); any
/// error a subscriber returns is logged and swallowed, not propagated.
#[derive(Debug, Clone)]
pub enum KernelEvent {
    MemoryAdded { id: MemoryId },
    MemoryDeleted { id: MemoryId },
    IdentityProposed { change_id: String },
    IdentityApplied { change_id: String },
    IdentityRejected { change_id: String },
    SessionStarted { session_id: String },
    SessionEnded { session_id: String },
}

pub trait EventSubscriber: Send + Sync {
    fn on_event(&self, event: &KernelEvent);
}

/// A trivial subscriber used by default/tests: forwards every event to
/// `tracing`.
pub struct TracingSubscriber;

impl EventSubscriber for TracingSubscriber {
    fn on_event(&self, event: &KernelEvent) {
        tracing::info!(?event, "kernel event");
    }
}

pub struct EventBus {
    subscribers: Vec<Box<dyn EventSubscriber>>,
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus { subscribers: vec![Box::new(TracingSubscriber)] }
    }
}

impl EventBus {
    pub fn subscribe(&mut self, subscriber: Box<dyn EventSubscriber>) {
        self.subscribers.push(subscriber);
    }

    pub fn emit(&self, event: KernelEvent) {
        for subscriber in &self.subscribers {
            subscriber.on_event(&event);
        }
    }
}

/// Promote an L2 event to an L3 verified fact, idempotent per `event_id`:
/// calling this twice for the same event returns the same `fact_id` without
/// creating a duplicate memory.
pub fn promote_to_fact(
    storage: &Storage,
    event_id: &str,
    category: Option<Category>,
    confidence: f32,
) -> Result<MemoryId> {
    storage.with_transaction(|conn| {
        if let Some(existing) = already_promoted(conn, event_id)? {
            return Ok(existing);
        }

        let event = crate::metadata::memories::get(conn, event_id)?
            .ok_or_else(|| MemoryAnchorError::NotFound(format!("event '{event_id}' not found")))?;

        let fact = Memory {
            id: new_id(),
            content: event.content,
            layer: crate::types::Layer::VerifiedFact,
            category: category.or(event.category),
            confidence,
            created_at: Utc::now(),
            valid_at: event.valid_at.or(Some(event.created_at)),
            expires_at: None,
            created_by: event.created_by,
            session_id: event.session_id,
            related_files: event.related_files,
            is_active: true,
        };
        crate::metadata::memories::insert(conn, &fact)?;
        record_promotion(conn, event_id, &fact.id, Utc::now())?;

        Ok(fact.id)
    })
}

/// Whether `event_id` has already been promoted, and to which fact, so
/// callers (the Kernel's full dual-store promotion path included) can make
/// `promote_to_fact`-shaped operations idempotent without re-deriving the
/// idempotency-key lookup themselves.
pub fn already_promoted(conn: &Connection, event_id: &str) -> Result<Option<MemoryId>> {
    Ok(conn
        .query_row(
            "SELECT fact_id FROM ma_event_promotions WHERE event_id = ?1",
            params![event_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Record the `event_id -> fact_id` idempotency key once the Kernel has
/// finished writing the promoted fact to both stores.
pub fn record_promotion(conn: &Connection, event_id: &str, fact_id: &MemoryId, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "INSERT INTO ma_event_promotions (event_id, fact_id, promoted_at) VALUES (?1, ?2, ?3)",
        params![event_id, fact_id, now.to_rfc3339()],
    )?;
    Ok(())
}

/// Default TTL applied to event-log entries that don't specify their own
/// `expires_at` (§4.10).
pub fn default_event_ttl() -> Duration {
    Duration::days(30)
}

pub fn default_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    now + default_event_ttl()
}
