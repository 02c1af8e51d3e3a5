//! Transactional outbox.
//!
//! Side effects (emails, export webhooks, integration events, storage
//! deletes) are enqueued inside the business transaction and drained by the
//! scheduler. Delivery is at-least-once: handlers are idempotent on
//! `dedupe_key`, and `(org_id, dedupe_key)` is unique so a retried caller
//! cannot double-enqueue.

pub mod dispatch;

use chrono::{Duration, NaiveDateTime, Utc};
use diesel::prelude::*;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::models::{NewOutboxEvent, OutboxEvent};
use crate::schema::outbox_events;
use crate::telemetry::metrics::record_outbox_outcome;

pub const STATUS_PENDING: &str = "PENDING";
pub const STATUS_IN_FLIGHT: &str = "IN_FLIGHT";
pub const STATUS_DELIVERED: &str = "DELIVERED";
pub const STATUS_DEAD: &str = "DEAD";

#[derive(Debug, Clone, Copy)]
pub enum KindFilter<'a> {
    All,
    Only(&'a [&'a str]),
    Except(&'a [&'a str]),
}

pub const KIND_EMAIL: &str = "email";
pub const KIND_EXPORT_WEBHOOK: &str = "export_webhook";
pub const KIND_INTEGRATION_EVENT: &str = "integration_event";
pub const KIND_STORAGE_DELETE: &str = "storage_delete";

#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    pub base_secs: i64,
    pub cap_secs: i64,
    pub max_attempts: i32,
}

impl BackoffPolicy {
    /// `base * 2^(attempt-1)`, capped. Attempt is 1-based.
    pub fn delay_secs(&self, attempt: i32) -> i64 {
        let shift = (attempt - 1).clamp(0, 30) as u32;
        self.base_secs
            .saturating_mul(1i64 << shift)
            .min(self.cap_secs)
    }

    pub fn next_attempt_at(&self, attempt: i32) -> NaiveDateTime {
        Utc::now().naive_utc() + Duration::seconds(self.delay_secs(attempt))
    }
}

/// Enqueues an event inside the caller's transaction. A duplicate
/// `(org_id, dedupe_key)` returns the existing row instead of a second one.
#[instrument(skip(conn, payload), fields(kind = %kind, dedupe_key = %dedupe_key))]
pub fn enqueue(
    conn: &mut PgConnection,
    org_id: Uuid,
    kind: &str,
    dedupe_key: &str,
    payload: serde_json::Value,
) -> ApiResult<OutboxEvent> {
    let new_event = NewOutboxEvent {
        org_id,
        kind: kind.to_string(),
        dedupe_key: dedupe_key.to_string(),
        payload,
        status: STATUS_PENDING.to_string(),
        next_attempt_at: Some(Utc::now().naive_utc()),
    };

    let inserted: Option<OutboxEvent> = diesel::insert_into(outbox_events::table)
        .values(&new_event)
        .on_conflict((outbox_events::org_id, outbox_events::dedupe_key))
        .do_nothing()
        .returning(OutboxEvent::as_returning())
        .get_result(conn)
        .optional()
        .map_err(AppError::from_diesel)?;

    if let Some(event) = inserted {
        debug!(event_id = %event.id, "Event enqueued");
        return Ok(event);
    }

    outbox_events::table
        .filter(outbox_events::org_id.eq(org_id))
        .filter(outbox_events::dedupe_key.eq(dedupe_key))
        .select(OutboxEvent::as_select())
        .first(conn)
        .map_err(AppError::from_diesel)
}

/// Claims due PENDING rows for this worker. The update is predicated on the
/// current status, so two drainers never claim the same row; the lease stamp
/// lets a crashed worker's claims be reclaimed after the lease TTL.
///
/// `kinds` restricts the claim to a subset of event kinds — the storage
/// janitor drains `storage_delete` events while the main drainer takes the
/// rest.
#[instrument(skip(conn))]
pub fn drain_due(
    conn: &mut PgConnection,
    worker: &str,
    batch_size: i64,
    lease_secs: i64,
    kinds: KindFilter<'_>,
) -> ApiResult<Vec<OutboxEvent>> {
    let now = Utc::now().naive_utc();

    let mut query = outbox_events::table
        .filter(outbox_events::status.eq(STATUS_PENDING))
        .filter(outbox_events::next_attempt_at.le(now))
        .select(outbox_events::id)
        .into_boxed();
    match kinds {
        KindFilter::All => {}
        KindFilter::Only(list) => {
            query = query.filter(outbox_events::kind.eq_any(list.to_vec()));
        }
        KindFilter::Except(list) => {
            query = query.filter(outbox_events::kind.ne_all(list.to_vec()));
        }
    }

    let due_ids: Vec<Uuid> = query
        .order(outbox_events::created_at.asc())
        .limit(batch_size)
        .load(conn)
        .map_err(AppError::from_diesel)?;

    if due_ids.is_empty() {
        return Ok(Vec::new());
    }

    let claimed = diesel::update(
        outbox_events::table
            .filter(outbox_events::id.eq_any(&due_ids))
            .filter(outbox_events::status.eq(STATUS_PENDING))
            .filter(outbox_events::next_attempt_at.le(now)),
    )
    .set((
        outbox_events::status.eq(STATUS_IN_FLIGHT),
        outbox_events::lease_worker.eq(worker),
        outbox_events::lease_expires_at.eq(now + Duration::seconds(lease_secs)),
    ))
    .returning(OutboxEvent::as_returning())
    .get_results(conn)
    .map_err(AppError::from_diesel)?;

    if !claimed.is_empty() {
        debug!(count = claimed.len(), worker = worker, "Claimed outbox events");
    }

    Ok(claimed)
}

/// Puts expired IN_FLIGHT leases back to PENDING.
pub fn reclaim_expired_leases(conn: &mut PgConnection) -> ApiResult<usize> {
    let now = Utc::now().naive_utc();

    let count = diesel::update(
        outbox_events::table
            .filter(outbox_events::status.eq(STATUS_IN_FLIGHT))
            .filter(outbox_events::lease_expires_at.lt(now)),
    )
    .set((
        outbox_events::status.eq(STATUS_PENDING),
        outbox_events::lease_worker.eq(None::<String>),
        outbox_events::lease_expires_at.eq(None::<NaiveDateTime>),
    ))
    .execute(conn)
    .map_err(AppError::from_diesel)?;

    if count > 0 {
        warn!(count, "Reclaimed expired outbox leases");
    }
    Ok(count)
}

pub fn mark_delivered(conn: &mut PgConnection, event: &OutboxEvent) -> ApiResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(outbox_events::table.find(event.id))
        .set((
            outbox_events::status.eq(STATUS_DELIVERED),
            outbox_events::delivered_at.eq(now),
            outbox_events::attempts.eq(event.attempts + 1),
            outbox_events::lease_worker.eq(None::<String>),
            outbox_events::lease_expires_at.eq(None::<NaiveDateTime>),
            outbox_events::last_error.eq(None::<String>),
        ))
        .execute(conn)
        .map_err(AppError::from_diesel)?;

    record_outbox_outcome(&event.kind, "delivered");
    Ok(())
}

/// Transient failure: schedule a retry with backoff, or bury the event when
/// the attempt budget is spent.
pub fn mark_failed(
    conn: &mut PgConnection,
    event: &OutboxEvent,
    policy: &BackoffPolicy,
    error: &str,
) -> ApiResult<()> {
    let attempts = event.attempts + 1;

    if attempts >= policy.max_attempts {
        return bury(conn, event, attempts, error);
    }

    diesel::update(outbox_events::table.find(event.id))
        .set((
            outbox_events::status.eq(STATUS_PENDING),
            outbox_events::attempts.eq(attempts),
            outbox_events::next_attempt_at.eq(policy.next_attempt_at(attempts)),
            outbox_events::lease_worker.eq(None::<String>),
            outbox_events::lease_expires_at.eq(None::<NaiveDateTime>),
            outbox_events::last_error.eq(error),
        ))
        .execute(conn)
        .map_err(AppError::from_diesel)?;

    record_outbox_outcome(&event.kind, "retry");
    Ok(())
}

/// Permanent failure (poison response or blocked destination): DEAD now.
pub fn mark_dead(conn: &mut PgConnection, event: &OutboxEvent, error: &str) -> ApiResult<()> {
    bury(conn, event, event.attempts + 1, error)
}

fn bury(
    conn: &mut PgConnection,
    event: &OutboxEvent,
    attempts: i32,
    error: &str,
) -> ApiResult<()> {
    diesel::update(outbox_events::table.find(event.id))
        .set((
            outbox_events::status.eq(STATUS_DEAD),
            outbox_events::attempts.eq(attempts),
            outbox_events::next_attempt_at.eq(None::<NaiveDateTime>),
            outbox_events::lease_worker.eq(None::<String>),
            outbox_events::lease_expires_at.eq(None::<NaiveDateTime>),
            outbox_events::last_error.eq(error),
        ))
        .execute(conn)
        .map_err(AppError::from_diesel)?;

    warn!(event_id = %event.id, kind = %event.kind, error = error, "Outbox event dead-lettered");
    record_outbox_outcome(&event.kind, "dead");
    Ok(())
}

/// Dead-letter listing, scoped to the caller's org.
pub fn list_dead(
    conn: &mut PgConnection,
    org_id: Uuid,
    limit: i64,
    offset: i64,
) -> ApiResult<(Vec<OutboxEvent>, i64)> {
    let rows = outbox_events::table
        .filter(outbox_events::org_id.eq(org_id))
        .filter(outbox_events::status.eq(STATUS_DEAD))
        .order(outbox_events::created_at.desc())
        .limit(limit)
        .offset(offset)
        .select(OutboxEvent::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)?;

    let total: i64 = outbox_events::table
        .filter(outbox_events::org_id.eq(org_id))
        .filter(outbox_events::status.eq(STATUS_DEAD))
        .count()
        .get_result(conn)
        .map_err(AppError::from_diesel)?;

    Ok((rows, total))
}

/// Replays a dead event: attempts reset, back to PENDING. Org-scoped so an
/// operator cannot resurrect another tenant's event.
pub fn replay(conn: &mut PgConnection, org_id: Uuid, event_id: Uuid) -> ApiResult<OutboxEvent> {
    let now = Utc::now().naive_utc();

    let event: Option<OutboxEvent> = diesel::update(
        outbox_events::table
            .filter(outbox_events::id.eq(event_id))
            .filter(outbox_events::org_id.eq(org_id))
            .filter(outbox_events::status.eq(STATUS_DEAD)),
    )
    .set((
        outbox_events::status.eq(STATUS_PENDING),
        outbox_events::attempts.eq(0),
        outbox_events::next_attempt_at.eq(now),
        outbox_events::last_error.eq(None::<String>),
    ))
    .returning(OutboxEvent::as_returning())
    .get_result(conn)
    .optional()
    .map_err(AppError::from_diesel)?;

    record_outbox_outcome("replay", "requested");
    event.ok_or_else(|| AppError::not_found("Dead-letter event not found"))
}

/// Drops terminal rows past the retention window.
pub fn cleanup(conn: &mut PgConnection, older_than_days: i64) -> ApiResult<usize> {
    let cutoff = Utc::now().naive_utc() - Duration::days(older_than_days);

    let count = diesel::delete(
        outbox_events::table
            .filter(outbox_events::status.eq_any([STATUS_DELIVERED, STATUS_DEAD]))
            .filter(outbox_events::created_at.lt(cutoff)),
    )
    .execute(conn)
    .map_err(AppError::from_diesel)?;

    if count > 0 {
        debug!(count, older_than_days, "Cleaned up terminal outbox events");
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy {
            base_secs: 30,
            cap_secs: 4 * 3600,
            max_attempts: 8,
        }
    }

    #[test]
    fn test_backoff_doubles_per_attempt() {
        let p = policy();
        assert_eq!(p.delay_secs(1), 30);
        assert_eq!(p.delay_secs(2), 60);
        assert_eq!(p.delay_secs(3), 120);
        assert_eq!(p.delay_secs(5), 480);
    }

    #[test]
    fn test_backoff_caps() {
        let p = policy();
        assert_eq!(p.delay_secs(20), 4 * 3600);
        // Shift guard: absurd attempt counts must not overflow.
        assert_eq!(p.delay_secs(1000), 4 * 3600);
    }

    #[test]
    fn test_backoff_attempt_zero_treated_as_first() {
        let p = policy();
        assert_eq!(p.delay_secs(0), 30);
    }

    #[test]
    fn test_next_attempt_is_in_the_future() {
        let p = policy();
        let at = p.next_attempt_at(1);
        assert!(at > Utc::now().naive_utc());
    }
}
