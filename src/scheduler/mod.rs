//! Scheduled-jobs runtime.
//!
//! A small supervisor runs one cooperative loop per job. Every iteration
//! upserts the job's heartbeat row — success or failure — and the readiness
//! probe turns unhealthy when a required job's heartbeat goes stale.
//! Shutdown is a watch channel observed at iteration boundaries.

use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::{JobsConfig, RetentionConfig};
use crate::domain::{bookings, invoices, notifications};
use crate::error::{ApiResult, AppError};
use crate::models::JobHeartbeat;
use crate::outbox::{self, dispatch::DeliveryOutcome, dispatch::Dispatcher, KindFilter};
use crate::schema::{admin_idempotency, job_heartbeats, leads, photos};
use crate::telemetry::metrics::{record_job_heartbeat_age, record_job_iteration};
use crate::DbPool;

pub const JOB_OUTBOX_DRAIN: &str = "outbox_drain";
pub const JOB_BOOKING_SWEEP: &str = "booking_sweep";
pub const JOB_EMAIL_REMINDERS: &str = "email_reminders";
pub const JOB_RETENTION_CLEANUP: &str = "retention_cleanup";
pub const JOB_STORAGE_JANITOR: &str = "storage_janitor";

pub const ALL_JOBS: &[&str] = &[
    JOB_OUTBOX_DRAIN,
    JOB_BOOKING_SWEEP,
    JOB_EMAIL_REMINDERS,
    JOB_RETENTION_CLEANUP,
    JOB_STORAGE_JANITOR,
];

#[derive(Clone)]
pub struct Scheduler {
    pub db_pool: DbPool,
    pub dispatcher: Dispatcher,
    pub jobs: JobsConfig,
    pub retention: RetentionConfig,
    pub worker_name: String,
}

impl Scheduler {
    pub fn new(
        db_pool: DbPool,
        dispatcher: Dispatcher,
        jobs: JobsConfig,
        retention: RetentionConfig,
    ) -> Self {
        let worker_name = format!("worker-{}", Uuid::new_v4().simple());
        Self {
            db_pool,
            dispatcher,
            jobs,
            retention,
            worker_name,
        }
    }

    /// Spawns every job loop; the returned sender stops them all.
    pub fn spawn(self) -> watch::Sender<bool> {
        let (shutdown_tx, _) = watch::channel(false);

        let plans = [
            (JOB_OUTBOX_DRAIN, self.jobs.outbox_poll_secs),
            (JOB_BOOKING_SWEEP, self.jobs.sweep_interval_secs),
            (JOB_EMAIL_REMINDERS, self.jobs.reminder_interval_secs),
            (JOB_RETENTION_CLEANUP, self.jobs.retention_interval_secs),
            (JOB_STORAGE_JANITOR, self.jobs.janitor_interval_secs),
        ];

        for (name, interval_secs) in plans {
            let scheduler = self.clone();
            let shutdown_rx = shutdown_tx.subscribe();
            tokio::spawn(async move {
                scheduler.run_loop(name, interval_secs, shutdown_rx).await;
            });
        }

        shutdown_tx
    }

    #[instrument(skip(self, shutdown_rx), fields(job = name))]
    async fn run_loop(&self, name: &'static str, interval_secs: u64, mut shutdown_rx: watch::Receiver<bool>) {
        info!(interval_secs, "Job loop started");
        let mut timer = interval(Duration::from_secs(interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let budget = Duration::from_secs(self.jobs.iteration_timeout_secs);
                    let outcome = tokio::time::timeout(budget, self.run_iteration(name)).await;

                    match outcome {
                        Ok(Ok(())) => {
                            self.beat(name, true);
                            record_job_iteration(name, "ok");
                        }
                        Ok(Err(e)) => {
                            warn!(job = name, error = %e, "Job iteration failed");
                            self.beat(name, false);
                            record_job_iteration(name, "error");
                        }
                        Err(_) => {
                            warn!(job = name, "Job iteration timed out");
                            self.beat(name, false);
                            record_job_iteration(name, "timeout");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!(job = name, "Job loop stopping");
                        break;
                    }
                }
            }
        }
    }

    async fn run_iteration(&self, name: &str) -> ApiResult<()> {
        match name {
            JOB_OUTBOX_DRAIN => self.drain_outbox(KindFilter::Except(&[outbox::KIND_STORAGE_DELETE])).await,
            JOB_STORAGE_JANITOR => self.drain_outbox(KindFilter::Only(&[outbox::KIND_STORAGE_DELETE])).await,
            JOB_BOOKING_SWEEP => self.sweep_bookings().await,
            JOB_EMAIL_REMINDERS => self.email_reminders().await,
            JOB_RETENTION_CLEANUP => self.retention_cleanup().await,
            other => Err(AppError::internal(format!("Unknown job: {}", other))),
        }
    }

    /// Claims a batch, delivers each event, then records the outcome.
    /// Claim and outcome writes are blocking diesel work moved off the
    /// runtime; delivery itself is async I/O.
    async fn drain_outbox(&self, kinds: KindFilter<'static>) -> ApiResult<()> {
        let pool = self.db_pool.clone();
        let worker = self.worker_name.clone();
        let batch_size = self.jobs.outbox_batch_size;
        let lease_secs = self.jobs.outbox_lease_secs;

        let events = tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| AppError::dependency(format!("DB pool: {}", e)))?;
            outbox::reclaim_expired_leases(&mut conn)?;
            outbox::drain_due(&mut conn, &worker, batch_size, lease_secs, kinds)
        })
        .await
        .map_err(|e| AppError::internal(format!("Join error: {}", e)))??;

        for event in events {
            let outcome = self.dispatcher.deliver(&event).await;

            let pool = self.db_pool.clone();
            let policy = self.dispatcher.policy.clone();
            tokio::task::spawn_blocking(move || -> ApiResult<()> {
                let mut conn = pool
                    .get()
                    .map_err(|e| AppError::dependency(format!("DB pool: {}", e)))?;
                match outcome {
                    DeliveryOutcome::Delivered => outbox::mark_delivered(&mut conn, &event),
                    DeliveryOutcome::Transient(err) => outbox::mark_failed(
                        &mut conn,
                        &event,
                        &policy,
                        &outbox::dispatch::bounded_error(&err),
                    ),
                    DeliveryOutcome::Poison(err) => outbox::mark_dead(
                        &mut conn,
                        &event,
                        &outbox::dispatch::bounded_error(&err),
                    ),
                    DeliveryOutcome::Blocked(err) => outbox::mark_dead(
                        &mut conn,
                        &event,
                        &format!("blocked:{}", outbox::dispatch::bounded_error(&err)),
                    ),
                }
            })
            .await
            .map_err(|e| AppError::internal(format!("Join error: {}", e)))??;
        }

        Ok(())
    }

    async fn sweep_bookings(&self) -> ApiResult<()> {
        let pool = self.db_pool.clone();
        let ttl = self.retention.pending_booking_ttl_minutes;

        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|e| AppError::dependency(format!("DB pool: {}", e)))?;
            bookings::sweep_expired(&mut conn, ttl)
        })
        .await
        .map_err(|e| AppError::internal(format!("Join error: {}", e)))??;

        Ok(())
    }

    /// Reminders for tomorrow's confirmed bookings plus overdue invoice
    /// dunning. Dedup is the synthetic email key, so re-runs are no-ops.
    async fn email_reminders(&self) -> ApiResult<()> {
        let pool = self.db_pool.clone();

        tokio::task::spawn_blocking(move || -> ApiResult<()> {
            use crate::schema::bookings as b;

            let mut conn = pool
                .get()
                .map_err(|e| AppError::dependency(format!("DB pool: {}", e)))?;

            let now = Utc::now().naive_utc();
            let horizon = now + ChronoDuration::hours(24);

            let upcoming: Vec<(Uuid, Uuid, Option<Uuid>, chrono::NaiveDateTime)> = b::table
                .filter(b::status.eq("CONFIRMED"))
                .filter(b::starts_at.gt(now))
                .filter(b::starts_at.le(horizon))
                .select((b::id, b::org_id, b::lead_id, b::starts_at))
                .load(&mut conn)?;

            for (booking_id, org_id, lead_id, starts_at) in upcoming {
                let Some(lead_id) = lead_id else { continue };
                let recipient: Option<Option<String>> = leads::table
                    .filter(leads::id.eq(lead_id))
                    .filter(leads::org_id.eq(org_id))
                    .select(leads::email)
                    .first(&mut conn)
                    .optional()?;
                if let Some(Some(recipient)) = recipient {
                    notifications::enqueue_email(
                        &mut conn,
                        org_id,
                        Some(booking_id),
                        None,
                        notifications::EMAIL_BOOKING_REMINDER,
                        &recipient,
                        notifications::booking_subject(notifications::EMAIL_BOOKING_REMINDER),
                        &format!("Your cleaning is scheduled for {}.", starts_at),
                    )?;
                }
            }

            invoices::mark_overdue(&mut conn, now)?;
            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("Join error: {}", e)))??;

        Ok(())
    }

    /// Retention: aged terminal leads are erased, and every photo hanging
    /// off their bookings is deleted through the janitor so the cascade
    /// reaches object storage, not just rows.
    async fn retention_cleanup(&self) -> ApiResult<()> {
        let pool = self.db_pool.clone();
        let lead_days = self.retention.lead_retention_days;
        let outbox_days = self.retention.outbox_retention_days;
        let idem_hours = 24i64;

        tokio::task::spawn_blocking(move || -> ApiResult<()> {
            use crate::schema::bookings as b;

            let mut conn = pool
                .get()
                .map_err(|e| AppError::dependency(format!("DB pool: {}", e)))?;

            let cutoff = Utc::now().naive_utc() - ChronoDuration::days(lead_days);

            let aged: Vec<(Uuid, Uuid)> = leads::table
                .filter(leads::status.eq_any(["DONE", "CANCELLED"]))
                .filter(leads::updated_at.lt(cutoff))
                .select((leads::id, leads::org_id))
                .limit(200)
                .load(&mut conn)?;

            for (lead_id, org_id) in &aged {
                let booking_ids: Vec<Uuid> = b::table
                    .filter(b::org_id.eq(org_id))
                    .filter(b::lead_id.eq(lead_id))
                    .select(b::id)
                    .load(&mut conn)?;

                for booking_id in booking_ids {
                    let photo_rows: Vec<(Uuid, String)> = photos::table
                        .filter(photos::org_id.eq(org_id))
                        .filter(photos::booking_id.eq(booking_id))
                        .select((photos::id, photos::storage_key))
                        .load(&mut conn)?;

                    for (photo_id, storage_key) in photo_rows {
                        diesel::delete(photos::table.find(photo_id)).execute(&mut conn)?;
                        outbox::enqueue(
                            &mut conn,
                            *org_id,
                            outbox::KIND_STORAGE_DELETE,
                            &format!("photo_delete:{}", photo_id),
                            serde_json::json!({ "key": storage_key }),
                        )?;
                    }
                }

                // PII scrub instead of row deletion keeps referential
                // integrity for bookings and invoices.
                diesel::update(leads::table.find(*lead_id))
                    .set((
                        leads::name.eq("erased"),
                        leads::phone.eq(""),
                        leads::email.eq(None::<String>),
                        leads::address.eq(None::<String>),
                        leads::structured_inputs.eq(serde_json::json!({})),
                    ))
                    .execute(&mut conn)?;
            }

            if !aged.is_empty() {
                info!(count = aged.len(), "Retention scrubbed aged leads");
            }

            outbox::cleanup(&mut conn, outbox_days)?;

            let idem_cutoff = Utc::now().naive_utc() - ChronoDuration::hours(idem_hours);
            diesel::delete(admin_idempotency::table.filter(admin_idempotency::created_at.lt(idem_cutoff)))
                .execute(&mut conn)?;

            Ok(())
        })
        .await
        .map_err(|e| AppError::internal(format!("Join error: {}", e)))??;

        Ok(())
    }

    /// Heartbeat upsert. Never fails the job.
    fn beat(&self, name: &str, success: bool) {
        let Ok(mut conn) = self.db_pool.get() else {
            error!(job = name, "Heartbeat skipped: no database connection");
            return;
        };

        let now = Utc::now().naive_utc();
        let result = if success {
            diesel::insert_into(job_heartbeats::table)
                .values((
                    job_heartbeats::job_name.eq(name),
                    job_heartbeats::last_beat_at.eq(now),
                    job_heartbeats::last_success_at.eq(now),
                    job_heartbeats::consecutive_failures.eq(0),
                ))
                .on_conflict(job_heartbeats::job_name)
                .do_update()
                .set((
                    job_heartbeats::last_beat_at.eq(now),
                    job_heartbeats::last_success_at.eq(now),
                    job_heartbeats::consecutive_failures.eq(0),
                ))
                .execute(&mut conn)
        } else {
            diesel::insert_into(job_heartbeats::table)
                .values((
                    job_heartbeats::job_name.eq(name),
                    job_heartbeats::last_beat_at.eq(now),
                    job_heartbeats::consecutive_failures.eq(1),
                ))
                .on_conflict(job_heartbeats::job_name)
                .do_update()
                .set((
                    job_heartbeats::last_beat_at.eq(now),
                    job_heartbeats::consecutive_failures
                        .eq(job_heartbeats::consecutive_failures + 1),
                ))
                .execute(&mut conn)
        };

        if let Err(e) = result {
            error!(job = name, error = %e, "Heartbeat write failed");
        }

        record_job_heartbeat_age(name, 0.0);
    }
}

/// Readiness view: each known job with its heartbeat age. `stale` lists the
/// required jobs whose heartbeat exceeds the TTL.
pub fn heartbeat_status(
    conn: &mut PgConnection,
    ttl_secs: i64,
) -> ApiResult<(Vec<JobHeartbeat>, Vec<String>)> {
    let rows: Vec<JobHeartbeat> = job_heartbeats::table
        .select(JobHeartbeat::as_select())
        .load(conn)
        .map_err(AppError::from_diesel)?;

    let now = Utc::now().naive_utc();
    let mut stale: Vec<String> = Vec::new();

    for name in ALL_JOBS {
        match rows.iter().find(|r| r.job_name == *name) {
            Some(row) => {
                let age = (now - row.last_beat_at).num_seconds();
                record_job_heartbeat_age(name, age as f64);
                if age > ttl_secs {
                    stale.push(name.to_string());
                }
            }
            None => stale.push(name.to_string()),
        }
    }

    Ok((rows, stale))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_jobs_are_named() {
        assert_eq!(ALL_JOBS.len(), 5);
        assert!(ALL_JOBS.contains(&JOB_OUTBOX_DRAIN));
        assert!(ALL_JOBS.contains(&JOB_STORAGE_JANITOR));
    }
}
