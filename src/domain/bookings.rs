//! Booking lifecycle: slot search, deposit policy, the state machine, and
//! payment webhook coordination.
//!
//! Slot reservation is serialized per team by a `FOR UPDATE` lock on the
//! team row; overlapping non-cancelled bookings can therefore never coexist.
//! Webhook processing is idempotent on the provider's event id.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use diesel::prelude::*;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::notifications::{
    self, EMAIL_BOOKING_CANCELLED, EMAIL_BOOKING_CONFIRMED, EMAIL_BOOKING_PENDING,
};
use crate::error::{ApiResult, AppError};
use crate::models::{Booking, Lead, NewBooking, NewPaymentEvent, Team};
use crate::schema::{bookings, leads, payment_events, referral_credits, teams};
use crate::telemetry::metrics::{record_booking_action, record_webhook_outcome};

pub const SLOT_STEP_MINUTES: i64 = 30;
pub const BUFFER_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookingStatus {
    Pending,
    AwaitingDeposit,
    Confirmed,
    InProgress,
    Done,
    Cancelled,
    Expired,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "PENDING",
            BookingStatus::AwaitingDeposit => "AWAITING_DEPOSIT",
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::InProgress => "IN_PROGRESS",
            BookingStatus::Done => "DONE",
            BookingStatus::Cancelled => "CANCELLED",
            BookingStatus::Expired => "EXPIRED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BookingStatus::Pending),
            "AWAITING_DEPOSIT" => Some(BookingStatus::AwaitingDeposit),
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "IN_PROGRESS" => Some(BookingStatus::InProgress),
            "DONE" => Some(BookingStatus::Done),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            "EXPIRED" => Some(BookingStatus::Expired),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Done | BookingStatus::Cancelled | BookingStatus::Expired
        )
    }

    /// Statuses that hold a slot.
    pub fn blocks_slot(&self) -> bool {
        !matches!(self, BookingStatus::Cancelled | BookingStatus::Expired)
    }

    /// The full transition table. Anything not listed is a conflict.
    pub fn can_transition(from: BookingStatus, to: BookingStatus) -> bool {
        use BookingStatus::*;
        matches!(
            (from, to),
            (Pending, AwaitingDeposit)
                | (Pending, Confirmed)
                | (Pending, Cancelled)
                | (Pending, Expired)
                | (AwaitingDeposit, Confirmed)
                | (AwaitingDeposit, Cancelled)
                | (AwaitingDeposit, Expired)
                | (Confirmed, InProgress)
                | (Confirmed, Cancelled)
                | (InProgress, Done)
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DepositDecision {
    pub required: bool,
    pub reasons: Vec<String>,
    pub deposit_cents: Option<i64>,
}

impl DepositDecision {
    pub fn none() -> Self {
        Self {
            required: false,
            reasons: Vec::new(),
            deposit_cents: None,
        }
    }
}

/// Rounds up to the slot grid, never below one step.
pub fn round_duration_minutes(time_on_site_hours: f64) -> i32 {
    let minutes = (time_on_site_hours.max(0.0) * 60.0).ceil() as i64;
    let steps = ((minutes + SLOT_STEP_MINUTES - 1) / SLOT_STEP_MINUTES).max(1);
    (steps * SLOT_STEP_MINUTES) as i32
}

/// Deposit policy: weekend, heavy cleaning, or first-time client. The
/// outcome is stored on the booking, so later policy changes never touch
/// existing rows.
pub fn evaluate_deposit_policy(
    conn: &mut PgConnection,
    org_id: Uuid,
    lead: Option<&Lead>,
    starts_at: NaiveDateTime,
    deposit_percent: f64,
) -> ApiResult<DepositDecision> {
    let mut reasons: Vec<String> = Vec::new();

    // Saturday/Sunday
    if starts_at.weekday().number_from_monday() >= 6 {
        reasons.push("weekend".to_string());
    }

    let mut estimated_total_cents: Option<i64> = None;
    if let Some(lead) = lead {
        let cleaning_type = lead
            .structured_inputs
            .get("cleaning_type")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if matches!(cleaning_type, "deep" | "move_out_empty") {
            reasons.push("heavy_cleaning".to_string());
        }

        let has_history: i64 = bookings::table
            .filter(bookings::org_id.eq(org_id))
            .filter(bookings::lead_id.eq(lead.id))
            .filter(bookings::status.eq_any(["CONFIRMED", "DONE"]))
            .count()
            .get_result(conn)?;
        if has_history == 0 {
            reasons.push("new_client".to_string());
        }

        estimated_total_cents = lead
            .estimate_snapshot
            .get("total_before_tax_cents")
            .and_then(|v| v.as_i64());
    }

    let required = !reasons.is_empty();
    let deposit_cents = if required {
        estimated_total_cents.map(|total| ((total as f64) * deposit_percent).ceil().max(0.0) as i64)
    } else {
        None
    };

    Ok(DepositDecision {
        required,
        reasons,
        deposit_cents,
    })
}

fn day_window(team: &Team, date: NaiveDate) -> (NaiveDateTime, NaiveDateTime) {
    let start_hour = team.work_start_hour.clamp(0, 23) as u32;
    let end_hour = team.work_end_hour.clamp(1, 24) as u32;
    let start = date.and_time(NaiveTime::from_hms_opt(start_hour, 0, 0).unwrap_or_default());
    let end = if end_hour == 24 {
        date.and_time(NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default())
    } else {
        date.and_time(NaiveTime::from_hms_opt(end_hour, 0, 0).unwrap_or_default())
    };
    (start, end)
}

fn is_blackout(team: &Team, date: NaiveDate) -> bool {
    team.blackout_dates
        .as_array()
        .map(|dates| {
            dates
                .iter()
                .filter_map(|v| v.as_str())
                .any(|s| s == date.to_string())
        })
        .unwrap_or(false)
}

/// Free slots for a team on a date: grid-stepped within working hours,
/// keeping a travel buffer around existing bookings.
pub fn generate_slots(
    conn: &mut PgConnection,
    org_id: Uuid,
    team: &Team,
    date: NaiveDate,
    duration_minutes: i32,
) -> ApiResult<Vec<NaiveDateTime>> {
    if is_blackout(team, date) {
        return Ok(Vec::new());
    }

    let (day_start, day_end) = day_window(team, date);
    let duration = Duration::minutes(duration_minutes as i64);
    let buffer = Duration::minutes(BUFFER_MINUTES);

    // Overlap candidates: anything that could reach into this day.
    let window_lo = day_start - buffer - Duration::hours(12);
    let window_hi = day_end + buffer;

    let existing: Vec<(NaiveDateTime, i32, String)> = bookings::table
        .filter(bookings::org_id.eq(org_id))
        .filter(bookings::team_id.eq(team.id))
        .filter(bookings::starts_at.gt(window_lo))
        .filter(bookings::starts_at.lt(window_hi))
        .select((bookings::starts_at, bookings::duration_minutes, bookings::status))
        .load(conn)?;

    let blocked: Vec<(NaiveDateTime, NaiveDateTime)> = existing
        .into_iter()
        .filter(|(_, _, status)| {
            BookingStatus::parse(status).map(|s| s.blocks_slot()).unwrap_or(true)
        })
        .map(|(starts_at, minutes, _)| {
            let end = starts_at + Duration::minutes(minutes as i64);
            (starts_at - buffer, end + buffer)
        })
        .collect();

    let mut slots = Vec::new();
    let mut candidate = day_start;
    while candidate + duration <= day_end {
        let candidate_end = candidate + duration;
        let conflict = blocked
            .iter()
            .any(|(lo, hi)| candidate < *hi && candidate_end > *lo);
        if !conflict {
            slots.push(candidate);
        }
        candidate += Duration::minutes(SLOT_STEP_MINUTES);
    }

    Ok(slots)
}

/// Locks the team row, re-checks the interval, and inserts the booking.
/// Two concurrent requests for the same interval serialize on the lock;
/// the loser sees the winner's row and gets `SLOT_TAKEN`.
pub fn create_booking(
    conn: &mut PgConnection,
    org_id: Uuid,
    team_id: Uuid,
    lead_id: Option<Uuid>,
    starts_at: NaiveDateTime,
    duration_minutes: i32,
    decision: &DepositDecision,
) -> ApiResult<Booking> {
    let _team: Team = teams::table
        .filter(teams::id.eq(team_id))
        .filter(teams::org_id.eq(org_id))
        .for_update()
        .select(Team::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Team not found"))?;

    ensure_interval_free(conn, org_id, team_id, starts_at, duration_minutes, None)?;

    let status = if decision.required {
        BookingStatus::AwaitingDeposit
    } else {
        BookingStatus::Confirmed
    };

    let booking: Booking = diesel::insert_into(bookings::table)
        .values(&NewBooking {
            org_id,
            lead_id,
            team_id,
            starts_at,
            duration_minutes,
            status: status.as_str().to_string(),
            deposit_required: decision.required,
            deposit_cents: decision.deposit_cents,
            deposit_reasons: json!(decision.reasons),
        })
        .returning(Booking::as_returning())
        .get_result(conn)?;

    record_booking_action("created");
    info!(booking_id = %booking.id, status = %booking.status, "Booking created");

    if let Some(lead) = load_lead(conn, org_id, lead_id)? {
        if let Some(recipient) = lead.email.as_deref() {
            let (email_type, body) = if decision.required {
                (
                    EMAIL_BOOKING_PENDING,
                    format!(
                        "Your booking on {} is reserved. Pay the deposit to confirm it.",
                        booking.starts_at
                    ),
                )
            } else {
                (
                    EMAIL_BOOKING_CONFIRMED,
                    format!("Your cleaning on {} is confirmed.", booking.starts_at),
                )
            };
            notifications::enqueue_email(
                conn,
                org_id,
                Some(booking.id),
                None,
                email_type,
                recipient,
                notifications::booking_subject(email_type),
                &body,
            )?;
        }

        // A no-deposit booking confirms immediately, which also settles any
        // referral credit tied to this lead.
        if !decision.required {
            grant_referral_credit(conn, org_id, lead.id)?;
        }
    }

    Ok(booking)
}

fn load_lead(
    conn: &mut PgConnection,
    org_id: Uuid,
    lead_id: Option<Uuid>,
) -> ApiResult<Option<Lead>> {
    let Some(lead_id) = lead_id else {
        return Ok(None);
    };
    leads::table
        .filter(leads::id.eq(lead_id))
        .filter(leads::org_id.eq(org_id))
        .select(Lead::as_select())
        .first(conn)
        .optional()
        .map_err(AppError::from_diesel)
}

fn ensure_interval_free(
    conn: &mut PgConnection,
    org_id: Uuid,
    team_id: Uuid,
    starts_at: NaiveDateTime,
    duration_minutes: i32,
    exclude_booking: Option<Uuid>,
) -> ApiResult<()> {
    let ends_at = starts_at + Duration::minutes(duration_minutes as i64);

    let mut query = bookings::table
        .filter(bookings::org_id.eq(org_id))
        .filter(bookings::team_id.eq(team_id))
        .filter(bookings::status.ne_all(["CANCELLED", "EXPIRED"]))
        .select((bookings::starts_at, bookings::duration_minutes))
        .into_boxed();

    if let Some(exclude) = exclude_booking {
        query = query.filter(bookings::id.ne(exclude));
    }

    let others: Vec<(NaiveDateTime, i32)> = query.load(conn)?;

    let overlap = others.iter().any(|(other_start, other_minutes)| {
        let other_end = *other_start + Duration::minutes(*other_minutes as i64);
        starts_at < other_end && ends_at > *other_start
    });

    if overlap {
        return Err(AppError::slot_taken());
    }
    Ok(())
}

/// Locks and loads a booking for a state change.
fn lock_booking(conn: &mut PgConnection, org_id: Uuid, booking_id: Uuid) -> ApiResult<Booking> {
    bookings::table
        .filter(bookings::id.eq(booking_id))
        .filter(bookings::org_id.eq(org_id))
        .for_update()
        .select(Booking::as_select())
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Booking not found"))
}

fn transition(
    conn: &mut PgConnection,
    booking: &Booking,
    to: BookingStatus,
) -> ApiResult<Booking> {
    let from = BookingStatus::parse(&booking.status)
        .ok_or_else(|| AppError::internal("Booking has an unknown status"))?;

    if !BookingStatus::can_transition(from, to) {
        return Err(AppError::invalid_transition(from.as_str(), to.as_str()));
    }

    let updated: Booking = diesel::update(bookings::table.find(booking.id))
        .set((
            bookings::status.eq(to.as_str()),
            bookings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Booking::as_returning())
        .get_result(conn)?;

    record_booking_action(to.as_str());
    Ok(updated)
}

pub fn attach_checkout_session(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Uuid,
    checkout_session_id: &str,
) -> ApiResult<Booking> {
    diesel::update(
        bookings::table
            .filter(bookings::id.eq(booking_id))
            .filter(bookings::org_id.eq(org_id)),
    )
    .set(bookings::checkout_session_id.eq(checkout_session_id))
    .returning(Booking::as_returning())
    .get_result(conn)
    .map_err(AppError::from_diesel)
}

/// Admin start: CONFIRMED → IN_PROGRESS.
pub fn start(conn: &mut PgConnection, org_id: Uuid, booking_id: Uuid) -> ApiResult<Booking> {
    let booking = lock_booking(conn, org_id, booking_id)?;
    transition(conn, &booking, BookingStatus::InProgress)
}

/// Admin complete: IN_PROGRESS → DONE with the actual time on site.
pub fn complete(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Uuid,
    actual_duration_minutes: i32,
) -> ApiResult<Booking> {
    if actual_duration_minutes <= 0 {
        return Err(AppError::validation("actual_duration_minutes must be positive"));
    }

    let booking = lock_booking(conn, org_id, booking_id)?;
    let updated = transition(conn, &booking, BookingStatus::Done)?;

    let updated: Booking = diesel::update(bookings::table.find(updated.id))
        .set(bookings::actual_duration_minutes.eq(actual_duration_minutes))
        .returning(Booking::as_returning())
        .get_result(conn)?;

    Ok(updated)
}

/// Cancellation from admin or customer. Cancelling a confirmed booking also
/// voids the referral credit it granted.
pub fn cancel(conn: &mut PgConnection, org_id: Uuid, booking_id: Uuid) -> ApiResult<Booking> {
    let booking = lock_booking(conn, org_id, booking_id)?;
    let was_confirmed = booking.status == "CONFIRMED";
    let updated = transition(conn, &booking, BookingStatus::Cancelled)?;

    if let Some(lead) = load_lead(conn, org_id, updated.lead_id)? {
        if was_confirmed {
            void_referral_credit(conn, org_id, lead.id)?;
        }
        if let Some(recipient) = lead.email.as_deref() {
            notifications::enqueue_email(
                conn,
                org_id,
                Some(updated.id),
                None,
                EMAIL_BOOKING_CANCELLED,
                recipient,
                notifications::booking_subject(EMAIL_BOOKING_CANCELLED),
                &format!("Your booking on {} was cancelled.", updated.starts_at),
            )?;
        }
    }

    Ok(updated)
}

/// Moves a booking to a new interval under the same team lock discipline.
pub fn reschedule(
    conn: &mut PgConnection,
    org_id: Uuid,
    booking_id: Uuid,
    new_starts_at: NaiveDateTime,
    new_duration_minutes: i32,
) -> ApiResult<Booking> {
    let booking = lock_booking(conn, org_id, booking_id)?;

    let status = BookingStatus::parse(&booking.status)
        .ok_or_else(|| AppError::internal("Booking has an unknown status"))?;
    if status.is_terminal() || status == BookingStatus::InProgress {
        return Err(AppError::invalid_transition(status.as_str(), status.as_str()));
    }

    let _team: Team = teams::table
        .filter(teams::id.eq(booking.team_id))
        .filter(teams::org_id.eq(org_id))
        .for_update()
        .select(Team::as_select())
        .first(conn)?;

    ensure_interval_free(
        conn,
        org_id,
        booking.team_id,
        new_starts_at,
        new_duration_minutes,
        Some(booking.id),
    )?;

    let updated: Booking = diesel::update(bookings::table.find(booking.id))
        .set((
            bookings::starts_at.eq(new_starts_at),
            bookings::duration_minutes.eq(new_duration_minutes),
            bookings::updated_at.eq(Utc::now().naive_utc()),
        ))
        .returning(Booking::as_returning())
        .get_result(conn)?;

    record_booking_action("rescheduled");
    Ok(updated)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookResult {
    Confirmed,
    Expired,
    ReplayNoop,
    ReplayMismatch,
    Ignored,
    UnknownSession,
}

impl WebhookResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookResult::Confirmed => "confirmed",
            WebhookResult::Expired => "expired",
            WebhookResult::ReplayNoop => "replay_noop",
            WebhookResult::ReplayMismatch => "replay_mismatch",
            WebhookResult::Ignored => "ignored",
            WebhookResult::UnknownSession => "unknown_session",
        }
    }
}

/// Applies a verified payment webhook event. Idempotent on the provider
/// event id: the first delivery wins, replays are no-ops. Runs inside one
/// transaction so the confirmation, its email, and the referral credit
/// commit together.
pub fn process_webhook_event(
    conn: &mut PgConnection,
    provider_event_id: &str,
    event_type: &str,
    checkout_session_id: Option<&str>,
) -> ApiResult<WebhookResult> {
    let Some(session_id) = checkout_session_id else {
        record_webhook_outcome("ignored");
        return Ok(WebhookResult::Ignored);
    };

    let booking: Option<Booking> = bookings::table
        .filter(bookings::checkout_session_id.eq(session_id))
        .for_update()
        .select(Booking::as_select())
        .first(conn)
        .optional()?;

    let Some(booking) = booking else {
        record_webhook_outcome("unknown_session");
        return Ok(WebhookResult::UnknownSession);
    };

    // The ledger row makes replays observable without re-running effects.
    let first_delivery = diesel::insert_into(payment_events::table)
        .values(&NewPaymentEvent {
            org_id: booking.org_id,
            provider_event_id: provider_event_id.to_string(),
            kind: event_type.to_string(),
            booking_id: Some(booking.id),
            result: "received".to_string(),
        })
        .on_conflict(payment_events::provider_event_id)
        .do_nothing()
        .execute(conn)?;

    if first_delivery == 0 {
        let result = replay_result(&booking);
        record_webhook_outcome(result.as_str());
        if result == WebhookResult::ReplayMismatch {
            warn!(
                booking_id = %booking.id,
                status = %booking.status,
                event_id = provider_event_id,
                "Webhook replay into a cancelled booking"
            );
        }
        return Ok(result);
    }

    let result = match event_type {
        "checkout.session.completed" => confirm_deposit(conn, &booking)?,
        "checkout.session.expired" | "payment_intent.payment_failed" => {
            expire_deposit(conn, &booking)?
        }
        _ => WebhookResult::Ignored,
    };

    diesel::update(payment_events::table.filter(payment_events::provider_event_id.eq(provider_event_id)))
        .set(payment_events::result.eq(result.as_str()))
        .execute(conn)?;

    record_webhook_outcome(result.as_str());
    Ok(result)
}

fn replay_result(booking: &Booking) -> WebhookResult {
    match booking.status.as_str() {
        "CONFIRMED" | "IN_PROGRESS" | "DONE" => WebhookResult::ReplayNoop,
        "CANCELLED" | "EXPIRED" => WebhookResult::ReplayMismatch,
        _ => WebhookResult::ReplayNoop,
    }
}

fn confirm_deposit(conn: &mut PgConnection, booking: &Booking) -> ApiResult<WebhookResult> {
    match booking.status.as_str() {
        "AWAITING_DEPOSIT" | "PENDING" => {}
        "CONFIRMED" | "IN_PROGRESS" | "DONE" => return Ok(WebhookResult::ReplayNoop),
        _ => return Ok(WebhookResult::ReplayMismatch),
    }

    let updated = transition(conn, booking, BookingStatus::Confirmed)?;
    diesel::update(bookings::table.find(updated.id))
        .set(bookings::deposit_paid_at.eq(Utc::now().naive_utc()))
        .execute(conn)?;

    if let Some(lead) = load_lead(conn, updated.org_id, updated.lead_id)? {
        if let Some(recipient) = lead.email.as_deref() {
            notifications::enqueue_email(
                conn,
                updated.org_id,
                Some(updated.id),
                None,
                EMAIL_BOOKING_CONFIRMED,
                recipient,
                notifications::booking_subject(EMAIL_BOOKING_CONFIRMED),
                &format!("Your cleaning on {} is confirmed.", updated.starts_at),
            )?;
        }
        grant_referral_credit(conn, updated.org_id, lead.id)?;
    }

    info!(booking_id = %updated.id, "Deposit paid, booking confirmed");
    Ok(WebhookResult::Confirmed)
}

fn expire_deposit(conn: &mut PgConnection, booking: &Booking) -> ApiResult<WebhookResult> {
    match booking.status.as_str() {
        "AWAITING_DEPOSIT" | "PENDING" => {}
        _ => return Ok(WebhookResult::ReplayNoop),
    }

    transition(conn, booking, BookingStatus::Expired)?;
    Ok(WebhookResult::Expired)
}

/// PENDING → GRANTED, exactly once per confirmed booking: the predicate on
/// the current state makes a second confirmation a no-op.
fn grant_referral_credit(conn: &mut PgConnection, org_id: Uuid, source_lead_id: Uuid) -> ApiResult<()> {
    let now = Utc::now().naive_utc();
    let granted = diesel::update(
        referral_credits::table
            .filter(referral_credits::org_id.eq(org_id))
            .filter(referral_credits::source_lead_id.eq(source_lead_id))
            .filter(referral_credits::state.eq("PENDING")),
    )
    .set((
        referral_credits::state.eq("GRANTED"),
        referral_credits::resolved_at.eq(now),
    ))
    .execute(conn)?;

    if granted > 0 {
        info!(source_lead_id = %source_lead_id, "Referral credit granted");
    }
    Ok(())
}

/// GRANTED → VOIDED, exactly once, when a confirmed booking is cancelled.
fn void_referral_credit(conn: &mut PgConnection, org_id: Uuid, source_lead_id: Uuid) -> ApiResult<()> {
    let now = Utc::now().naive_utc();
    diesel::update(
        referral_credits::table
            .filter(referral_credits::org_id.eq(org_id))
            .filter(referral_credits::source_lead_id.eq(source_lead_id))
            .filter(referral_credits::state.eq("GRANTED")),
    )
    .set((
        referral_credits::state.eq("VOIDED"),
        referral_credits::resolved_at.eq(now),
    ))
    .execute(conn)?;
    Ok(())
}

/// Scheduler sweep: deposit-pending bookings past the TTL release their
/// slot by moving to EXPIRED.
pub fn sweep_expired(conn: &mut PgConnection, ttl_minutes: i64) -> ApiResult<usize> {
    let cutoff = Utc::now().naive_utc() - Duration::minutes(ttl_minutes);

    let count = diesel::update(
        bookings::table
            .filter(bookings::status.eq_any(["PENDING", "AWAITING_DEPOSIT"]))
            .filter(bookings::created_at.lt(cutoff)),
    )
    .set((
        bookings::status.eq("EXPIRED"),
        bookings::updated_at.eq(Utc::now().naive_utc()),
    ))
    .execute(conn)?;

    if count > 0 {
        info!(count, "Swept stale bookings to EXPIRED");
        record_booking_action("swept");
    }
    Ok(count)
}
