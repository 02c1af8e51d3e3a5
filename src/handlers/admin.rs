//! Admin surface: leads, booking lifecycle, invoices, dead letters, jobs,
//! pricing reload, feature flags, break-glass, config snapshot.
//!
//! All routes run behind the tenant context, the safety gate, and (for
//! writes) the idempotency middleware.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::{sessions, tokens};
use crate::authz::{self, Action, Plan};
use crate::db::org_transaction;
use crate::domain::{bookings, invoices, leads, photos};
use crate::error::{get_db_conn, validation_error, ApiResult, AppError};
use crate::middleware::request_id::RequestId;
use crate::middleware::tenant::{Principal, TenantContext};
use crate::models::{Booking, Invoice, Lead, NewBreakGlassToken, NewFeatureFlag, Photo};
use crate::outbox;
use crate::pagination::{PaginatedResponse, PaginationParams};
use crate::scheduler;
use crate::schema::{feature_flags, organizations};
use crate::AppState;

fn org_plan(conn: &mut PgConnection, org_id: Uuid) -> ApiResult<Plan> {
    let plan: String = organizations::table
        .filter(organizations::id.eq(org_id))
        .select(organizations::billing_plan)
        .first(conn)?;
    Ok(Plan::parse(&plan))
}

// ---------------------------------------------------------------------------
// Leads

#[utoipa::path(
    get,
    path = "/v1/admin/leads",
    tag = "Admin",
    params(PaginationParams),
    responses((status = 200, description = "Leads in the caller's org")),
    security(("bearer" = []))
)]
pub async fn list_leads(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<Lead>>> {
    authz::require(ctx.role, Action::LeadRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let (rows, total) = leads::list(&mut conn, ctx.org_id, pagination.limit(), pagination.offset())?;

    Ok(Json(PaginatedResponse::new(rows, &pagination, total)))
}

#[utoipa::path(
    get,
    path = "/v1/admin/leads/{lead_id}",
    tag = "Admin",
    responses(
        (status = 200, description = "Lead detail", body = Lead),
        (status = 404, description = "Not found in this org")
    ),
    security(("bearer" = []))
)]
pub async fn get_lead(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<Lead>> {
    authz::require(ctx.role, Action::LeadRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    Ok(Json(leads::get(&mut conn, ctx.org_id, lead_id)?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LeadStatusRequest {
    #[schema(example = "CONTACTED")]
    pub status: String,
}

pub async fn set_lead_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(lead_id): Path<Uuid>,
    Json(payload): Json<LeadStatusRequest>,
) -> ApiResult<Json<Lead>> {
    authz::require(ctx.role, Action::LeadWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let lead = org_transaction(&mut conn, ctx.org_id, |conn| {
        leads::set_status(conn, ctx.org_id, lead_id, &payload.status)
    })?;
    Ok(Json(lead))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MagicLinkResponse {
    pub token: String,
    pub expires_in_secs: i64,
}

/// Mints a client-portal magic link for a lead.
pub async fn lead_magic_link(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(lead_id): Path<Uuid>,
) -> ApiResult<Json<MagicLinkResponse>> {
    authz::require(ctx.role, Action::LeadWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let lead = leads::get(&mut conn, ctx.org_id, lead_id)?;

    let ttl = state.config.auth.magic_link_expiry_secs;
    let token = tokens::mint(
        &state.config.auth.secret,
        tokens::TokenKind::MagicLink,
        lead.id,
        ctx.org_id,
        ttl,
    );

    Ok(Json(MagicLinkResponse {
        token,
        expires_in_secs: ttl,
    }))
}

// ---------------------------------------------------------------------------
// Bookings

#[derive(Debug, Deserialize, ToSchema)]
pub struct CompleteRequest {
    #[schema(example = 180)]
    pub actual_duration_minutes: i32,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RescheduleRequest {
    pub starts_at: chrono::NaiveDateTime,
    #[validate(range(min = 30, max = 720))]
    pub duration_minutes: i32,
}

pub async fn confirm_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        // Manual confirmation for bookings waiting on an offline deposit.
        let booking = crate::schema::bookings::table
            .filter(crate::schema::bookings::id.eq(booking_id))
            .filter(crate::schema::bookings::org_id.eq(ctx.org_id))
            .for_update()
            .select(Booking::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Booking not found"))?;

        bookings::process_webhook_event(
            conn,
            &format!("manual-{}", Uuid::new_v4().simple()),
            "checkout.session.completed",
            booking.checkout_session_id.as_deref(),
        )?;

        crate::schema::bookings::table
            .filter(crate::schema::bookings::id.eq(booking_id))
            .select(Booking::as_select())
            .first(conn)
            .map_err(AppError::from_diesel)
    })?;

    Ok(Json(booking))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        bookings::cancel(conn, ctx.org_id, booking_id)
    })?;
    Ok(Json(booking))
}

pub async fn start_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        bookings::start(conn, ctx.org_id, booking_id)
    })?;
    Ok(Json(booking))
}

pub async fn complete_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        bookings::complete(conn, ctx.org_id, booking_id, payload.actual_duration_minutes)
    })?;
    Ok(Json(booking))
}

pub async fn reschedule_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<RescheduleRequest>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingWrite)?;
    payload.validate().map_err(validation_error)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        bookings::reschedule(
            conn,
            ctx.org_id,
            booking_id,
            payload.starts_at,
            payload.duration_minutes,
        )
    })?;
    Ok(Json(booking))
}

pub async fn list_booking_photos(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Vec<Photo>>> {
    authz::require(ctx.role, Action::PhotoRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    Ok(Json(photos::list_for_booking(&mut conn, ctx.org_id, booking_id)?))
}

pub async fn delete_photo(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    authz::require(ctx.role, Action::PhotoWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    org_transaction(&mut conn, ctx.org_id, |conn| {
        photos::delete(conn, ctx.org_id, photo_id)
    })?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Invoices

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateInvoiceRequest {
    pub booking_id: Option<Uuid>,
    pub lead_id: Option<Uuid>,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_due_days")]
    #[validate(range(min = 1, max = 90))]
    pub due_in_days: i64,
    pub items: Vec<InvoiceItemRequest>,
}

fn default_currency() -> String {
    "usd".to_string()
}

fn default_due_days() -> i64 {
    14
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct InvoiceItemRequest {
    pub description: String,
    pub qty: i32,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub tax_rate_bp: i32,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InvoiceResponse {
    pub invoice: Invoice,
    pub total_cents: i64,
}

pub async fn create_invoice(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<CreateInvoiceRequest>,
) -> ApiResult<(StatusCode, Json<InvoiceResponse>)> {
    authz::require(ctx.role, Action::InvoiceWrite)?;
    payload.validate().map_err(validation_error)?;

    let items: Vec<invoices::ItemInput> = payload
        .items
        .iter()
        .map(|item| invoices::ItemInput {
            description: item.description.clone(),
            qty: item.qty,
            unit_price_cents: item.unit_price_cents,
            tax_rate_bp: item.tax_rate_bp,
        })
        .collect();

    let mut conn = get_db_conn(&state.db_pool)?;
    let (invoice, stored_items) = org_transaction(&mut conn, ctx.org_id, |conn| {
        invoices::create_invoice(
            conn,
            ctx.org_id,
            payload.booking_id,
            payload.lead_id,
            &payload.currency,
            payload.due_in_days,
            &items,
        )
    })?;

    let total = invoices::total_cents(&stored_items);
    Ok((
        StatusCode::CREATED,
        Json(InvoiceResponse {
            invoice,
            total_cents: total,
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SendInvoiceResponse {
    pub invoice: Invoice,
    /// The only time the plaintext link is returned.
    pub public_url: String,
}

pub async fn send_invoice(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<SendInvoiceResponse>> {
    authz::require(ctx.role, Action::InvoiceWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let base = state.config.server.public_base_url.clone();
    let (invoice, token) = org_transaction(&mut conn, ctx.org_id, |conn| {
        invoices::send(conn, ctx.org_id, invoice_id, &base)
    })?;

    Ok(Json(SendInvoiceResponse {
        public_url: format!("{}/i/{}", base.trim_end_matches('/'), token),
        invoice,
    }))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PaymentRequest {
    #[validate(range(min = 1))]
    pub amount_cents: i64,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "manual".to_string()
}

pub async fn record_invoice_payment(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(invoice_id): Path<Uuid>,
    Json(payload): Json<PaymentRequest>,
) -> ApiResult<Json<Invoice>> {
    authz::require(ctx.role, Action::InvoiceWrite)?;
    payload.validate().map_err(validation_error)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let invoice = org_transaction(&mut conn, ctx.org_id, |conn| {
        invoices::record_payment(conn, ctx.org_id, invoice_id, payload.amount_cents, &payload.method)
    })?;
    Ok(Json(invoice))
}

pub async fn void_invoice(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<Invoice>> {
    authz::require(ctx.role, Action::InvoiceWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let invoice = org_transaction(&mut conn, ctx.org_id, |conn| {
        invoices::void(conn, ctx.org_id, invoice_id)
    })?;
    Ok(Json(invoice))
}

pub async fn get_invoice(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(invoice_id): Path<Uuid>,
) -> ApiResult<Json<InvoiceResponse>> {
    authz::require(ctx.role, Action::InvoiceRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let invoice = invoices::load(&mut conn, ctx.org_id, invoice_id)?;
    let items = invoices::load_items(&mut conn, ctx.org_id, invoice_id)?;

    Ok(Json(InvoiceResponse {
        total_cents: invoices::total_cents(&items),
        invoice,
    }))
}

/// Creates an invoice for a booking from its lead's stored estimate.
pub async fn invoice_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<InvoiceResponse>)> {
    authz::require(ctx.role, Action::InvoiceWrite)?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let booking: Booking = crate::schema::bookings::table
        .filter(crate::schema::bookings::id.eq(booking_id))
        .filter(crate::schema::bookings::org_id.eq(ctx.org_id))
        .select(Booking::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("Booking not found"))?;

    let amount = booking
        .lead_id
        .and_then(|lead_id| leads::get(&mut conn, ctx.org_id, lead_id).ok())
        .and_then(|lead| {
            lead.estimate_snapshot
                .get("total_before_tax_cents")
                .and_then(|v| v.as_i64())
        })
        .unwrap_or(0);

    if amount <= 0 {
        return Err(AppError::validation(
            "Booking has no priced estimate; create the invoice with explicit items",
        ));
    }

    let (invoice, items) = org_transaction(&mut conn, ctx.org_id, |conn| {
        invoices::create_invoice(
            conn,
            ctx.org_id,
            Some(booking.id),
            booking.lead_id,
            "usd",
            14,
            &[invoices::ItemInput {
                description: "Cleaning service".to_string(),
                qty: 1,
                unit_price_cents: amount,
                tax_rate_bp: 0,
            }],
        )
    })?;

    Ok((
        StatusCode::CREATED,
        Json(InvoiceResponse {
            total_cents: invoices::total_cents(&items),
            invoice,
        }),
    ))
}

// ---------------------------------------------------------------------------
// Outbox dead letters

#[derive(Debug, Serialize, ToSchema)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub kind: String,
    pub dedupe_key: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: chrono::NaiveDateTime,
}

pub async fn list_dead_letters(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Query(pagination): Query<PaginationParams>,
) -> ApiResult<Json<PaginatedResponse<DeadLetterEntry>>> {
    authz::require(ctx.role, Action::OutboxManage)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let (rows, total) =
        outbox::list_dead(&mut conn, ctx.org_id, pagination.limit(), pagination.offset())?;

    let entries = rows
        .into_iter()
        .map(|e| DeadLetterEntry {
            id: e.id,
            kind: e.kind,
            dedupe_key: e.dedupe_key,
            attempts: e.attempts,
            last_error: e.last_error,
            created_at: e.created_at,
        })
        .collect();

    Ok(Json(PaginatedResponse::new(entries, &pagination, total)))
}

pub async fn replay_dead_letter(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(event_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::OutboxManage)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let event = outbox::replay(&mut conn, ctx.org_id, event_id)?;

    Ok(Json(json!({
        "id": event.id.to_string(),
        "status": event.status,
        "attempts": event.attempts,
    })))
}

// ---------------------------------------------------------------------------
// Operations

#[derive(Debug, Serialize, ToSchema)]
pub struct JobStatusEntry {
    pub job_name: String,
    pub last_beat_at: chrono::NaiveDateTime,
    pub last_success_at: Option<chrono::NaiveDateTime>,
    pub consecutive_failures: i32,
}

pub async fn jobs_status(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::JobsRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let (rows, stale) =
        scheduler::heartbeat_status(&mut conn, state.config.jobs.heartbeat_ttl_secs)?;

    let entries: Vec<JobStatusEntry> = rows
        .into_iter()
        .map(|r| JobStatusEntry {
            job_name: r.job_name,
            last_beat_at: r.last_beat_at,
            last_success_at: r.last_success_at,
            consecutive_failures: r.consecutive_failures,
        })
        .collect();

    Ok(Json(json!({ "jobs": entries, "stale": stale })))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct PricingReloadRequest {
    pub config: crate::pricing::PricingConfig,
}

pub async fn pricing_reload(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<PricingReloadRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::PricingReload)?;

    state.pricing.reload(payload.config);
    Ok(Json(json!({ "reloaded": true })))
}

pub async fn list_feature_flags(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<Vec<crate::models::FeatureFlag>>> {
    authz::require(ctx.role, Action::ConfigRead)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let flags = feature_flags::table
        .filter(feature_flags::org_id.eq(ctx.org_id))
        .order(feature_flags::flag.asc())
        .select(crate::models::FeatureFlag::as_select())
        .load(&mut conn)
        .map_err(AppError::from_diesel)?;

    Ok(Json(flags))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct SetFlagRequest {
    #[validate(length(min = 1, max = 100))]
    pub flag: String,
    pub enabled: bool,
}

pub async fn set_feature_flag(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Json(payload): Json<SetFlagRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::FlagsWrite)?;
    payload.validate().map_err(validation_error)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    diesel::insert_into(feature_flags::table)
        .values(&NewFeatureFlag {
            org_id: ctx.org_id,
            flag: payload.flag.clone(),
            enabled: payload.enabled,
        })
        .on_conflict((feature_flags::org_id, feature_flags::flag))
        .do_update()
        .set((
            feature_flags::enabled.eq(payload.enabled),
            feature_flags::updated_at.eq(Utc::now().naive_utc()),
        ))
        .execute(&mut conn)
        .map_err(AppError::from_diesel)?;

    Ok(Json(json!({ "flag": payload.flag, "enabled": payload.enabled })))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct BreakGlassRequest {
    #[validate(length(min = 10, max = 500, message = "A reason of at least 10 characters is required"))]
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BreakGlassResponse {
    pub token: String,
    pub expires_in_secs: i64,
}

/// Issues a short-TTL token that overrides the read-only freeze. The grant
/// itself is recorded and audited with the operator's reason.
pub async fn break_glass_start(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<BreakGlassRequest>,
) -> ApiResult<Json<BreakGlassResponse>> {
    authz::require(ctx.role, Action::BreakGlass)?;
    payload.validate().map_err(validation_error)?;

    let issued_by = match &ctx.principal {
        Principal::OrgUser { user_id, .. } => *user_id,
        Principal::AdminOperator { .. } => Uuid::nil(),
        _ => return Err(AppError::forbidden("Not permitted")),
    };

    let ttl = state.config.admin.break_glass_ttl_secs;
    let token = tokens::mint(
        &state.config.auth.secret,
        tokens::TokenKind::BreakGlass,
        issued_by,
        ctx.org_id,
        ttl,
    );

    let mut conn = get_db_conn(&state.db_pool)?;
    diesel::insert_into(crate::schema::break_glass_tokens::table)
        .values(&NewBreakGlassToken {
            org_id: ctx.org_id,
            token_hash: sessions::hash_refresh_token(&token),
            reason: payload.reason.clone(),
            issued_by,
            expires_at: Utc::now().naive_utc() + chrono::Duration::seconds(ttl),
        })
        .execute(&mut conn)
        .map_err(AppError::from_diesel)?;

    sessions::audit(
        &mut conn,
        Some(ctx.org_id),
        &ctx.principal.actor(),
        "break_glass.issued",
        Some(request_id.as_str()),
        json!({ "reason": crate::telemetry::redact::redact(&payload.reason) }),
    );

    Ok(Json(BreakGlassResponse {
        token,
        expires_in_secs: ttl,
    }))
}

pub async fn config_snapshot(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::ConfigRead)?;
    Ok(Json(state.config.redacted_snapshot()))
}

/// Inline booking sweep, for operators who cannot wait for the loop.
pub async fn run_cleanup(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::RetentionRun)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let swept = bookings::sweep_expired(&mut conn, state.config.retention.pending_booking_ttl_minutes)?;

    Ok(Json(json!({ "swept": swept })))
}

/// Inline retention pass: outbox cleanup plus the idempotency cache.
pub async fn run_retention_cleanup(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::RetentionRun)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let outbox_removed = outbox::cleanup(&mut conn, state.config.retention.outbox_retention_days)?;

    let idem_cutoff = Utc::now().naive_utc()
        - chrono::Duration::hours(state.config.admin.idempotency_retention_hours);
    let idem_removed = diesel::delete(
        crate::schema::admin_idempotency::table
            .filter(crate::schema::admin_idempotency::created_at.lt(idem_cutoff)),
    )
    .execute(&mut conn)
    .map_err(AppError::from_diesel)?;

    Ok(Json(json!({
        "outbox_removed": outbox_removed,
        "idempotency_removed": idem_removed,
    })))
}

/// Inline dunning scan for overdue invoices.
pub async fn email_scan(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<serde_json::Value>> {
    authz::require(ctx.role, Action::RetentionRun)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let overdue = invoices::mark_overdue(&mut conn, Utc::now().naive_utc())?;

    Ok(Json(json!({ "overdue_flagged": overdue })))
}

// Quota checks used by iam invite; re-exported here for the router's sake.
pub(crate) fn check_plan_user_quota(
    conn: &mut PgConnection,
    org_id: Uuid,
) -> ApiResult<()> {
    let plan = org_plan(conn, org_id)?;
    authz::check_user_quota(conn, org_id, plan)
}

pub(crate) fn check_plan_booking_quota(
    conn: &mut PgConnection,
    org_id: Uuid,
) -> ApiResult<()> {
    let plan = org_plan(conn, org_id)?;
    authz::check_booking_quota(conn, org_id, plan)
}

pub(crate) fn check_plan_storage_quota(
    conn: &mut PgConnection,
    org_id: Uuid,
    incoming_bytes: i64,
) -> ApiResult<()> {
    let plan = org_plan(conn, org_id)?;
    authz::check_storage_quota(conn, org_id, plan, incoming_bytes)
}
