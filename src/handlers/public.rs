//! Public endpoints: estimate funnel, chat, lead intake, slot search,
//! booking creation, the payment webhook, public invoice links, and the
//! local-storage file proxy.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::NaiveDate;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::chat::{self, ChatState, ChatTurn};
use crate::db::{org_transaction, transaction};
use crate::domain::{bookings, invoices, leads};
use crate::error::{get_db_conn, validation_error, ApiResult, AppError};
use crate::models::{Booking, Lead, Team};
use crate::payments;
use crate::pricing::{EstimateInputs, EstimateSnapshot};
use crate::schema::{organizations, teams};
use crate::storage::StorageGateway;
use crate::AppState;

/// Public funnel endpoints act on the default organization.
fn default_org(conn: &mut PgConnection) -> ApiResult<Uuid> {
    organizations::table
        .filter(organizations::is_default.eq(true))
        .select(organizations::id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::internal("No default organization is provisioned"))
}

fn captcha_gate(state: &AppState, headers: &HeaderMap) -> ApiResult<()> {
    if state.config.captcha.mode == "off" {
        return Ok(());
    }
    let provided = headers
        .get("x-captcha-token")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("");
    if provided.is_empty() {
        return Err(AppError::validation("Captcha token is required"));
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/v1/estimate",
    tag = "Public",
    request_body = EstimateInputs,
    responses(
        (status = 200, description = "Deterministic estimate", body = EstimateSnapshot),
        (status = 422, description = "Validation error")
    )
)]
pub async fn estimate(
    State(state): State<AppState>,
    Json(payload): Json<EstimateInputs>,
) -> ApiResult<Json<EstimateSnapshot>> {
    payload.validate().map_err(validation_error)?;
    Ok(Json(state.pricing.estimate(&payload)?))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChatTurnRequest {
    #[serde(default)]
    pub state: ChatState,
    pub message: String,
}

#[utoipa::path(
    post,
    path = "/v1/chat/turn",
    tag = "Public",
    request_body = ChatTurnRequest,
    responses((status = 200, description = "Next chat turn", body = ChatTurn))
)]
pub async fn chat_turn(Json(payload): Json<ChatTurnRequest>) -> ApiResult<Json<ChatTurn>> {
    if payload.message.len() > 2_000 {
        return Err(AppError::validation("Message too long"));
    }
    Ok(Json(chat::turn(payload.state, &payload.message)))
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateLeadRequest {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 7, max = 32))]
    pub phone: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 500))]
    pub address: Option<String>,
    pub structured_inputs: serde_json::Value,
    pub estimate_snapshot: serde_json::Value,
    pub referral_code: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/leads",
    tag = "Public",
    request_body = CreateLeadRequest,
    responses(
        (status = 201, description = "Lead captured", body = Lead),
        (status = 422, description = "Validation error")
    )
)]
pub async fn create_lead(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<CreateLeadRequest>,
) -> ApiResult<(StatusCode, Json<Lead>)> {
    captcha_gate(&state, &headers)?;
    payload.validate().map_err(validation_error)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let org_id = default_org(&mut conn)?;

    let lead = org_transaction(&mut conn, org_id, |conn| {
        leads::create_lead(
            conn,
            org_id,
            leads::LeadIntake {
                name: payload.name.clone(),
                phone: payload.phone.clone(),
                email: payload.email.clone(),
                address: payload.address.clone(),
                structured_inputs: payload.structured_inputs.clone(),
                estimate_snapshot: payload.estimate_snapshot.clone(),
                referred_by_code: payload.referral_code.clone(),
            },
        )
    })?;

    Ok((StatusCode::CREATED, Json(lead)))
}

#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SlotsQuery {
    /// Day to search, `YYYY-MM-DD`.
    pub date: NaiveDate,
    #[param(minimum = 30, maximum = 720)]
    pub duration_minutes: i32,
    pub team_id: Option<Uuid>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SlotsResponse {
    pub team_id: Uuid,
    pub slots: Vec<chrono::NaiveDateTime>,
}

#[utoipa::path(
    get,
    path = "/v1/slots",
    tag = "Public",
    params(SlotsQuery),
    responses((status = 200, description = "Free slots for the day", body = SlotsResponse))
)]
pub async fn slots(
    State(state): State<AppState>,
    Query(query): Query<SlotsQuery>,
) -> ApiResult<Json<SlotsResponse>> {
    if !(30..=720).contains(&query.duration_minutes) {
        return Err(AppError::validation("duration_minutes must be 30..=720"));
    }

    let mut conn = get_db_conn(&state.db_pool)?;
    let org_id = default_org(&mut conn)?;
    let team = resolve_team(&mut conn, org_id, query.team_id)?;

    let slots = bookings::generate_slots(&mut conn, org_id, &team, query.date, query.duration_minutes)?;

    Ok(Json(SlotsResponse {
        team_id: team.id,
        slots,
    }))
}

fn resolve_team(conn: &mut PgConnection, org_id: Uuid, team_id: Option<Uuid>) -> ApiResult<Team> {
    match team_id {
        Some(id) => teams::table
            .filter(teams::id.eq(id))
            .filter(teams::org_id.eq(org_id))
            .select(Team::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Team not found")),
        None => teams::table
            .filter(teams::org_id.eq(org_id))
            .order(teams::created_at.asc())
            .select(Team::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("No team is configured")),
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateBookingRequest {
    pub lead_id: Option<Uuid>,
    pub team_id: Option<Uuid>,
    #[schema(example = "2025-06-14T15:00:00")]
    pub starts_at: chrono::NaiveDateTime,
    #[validate(range(min = 0.5, max = 12.0))]
    pub time_on_site_hours: f64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct CreateBookingResponse {
    pub booking: Booking,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
}

#[utoipa::path(
    post,
    path = "/v1/bookings",
    tag = "Public",
    request_body = CreateBookingRequest,
    responses(
        (status = 201, description = "Booking created", body = CreateBookingResponse),
        (status = 409, description = "Slot already taken"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<CreateBookingResponse>)> {
    payload.validate().map_err(validation_error)?;

    let duration_minutes = bookings::round_duration_minutes(payload.time_on_site_hours);

    let mut conn = get_db_conn(&state.db_pool)?;
    let org_id = default_org(&mut conn)?;
    let team = resolve_team(&mut conn, org_id, payload.team_id)?;

    let lead = match payload.lead_id {
        Some(lead_id) => Some(leads::get(&mut conn, org_id, lead_id)?),
        None => None,
    };

    let booking = org_transaction(&mut conn, org_id, |conn| {
        crate::handlers::admin::check_plan_booking_quota(conn, org_id)?;

        let decision = bookings::evaluate_deposit_policy(
            conn,
            org_id,
            lead.as_ref(),
            payload.starts_at,
            state.config.payments.deposit_percent,
        )?;

        bookings::create_booking(
            conn,
            org_id,
            team.id,
            payload.lead_id,
            payload.starts_at,
            duration_minutes,
            &decision,
        )
    })?;

    // The checkout session is created outside the transaction; a crash here
    // leaves an AWAITING_DEPOSIT booking the sweep will expire.
    let (booking, checkout_url) = if booking.status == "AWAITING_DEPOSIT" {
        let base = &state.config.server.public_base_url;
        let session = state
            .payments
            .create_checkout_session(
                booking.id,
                booking.deposit_cents.unwrap_or(0).max(100),
                "usd",
                &format!("{}/booking/success", base),
                &format!("{}/booking/cancelled", base),
            )
            .await?;

        let booking = bookings::attach_checkout_session(&mut conn, org_id, booking.id, &session.id)?;
        (booking, Some(session.url))
    } else {
        (booking, None)
    };

    Ok((
        StatusCode::CREATED,
        Json(CreateBookingResponse {
            booking,
            checkout_url,
        }),
    ))
}

/// Payment provider webhook. Signature verification is mandatory; events
/// that are recorded return 2xx even when they change nothing, so the
/// provider does not retry-storm.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<serde_json::Value>> {
    let secret = state
        .config
        .payments
        .webhook_secret
        .as_ref()
        .ok_or_else(|| AppError::integration_rejected("Webhook secret is not configured"))?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            crate::telemetry::metrics::record_webhook_outcome("bad_signature");
            AppError::integration_rejected("Missing webhook signature")
        })?;

    let event = payments::verify_webhook_signature(&body, signature, secret).map_err(|e| {
        crate::telemetry::metrics::record_webhook_outcome("bad_signature");
        warn!("Webhook signature verification failed");
        e
    })?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let result = transaction(&mut conn, |conn| {
        bookings::process_webhook_event(
            conn,
            &event.id,
            &event.event_type,
            event.checkout_session_id(),
        )
    })?;

    Ok(Json(json!({ "received": true, "result": result.as_str() })))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PublicInvoiceResponse {
    pub number: String,
    pub status: String,
    pub currency: String,
    pub total_cents: i64,
    pub paid_cents: i64,
    pub items: Vec<crate::models::InvoiceItem>,
}

/// Public invoice view by link token. The URL embeds nothing but the token.
pub async fn public_invoice(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<PublicInvoiceResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;
    let invoice = invoices::find_by_public_token(&mut conn, &token)?;
    let items = invoices::load_items(&mut conn, invoice.org_id, invoice.id)?;
    let payments = invoices::load_payments(&mut conn, invoice.org_id, invoice.id)?;

    Ok(Json(PublicInvoiceResponse {
        number: invoice.number,
        status: invoice.status,
        currency: invoice.currency,
        total_cents: invoices::total_cents(&items),
        paid_cents: invoices::paid_cents(&payments),
        items,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SignedUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Signed URL for the externally rendered PDF of a public invoice.
pub async fn public_invoice_signed_url(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<SignedUrlResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;
    let invoice = invoices::find_by_public_token(&mut conn, &token)?;

    let key = format!("invoices/{}/{}.pdf", invoice.org_id, invoice.id);
    let ttl = std::time::Duration::from_secs(state.config.storage.general_url_ttl_secs);
    let url = state.storage.sign_download(&key, ttl).await?;

    Ok(Json(SignedUrlResponse {
        url,
        expires_in_secs: state.config.storage.general_url_ttl_secs,
    }))
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    pub exp: i64,
    pub sig: String,
}

/// Download proxy for the local storage backend. Other backends hand out
/// provider-signed URLs and never hit this route.
pub async fn serve_file(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<FileQuery>,
) -> ApiResult<axum::response::Response> {
    crate::storage::validate_key(&key)?;

    let StorageGateway::Local(backend) = &state.storage else {
        return Err(AppError::not_found("Not found"));
    };

    if !backend.validate_signature(&key, query.exp, &query.sig) {
        return Err(AppError::forbidden("Link is invalid or expired"));
    }

    let bytes = backend.read(&key).await?;

    let mime = if key.ends_with(".jpg") || key.ends_with(".jpeg") {
        "image/jpeg"
    } else if key.ends_with(".png") {
        "image/png"
    } else if key.ends_with(".webp") {
        "image/webp"
    } else if key.ends_with(".pdf") {
        "application/pdf"
    } else {
        "application/octet-stream"
    };

    Ok(axum::response::Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", mime)
        .header("Cache-Control", "private, no-store")
        .body(axum::body::Body::from(bytes))
        .map_err(|_| AppError::internal("Response build failed"))?)
}

/// Redeems a vended photo-download token: verifies it, re-checks the photo
/// still exists in the token's org, and redirects to a short-lived
/// backend-signed URL. The raw storage location never appears in the URL
/// the caller was given.
pub async fn photo_download(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<axum::response::Redirect> {
    let parsed = crate::auth::tokens::verify(
        &state.config.auth.secret,
        crate::auth::tokens::TokenKind::PhotoDownload,
        &token,
    )
    .map_err(|_| AppError::forbidden("Link is invalid or expired"))?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let photo = crate::domain::photos::get(&mut conn, parsed.org_id, parsed.subject)?;

    let ttl = std::time::Duration::from_secs(state.config.storage.photo_url_ttl_secs);
    let url = state.storage.sign_download(&photo.storage_key, ttl).await?;

    Ok(axum::response::Redirect::temporary(&url))
}

/// Simulated checkout page for the disabled payment client; real
/// deployments use the provider's hosted checkout.
pub async fn checkout_placeholder(Path(session_id): Path<String>) -> Json<serde_json::Value> {
    Json(json!({
        "checkout_session": session_id,
        "note": "payment provider is not configured; use the webhook simulator in tests",
    }))
}
