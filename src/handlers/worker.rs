//! Worker portal: today's jobs, time tracking, photo evidence.
//!
//! Every route is scoped by the signed worker token resolved into the
//! tenant context.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{self, Action};
use crate::db::org_transaction;
use crate::domain::{bookings, photos};
use crate::error::{get_db_conn, ApiResult, AppError};
use crate::middleware::tenant::{Principal, TenantContext};
use crate::models::{Booking, NewTimeEntry, Photo, TimeEntry};
use crate::schema::{bookings as bookings_table, time_entries};
use crate::AppState;

fn worker_id(ctx: &TenantContext) -> ApiResult<Uuid> {
    match ctx.principal {
        Principal::Worker { user_id } => Ok(user_id),
        _ => Err(AppError::forbidden("Worker token required")),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkerJob {
    pub booking: Booking,
    pub open_time_entry: Option<TimeEntry>,
}

/// Upcoming and in-progress work for the org.
pub async fn list_jobs(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<Vec<WorkerJob>>> {
    authz::require(ctx.role, Action::BookingRead)?;
    let worker = worker_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let rows: Vec<Booking> = bookings_table::table
        .filter(bookings_table::org_id.eq(ctx.org_id))
        .filter(bookings_table::status.eq_any(["CONFIRMED", "IN_PROGRESS"]))
        .order(bookings_table::starts_at.asc())
        .limit(50)
        .select(Booking::as_select())
        .load(&mut conn)?;

    let mut jobs = Vec::with_capacity(rows.len());
    for booking in rows {
        let open: Option<TimeEntry> = time_entries::table
            .filter(time_entries::org_id.eq(ctx.org_id))
            .filter(time_entries::booking_id.eq(booking.id))
            .filter(time_entries::worker_id.eq(worker))
            .filter(time_entries::ended_at.is_null())
            .select(TimeEntry::as_select())
            .first(&mut conn)
            .optional()?;
        jobs.push(WorkerJob {
            booking,
            open_time_entry: open,
        });
    }

    Ok(Json(jobs))
}

/// Clock in. Starting the first entry moves a confirmed booking to
/// IN_PROGRESS.
pub async fn start_time_entry(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<TimeEntry>)> {
    authz::require(ctx.role, Action::TimeTrack)?;
    let worker = worker_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let entry = org_transaction(&mut conn, ctx.org_id, |conn| {
        let booking: Booking = bookings_table::table
            .filter(bookings_table::id.eq(booking_id))
            .filter(bookings_table::org_id.eq(ctx.org_id))
            .for_update()
            .select(Booking::as_select())
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found("Booking not found"))?;

        let already_open: i64 = time_entries::table
            .filter(time_entries::org_id.eq(ctx.org_id))
            .filter(time_entries::booking_id.eq(booking.id))
            .filter(time_entries::worker_id.eq(worker))
            .filter(time_entries::ended_at.is_null())
            .count()
            .get_result(conn)?;
        if already_open > 0 {
            return Err(AppError::conflict("A time entry is already running"));
        }

        if booking.status == "CONFIRMED" {
            bookings::start(conn, ctx.org_id, booking.id)?;
        } else if booking.status != "IN_PROGRESS" {
            return Err(AppError::conflict("Booking is not in a workable state"));
        }

        let entry: TimeEntry = diesel::insert_into(time_entries::table)
            .values(&NewTimeEntry {
                org_id: ctx.org_id,
                booking_id: booking.id,
                worker_id: worker,
            })
            .returning(TimeEntry::as_returning())
            .get_result(conn)?;

        Ok(entry)
    })?;

    Ok((StatusCode::CREATED, Json(entry)))
}

/// Clock out.
pub async fn stop_time_entry(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(entry_id): Path<Uuid>,
) -> ApiResult<Json<TimeEntry>> {
    authz::require(ctx.role, Action::TimeTrack)?;
    let worker = worker_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let entry: TimeEntry = diesel::update(
        time_entries::table
            .filter(time_entries::id.eq(entry_id))
            .filter(time_entries::org_id.eq(ctx.org_id))
            .filter(time_entries::worker_id.eq(worker))
            .filter(time_entries::ended_at.is_null()),
    )
    .set(time_entries::ended_at.eq(Utc::now().naive_utc()))
    .returning(TimeEntry::as_returning())
    .get_result(&mut conn)
    .optional()?
    .ok_or_else(|| AppError::not_found("Open time entry not found"))?;

    Ok(Json(entry))
}

/// Photo upload: raw body, MIME from the Content-Type header.
pub async fn upload_photo(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Photo>)> {
    authz::require(ctx.role, Action::PhotoWrite)?;
    let worker = worker_id(&ctx)?;

    let mime = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut conn = get_db_conn(&state.db_pool)?;
    crate::handlers::admin::check_plan_storage_quota(&mut conn, ctx.org_id, body.len() as i64)?;

    let photo = photos::upload(
        &mut conn,
        &state.storage,
        ctx.org_id,
        &state.config.storage.photo_allowed_mime,
        state.config.storage.photo_max_bytes,
        photos::UploadRequest {
            booking_id,
            mime,
            bytes: body.to_vec(),
            created_by: Some(worker),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(photo)))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PhotoUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Vends a short-TTL download token for a photo the worker may view. The
/// caller follows the returned URL, which redirects through the gateway.
pub async fn photo_url(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<Json<PhotoUrlResponse>> {
    authz::require(ctx.role, Action::PhotoRead)?;
    let worker = worker_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let photo = photos::get(&mut conn, ctx.org_id, photo_id)?;
    photos::authorize_view(&mut conn, &photo, ctx.role, Some(worker), None)?;

    let ttl_secs = state.config.storage.photo_url_ttl_secs;
    let token = crate::auth::tokens::mint(
        &state.config.auth.secret,
        crate::auth::tokens::TokenKind::PhotoDownload,
        photo.id,
        ctx.org_id,
        ttl_secs as i64,
    );

    Ok(Json(PhotoUrlResponse {
        url: format!(
            "{}/v1/photos/{}",
            state.config.server.public_base_url.trim_end_matches('/'),
            token
        ),
        expires_in_secs: ttl_secs,
    }))
}
