//! Client portal, scoped by magic-link tokens.

use axum::{
    extract::{Path, State},
    Extension, Json,
};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::authz::{self, Action};
use crate::db::org_transaction;
use crate::domain::{bookings, photos};
use crate::error::{get_db_conn, ApiResult, AppError};
use crate::middleware::tenant::{Principal, TenantContext};
use crate::models::{Booking, Photo};
use crate::schema::bookings as bookings_table;
use crate::AppState;

fn lead_id(ctx: &TenantContext) -> ApiResult<Uuid> {
    match ctx.principal {
        Principal::Client { lead_id } => Ok(lead_id),
        _ => Err(AppError::forbidden("Client link required")),
    }
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClientBooking {
    pub booking: Booking,
    pub photos: Vec<Photo>,
}

/// The client's own bookings, newest first, with their evidence photos.
pub async fn list_bookings(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<Vec<ClientBooking>>> {
    authz::require(ctx.role, Action::BookingRead)?;
    let lead = lead_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let rows: Vec<Booking> = bookings_table::table
        .filter(bookings_table::org_id.eq(ctx.org_id))
        .filter(bookings_table::lead_id.eq(lead))
        .order(bookings_table::starts_at.desc())
        .limit(50)
        .select(Booking::as_select())
        .load(&mut conn)?;

    let mut out = Vec::with_capacity(rows.len());
    for booking in rows {
        let photo_rows = photos::list_for_booking(&mut conn, ctx.org_id, booking.id)?;
        out.push(ClientBooking {
            booking,
            photos: photo_rows,
        });
    }

    Ok(Json(out))
}

/// Customer-initiated cancellation of their own confirmed booking.
pub async fn cancel_booking(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(booking_id): Path<Uuid>,
) -> ApiResult<Json<Booking>> {
    authz::require(ctx.role, Action::BookingRead)?;
    let lead = lead_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;

    // Ownership first; a foreign booking is indistinguishable from a
    // missing one.
    let owns: i64 = bookings_table::table
        .filter(bookings_table::id.eq(booking_id))
        .filter(bookings_table::org_id.eq(ctx.org_id))
        .filter(bookings_table::lead_id.eq(lead))
        .count()
        .get_result(&mut conn)?;
    if owns == 0 {
        return Err(AppError::not_found("Booking not found"));
    }

    let booking = org_transaction(&mut conn, ctx.org_id, |conn| {
        bookings::cancel(conn, ctx.org_id, booking_id)
    })?;

    Ok(Json(booking))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct PhotoUrlResponse {
    pub url: String,
    pub expires_in_secs: u64,
}

/// Vends a short-TTL download token for a photo on one of the client's
/// bookings.
pub async fn photo_url(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(photo_id): Path<Uuid>,
) -> ApiResult<Json<PhotoUrlResponse>> {
    authz::require(ctx.role, Action::PhotoRead)?;
    let lead = lead_id(&ctx)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let photo = photos::get(&mut conn, ctx.org_id, photo_id)?;
    photos::authorize_view(&mut conn, &photo, ctx.role, None, Some(lead))?;

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
