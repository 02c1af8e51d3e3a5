//! Admin safety gate.
//!
//! Sits in front of every admin route: an optional CIDR allowlist, a
//! read-only freeze that turns writes into conflicts during incidents, and a
//! short-TTL break-glass token that overrides the freeze for emergency
//! writes. Break-glass use is always audited.

use axum::{
    extract::{Request, State},
    http::Method,
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use diesel::prelude::*;
use tracing::warn;

use crate::auth::{sessions, tokens};
use crate::error::{get_db_conn, AppError};
use crate::middleware::rate_limit::client_ip;
use crate::middleware::request_id::RequestId;
use crate::middleware::tenant::TenantContext;
use crate::netutil::{any_contains, Cidr};
use crate::schema::break_glass_tokens;
use crate::AppState;

pub static BREAK_GLASS_HEADER: &str = "x-break-glass";

pub async fn admin_safety_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    let allowlist = Cidr::parse_list(&state.config.admin.ip_allowlist_cidrs);
    if !allowlist.is_empty() {
        let ip = client_ip(&req, &state.rate_limit.trusted_proxies);
        if !any_contains(&allowlist, ip) {
            warn!(ip = %ip, "Admin request from outside the allowlist");
            return Err(
                AppError::forbidden("Admin access is not allowed from this address")
                    .into_response(),
            );
        }
    }

    let is_write = matches!(
        *req.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    );

    if is_write && read_only_active(&state, &req) {
        if let Some(token) = req
            .headers()
            .get(BREAK_GLASS_HEADER)
            .and_then(|h| h.to_str().ok())
        {
            match validate_break_glass(&state, &req, token) {
                Ok(()) => return Ok(next.run(req).await),
                Err(e) => return Err(e.into_response()),
            }
        }

        return Err(AppError::conflict(
            "Admin surface is read-only; writes are temporarily refused",
        )
        .with_subtype("read-only")
        .into_response());
    }

    Ok(next.run(req).await)
}

/// The freeze comes from config (process-wide) or the org's
/// `admin_read_only` feature flag.
fn read_only_active(state: &AppState, req: &Request) -> bool {
    if state.config.admin.read_only {
        return true;
    }

    let Some(ctx) = req.extensions().get::<TenantContext>() else {
        return false;
    };

    use crate::schema::feature_flags;
    let Ok(mut conn) = state.db_pool.get() else {
        // Can't read the flag: err on the side of the freeze being off,
        // the config flag remains the incident lever.
        return false;
    };

    feature_flags::table
        .filter(feature_flags::org_id.eq(ctx.org_id))
        .filter(feature_flags::flag.eq("admin_read_only"))
        .select(feature_flags::enabled)
        .first::<bool>(&mut conn)
        .optional()
        .ok()
        .flatten()
        .unwrap_or(false)
}

fn validate_break_glass(state: &AppState, req: &Request, raw: &str) -> Result<(), AppError> {
    let token = tokens::verify(&state.config.auth.secret, tokens::TokenKind::BreakGlass, raw)
        .map_err(|_| AppError::forbidden("Invalid break-glass token"))?;

    let ctx = req
        .extensions()
        .get::<TenantContext>()
        .ok_or_else(|| AppError::forbidden("Invalid break-glass token"))?;

    // Break-glass is scoped to the issuing org.
    if token.org_id != ctx.org_id {
        return Err(AppError::forbidden("Invalid break-glass token"));
    }

    let mut conn = get_db_conn(&state.db_pool)?;
    let token_hash = crate::auth::sessions::hash_refresh_token(raw);
    let now = Utc::now().naive_utc();

    let on_record: i64 = break_glass_tokens::table
        .filter(break_glass_tokens::org_id.eq(token.org_id))
        .filter(break_glass_tokens::token_hash.eq(&token_hash))
        .filter(break_glass_tokens::expires_at.gt(now))
        .count()
        .get_result(&mut conn)
        .map_err(AppError::from_diesel)?;

    if on_record == 0 {
        return Err(AppError::forbidden("Invalid break-glass token"));
    }

    let request_id = req
        .extensions()
        .get::<RequestId>()
        .map(|r| r.as_str().to_string());

    warn!(org_id = %ctx.org_id, actor = %ctx.principal.actor(), "Break-glass override used");
    sessions::audit(
        &mut conn,
        Some(ctx.org_id),
        &ctx.principal.actor(),
        "break_glass.used",
        request_id.as_deref(),
        serde_json::json!({ "method": req.method().as_str(), "path": req.uri().path() }),
    );

    Ok(())
}
