//! Admin write idempotency.
//!
//! Every state-changing admin request must carry an `Idempotency-Key`. The
//! first execution stores the response; a retry with the same key and body
//! replays it byte-for-byte, and a retry that reuses the key with a different
//! body is a conflict. The unique constraint on `(org_id, idem_key)`
//! serializes concurrent first attempts.

use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::error::{get_db_conn, AppError};
use crate::middleware::tenant::TenantContext;
use crate::models::{AdminIdempotency, NewAdminIdempotency};
use crate::schema::admin_idempotency;
use crate::AppState;

pub static IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";

const MAX_CAPTURED_BODY: usize = 1024 * 1024;

fn is_write(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

fn body_digest(method: &Method, path: &str, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(path.as_bytes());
    hasher.update(b"|");
    hasher.update(body);
    hex::encode(hasher.finalize())
}

pub async fn idempotency_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, Response> {
    if !is_write(req.method()) {
        return Ok(next.run(req).await);
    }

    let ctx = req
        .extensions()
        .get::<TenantContext>()
        .cloned()
        .ok_or_else(|| {
            AppError::unauthenticated("An organization context is required")
                .with_subtype("org-required")
                .into_response()
        })?;

    let Some(idem_key) = req
        .headers()
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string())
    else {
        return Err(AppError::validation("Idempotency-Key header is required")
            .with_subtype("idempotency-key-required")
            .into_response());
    };

    if idem_key.is_empty() || idem_key.len() > 200 {
        return Err(AppError::validation("Idempotency-Key must be 1-200 characters")
            .into_response());
    }

    let (parts, body) = req.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_CAPTURED_BODY)
        .await
        .map_err(|_| {
            AppError::validation("Request body too large for an idempotent write").into_response()
        })?;

    let method = parts.method.clone();
    let path = parts.uri.path().to_string();
    let digest = body_digest(&method, &path, &body_bytes);

    // Replay check happens before the handler runs.
    if let Some(stored) = lookup(&state, ctx.org_id, &idem_key).map_err(|e| e.into_response())? {
        if stored.body_hash == digest {
            debug!(org_id = %ctx.org_id, key = %idem_key, "Replaying idempotent admin response");
            return Ok(replay(&stored));
        }
        return Err(AppError::conflict(
            "Idempotency-Key was already used with a different request body",
        )
        .with_subtype("idempotency-mismatch")
        .into_response());
    }

    let req = Request::from_parts(parts, Body::from(body_bytes));
    let response = next.run(req).await;

    // 5xx responses are not cached; the client should genuinely retry them.
    if response.status().is_server_error() {
        return Ok(response);
    }

    let (resp_parts, resp_body) = response.into_parts();
    let resp_bytes = match axum::body::to_bytes(resp_body, MAX_CAPTURED_BODY).await {
        Ok(bytes) => bytes,
        Err(_) => Bytes::new(),
    };

    store(
        &state,
        ctx.org_id,
        &idem_key,
        &method,
        &path,
        &digest,
        resp_parts.status,
        &resp_bytes,
    );

    Ok(Response::from_parts(resp_parts, Body::from(resp_bytes)))
}

fn lookup(
    state: &AppState,
    org_id: Uuid,
    idem_key: &str,
) -> Result<Option<AdminIdempotency>, AppError> {
    let mut conn = get_db_conn(&state.db_pool)?;
    admin_idempotency::table
        .filter(admin_idempotency::org_id.eq(org_id))
        .filter(admin_idempotency::idem_key.eq(idem_key))
        .select(AdminIdempotency::as_select())
        .first(&mut conn)
        .optional()
        .map_err(AppError::from_diesel)
}

#[allow(clippy::too_many_arguments)]
fn store(
    state: &AppState,
    org_id: Uuid,
    idem_key: &str,
    method: &Method,
    path: &str,
    digest: &str,
    status: StatusCode,
    body: &[u8],
) {
    let response_body = serde_json::from_slice(body)
        .unwrap_or_else(|_| serde_json::json!({ "raw": String::from_utf8_lossy(body) }));

    let row = NewAdminIdempotency {
        org_id,
        idem_key: idem_key.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        body_hash: digest.to_string(),
        response_status: status.as_u16() as i32,
        response_body,
    };

    // A concurrent retry may have stored first; the unique constraint makes
    // that a harmless no-op.
    if let Ok(mut conn) = state.db_pool.get() {
        let _ = diesel::insert_into(admin_idempotency::table)
            .values(&row)
            .on_conflict_do_nothing()
            .execute(&mut conn);
    }
}

fn replay(stored: &AdminIdempotency) -> Response {
    let status =
        StatusCode::from_u16(stored.response_status as u16).unwrap_or(StatusCode::OK);
    let body = stored.response_body.to_string();

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Idempotent-Replay", "true")
        .body(Body::from(body))
        .unwrap_or_else(|_| status.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_methods() {
        assert!(is_write(&Method::POST));
        assert!(is_write(&Method::DELETE));
        assert!(!is_write(&Method::GET));
        assert!(!is_write(&Method::HEAD));
    }

    #[test]
    fn test_digest_depends_on_all_parts() {
        let base = body_digest(&Method::POST, "/v1/admin/leads", b"{}");
        assert_ne!(base, body_digest(&Method::PUT, "/v1/admin/leads", b"{}"));
        assert_ne!(base, body_digest(&Method::POST, "/v1/admin/teams", b"{}"));
        assert_ne!(
            base,
            body_digest(&Method::POST, "/v1/admin/leads", b"{\"a\":1}")
        );
        assert_eq!(base, body_digest(&Method::POST, "/v1/admin/leads", b"{}"));
    }
}
