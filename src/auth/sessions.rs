//! Server-side session store backing the access/refresh token pair.
//!
//! Refresh tokens are opaque random strings; only their SHA-256 hash is
//! persisted. Rotation is a predicated update so concurrent refreshes of the
//! same session produce at most one winner.

use chrono::{Duration, Utc};
use diesel::prelude::*;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, ApiResult};
use crate::models::{NewAuditEvent, NewSession, Session};
use crate::schema::{audit_events, sessions};

pub const REASON_ROTATED: &str = "rotated";
pub const REASON_LOGOUT: &str = "logout";
pub const REASON_PASSWORD_CHANGED: &str = "password_changed";
pub const REASON_ADMIN_RESET: &str = "admin_reset";

pub fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn generate_refresh_token() -> String {
    use base64::Engine;

    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// A freshly issued session together with the only plaintext copy of its
/// refresh token.
pub struct IssuedSession {
    pub session: Session,
    pub refresh_token: String,
}

pub fn create_session(
    conn: &mut PgConnection,
    user_id: Uuid,
    org_id: Uuid,
    access_expiry_secs: i64,
    refresh_expiry_secs: i64,
) -> ApiResult<IssuedSession> {
    let refresh_token = generate_refresh_token();
    let now = Utc::now().naive_utc();

    let new_session = NewSession {
        org_id,
        user_id,
        access_jti: Uuid::new_v4(),
        refresh_hash: hash_refresh_token(&refresh_token),
        expires_at: now + Duration::seconds(access_expiry_secs),
        refresh_expires_at: now + Duration::seconds(refresh_expiry_secs),
    };

    let session: Session = diesel::insert_into(sessions::table)
        .values(&new_session)
        .returning(Session::as_returning())
        .get_result(conn)
        .map_err(AppError::from_diesel)?;

    Ok(IssuedSession {
        session,
        refresh_token,
    })
}

/// Atomically rotates a session: the predecessor is revoked with reason
/// `rotated` and a successor is created. Exactly one of N concurrent calls
/// with the same refresh token succeeds; the rest see `Unauthenticated`.
pub fn rotate_session(
    conn: &mut PgConnection,
    refresh_token: &str,
    access_expiry_secs: i64,
    refresh_expiry_secs: i64,
) -> ApiResult<IssuedSession> {
    let token_hash = hash_refresh_token(refresh_token);
    let now = Utc::now().naive_utc();

    let predecessor: Session = sessions::table
        .filter(sessions::refresh_hash.eq(&token_hash))
        .select(Session::as_select())
        .first(conn)
        .optional()
        .map_err(AppError::from_diesel)?
        .ok_or_else(|| AppError::unauthenticated("Invalid refresh token"))?;

    if predecessor.refresh_expires_at < now {
        return Err(AppError::unauthenticated("Refresh token expired"));
    }

    // The predicate decides the race: only the caller that flips
    // revoked_at from NULL gets to mint the successor.
    let claimed = diesel::update(
        sessions::table
            .filter(sessions::id.eq(predecessor.id))
            .filter(sessions::revoked_at.is_null()),
    )
    .set((
        sessions::revoked_at.eq(now),
        sessions::revoked_reason.eq(REASON_ROTATED),
    ))
    .execute(conn)
    .map_err(AppError::from_diesel)?;

    if claimed == 0 {
        return Err(AppError::unauthenticated("Refresh token already used"));
    }

    create_session(
        conn,
        predecessor.user_id,
        predecessor.org_id,
        access_expiry_secs,
        refresh_expiry_secs,
    )
}

/// Returns the session only if it is active: not revoked, not expired.
pub fn find_active(conn: &mut PgConnection, session_id: Uuid) -> ApiResult<Option<Session>> {
    let now = Utc::now().naive_utc();
    sessions::table
        .filter(sessions::id.eq(session_id))
        .filter(sessions::revoked_at.is_null())
        .filter(sessions::expires_at.gt(now))
        .select(Session::as_select())
        .first(conn)
        .optional()
        .map_err(AppError::from_diesel)
}

pub fn revoke_session(
    conn: &mut PgConnection,
    session_id: Uuid,
    reason: &str,
) -> ApiResult<usize> {
    let count = diesel::update(
        sessions::table
            .filter(sessions::id.eq(session_id))
            .filter(sessions::revoked_at.is_null()),
    )
    .set((
        sessions::revoked_at.eq(Utc::now().naive_utc()),
        sessions::revoked_reason.eq(reason),
    ))
    .execute(conn)
    .map_err(AppError::from_diesel)?;

    Ok(count)
}

/// Bulk revoke, used on password change and admin reset.
pub fn revoke_all_for_user(
    conn: &mut PgConnection,
    user_id: Uuid,
    reason: &str,
) -> ApiResult<usize> {
    let count = diesel::update(
        sessions::table
            .filter(sessions::user_id.eq(user_id))
            .filter(sessions::revoked_at.is_null()),
    )
    .set((
        sessions::revoked_at.eq(Utc::now().naive_utc()),
        sessions::revoked_reason.eq(reason),
    ))
    .execute(conn)
    .map_err(AppError::from_diesel)?;

    if count > 0 {
        info!(user_id = %user_id, revoked = count, reason = reason, "Revoked sessions");
    }

    Ok(count)
}

/// Session lifecycle audit trail (issued / refreshed / revoked).
pub fn audit(
    conn: &mut PgConnection,
    org_id: Option<Uuid>,
    actor: &str,
    event: &str,
    request_id: Option<&str>,
    detail: serde_json::Value,
) {
    let row = NewAuditEvent {
        org_id,
        actor: actor.to_string(),
        event: event.to_string(),
        request_id: request_id.map(|s| s.to_string()),
        detail,
    };
    // Audit writes must never fail the caller.
    let _ = diesel::insert_into(audit_events::table)
        .values(&row)
        .execute(conn);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_refresh_token_is_opaque_and_unique() {
        let t1 = generate_refresh_token();
        let t2 = generate_refresh_token();
        assert_ne!(t1, t2);
        assert!(t1.len() >= 40);
        assert!(!t1.contains('='));
    }

    #[test]
    fn test_hash_is_stable_and_not_reversible() {
        let token = generate_refresh_token();
        let h1 = hash_refresh_token(&token);
        let h2 = hash_refresh_token(&token);
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 64);
        assert_ne!(h1, token);
    }
}
