//! Session endpoints: login, refresh, logout, me, change-password.

use axum::{extract::State, Extension, Json};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::password::{PasswordService, VerifyOutcome};
use crate::auth::sessions;
use crate::authz::Role;
use crate::db::org_transaction;
use crate::error::{get_db_conn, validation_error, ApiResult, AppError};
use crate::middleware::request_id::RequestId;
use crate::middleware::tenant::{Principal, TenantContext};
use crate::models::User;
use crate::schema::{memberships, users};
use crate::telemetry::metrics::record_auth_attempt;
use crate::AppState;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "dispatcher@example.com")]
    pub email: String,
    pub password: String,
    /// Required when the same email exists in more than one organization.
    pub org_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SessionResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub must_change_password: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub org_id: Uuid,
    pub role: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    #[validate(length(min = 10, message = "Password must be at least 10 characters"))]
    pub new_password: String,
}

fn invalid_credentials() -> AppError {
    // One message for every failure mode; existence is never revealed.
    AppError::unauthenticated("Invalid credentials")
}

fn membership_role(conn: &mut PgConnection, org_id: Uuid, user_id: Uuid) -> ApiResult<Role> {
    let role: Option<String> = memberships::table
        .filter(memberships::org_id.eq(org_id))
        .filter(memberships::user_id.eq(user_id))
        .select(memberships::role)
        .first(conn)
        .optional()?;

    role.and_then(|r| Role::parse(&r))
        .ok_or_else(invalid_credentials)
}

#[utoipa::path(
    post,
    path = "/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = SessionResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 422, description = "Validation error")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<Json<SessionResponse>> {
    payload.validate().map_err(validation_error)?;

    let mut conn = get_db_conn(&state.db_pool)?;

    let mut matches: Vec<User> = users::table
        .filter(users::email.eq(payload.email.to_lowercase()))
        .filter(users::is_active.eq(true))
        .select(User::as_select())
        .load(&mut conn)?;

    if let Some(org_id) = payload.org_id {
        matches.retain(|u| u.org_id == org_id);
    }

    let user = match matches.len() {
        1 => matches.remove(0),
        _ => {
            record_auth_attempt("login", "invalid_credentials");
            // Hash anyway so timing doesn't reveal whether the email exists.
            let _ = PasswordService::verify_password(
                &payload.password,
                "$argon2id$v=19$m=4096,t=3,p=1$AAAAAAAAAAAAAAAAAAAAAA$AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA",
            );
            return Err(invalid_credentials());
        }
    };

    let outcome = PasswordService::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| invalid_credentials())?;

    if !outcome.is_valid() {
        record_auth_attempt("login", "invalid_credentials");
        warn!(user_id = %user.id, "Failed login attempt");
        return Err(invalid_credentials());
    }

    // Legacy hashes upgrade in place on a successful login.
    if outcome == VerifyOutcome::ValidNeedsRehash {
        let new_hash =
            PasswordService::hash_password_with_cost(&payload.password, state.config.auth.password_hash_cost)
                .map_err(|_| AppError::internal("Password rehash failed"))?;
        diesel::update(users::table.find(user.id))
            .set(users::password_hash.eq(new_hash))
            .execute(&mut conn)?;
        info!(user_id = %user.id, "Legacy password hash upgraded");
    }

    let role = membership_role(&mut conn, user.org_id, user.id)?;

    let issued = org_transaction(&mut conn, user.org_id, |conn| {
        let issued = sessions::create_session(
            conn,
            user.id,
            user.org_id,
            state.config.auth.access_token_expiry_secs,
            state.config.auth.refresh_token_expiry_secs,
        )?;
        sessions::audit(
            conn,
            Some(user.org_id),
            &format!("user:{}", user.id),
            "session.issued",
            Some(request_id.as_str()),
            serde_json::json!({ "session_id": issued.session.id.to_string() }),
        );
        Ok(issued)
    })?;

    let access_token = state
        .jwt_config
        .generate_access_token(
            user.id,
            user.org_id,
            role.as_str(),
            issued.session.id,
            issued.session.access_jti,
        )
        .map_err(|e| {
            warn!(error = %e, "Token generation failed");
            AppError::internal("Token generation failed")
        })?;

    record_auth_attempt("login", "success");
    Ok(Json(SessionResponse {
        access_token,
        refresh_token: issued.refresh_token,
        must_change_password: user.must_change_password,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/refresh",
    tag = "Auth",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = SessionResponse),
        (status = 401, description = "Invalid, expired, or already-used refresh token")
    )
)]
pub async fn refresh(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<RefreshRequest>,
) -> ApiResult<Json<SessionResponse>> {
    let mut conn = get_db_conn(&state.db_pool)?;

    let issued = conn.transaction(|conn| {
        sessions::rotate_session(
            conn,
            &payload.refresh_token,
            state.config.auth.access_token_expiry_secs,
            state.config.auth.refresh_token_expiry_secs,
        )
    })?;

    let role = membership_role(&mut conn, issued.session.org_id, issued.session.user_id)?;

    let user: User = users::table
        .filter(users::id.eq(issued.session.user_id))
        .select(User::as_select())
        .first(&mut conn)?;

    let access_token = state
        .jwt_config
        .generate_access_token(
            issued.session.user_id,
            issued.session.org_id,
            role.as_str(),
            issued.session.id,
            issued.session.access_jti,
        )
        .map_err(|_| AppError::internal("Token generation failed"))?;

    sessions::audit(
        &mut conn,
        Some(issued.session.org_id),
        &format!("user:{}", issued.session.user_id),
        "session.refreshed",
        Some(request_id.as_str()),
        serde_json::json!({ "session_id": issued.session.id.to_string() }),
    );
    record_auth_attempt("refresh", "success");

    Ok(Json(SessionResponse {
        access_token,
        refresh_token: issued.refresh_token,
        must_change_password: user.must_change_password,
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/logout",
    tag = "Auth",
    responses((status = 204, description = "Session revoked")),
    security(("bearer" = []))
)]
pub async fn logout(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
) -> ApiResult<axum::http::StatusCode> {
    let Principal::OrgUser { session_id, user_id } = ctx.principal else {
        return Err(AppError::forbidden("Only interactive sessions can log out"));
    };

    let mut conn = get_db_conn(&state.db_pool)?;
    sessions::revoke_session(&mut conn, session_id, sessions::REASON_LOGOUT)?;
    sessions::audit(
        &mut conn,
        Some(ctx.org_id),
        &format!("user:{}", user_id),
        "session.revoked",
        Some(request_id.as_str()),
        serde_json::json!({ "session_id": session_id.to_string(), "reason": "logout" }),
    );
    record_auth_attempt("logout", "success");

    Ok(axum::http::StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/v1/auth/me",
    tag = "Auth",
    responses((status = 200, description = "Current principal", body = MeResponse)),
    security(("bearer" = []))
)]
pub async fn me(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<MeResponse>> {
    let Principal::OrgUser { user_id, .. } = ctx.principal else {
        return Err(AppError::forbidden("Only interactive sessions have a profile"));
    };

    let mut conn = get_db_conn(&state.db_pool)?;
    let user: User = users::table
        .filter(users::id.eq(user_id))
        .filter(users::org_id.eq(ctx.org_id))
        .select(User::as_select())
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found("User not found"))?;

    Ok(Json(MeResponse {
        user_id: user.id,
        email: user.email,
        full_name: user.full_name,
        org_id: ctx.org_id,
        role: ctx.role.as_str().to_string(),
    }))
}

#[utoipa::path(
    post,
    path = "/v1/auth/change-password",
    tag = "Auth",
    request_body = ChangePasswordRequest,
    responses(
        (status = 204, description = "Password changed; all sessions revoked"),
        (status = 401, description = "Current password incorrect")
    ),
    security(("bearer" = []))
)]
pub async fn change_password(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<ChangePasswordRequest>,
) -> ApiResult<axum::http::StatusCode> {
    payload.validate().map_err(validation_error)?;

    let Principal::OrgUser { user_id, .. } = ctx.principal else {
        return Err(AppError::forbidden("Only interactive sessions can change a password"));
    };

    let mut conn = get_db_conn(&state.db_pool)?;
    let user: User = users::table
        .filter(users::id.eq(user_id))
        .filter(users::org_id.eq(ctx.org_id))
        .select(User::as_select())
        .first(&mut conn)?;

    let outcome = PasswordService::verify_password(&payload.current_password, &user.password_hash)
        .map_err(|_| invalid_credentials())?;
    if !outcome.is_valid() {
        record_auth_attempt("change_password", "invalid_credentials");
        return Err(invalid_credentials());
    }

    let new_hash = PasswordService::hash_password_with_cost(
        &payload.new_password,
        state.config.auth.password_hash_cost,
    )
    .map_err(|_| AppError::internal("Password hash failed"))?;

    org_transaction(&mut conn, ctx.org_id, |conn| {
        diesel::update(users::table.find(user.id))
            .set((
                users::password_hash.eq(&new_hash),
                users::must_change_password.eq(false),
                users::updated_at.eq(chrono::Utc::now().naive_utc()),
            ))
            .execute(conn)?;

        sessions::revoke_all_for_user(conn, user.id, sessions::REASON_PASSWORD_CHANGED)?;
        sessions::audit(
            conn,
            Some(ctx.org_id),
            &format!("user:{}", user.id),
            "password.changed",
            Some(request_id.as_str()),
            serde_json::json!({}),
        );
        Ok(())
    })?;

    record_auth_attempt("change_password", "success");
    Ok(axum::http::StatusCode::NO_CONTENT)
}
