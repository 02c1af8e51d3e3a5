//! IAM: user invites, resets, bulk logout, worker tokens.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use diesel::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::auth::password::PasswordService;
use crate::auth::{sessions, tokens};
use crate::authz::{self, Action, Role};
use crate::db::org_transaction;
use crate::error::{get_db_conn, validation_error, ApiResult, AppError};
use crate::middleware::request_id::RequestId;
use crate::middleware::tenant::TenantContext;
use crate::models::{Membership, NewMembership, NewUser, User};
use crate::schema::{memberships, users};
use crate::AppState;

fn temp_password() -> String {
    use base64::Engine;

    let mut bytes = [0u8; 12];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct InviteRequest {
    #[validate(email)]
    pub email: String,
    pub full_name: Option<String>,
    #[schema(example = "DISPATCHER")]
    pub role: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct InviteResponse {
    pub user_id: Uuid,
    pub email: String,
    /// Returned exactly once; the invitee must change it on first login.
    pub temporary_password: String,
}

#[utoipa::path(
    post,
    path = "/v1/iam/users",
    tag = "IAM",
    request_body = InviteRequest,
    responses(
        (status = 201, description = "User invited", body = InviteResponse),
        (status = 402, description = "Plan user limit reached"),
        (status = 409, description = "Email already exists in this org")
    ),
    security(("bearer" = []))
)]
pub async fn invite_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
    Json(payload): Json<InviteRequest>,
) -> ApiResult<(StatusCode, Json<InviteResponse>)> {
    authz::require(ctx.role, Action::IamManage)?;
    payload.validate().map_err(validation_error)?;

    let role = Role::parse(&payload.role)
        .filter(|r| !matches!(r, Role::Client))
        .ok_or_else(|| AppError::validation("Unknown role"))?;

    let password = temp_password();
    let password_hash =
        PasswordService::hash_password_with_cost(&password, state.config.auth.password_hash_cost)
            .map_err(|_| AppError::internal("Password hash failed"))?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let user = org_transaction(&mut conn, ctx.org_id, |conn| {
        crate::handlers::admin::check_plan_user_quota(conn, ctx.org_id)?;

        let user: User = diesel::insert_into(users::table)
            .values(&NewUser {
                org_id: ctx.org_id,
                email: payload.email.to_lowercase(),
                password_hash: password_hash.clone(),
                full_name: payload.full_name.clone(),
                must_change_password: true,
            })
            .returning(User::as_returning())
            .get_result(conn)?;

        diesel::insert_into(memberships::table)
            .values(&NewMembership {
                org_id: ctx.org_id,
                user_id: user.id,
                role: role.as_str().to_string(),
            })
            .execute(conn)?;

        sessions::audit(
            conn,
            Some(ctx.org_id),
            &ctx.principal.actor(),
            "iam.user_invited",
            Some(request_id.as_str()),
            serde_json::json!({ "user_id": user.id.to_string(), "role": role.as_str() }),
        );

        Ok(user)
    })?;

    Ok((
        StatusCode::CREATED,
        Json(InviteResponse {
            user_id: user.id,
            email: user.email,
            temporary_password: password,
        }),
    ))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct UserEntry {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub must_change_password: bool,
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
) -> ApiResult<Json<Vec<UserEntry>>> {
    authz::require(ctx.role, Action::IamManage)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let rows: Vec<(User, Membership)> = users::table
        .inner_join(memberships::table.on(memberships::user_id.eq(users::id)))
        .filter(users::org_id.eq(ctx.org_id))
        .filter(memberships::org_id.eq(ctx.org_id))
        .select((User::as_select(), Membership::as_select()))
        .load(&mut conn)
        .map_err(AppError::from_diesel)?;

    let entries = rows
        .into_iter()
        .map(|(user, membership)| UserEntry {
            user_id: user.id,
            email: user.email,
            full_name: user.full_name,
            role: membership.role,
            is_active: user.is_active,
            must_change_password: user.must_change_password,
        })
        .collect();

    Ok(Json(entries))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ResetResponse {
    pub user_id: Uuid,
    pub temporary_password: String,
    pub sessions_revoked: usize,
}

/// Admin reset: fresh temporary password, must-change set, every session
/// revoked.
pub async fn reset_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<ResetResponse>> {
    authz::require(ctx.role, Action::IamManage)?;

    let password = temp_password();
    let password_hash =
        PasswordService::hash_password_with_cost(&password, state.config.auth.password_hash_cost)
            .map_err(|_| AppError::internal("Password hash failed"))?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let revoked = org_transaction(&mut conn, ctx.org_id, |conn| {
        let updated = diesel::update(
            users::table
                .filter(users::id.eq(user_id))
                .filter(users::org_id.eq(ctx.org_id)),
        )
        .set((
            users::password_hash.eq(&password_hash),
            users::must_change_password.eq(true),
            users::updated_at.eq(chrono::Utc::now().naive_utc()),
        ))
        .execute(conn)?;

        if updated == 0 {
            return Err(AppError::not_found("User not found"));
        }

        let revoked = sessions::revoke_all_for_user(conn, user_id, sessions::REASON_ADMIN_RESET)?;
        sessions::audit(
            conn,
            Some(ctx.org_id),
            &ctx.principal.actor(),
            "iam.user_reset",
            Some(request_id.as_str()),
            serde_json::json!({ "user_id": user_id.to_string() }),
        );
        Ok(revoked)
    })?;

    Ok(Json(ResetResponse {
        user_id,
        temporary_password: password,
        sessions_revoked: revoked,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct BulkLogoutResponse {
    pub sessions_revoked: usize,
}

pub async fn logout_user(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Extension(request_id): Extension<RequestId>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<BulkLogoutResponse>> {
    authz::require(ctx.role, Action::IamManage)?;

    let mut conn = get_db_conn(&state.db_pool)?;

    // The target must belong to the caller's org.
    let exists: i64 = users::table
        .filter(users::id.eq(user_id))
        .filter(users::org_id.eq(ctx.org_id))
        .count()
        .get_result(&mut conn)?;
    if exists == 0 {
        return Err(AppError::not_found("User not found"));
    }

    let revoked = sessions::revoke_all_for_user(&mut conn, user_id, sessions::REASON_ADMIN_RESET)?;
    sessions::audit(
        &mut conn,
        Some(ctx.org_id),
        &ctx.principal.actor(),
        "iam.user_logout_all",
        Some(request_id.as_str()),
        serde_json::json!({ "user_id": user_id.to_string() }),
    );

    Ok(Json(BulkLogoutResponse {
        sessions_revoked: revoked,
    }))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkerTokenResponse {
    pub token: String,
    pub expires_in_secs: i64,
}

/// Issues a signed worker-portal token for a user with the WORKER role.
pub async fn issue_worker_token(
    State(state): State<AppState>,
    Extension(ctx): Extension<TenantContext>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Json<WorkerTokenResponse>> {
    authz::require(ctx.role, Action::IamManage)?;

    let mut conn = get_db_conn(&state.db_pool)?;
    let role: Option<String> = memberships::table
        .filter(memberships::org_id.eq(ctx.org_id))
        .filter(memberships::user_id.eq(user_id))
        .select(memberships::role)
        .first(&mut conn)
        .optional()?;

    match role.as_deref() {
        Some("WORKER") => {}
        Some(_) => return Err(AppError::validation("User is not a worker")),
        None => return Err(AppError::not_found("User not found")),
    }

    let ttl = state.config.auth.worker_token_expiry_secs;
    let token = tokens::mint(
        &state.config.auth.secret,
        tokens::TokenKind::Worker,
        user_id,
        ctx.org_id,
        ttl,
    );

    Ok(Json(WorkerTokenResponse {
        token,
        expires_in_secs: ttl,
    }))
}
