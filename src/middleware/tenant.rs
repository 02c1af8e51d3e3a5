//! Tenant context resolution.
//!
//! Every authenticated request is reduced to `(org_id, role, principal)`.
//! Four credential kinds exist; when a request presents more than one, the
//! highest-privilege candidate wins, with a fixed tiebreak order so the
//! outcome is deterministic. Presenting an invalid credential is always a
//! hard 401 — it never silently falls back to a weaker one.

use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use base64::Engine;
use diesel::prelude::*;
use uuid::Uuid;

use crate::auth::{sessions, tokens};
use crate::authz::Role;
use crate::error::{ApiResult, AppError};
use crate::schema::organizations;
use crate::AppState;

pub static WORKER_TOKEN_HEADER: &str = "x-worker-token";
pub static CLIENT_TOKEN_HEADER: &str = "x-client-token";
pub static ORG_OVERRIDE_HEADER: &str = "x-org-id";
static TEST_ORG_HEADER: &str = "x-test-org";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    OrgUser { user_id: Uuid, session_id: Uuid },
    AdminOperator { name: String },
    Worker { user_id: Uuid },
    Client { lead_id: Uuid },
}

impl Principal {
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::OrgUser { .. } => "org_user",
            Principal::AdminOperator { .. } => "admin_operator",
            Principal::Worker { .. } => "worker",
            Principal::Client { .. } => "client",
        }
    }

    /// Actor label for audit events. Never includes an email address.
    pub fn actor(&self) -> String {
        match self {
            Principal::OrgUser { user_id, .. } => format!("user:{}", user_id),
            Principal::AdminOperator { name } => format!("operator:{}", name),
            Principal::Worker { user_id } => format!("worker:{}", user_id),
            Principal::Client { lead_id } => format!("client:{}", lead_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TenantContext {
    pub org_id: Uuid,
    pub role: Role,
    pub principal: Principal,
}

/// Tiebreak order when ranks are equal: operator, org user, worker, client.
fn tiebreak(principal: &Principal) -> u8 {
    match principal {
        Principal::AdminOperator { .. } => 3,
        Principal::OrgUser { .. } => 2,
        Principal::Worker { .. } => 1,
        Principal::Client { .. } => 0,
    }
}

pub async fn tenant_context_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, Response> {
    if state.config.server.environment.is_production()
        && req.headers().contains_key(TEST_ORG_HEADER)
    {
        return Err(
            AppError::forbidden("Testing override header is not accepted here").into_response(),
        );
    }

    match resolve_context(&state, &req) {
        Ok(Some(ctx)) => {
            req.extensions_mut().insert(ctx);
            Ok(next.run(req).await)
        }
        Ok(None) => Ok(next.run(req).await),
        Err(e) => Err(e.into_response()),
    }
}

/// Guard for route groups that must run with a tenant context.
pub async fn require_tenant_middleware(req: Request, next: Next) -> Result<Response, Response> {
    if req.extensions().get::<TenantContext>().is_none() {
        return Err(AppError::unauthenticated("An organization context is required")
            .with_subtype("org-required")
            .into_response());
    }
    Ok(next.run(req).await)
}

fn resolve_context(state: &AppState, req: &Request) -> ApiResult<Option<TenantContext>> {
    let mut candidates: Vec<TenantContext> = Vec::new();

    if let Some(ctx) = resolve_admin_operator(state, req)? {
        candidates.push(ctx);
    }
    if let Some(ctx) = resolve_org_user(state, req)? {
        candidates.push(ctx);
    }
    if let Some(ctx) = resolve_worker(state, req)? {
        candidates.push(ctx);
    }
    if let Some(ctx) = resolve_client(state, req)? {
        candidates.push(ctx);
    }

    candidates.sort_by_key(|c| (c.role.rank(), tiebreak(&c.principal)));
    Ok(candidates.pop())
}

fn resolve_admin_operator(state: &AppState, req: &Request) -> ApiResult<Option<TenantContext>> {
    let Some(auth_header) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };

    let Some(encoded) = auth_header.strip_prefix("Basic ") else {
        return Ok(None);
    };

    let (Some(expected_user), Some(expected_password)) = (
        state.config.auth.admin_basic_user.as_ref(),
        state.config.auth.admin_basic_password.as_ref(),
    ) else {
        return Err(AppError::unauthenticated("Operator access is not configured"));
    };

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|_| AppError::unauthenticated("Invalid credentials"))?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| AppError::unauthenticated("Invalid credentials"))?;
    let Some((user, password)) = decoded.split_once(':') else {
        return Err(AppError::unauthenticated("Invalid credentials"));
    };

    if user != expected_user || password != expected_password {
        return Err(AppError::unauthenticated("Invalid credentials"));
    }

    let org_id = operator_org(state, req)?;

    Ok(Some(TenantContext {
        org_id,
        role: Role::Admin,
        principal: Principal::AdminOperator {
            name: user.to_string(),
        },
    }))
}

/// Operators act on the org named in `x-org-id`, falling back to the default
/// org so single-tenant deployments work without the header.
fn operator_org(state: &AppState, req: &Request) -> ApiResult<Uuid> {
    if let Some(raw) = req
        .headers()
        .get(ORG_OVERRIDE_HEADER)
        .and_then(|h| h.to_str().ok())
    {
        return Uuid::parse_str(raw)
            .map_err(|_| AppError::validation("x-org-id must be a UUID"));
    }

    let mut conn = crate::error::get_db_conn(&state.db_pool)?;
    let default_org: Option<Uuid> = organizations::table
        .filter(organizations::is_default.eq(true))
        .select(organizations::id)
        .first(&mut conn)
        .optional()
        .map_err(AppError::from_diesel)?;

    default_org.ok_or_else(|| {
        AppError::unauthenticated("No default organization is provisioned")
            .with_subtype("org-required")
    })
}

fn resolve_org_user(state: &AppState, req: &Request) -> ApiResult<Option<TenantContext>> {
    let Some(auth_header) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };

    let Some(token) = auth_header.strip_prefix("Bearer ") else {
        return Ok(None);
    };

    let claims = state
        .jwt_config
        .verify_access_token(token)
        .map_err(|_| AppError::unauthenticated("Invalid or expired token"))?;

    let role = Role::parse(&claims.role)
        .ok_or_else(|| AppError::unauthenticated("Invalid or expired token"))?;

    // JWT expiry alone is not enough: the backing session must still be live
    // so revocation takes effect before the token ages out.
    let mut conn = crate::error::get_db_conn(&state.db_pool)?;
    let session = sessions::find_active(&mut conn, claims.session_id)?
        .ok_or_else(|| AppError::unauthenticated("Session has been revoked"))?;

    if session.user_id != claims.sub || session.org_id != claims.org_id {
        return Err(AppError::unauthenticated("Session has been revoked"));
    }

    Ok(Some(TenantContext {
        org_id: claims.org_id,
        role,
        principal: Principal::OrgUser {
            user_id: claims.sub,
            session_id: claims.session_id,
        },
    }))
}

fn resolve_worker(state: &AppState, req: &Request) -> ApiResult<Option<TenantContext>> {
    let Some(raw) = req
        .headers()
        .get(WORKER_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };

    let token = tokens::verify(&state.config.auth.secret, tokens::TokenKind::Worker, raw)
        .map_err(|_| AppError::unauthenticated("Invalid worker token"))?;

    Ok(Some(TenantContext {
        org_id: token.org_id,
        role: Role::Worker,
        principal: Principal::Worker {
            user_id: token.subject,
        },
    }))
}

fn resolve_client(state: &AppState, req: &Request) -> ApiResult<Option<TenantContext>> {
    let Some(raw) = req
        .headers()
        .get(CLIENT_TOKEN_HEADER)
        .and_then(|h| h.to_str().ok())
    else {
        return Ok(None);
    };

    let token = tokens::verify(&state.config.auth.secret, tokens::TokenKind::MagicLink, raw)
        .map_err(|_| AppError::unauthenticated("Invalid or expired link"))?;

    Ok(Some(TenantContext {
        org_id: token.org_id,
        role: Role::Client,
        principal: Principal::Client {
            lead_id: token.subject,
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(role: Role, principal: Principal) -> TenantContext {
        TenantContext {
            org_id: Uuid::new_v4(),
            role,
            principal,
        }
    }

    #[test]
    fn test_highest_privilege_wins() {
        let mut candidates = vec![
            ctx(Role::Client, Principal::Client { lead_id: Uuid::new_v4() }),
            ctx(
                Role::Owner,
                Principal::OrgUser {
                    user_id: Uuid::new_v4(),
                    session_id: Uuid::new_v4(),
                },
            ),
            ctx(
                Role::Admin,
                Principal::AdminOperator {
                    name: "ops".to_string(),
                },
            ),
        ];

        candidates.sort_by_key(|c| (c.role.rank(), tiebreak(&c.principal)));
        let winner = candidates.pop().unwrap();
        assert_eq!(winner.role, Role::Owner);
    }

    #[test]
    fn test_operator_beats_equal_rank() {
        let mut candidates = vec![
            ctx(
                Role::Admin,
                Principal::OrgUser {
                    user_id: Uuid::new_v4(),
                    session_id: Uuid::new_v4(),
                },
            ),
            ctx(
                Role::Admin,
                Principal::AdminOperator {
                    name: "ops".to_string(),
                },
            ),
        ];

        candidates.sort_by_key(|c| (c.role.rank(), tiebreak(&c.principal)));
        let winner = candidates.pop().unwrap();
        assert!(matches!(winner.principal, Principal::AdminOperator { .. }));
    }

    #[test]
    fn test_actor_labels_are_id_based() {
        let p = Principal::Worker {
            user_id: Uuid::nil(),
        };
        assert_eq!(p.actor(), format!("worker:{}", Uuid::nil()));
        assert_eq!(p.kind(), "worker");
    }
}
