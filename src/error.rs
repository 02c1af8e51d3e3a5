//! Error taxonomy and the Problem-Details response envelope.
//!
//! Domain code returns [`AppError`]; the conversion to HTTP happens in one
//! place, via `IntoResponse`. Handlers never build status codes by hand.

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;
use utoipa::ToSchema;

use crate::DbPool;

const ERROR_TYPE_BASE: &str = "https://errors.maidflow.dev";

/// Closed set of failure kinds every domain call maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    PlanLimit,
    RateLimited,
    DependencyUnavailable,
    IntegrationRejected,
    Internal,
}

impl ErrorKind {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PlanLimit => StatusCode::PAYMENT_REQUIRED,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorKind::DependencyUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::IntegrationRejected => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn slug(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not-found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::PlanLimit => "plan-limit",
            ErrorKind::RateLimited => "rate-limited",
            ErrorKind::DependencyUnavailable => "dependency-unavailable",
            ErrorKind::IntegrationRejected => "integration-rejected",
            ErrorKind::Internal => "internal",
        }
    }

    fn title(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "Request validation failed",
            ErrorKind::Unauthenticated => "Authentication required",
            ErrorKind::Forbidden => "Not permitted",
            ErrorKind::NotFound => "Resource not found",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::PlanLimit => "Plan limit reached",
            ErrorKind::RateLimited => "Too many requests",
            ErrorKind::DependencyUnavailable => "Upstream dependency unavailable",
            ErrorKind::IntegrationRejected => "Integration request rejected",
            ErrorKind::Internal => "Internal error",
        }
    }
}

/// Per-field detail for validation problems.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
#[error("{detail}")]
pub struct AppError {
    pub kind: ErrorKind,
    pub detail: String,
    /// Refines the type URI, e.g. `slot-conflict` under Conflict.
    pub subtype: Option<&'static str>,
    pub errors: Vec<FieldError>,
}

impl AppError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
            subtype: None,
            errors: Vec::new(),
        }
    }

    pub fn with_subtype(mut self, subtype: &'static str) -> Self {
        self.subtype = Some(subtype);
        self
    }

    pub fn with_field_errors(mut self, errors: Vec<FieldError>) -> Self {
        self.errors = errors;
        self
    }

    pub fn validation(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, detail)
    }

    pub fn unauthenticated(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, detail)
    }

    pub fn forbidden(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Forbidden, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, detail)
    }

    pub fn slot_taken() -> Self {
        Self::conflict("Requested slot overlaps an existing booking").with_subtype("slot-conflict")
    }

    pub fn invalid_transition(from: &str, to: &str) -> Self {
        Self::conflict(format!("Booking cannot move from {} to {}", from, to))
            .with_subtype("status-transition")
    }

    pub fn plan_limit(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::PlanLimit, detail)
    }

    pub fn rate_limited(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::RateLimited, detail)
    }

    pub fn dependency(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, detail)
    }

    pub fn integration_rejected(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::IntegrationRejected, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, detail)
    }

    pub fn db_error() -> Self {
        Self::internal("Database error")
    }

    /// Storage/db-layer mapper: unique violations become conflicts, the rest
    /// is logged and surfaced as a generic internal error.
    pub fn from_diesel(e: diesel::result::Error) -> Self {
        use diesel::result::{DatabaseErrorKind, Error};
        match e {
            Error::NotFound => Self::not_found("Resource not found"),
            Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::conflict(format!("Duplicate resource: {}", info.message()))
            }
            other => {
                error!(error = %other, "Database error");
                Self::db_error()
            }
        }
    }

    fn type_uri(&self) -> String {
        match self.subtype {
            Some(sub) => format!("{}/{}", ERROR_TYPE_BASE, sub),
            None => format!("{}/{}", ERROR_TYPE_BASE, self.kind.slug()),
        }
    }
}

impl From<diesel::result::Error> for AppError {
    fn from(e: diesel::result::Error) -> Self {
        Self::from_diesel(e)
    }
}

/// RFC 9457 Problem-Details body. `request_id` is stamped in by the
/// request-id middleware on the way out.
#[derive(Debug, Serialize, ToSchema)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.kind.status();
        let problem = Problem {
            type_uri: self.type_uri(),
            title: self.kind.title().to_string(),
            status: status.as_u16(),
            detail: self.detail,
            request_id: None,
            errors: self.errors,
        };

        let mut response = (status, Json(problem)).into_response();
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

pub type ApiResult<T> = Result<T, AppError>;

pub fn get_db_conn(
    pool: &DbPool,
) -> Result<
    diesel::r2d2::PooledConnection<diesel::r2d2::ConnectionManager<diesel::PgConnection>>,
    AppError,
> {
    pool.get().map_err(|e| {
        error!(error = %e, "Database connection error");
        AppError::dependency("Database connection unavailable")
    })
}

/// Maps `validator` derive output into field errors.
pub fn validation_error(e: validator::ValidationErrors) -> AppError {
    let errors = e
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| {
            errs.iter().map(move |err| FieldError {
                field: field.to_string(),
                message: err
                    .message
                    .as_ref()
                    .map(|m| m.to_string())
                    .unwrap_or_else(|| err.code.to_string()),
            })
        })
        .collect();

    AppError::validation("Request validation failed").with_field_errors(errors)
}
