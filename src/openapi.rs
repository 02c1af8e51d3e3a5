//! OpenAPI documentation served via Swagger UI.

use axum::Router;
use utoipa::{
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers::auth::{
    ChangePasswordRequest, LoginRequest, MeResponse, RefreshRequest, SessionResponse,
};
use crate::handlers::iam::{InviteRequest, InviteResponse};
use crate::pagination::PaginationMeta;
use crate::pricing::{EstimateInputs, EstimateLine, EstimateSnapshot};

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Maidflow API",
        version = "1.0.0",
        description = "Multi-tenant backend for a residential cleaning business.\n\n\
        ## Surfaces\n\
        - Public funnel: estimate, chat, lead capture, slots, bookings\n\
        - Auth: JWT sessions with rotating refresh tokens\n\
        - Admin: leads, booking lifecycle, invoices, dead letters, operations\n\
        - Worker and client portals behind signed tokens\n\n\
        ## Authentication\n\
        Admin/IAM endpoints take a bearer access token (`POST /v1/auth/login`).\n\
        Admin writes additionally require an `Idempotency-Key` header.\n\
        Worker and client portals use `x-worker-token` / `x-client-token`.",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers((url = "/", description = "Current server")),
    tags(
        (name = "Public", description = "Unauthenticated funnel endpoints"),
        (name = "Auth", description = "Session lifecycle"),
        (name = "Admin", description = "Back-office operations"),
        (name = "IAM", description = "User management")
    ),
    paths(
        crate::handlers::auth::login,
        crate::handlers::auth::refresh,
        crate::handlers::auth::logout,
        crate::handlers::auth::me,
        crate::handlers::auth::change_password,
        crate::handlers::public::estimate,
        crate::handlers::public::chat_turn,
        crate::handlers::public::create_lead,
        crate::handlers::public::slots,
        crate::handlers::public::create_booking,
        crate::handlers::admin::list_leads,
        crate::handlers::admin::get_lead,
        crate::handlers::iam::invite_user,
    ),
    components(
        schemas(
            LoginRequest,
            RefreshRequest,
            SessionResponse,
            MeResponse,
            ChangePasswordRequest,
            InviteRequest,
            InviteResponse,
            EstimateInputs,
            EstimateSnapshot,
            EstimateLine,
            PaginationMeta,
            crate::chat::ChatState,
            crate::chat::ChatTurn,
            crate::handlers::public::ChatTurnRequest,
            crate::handlers::public::CreateLeadRequest,
            crate::handlers::public::CreateBookingRequest,
            crate::handlers::public::CreateBookingResponse,
            crate::handlers::public::SlotsResponse,
            crate::models::Lead,
            crate::models::Booking,
        )
    ),
    modifiers(&SecurityAddon)
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

pub fn swagger_router() -> Router {
    Router::new().merge(SwaggerUi::new("/swagger-ui").url("/api-doc/openapi.json", ApiDoc::openapi()))
}
