//! Maidflow - multi-tenant backend for a residential cleaning business.

pub mod auth;
pub mod authz;
pub mod chat;
pub mod config;
pub mod db;
pub mod domain;
pub mod email;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod netutil;
pub mod openapi;
pub mod outbox;
pub mod pagination;
pub mod payments;
pub mod pricing;
pub mod scheduler;
pub mod schema;
pub mod storage;
pub mod telemetry;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware as axum_middleware,
    routing::{delete, get, post, put},
    Router,
};
use deadpool_redis::{Config as RedisPoolConfig, Pool as RedisPool, Runtime};
use diesel::r2d2::{self, ConnectionManager};
use diesel::PgConnection;
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    timeout::TimeoutLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

use auth::jwt::JwtConfig;
use email::EmailSender;
use middleware::{
    idempotency::idempotency_middleware,
    metrics::metrics_middleware,
    rate_limit::{
        auth_rate_limit_middleware, rate_limit_middleware, RateLimitConfig, RateLimitState,
    },
    request_id::request_id_middleware,
    safety::admin_safety_middleware,
    tenant::{require_tenant_middleware, tenant_context_middleware},
};
use outbox::{dispatch::Dispatcher, BackoffPolicy};
use payments::PaymentClient;
use pricing::{PricingConfig, PricingEngine};
use storage::StorageGateway;
use telemetry::MetricsState;

pub use config::Config;
pub use telemetry::tracing::shutdown_telemetry;

pub type DbPool = r2d2::Pool<ConnectionManager<PgConnection>>;

#[derive(Clone)]
pub struct AppState {
    pub db_pool: DbPool,
    pub config: Arc<Config>,
    pub jwt_config: Arc<JwtConfig>,
    pub rate_limit: RateLimitState,
    pub metrics: MetricsState,
    pub storage: StorageGateway,
    pub pricing: PricingEngine,
    pub payments: PaymentClient,
    pub redis_pool: Option<RedisPool>,
    pub email: EmailSender,
}

impl AppState {
    pub async fn new(db_pool: DbPool, config: Config) -> Self {
        let redis_pool = create_redis_pool(&config.redis);

        let rate_limit = if config.rate_limit.enabled {
            RateLimitState::with_config(
                RateLimitConfig::new(config.rate_limit.requests_per_minute, 60),
                RateLimitConfig::new(config.rate_limit.auth_requests_per_minute, 60),
                if config.rate_limit.shared_store {
                    redis_pool.clone()
                } else {
                    None
                },
                &config.rate_limit.trusted_proxy_cidrs,
            )
        } else {
            RateLimitState::disabled()
        };

        let jwt_config = JwtConfig::from_env(
            config.auth.access_token_expiry_secs,
            config.auth.jwt_issuer.clone(),
        );

        let metrics = MetricsState::new(
            config.telemetry.metrics_enabled,
            config.telemetry.metrics_token.clone(),
        );

        let storage = StorageGateway::from_config(&config)
            .await
            .expect("Storage backend initialization failed");

        let payments = PaymentClient::from_config(&config.payments, &config.server.public_base_url);
        let email = EmailSender::from_config(&config.email).expect("Email backend initialization failed");

        Self {
            db_pool,
            jwt_config: Arc::new(jwt_config),
            rate_limit,
            metrics,
            storage,
            pricing: PricingEngine::new(PricingConfig::default()),
            payments,
            redis_pool,
            email,
            config: Arc::new(config),
        }
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            base_secs: self.config.jobs.outbox_backoff_base_secs,
            cap_secs: self.config.jobs.outbox_backoff_cap_secs,
            max_attempts: self.config.jobs.outbox_max_attempts,
        }
    }

    pub fn dispatcher(&self) -> Dispatcher {
        Dispatcher::new(
            self.email.clone(),
            self.storage.clone(),
            self.redis_pool.clone(),
            self.config.export.clone(),
            self.backoff_policy(),
        )
    }
}

pub fn create_redis_pool(config: &config::RedisConfig) -> Option<RedisPool> {
    let url = config.url.as_ref()?;

    let timeout = Duration::from_secs(config.connection_timeout_secs);
    let cfg = RedisPoolConfig::from_url(url);
    let pool = cfg.builder().ok().and_then(|b| {
        b.max_size(config.pool_size)
            .wait_timeout(Some(timeout))
            .create_timeout(Some(timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .ok()
    });

    if pool.is_some() {
        info!(redis_url = %url.split('@').next_back().unwrap_or("***"), "Redis pool created");
    }

    pool
}

pub fn create_router(state: AppState, config: &Config) -> Router {
    let cors = build_cors_layer(config);
    let body_limit = RequestBodyLimitLayer::new(config.server.max_body_size);

    #[allow(deprecated)]
    let timeout = TimeoutLayer::new(Duration::from_secs(config.server.request_timeout_secs));

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
        .on_request(DefaultOnRequest::new().level(Level::INFO))
        .on_response(DefaultOnResponse::new().level(Level::INFO));

    let rate_limit_state = state.rate_limit.clone();
    let metrics_state = state.metrics.clone();

    let probes = Router::new()
        .route("/healthz", get(handlers::health::healthz))
        .route("/readyz", get(handlers::health::readyz))
        .route(
            "/metrics",
            get(telemetry::metrics::metrics_handler).with_state(metrics_state),
        )
        .with_state(state.clone());

    let public_routes = Router::new()
        .route("/v1/estimate", post(handlers::public::estimate))
        .route("/v1/chat/turn", post(handlers::public::chat_turn))
        .route("/v1/leads", post(handlers::public::create_lead))
        .route("/v1/slots", get(handlers::public::slots))
        .route("/v1/bookings", post(handlers::public::create_booking))
        .route("/v1/stripe/webhook", post(handlers::public::payment_webhook))
        .route("/v1/files/{*key}", get(handlers::public::serve_file))
        .route("/v1/photos/{token}", get(handlers::public::photo_download))
        .route("/v1/checkout/{session_id}", get(handlers::public::checkout_placeholder))
        .route("/i/{token}", get(handlers::public::public_invoice))
        .route(
            "/i/{token}/signed_url",
            get(handlers::public::public_invoice_signed_url),
        )
        .with_state(state.clone());

    let auth_routes = Router::new()
        .route("/v1/auth/login", post(handlers::auth::login))
        .route("/v1/auth/refresh", post(handlers::auth::refresh))
        .layer(axum_middleware::from_fn(auth_rate_limit_middleware))
        .with_state(state.clone());

    let session_routes = Router::new()
        .route("/v1/auth/logout", post(handlers::auth::logout))
        .route("/v1/auth/me", get(handlers::auth::me))
        .route("/v1/auth/change-password", post(handlers::auth::change_password))
        .layer(axum_middleware::from_fn(require_tenant_middleware))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/v1/admin/leads", get(handlers::admin::list_leads))
        .route("/v1/admin/leads/{lead_id}", get(handlers::admin::get_lead))
        .route(
            "/v1/admin/leads/{lead_id}/status",
            put(handlers::admin::set_lead_status),
        )
        .route(
            "/v1/admin/leads/{lead_id}/magic-link",
            post(handlers::admin::lead_magic_link),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/confirm",
            post(handlers::admin::confirm_booking),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/cancel",
            post(handlers::admin::cancel_booking),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/start",
            post(handlers::admin::start_booking),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/complete",
            post(handlers::admin::complete_booking),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/reschedule",
            post(handlers::admin::reschedule_booking),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/photos",
            get(handlers::admin::list_booking_photos),
        )
        .route(
            "/v1/admin/bookings/{booking_id}/invoice",
            post(handlers::admin::invoice_booking),
        )
        .route("/v1/admin/photos/{photo_id}", delete(handlers::admin::delete_photo))
        .route("/v1/admin/invoices", post(handlers::admin::create_invoice))
        .route("/v1/admin/invoices/{invoice_id}", get(handlers::admin::get_invoice))
        .route(
            "/v1/admin/invoices/{invoice_id}/send",
            post(handlers::admin::send_invoice),
        )
        .route(
            "/v1/admin/invoices/{invoice_id}/payments",
            post(handlers::admin::record_invoice_payment),
        )
        .route(
            "/v1/admin/invoices/{invoice_id}/void",
            post(handlers::admin::void_invoice),
        )
        .route(
            "/v1/admin/outbox/dead-letter",
            get(handlers::admin::list_dead_letters),
        )
        .route(
            "/v1/admin/outbox/dead-letter/{event_id}/replay",
            post(handlers::admin::replay_dead_letter),
        )
        .route(
            "/v1/admin/export-dead-letter",
            get(handlers::admin::list_dead_letters),
        )
        .route(
            "/v1/admin/export-dead-letter/{event_id}/replay",
            post(handlers::admin::replay_dead_letter),
        )
        .route("/v1/admin/jobs/status", get(handlers::admin::jobs_status))
        .route("/v1/admin/pricing/reload", post(handlers::admin::pricing_reload))
        .route("/v1/admin/feature-flags", get(handlers::admin::list_feature_flags))
        .route("/v1/admin/feature-flags", put(handlers::admin::set_feature_flag))
        .route(
            "/v1/admin/break-glass/start",
            post(handlers::admin::break_glass_start),
        )
        .route("/v1/admin/config", get(handlers::admin::config_snapshot))
        .route("/v1/admin/cleanup", post(handlers::admin::run_cleanup))
        .route(
            "/v1/admin/retention/cleanup",
            post(handlers::admin::run_retention_cleanup),
        )
        .route("/v1/admin/email-scan", post(handlers::admin::email_scan))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            idempotency_middleware,
        ))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            admin_safety_middleware,
        ))
        .layer(axum_middleware::from_fn(require_tenant_middleware))
        .with_state(state.clone());

    let iam_routes = Router::new()
        .route("/v1/iam/users", post(handlers::iam::invite_user))
        .route("/v1/iam/users", get(handlers::iam::list_users))
        .route("/v1/iam/users/{user_id}/reset", post(handlers::iam::reset_user))
        .route("/v1/iam/users/{user_id}/logout", post(handlers::iam::logout_user))
        .route(
            "/v1/iam/users/{user_id}/worker-token",
            post(handlers::iam::issue_worker_token),
        )
        .layer(axum_middleware::from_fn(require_tenant_middleware))
        .with_state(state.clone());

    let worker_routes = Router::new()
        .route("/v1/worker/jobs", get(handlers::worker::list_jobs))
        .route(
            "/v1/worker/bookings/{booking_id}/time-entries/start",
            post(handlers::worker::start_time_entry),
        )
        .route(
            "/v1/worker/time-entries/{entry_id}/stop",
            post(handlers::worker::stop_time_entry),
        )
        .route(
            "/v1/worker/bookings/{booking_id}/photos",
            post(handlers::worker::upload_photo),
        )
        .route("/v1/worker/photos/{photo_id}/url", get(handlers::worker::photo_url))
        .layer(axum_middleware::from_fn(require_tenant_middleware))
        .with_state(state.clone());

    let client_routes = Router::new()
        .route("/v1/client/bookings", get(handlers::client::list_bookings))
        .route(
            "/v1/client/bookings/{booking_id}/cancel",
            post(handlers::client::cancel_booking),
        )
        .route("/v1/client/photos/{photo_id}/url", get(handlers::client::photo_url))
        .layer(axum_middleware::from_fn(require_tenant_middleware))
        .with_state(state.clone());

    let docs_routes = openapi::swagger_router();

    Router::new()
        .merge(docs_routes)
        .merge(probes)
        .merge(public_routes)
        .merge(auth_routes)
        .merge(session_routes)
        .merge(admin_routes)
        .merge(iam_routes)
        .merge(worker_routes)
        .merge(client_routes)
        .fallback(fallback_handler)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            tenant_context_middleware,
        ))
        .layer(axum_middleware::from_fn(metrics_middleware))
        .layer(axum_middleware::from_fn(rate_limit_middleware))
        .layer(axum::Extension(rate_limit_state))
        .layer(axum_middleware::from_fn(request_id_middleware))
        .layer(trace_layer)
        .layer(timeout)
        .layer(body_limit)
        .layer(cors)
}

async fn fallback_handler() -> error::AppError {
    error::AppError::not_found("Route not found")
}

fn build_cors_layer(config: &Config) -> CorsLayer {
    use axum::http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE};
    use axum::http::Method;

    let methods = vec![
        Method::GET,
        Method::POST,
        Method::PUT,
        Method::PATCH,
        Method::DELETE,
        Method::OPTIONS,
    ];
    let headers = vec![
        CONTENT_TYPE,
        AUTHORIZATION,
        HeaderName::from_static("x-request-id"),
        HeaderName::from_static("idempotency-key"),
        HeaderName::from_static("x-worker-token"),
        HeaderName::from_static("x-client-token"),
    ];

    if config.cors.strict {
        let origins: Vec<_> = config
            .cors
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    } else {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers(headers)
            .max_age(Duration::from_secs(config.cors.max_age_secs))
    }
}

pub fn create_db_pool(config: &Config) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(&config.database.url);
    r2d2::Pool::builder()
        .max_size(config.database.max_connections)
        .min_idle(Some(config.database.min_connections))
        .connection_timeout(Duration::from_secs(config.database.connection_timeout_secs))
        .idle_timeout(Some(Duration::from_secs(config.database.idle_timeout_secs)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn create_db_pool_with_url(database_url: &str) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(10)
        .min_idle(Some(2))
        .connection_timeout(Duration::from_secs(30))
        .idle_timeout(Some(Duration::from_secs(600)))
        .build(manager)
        .expect("Failed to create database pool")
}

pub fn init_tracing(config: &Config) {
    telemetry::init_telemetry(config);
}
