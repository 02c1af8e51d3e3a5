//! Health and readiness probes.

use axum::{extract::State, http::StatusCode, Json};
use diesel::prelude::*;
use serde::Serialize;
use utoipa::ToSchema;

use crate::scheduler;
use crate::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    #[schema(example = "healthy")]
    pub status: String,
    #[schema(example = "maidflow")]
    pub service: String,
    #[schema(example = "0.1.0")]
    pub version: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessResponse {
    #[schema(example = "ready")]
    pub status: String,
    pub checks: ReadinessChecks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReadinessChecks {
    pub database: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jobs: Option<JobsStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ComponentStatus {
    #[schema(example = "up")]
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct JobsStatus {
    #[schema(example = "ok")]
    pub status: String,
    pub stale: Vec<String>,
}

impl ComponentStatus {
    pub fn up(latency_ms: u64) -> Self {
        Self {
            status: "up".to_string(),
            latency_ms: Some(latency_ms),
            error: None,
        }
    }

    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: "down".to_string(),
            latency_ms: None,
            error: Some(error.into()),
        }
    }
}

/// Liveness: the process answers.
pub async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "maidflow".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness: database reachable and, in strict-heartbeat mode, every
/// required job beating within its TTL.
pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<ReadinessResponse>) {
    let started = std::time::Instant::now();

    let database = match state.db_pool.get() {
        Ok(mut conn) => match diesel::sql_query("SELECT 1").execute(&mut conn) {
            Ok(_) => ComponentStatus::up(started.elapsed().as_millis() as u64),
            Err(e) => ComponentStatus::down(e.to_string()),
        },
        Err(e) => ComponentStatus::down(e.to_string()),
    };

    let mut healthy = database.status == "up";

    let jobs = if state.config.jobs.heartbeat_required {
        match state.db_pool.get() {
            Ok(mut conn) => {
                match scheduler::heartbeat_status(&mut conn, state.config.jobs.heartbeat_ttl_secs) {
                    Ok((_, stale)) => {
                        let ok = stale.is_empty();
                        healthy = healthy && ok;
                        Some(JobsStatus {
                            status: if ok { "ok" } else { "stale" }.to_string(),
                            stale,
                        })
                    }
                    Err(_) => {
                        healthy = false;
                        Some(JobsStatus {
                            status: "unknown".to_string(),
                            stale: Vec::new(),
                        })
                    }
                }
            }
            Err(_) => {
                healthy = false;
                None
            }
        }
    } else {
        None
    };

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(ReadinessResponse {
            status: if healthy { "ready" } else { "not_ready" }.to_string(),
            checks: ReadinessChecks { database, jobs },
        }),
    )
}
