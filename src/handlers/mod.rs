//! # API Handlers
//!
//! HTTP endpoint handlers for the keyhub API. Handlers only translate between
//! HTTP and the [`KeyOrchestrator`](crate::orchestrator::KeyOrchestrator).

pub mod keys;
pub mod products;
pub mod providers;

use axum::{extract::State, response::Json};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::db;
use crate::error::{ApiError, ErrorKind};
use crate::models::ServiceInfo;
use crate::server::AppState;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthStatus {
    pub status: String,
}

/// Liveness probe that also checks the database
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is healthy", body = HealthStatus),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<HealthStatus>, ApiError> {
    db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "Health check failed");
        ApiError::new(
            ErrorKind::UpstreamUnavailable,
            "database_unavailable",
            "database is unreachable",
        )
    })?;

    Ok(Json(HealthStatus {
        status: "ok".to_string(),
    }))
}
