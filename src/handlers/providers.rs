//! # Providers API Handlers
//!
//! Connected vendors and their catalogs.

use axum::{
    extract::{Path, State, rejection::PathRejection},
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::providers::{CatalogEntry, ProviderDescriptor};
use crate::server::AppState;

/// Response containing the connected vendors
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProvidersResponse {
    /// Registered vendors, sorted by name
    pub providers: Vec<ProviderDescriptor>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CatalogResponse {
    pub provider_id: String,
    pub items: Vec<CatalogEntry>,
}

/// List connected vendors
#[utoipa::path(
    get,
    path = "/providers",
    responses(
        (status = 200, description = "Connected vendors", body = ProvidersResponse, example = json!({
            "providers": [
                {
                    "id": "42eafc49-dd73-4ae8-9add-c0ffcd0a5a9e",
                    "name": "Comportal",
                    "protocol": "catalog_rest",
                    "supports_catalog": true,
                    "supports_cancel": true,
                    "supports_pool": true
                }
            ]
        }))
    ),
    tag = "providers"
)]
pub async fn list_providers(State(state): State<AppState>) -> Json<ProvidersResponse> {
    Json(ProvidersResponse {
        providers: state.orchestrator.providers(),
    })
}

/// List the products a vendor can issue
#[utoipa::path(
    get,
    path = "/providers/{id}/catalog",
    params(("id" = String, Path, description = "Vendor id")),
    responses(
        (status = 200, description = "Vendor catalog", body = CatalogResponse),
        (status = 404, description = "Vendor not connected", body = ApiError),
        (status = 501, description = "Vendor publishes no catalog", body = ApiError),
        (status = 503, description = "Vendor unavailable", body = ApiError)
    ),
    tag = "providers"
)]
pub async fn provider_catalog(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<CatalogResponse>, ApiError> {
    let Path(provider_id) = id?;
    let items = state.orchestrator.catalog(&provider_id).await?;
    Ok(Json(CatalogResponse { provider_id, items }))
}
