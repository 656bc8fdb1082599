//! # Keys API Handlers
//!
//! List, load, get, activate and cancel keys.

use axum::{
    extract::{
        Path, Query, State,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    response::Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::error::{ApiError, ServiceError, codes};
use crate::models::key::{Activation, KeyStatus, KeyView};
use crate::orchestrator::{ActivateRequest, Cancellation, KeyListing};
use crate::repositories::{KeyFilter, PageRequest, SortSpec};
use crate::server::AppState;
use crate::service::KeyImport;

/// Page size used when the caller does not send one
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Query parameters for listing keys
#[derive(Debug, Default, Deserialize, IntoParams, ToSchema)]
pub struct ListKeysQuery {
    pub provider_id: Option<String>,
    pub product_id: Option<String>,
    /// One of `new`, `activated`, `cancelled`
    pub status: Option<String>,
    pub order_id: Option<String>,
    /// Zero-based page number (default: 0)
    pub page: Option<u64>,
    /// Items per page (default: 100)
    pub page_size: Option<u64>,
    /// Comma-separated sort fields, `-` prefix for descending (e.g. `-created_at`)
    pub sort: Option<String>,
    #[serde(default)]
    pub with_total_count: bool,
    #[serde(default)]
    pub only_count: bool,
}

impl ListKeysQuery {
    fn status(&self) -> Result<Option<KeyStatus>, ServiceError> {
        let Some(raw) = self.status.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        KeyStatus::parse(raw).map(Some).ok_or_else(|| {
            ServiceError::validation(codes::INVALID_REQUEST, format!("unknown status '{raw}'"))
                .with_field("status", raw)
        })
    }

    fn sort(&self) -> Vec<SortSpec> {
        self.sort
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .filter_map(SortSpec::parse)
            .collect()
    }
}

/// One key to import
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct LoadKeyItem {
    pub product_id: String,
    pub value: String,
    pub provider_id: Option<String>,
    pub provider_product_id: Option<String>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoadKeysRequest {
    pub items: Vec<LoadKeyItem>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoadKeysResponse {
    /// Stored keys, in request order
    pub items: Vec<KeyView>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct CancelKeyRequest {
    pub order_id: String,
}

/// List keys
#[utoipa::path(
    get,
    path = "/keys",
    params(ListKeysQuery),
    responses(
        (status = 200, description = "Page of keys", body = KeyListing),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn list_keys(
    State(state): State<AppState>,
    query: Result<Query<ListKeysQuery>, QueryRejection>,
) -> Result<Json<KeyListing>, ApiError> {
    let Query(query) = query?;

    let filter = KeyFilter {
        provider_id: query.provider_id.clone(),
        product_id: query.product_id.clone(),
        status: query.status()?,
        order_id: query.order_id.clone(),
    };
    let page = PageRequest {
        page: query.page.unwrap_or(0),
        page_size: query.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
        with_total_count: query.with_total_count,
        only_count: query.only_count,
    };

    let listing = state.orchestrator.list(filter, page, query.sort()).await?;
    Ok(Json(listing))
}

/// Bulk-import pre-provisioned keys
#[utoipa::path(
    post,
    path = "/keys/load",
    request_body = LoadKeysRequest,
    responses(
        (status = 200, description = "Stored keys", body = LoadKeysResponse),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 500, description = "Internal server error", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn load_keys(
    State(state): State<AppState>,
    payload: Result<Json<LoadKeysRequest>, JsonRejection>,
) -> Result<Json<LoadKeysResponse>, ApiError> {
    let Json(request) = payload?;

    let imports = request
        .items
        .into_iter()
        .map(|item| KeyImport {
            product_id: item.product_id,
            value: item.value,
            provider_id: item.provider_id,
            provider_product_id: item.provider_product_id,
        })
        .collect();

    let items = state.orchestrator.load(imports).await?;
    Ok(Json(LoadKeysResponse { items }))
}

/// Get a key by id
#[utoipa::path(
    get,
    path = "/keys/{id}",
    params(("id" = String, Path, description = "Key id")),
    responses(
        (status = 200, description = "Key", body = KeyView),
        (status = 404, description = "Key not found", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn get_key(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<KeyView>, ApiError> {
    let Path(id) = id?;
    Ok(Json(state.orchestrator.get(&id).await?))
}

/// Issue a key for an order
///
/// The response is the only place a key value is returned.
#[utoipa::path(
    post,
    path = "/keys/activate",
    request_body = ActivateRequest,
    responses(
        (status = 200, description = "Activated key", body = Activation),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "Unknown product, vendor or empty pool", body = ApiError),
        (status = 409, description = "Key already activated", body = ApiError),
        (status = 503, description = "Vendor or catalog unavailable", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn activate_key(
    State(state): State<AppState>,
    payload: Result<Json<ActivateRequest>, JsonRejection>,
) -> Result<Json<Activation>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.activate(request).await?))
}

/// Cancel the key issued for an order
#[utoipa::path(
    post,
    path = "/keys/cancel",
    request_body = CancelKeyRequest,
    responses(
        (status = 200, description = "Key cancelled", body = Cancellation),
        (status = 400, description = "Validation error", body = ApiError),
        (status = 404, description = "No key for the order", body = ApiError),
        (status = 409, description = "Key already cancelled", body = ApiError),
        (status = 501, description = "Vendor cannot cancel", body = ApiError),
        (status = 503, description = "Vendor unavailable", body = ApiError)
    ),
    tag = "keys"
)]
pub async fn cancel_key(
    State(state): State<AppState>,
    payload: Result<Json<CancelKeyRequest>, JsonRejection>,
) -> Result<Json<Cancellation>, ApiError> {
    let Json(request) = payload?;
    Ok(Json(state.orchestrator.cancel(&request.order_id).await?))
}
