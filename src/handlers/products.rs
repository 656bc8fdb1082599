//! # Products API Handlers

use axum::{
    extract::{Path, State, rejection::PathRejection},
    response::Json,
};

use crate::catalog::ProductRouting;
use crate::error::ApiError;
use crate::server::AppState;

/// Vendor routing for a catalog product
#[utoipa::path(
    get,
    path = "/products/{id}/routing",
    params(("id" = String, Path, description = "Catalog product id")),
    responses(
        (status = 200, description = "Product routing", body = ProductRouting),
        (status = 404, description = "Product unknown or not routed to a vendor", body = ApiError),
        (status = 503, description = "Catalog lookup unavailable", body = ApiError)
    ),
    tag = "products"
)]
pub async fn product_routing(
    State(state): State<AppState>,
    id: Result<Path<String>, PathRejection>,
) -> Result<Json<ProductRouting>, ApiError> {
    let Path(product_id) = id?;
    Ok(Json(state.orchestrator.routing(&product_id).await?))
}
