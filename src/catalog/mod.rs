//! Catalog lookup
//!
//! Resolves a catalog product id into the vendor routing needed to issue a
//! key for it. The master-data service is reached through [`MdmClient`];
//! [`StaticCatalog`] serves fixed routing for local runs and tests.

pub mod mdm;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::error::{ServiceError, codes};

pub use mdm::MdmClient;

/// Vendor routing for one catalog product
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProductRouting {
    pub product_id: String,
    pub provider_id: String,
    /// Vendor product number / service id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_product_id: Option<String>,
    /// Vendor SKU, when it differs from the catalog id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_external_product_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub promotion_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("invalid catalog lookup: {0}")]
    Validation(String),
    #[error("catalog lookup unavailable: {0}")]
    Unavailable(String),
}

impl From<CatalogError> for ServiceError {
    fn from(error: CatalogError) -> Self {
        match error {
            CatalogError::Validation(message) => {
                ServiceError::validation(codes::PRODUCT_ID_REQUIRED, message)
            }
            CatalogError::Unavailable(message) => {
                tracing::warn!(error = %message, "Catalog lookup failed");
                ServiceError::upstream_unavailable(
                    codes::MDM_NOT_AVAILABLE,
                    "catalog lookup is unavailable",
                )
            }
        }
    }
}

#[async_trait]
pub trait CatalogLookup: Send + Sync {
    /// Routing for `product_id`, or `None` when the product is unknown or has
    /// no vendor assigned.
    async fn find_product(&self, product_id: &str) -> Result<Option<ProductRouting>, CatalogError>;
}

/// In-memory catalog keyed by product id.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    products: HashMap<String, ProductRouting>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_product(mut self, routing: ProductRouting) -> Self {
        self.products.insert(routing.product_id.clone(), routing);
        self
    }
}

#[async_trait]
impl CatalogLookup for StaticCatalog {
    async fn find_product(&self, product_id: &str) -> Result<Option<ProductRouting>, CatalogError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(CatalogError::Validation("product_id is required".to_string()));
        }
        Ok(self
            .products
            .get(product_id)
            .filter(|routing| !routing.provider_id.trim().is_empty())
            .cloned())
    }
}
