//! Provider metadata types
//!
//! Describes a registered vendor and the capabilities its adapter declares.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Wire protocol family a vendor speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ProviderProtocol {
    /// JSON REST API with a product catalog
    CatalogRest,
    /// XML exchange over mutual TLS
    SignedXml,
    /// Query-string signed GET requests
    SignedUrl,
}

/// Metadata about a vendor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ProviderDescriptor {
    /// Routing id used by the catalog
    pub id: String,
    /// Human-readable vendor name
    pub name: String,
    pub protocol: ProviderProtocol,
    pub supports_catalog: bool,
    pub supports_cancel: bool,
    /// Whether pooled keys may be issued when the vendor is unavailable
    pub supports_pool: bool,
}

impl ProviderDescriptor {
    /// Create a descriptor with every capability switched off
    pub fn minimal(id: &str, name: &str, protocol: ProviderProtocol) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            protocol,
            supports_catalog: false,
            supports_cancel: false,
            supports_pool: false,
        }
    }

    pub fn with_catalog(mut self) -> Self {
        self.supports_catalog = true;
        self
    }

    pub fn with_cancel(mut self) -> Self {
        self.supports_cancel = true;
        self
    }

    pub fn with_pool(mut self) -> Self {
        self.supports_pool = true;
        self
    }
}
