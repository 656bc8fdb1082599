//! Provider adapter contract
//!
//! Defines the interface every vendor integration implements, plus the
//! request/response types the orchestrator exchanges with it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::providers::ProviderDescriptor;

/// Vendor-side error types for structured error handling
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Non-success HTTP status from the vendor
    Http { status: u16, body: Option<String> },
    /// Connectivity failure or timeout
    Network { details: String, timeout: bool },
    /// Response could not be decoded or lacks required data
    MalformedResponse { details: String },
    /// Vendor answered but refused the operation
    Rejected { code: String, message: String },
    /// Adapter does not implement the operation
    Unsupported { operation: &'static str },
    /// Adapter cannot be built or used with the given settings
    Configuration { details: String },
}

impl ProviderError {
    pub fn malformed<S: Into<String>>(details: S) -> Self {
        ProviderError::MalformedResponse {
            details: details.into(),
        }
    }

    pub fn rejected<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        ProviderError::Rejected {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(details: S) -> Self {
        ProviderError::Configuration {
            details: details.into(),
        }
    }

    pub fn is_unsupported(&self) -> bool {
        matches!(self, ProviderError::Unsupported { .. })
    }

    /// Short label used as a metrics dimension.
    pub fn label(&self) -> &'static str {
        match self {
            ProviderError::Http { .. } => "http",
            ProviderError::Network { timeout: true, .. } => "timeout",
            ProviderError::Network { .. } => "network",
            ProviderError::MalformedResponse { .. } => "malformed",
            ProviderError::Rejected { .. } => "rejected",
            ProviderError::Unsupported { .. } => "unsupported",
            ProviderError::Configuration { .. } => "configuration",
        }
    }

    /// Passes 2xx responses through and turns anything else into [`ProviderError::Http`].
    pub async fn check_status(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ProviderError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.ok().filter(|b| !b.is_empty());
        Err(ProviderError::Http {
            status: status.as_u16(),
            body,
        })
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Http { status, body } => {
                write!(
                    f,
                    "HTTP error {}: {}",
                    status,
                    body.as_deref().unwrap_or("No body")
                )
            }
            ProviderError::Network { details, timeout } => {
                if *timeout {
                    write!(f, "Network timeout: {}", details)
                } else {
                    write!(f, "Network error: {}", details)
                }
            }
            ProviderError::MalformedResponse { details } => {
                write!(f, "Malformed response: {}", details)
            }
            ProviderError::Rejected { code, message } => {
                write!(f, "Rejected by vendor ({}): {}", code, message)
            }
            ProviderError::Unsupported { operation } => {
                write!(f, "Operation '{}' is not supported", operation)
            }
            ProviderError::Configuration { details } => {
                write!(f, "Configuration error: {}", details)
            }
        }
    }
}

impl std::error::Error for ProviderError {}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            return ProviderError::malformed(error.to_string());
        }
        if let Some(status) = error.status() {
            return ProviderError::Http {
                status: status.as_u16(),
                body: None,
            };
        }
        ProviderError::Network {
            details: error.to_string(),
            timeout: error.is_timeout(),
        }
    }
}

/// Order placement input, assembled from the catalog routing and the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderRequest {
    pub provider_id: String,
    pub product_id: String,
    pub provider_product_id: Option<String>,
    pub provider_external_product_id: Option<String>,
    pub promotion_key: Option<String>,
    /// Normalized digits
    pub customer_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderResponse {
    pub value: String,
    /// Vendor order number, when the vendor issues one
    pub order_id: Option<String>,
    /// Correlation id needed to cancel the order later
    pub transaction_id: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelRequest {
    /// Transaction id returned by `create_order`
    pub transaction_id: String,
    pub product_id: String,
    pub provider_product_id: Option<String>,
    pub customer_phone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CancelResponse {
    pub success: bool,
    pub transaction_id: Option<String>,
}

/// One sellable item in a vendor catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CatalogEntry {
    pub provider_product_id: String,
    pub external_product_id: String,
    pub name: String,
    pub description: String,
}

/// What happens to the local key after a confirmed vendor cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelPolicy {
    /// Keep the row with status `cancelled`
    MarkCancelled,
    /// Delete the row so the same value can be issued again
    Remove,
}

/// Vendor integration interface.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    /// Places an order and returns the issued key.
    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ProviderError>;

    /// Reverses a previous order.
    async fn cancel_order(&self, _request: &CancelRequest) -> Result<CancelResponse, ProviderError> {
        Err(ProviderError::Unsupported {
            operation: "cancel_order",
        })
    }

    /// Lists the products the vendor can issue.
    async fn list_catalog(&self) -> Result<Vec<CatalogEntry>, ProviderError> {
        Err(ProviderError::Unsupported {
            operation: "list_catalog",
        })
    }

    /// Whether pre-provisioned keys may stand in when the vendor fails.
    fn supports_pool(&self) -> bool {
        self.descriptor().supports_pool
    }

    fn cancel_policy(&self) -> CancelPolicy {
        CancelPolicy::MarkCancelled
    }
}
