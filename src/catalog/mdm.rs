//! Master-data (MDM) catalog client
//!
//! Reads product documents from the MDM search index:
//! `GET {base}product/_doc/{id}` with a bearer token.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::catalog::{CatalogError, CatalogLookup, ProductRouting};

/// Default timeout for MDM calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

#[derive(Debug, Default, Deserialize)]
struct ProductDocument {
    #[serde(rename = "_id", default)]
    id: String,
    #[serde(default = "default_found")]
    found: bool,
    #[serde(rename = "_source", default)]
    source: Option<ProductSource>,
}

fn default_found() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ProductSource {
    #[serde(default)]
    provider: Option<ProviderRouting>,
}

#[derive(Debug, Default, Deserialize)]
struct ProviderRouting {
    #[serde(default)]
    external_number: String,
    #[serde(default)]
    provider_id: String,
    #[serde(default)]
    external_id: i64,
    #[serde(default)]
    promotion_key: String,
}

fn non_empty(value: String) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// HTTP client for the MDM product index
#[derive(Clone)]
pub struct MdmClient {
    base_url: String,
    token: Option<String>,
    http_client: Client,
}

impl MdmClient {
    pub fn new(base_url: &str, token: Option<String>, timeout_secs: u64) -> Result<Self, CatalogError> {
        let timeout = if timeout_secs == 0 {
            DEFAULT_HTTP_TIMEOUT_SECS
        } else {
            timeout_secs
        };
        let base_url = Url::parse(base_url.trim())
            .map_err(|e| CatalogError::Unavailable(format!("invalid MDM url '{base_url}': {e}")))?;
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| CatalogError::Unavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: format!("{}/", base_url.as_str().trim_end_matches('/')),
            token: token.filter(|t| !t.is_empty()),
            http_client,
        })
    }

    fn decode(product_id: &str, document: ProductDocument) -> Option<ProductRouting> {
        if !document.found || (!document.id.is_empty() && document.id != product_id) {
            return None;
        }
        let provider = document.source?.provider?;
        let provider_id = non_empty(provider.provider_id)?;

        Some(ProductRouting {
            product_id: product_id.to_string(),
            provider_id,
            provider_product_id: (provider.external_id != 0).then(|| provider.external_id.to_string()),
            provider_external_product_id: non_empty(provider.external_number),
            promotion_key: non_empty(provider.promotion_key),
        })
    }
}

#[async_trait]
impl CatalogLookup for MdmClient {
    async fn find_product(&self, product_id: &str) -> Result<Option<ProductRouting>, CatalogError> {
        let product_id = product_id.trim();
        if product_id.is_empty() {
            return Err(CatalogError::Validation("product_id is required".to_string()));
        }

        let url = format!("{}product/_doc/{}", self.base_url, product_id);
        debug!(product_id = %product_id, "Looking up product routing");

        let mut request = self.http_client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request
            .send()
            .await
            .map_err(|e| CatalogError::Unavailable(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            status if !status.is_success() => {
                return Err(CatalogError::Unavailable(format!("MDM returned HTTP {status}")));
            }
            _ => {}
        }

        let document: ProductDocument = response
            .json()
            .await
            .map_err(|e| CatalogError::Unavailable(format!("decoding MDM document: {e}")))?;
        Ok(Self::decode(product_id, document))
    }
}
