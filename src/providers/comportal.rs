//! Comportal adapter
//!
//! Catalog-first JSON REST vendor. Every order looks the product up in the
//! vendor catalog first, because the order body must echo catalog fields
//! (vendor name, license type) back to the vendor.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ComportalConfig;
use crate::providers::{
    COMPORTAL_PROVIDER_ID, CatalogEntry, OrderRequest, OrderResponse, ProviderAdapter,
    ProviderDescriptor, ProviderError, ProviderProtocol,
};

/// Default timeout for Comportal calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

const CATALOG_PATH: &str = "api/Catalog/Products";
const ORDER_PATH: &str = "api/Order";
const ORDER_COUNT: &str = "1";
const ELECTRONIC_DELIVERY: &str = "2";

#[derive(Debug, Clone, Deserialize)]
struct CatalogProduct {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    sku: String,
    #[serde(default)]
    license_type: String,
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CatalogResponse {
    #[serde(default)]
    data: Vec<CatalogProduct>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OrderBody<'a> {
    sku: &'a str,
    vendor: &'a str,
    product_code: String,
    license_type: &'a str,
    count: &'static str,
    way_of_getting_document: &'static str,
    ptid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    promotion_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    data: OrderData,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OrderData {
    #[serde(default)]
    order_number: String,
    #[serde(default)]
    ptid: String,
    #[serde(default)]
    keys: Vec<OrderKey>,
}

#[derive(Debug, Default, Deserialize)]
struct OrderKey {
    #[serde(default)]
    tokens: Vec<String>,
    #[serde(default)]
    links: Vec<String>,
}

/// Comportal adapter
pub struct ComportalAdapter {
    descriptor: ProviderDescriptor,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    source: Option<String>,
    http_client: Client,
}

impl ComportalAdapter {
    pub fn new(config: &ComportalConfig) -> Result<Self, ProviderError> {
        let timeout = if config.timeout_secs == 0 {
            DEFAULT_HTTP_TIMEOUT_SECS
        } else {
            config.timeout_secs
        };
        let http_client = Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
            .map_err(|e| ProviderError::configuration(format!("HTTP client: {e}")))?;

        Ok(Self {
            descriptor: ProviderDescriptor::minimal(
                COMPORTAL_PROVIDER_ID,
                "Comportal",
                ProviderProtocol::CatalogRest,
            )
            .with_catalog()
            .with_pool(),
            base_url: format!("{}/", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
            source: config.source.clone(),
            http_client,
        })
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = match &self.source {
            Some(source) => request.header("Source", source),
            None => request,
        };
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn fetch_catalog(&self) -> Result<Vec<CatalogProduct>, ProviderError> {
        let url = format!("{}{}", self.base_url, CATALOG_PATH);
        debug!(url = %url, "Fetching Comportal catalog");

        let response = self
            .authorized(self.http_client.get(&url))
            .query(&[("imagesDisable", "true")])
            .send()
            .await?;
        let response = ProviderError::check_status(response).await?;
        let catalog: CatalogResponse = response.json().await?;
        Ok(catalog.data)
    }

    fn decode_order(data: OrderData) -> Result<OrderResponse, ProviderError> {
        let key = data.keys.into_iter().next().unwrap_or_default();
        let value = key
            .tokens
            .into_iter()
            .find(|token| !token.trim().is_empty())
            .ok_or_else(|| ProviderError::malformed("order response carries no key token"))?;
        let link = key.links.into_iter().find(|link| !link.trim().is_empty());

        Ok(OrderResponse {
            value,
            order_id: Some(data.order_number).filter(|id| !id.is_empty()),
            transaction_id: data.ptid,
            link,
        })
    }
}

#[async_trait]
impl ProviderAdapter for ComportalAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ProviderError> {
        let sku = request
            .provider_external_product_id
            .as_deref()
            .unwrap_or(request.product_id.as_str());

        let catalog = self.fetch_catalog().await?;
        let product = catalog
            .into_iter()
            .find(|product| product.sku == sku)
            .ok_or_else(|| {
                ProviderError::rejected("sku_not_in_catalog", format!("SKU '{sku}' is not in the catalog"))
            })?;

        let ptid = Uuid::new_v4().to_string();
        let body = OrderBody {
            sku,
            vendor: &product.name,
            product_code: request
                .provider_product_id
                .clone()
                .unwrap_or_else(|| product.code.to_string()),
            license_type: &product.license_type,
            count: ORDER_COUNT,
            way_of_getting_document: ELECTRONIC_DELIVERY,
            ptid: ptid.clone(),
            promotion_key: request.promotion_key.as_deref(),
        };

        info!(sku = %sku, ptid = %ptid, "Placing Comportal order");
        let response = self
            .authorized(self.http_client.post(format!("{}{}", self.base_url, ORDER_PATH)))
            .json(&body)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            warn!(sku = %sku, "Comportal order endpoint returned 404");
        }
        let response = ProviderError::check_status(response).await?;
        let envelope: OrderEnvelope = response.json().await?;

        let mut order = Self::decode_order(envelope.data)?;
        if order.transaction_id.is_empty() {
            order.transaction_id = ptid;
        }
        Ok(order)
    }

    async fn list_catalog(&self) -> Result<Vec<CatalogEntry>, ProviderError> {
        Ok(self
            .fetch_catalog()
            .await?
            .into_iter()
            .map(|product| CatalogEntry {
                provider_product_id: product.code.to_string(),
                external_product_id: product.sku,
                name: product.name,
                description: product.license_type,
            })
            .collect())
    }
}
