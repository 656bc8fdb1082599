//! Megogo adapter
//!
//! Subscriptions are toggled with signed GET requests. The signature is an
//! HMAC-SHA256 over the request path and parameters, hex encoded, then base64
//! encoded without padding and suffixed with the partner id.
//!
//! A subscription is bound to a phone number, so the "key" is the
//! phone + service pair and there is nothing to pre-provision.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::Deserialize;
use sha2::Sha256;
use tracing::info;
use uuid::Uuid;

use crate::config::MegogoConfig;
use crate::providers::{
    CancelPolicy, CancelRequest, CancelResponse, MEGOGO_PROVIDER_ID, OrderRequest, OrderResponse,
    ProviderAdapter, ProviderDescriptor, ProviderError, ProviderProtocol,
};

/// Default timeout for Megogo calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;

const SUBSCRIBE_PATH: &str = "/subscription/subscribe";
const UNSUBSCRIBE_PATH: &str = "/subscription/unsubscribe";

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct SubscriptionResponse {
    #[serde(default)]
    successful: bool,
}

/// Megogo adapter
pub struct MegogoAdapter {
    descriptor: ProviderDescriptor,
    base_url: String,
    partner_id: String,
    secret: String,
    http_client: Client,
}

impl MegogoAdapter {
    pub fn new(config: &MegogoConfig) -> Result<Self, ProviderError> {
        let partner_id = config
            .partner_id
            .clone()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ProviderError::configuration("KEYHUB_MEGOGO_PARTNER_ID is not set"))?;
        let secret = config
            .secret
            .clone()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ProviderError::configuration("KEYHUB_MEGOGO_SECRET is not set"))?;
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
                MEGOGO_PROVIDER_ID,
                "Megogo",
                ProviderProtocol::SignedUrl,
            )
            .with_cancel(),
            base_url: format!("{}/", config.url.trim_end_matches('/')),
            partner_id,
            secret,
            http_client,
        })
    }

    /// Computes the `sign` query parameter for a subscription call.
    pub fn sign(&self, path: &str, phone: &str, service_id: &str) -> Result<String, ProviderError> {
        let canonical = format!(
            "GET/terminals/{}{}phone={}serviceId={}",
            self.partner_id, path, phone, service_id
        );
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|e| ProviderError::configuration(format!("HMAC setup failed: {e}")))?;
        mac.update(canonical.as_bytes());
        let digest = hex::encode(mac.finalize().into_bytes());
        let encoded = STANDARD.encode(digest).replace('=', "");
        Ok(format!("{}_{}", encoded, self.partner_id))
    }

    async fn call(&self, path: &str, phone: &str, service_id: &str) -> Result<bool, ProviderError> {
        let sign = self.sign(path, phone, service_id)?;
        let url = format!("{}terminals/{}{}", self.base_url, self.partner_id, path);

        let response = self
            .http_client
            .get(&url)
            .query(&[("phone", phone), ("serviceId", service_id), ("sign", sign.as_str())])
            .send()
            .await?;
        let response = ProviderError::check_status(response).await?;
        let body: SubscriptionResponse = response.json().await?;

        info!(path = %path, service_id = %service_id, successful = body.successful, "Megogo subscription call completed");
        Ok(body.successful)
    }

    fn service_id(provider_product_id: Option<&str>) -> Result<&str, ProviderError> {
        provider_product_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| ProviderError::rejected("service_id_missing", "product has no Megogo service id"))
    }
}

#[async_trait]
impl ProviderAdapter for MegogoAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ProviderError> {
        let service_id = Self::service_id(request.provider_product_id.as_deref())?;

        if !self
            .call(SUBSCRIBE_PATH, &request.customer_phone, service_id)
            .await?
        {
            return Err(ProviderError::rejected(
                "unsuccessful",
                "subscription was not accepted",
            ));
        }

        Ok(OrderResponse {
            value: format!("{}{}", request.customer_phone, service_id),
            order_id: None,
            transaction_id: Uuid::new_v4().to_string(),
            link: None,
        })
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<CancelResponse, ProviderError> {
        let service_id = Self::service_id(request.provider_product_id.as_deref())?;
        let success = self
            .call(UNSUBSCRIBE_PATH, &request.customer_phone, service_id)
            .await?;

        Ok(CancelResponse {
            success,
            transaction_id: Some(request.transaction_id.clone()),
        })
    }

    fn cancel_policy(&self) -> CancelPolicy {
        CancelPolicy::Remove
    }
}
