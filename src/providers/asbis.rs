//! ASBIS adapter
//!
//! Single XML request/response exchange (`SoftRequest` / `SoftResponse`) over
//! mutual TLS. The client identity comes from a PKCS#12 bundle and the vendor
//! is validated against a dedicated CA.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Local;
use regex::Regex;
use reqwest::{Certificate, Client, Identity, RequestBuilder};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::config::AsbisConfig;
use crate::providers::{
    ASBIS_PROVIDER_ID, CancelRequest, CancelResponse, OrderRequest, OrderResponse,
    ProviderAdapter, ProviderDescriptor, ProviderError, ProviderProtocol,
};

/// Default timeout for ASBIS calls
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 8;

const REQUEST_PATH: &str = "api/esd/sb/req";
const SUCCESS_CODE: &str = "00000";
const INFO_KIND: &str = "0";
const SLIP_WIDTH: &str = "40";
const TERM_DATE_TIME_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("link pattern is valid"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionType {
    Sale,
    Cancel,
}

impl TransactionType {
    fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Sale => "sale",
            TransactionType::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename = "SoftRequest", rename_all = "PascalCase")]
struct SoftRequest<'a> {
    info_kind: &'static str,
    client_transaction_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    ref_client_transaction_id: Option<&'a str>,
    transaction_type: &'static str,
    werk_code: &'a str,
    term_number: &'a str,
    term_date_time: String,
    slip_width: &'static str,
    product_list: RequestProductList<'a>,
}

#[derive(Debug, Serialize)]
struct RequestProductList<'a> {
    #[serde(rename = "ProductItem")]
    items: Vec<RequestProductItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RequestProductItem<'a> {
    product_number: &'a str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SoftResponse {
    auth_code: String,
    error_code: String,
    error_text: String,
    product_list: Option<ResponseProductList>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseProductList {
    #[serde(rename = "ProductItem", default)]
    items: Vec<ResponseProductItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ResponseProductItem {
    infos: Option<Infos>,
    slip: Option<Slip>,
}

#[derive(Debug, Default, Deserialize)]
struct Infos {
    #[serde(rename = "Info", default)]
    info: Vec<Info>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Info {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
struct Slip {
    #[serde(rename = "Line", default)]
    lines: Vec<String>,
}

impl SoftResponse {
    fn is_success(&self) -> bool {
        self.error_code.trim() == SUCCESS_CODE
    }

    fn first_item(&self) -> Option<&ResponseProductItem> {
        self.product_list.as_ref().and_then(|list| list.items.first())
    }

    fn token(&self) -> Option<String> {
        self.first_item()?
            .infos
            .as_ref()?
            .info
            .iter()
            .map(|info| info.token.trim())
            .find(|token| !token.is_empty())
            .map(str::to_string)
    }

    fn link(&self) -> Option<String> {
        let slip = self.first_item()?.slip.as_ref()?;
        let receipt = slip.lines.join("\n");
        LINK_PATTERN.find(&receipt).map(|m| m.as_str().to_string())
    }
}

/// ASBIS adapter
pub struct AsbisAdapter {
    descriptor: ProviderDescriptor,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    werk_code: String,
    term_number: String,
    http_client: Client,
}

impl AsbisAdapter {
    /// Builds the adapter with the mutual-TLS client described by `config`.
    /// Both the client bundle and the CA are mandatory.
    pub fn new(config: &AsbisConfig) -> Result<Self, ProviderError> {
        if config.werk_code.trim().is_empty() || config.term_number.trim().is_empty() {
            return Err(ProviderError::configuration(
                "KEYHUB_ASBIS_WERK_CODE and KEYHUB_ASBIS_TERM_NUMBER are required",
            ));
        }
        if config.p12_path.is_none() || config.ca_path.is_none() {
            return Err(ProviderError::configuration(
                "KEYHUB_ASBIS_P12_PATH and KEYHUB_ASBIS_CA_PATH are required for mutual TLS",
            ));
        }
        let http_client = Self::build_http_client(config)?;
        Ok(Self::with_client(config, http_client))
    }

    /// Builds the adapter around a caller-supplied HTTP client.
    pub fn with_client(config: &AsbisConfig, http_client: Client) -> Self {
        Self {
            descriptor: ProviderDescriptor::minimal(
                ASBIS_PROVIDER_ID,
                "ASBIS",
                ProviderProtocol::SignedXml,
            )
            .with_cancel()
            .with_pool(),
            base_url: format!("{}/", config.url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
            werk_code: config.werk_code.clone(),
            term_number: config.term_number.clone(),
            http_client,
        }
    }

    fn build_http_client(config: &AsbisConfig) -> Result<Client, ProviderError> {
        let timeout = if config.timeout_secs == 0 {
            DEFAULT_HTTP_TIMEOUT_SECS
        } else {
            config.timeout_secs
        };
        let mut builder = Client::builder()
            .use_native_tls()
            .timeout(Duration::from_secs(timeout));

        if let Some(path) = &config.p12_path {
            let identity = load_identity(path, config.p12_password.as_deref().unwrap_or(""))?;
            builder = builder.identity(identity);
        }
        if let Some(path) = &config.ca_path {
            let pem = std::fs::read(path).map_err(|e| {
                ProviderError::configuration(format!("reading CA {}: {e}", path.display()))
            })?;
            let ca = Certificate::from_pem(&pem)
                .map_err(|e| ProviderError::configuration(format!("parsing CA: {e}")))?;
            builder = builder.add_root_certificate(ca);
        }

        builder
            .build()
            .map_err(|e| ProviderError::configuration(format!("HTTP client: {e}")))
    }

    fn build_request<'a>(
        &'a self,
        transaction_type: TransactionType,
        client_transaction_id: String,
        ref_client_transaction_id: Option<&'a str>,
        product_number: &'a str,
    ) -> SoftRequest<'a> {
        SoftRequest {
            info_kind: INFO_KIND,
            client_transaction_id,
            ref_client_transaction_id,
            transaction_type: transaction_type.as_str(),
            werk_code: &self.werk_code,
            term_number: &self.term_number,
            term_date_time: Local::now().format(TERM_DATE_TIME_FORMAT).to_string(),
            slip_width: SLIP_WIDTH,
            product_list: RequestProductList {
                items: vec![RequestProductItem { product_number }],
            },
        }
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(username) => request.basic_auth(username, self.password.as_deref()),
            None => request,
        }
    }

    async fn exchange(&self, request: &SoftRequest<'_>) -> Result<SoftResponse, ProviderError> {
        let body = quick_xml::se::to_string(request)
            .map_err(|e| ProviderError::configuration(format!("encoding SoftRequest: {e}")))?;

        let response = self
            .authorized(self.http_client.post(format!("{}{}", self.base_url, REQUEST_PATH)))
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(body)
            .send()
            .await?;
        let response = ProviderError::check_status(response).await?;
        let text = response.text().await?;

        quick_xml::de::from_str(&text)
            .map_err(|e| ProviderError::malformed(format!("decoding SoftResponse: {e}")))
    }

    fn product_number(provider_product_id: Option<&str>) -> Result<&str, ProviderError> {
        provider_product_id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                ProviderError::rejected("product_number_missing", "product has no ASBIS product number")
            })
    }
}

fn load_identity(path: &Path, password: &str) -> Result<Identity, ProviderError> {
    let der = Zeroizing::new(std::fs::read(path).map_err(|e| {
        ProviderError::configuration(format!("reading client certificate {}: {e}", path.display()))
    })?);
    Identity::from_pkcs12_der(&der, password)
        .map_err(|e| ProviderError::configuration(format!("parsing client certificate: {e}")))
}

#[async_trait]
impl ProviderAdapter for AsbisAdapter {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ProviderError> {
        let product_number = Self::product_number(request.provider_product_id.as_deref())?;
        let transaction_id = Uuid::new_v4().to_string();
        let soft_request =
            self.build_request(TransactionType::Sale, transaction_id.clone(), None, product_number);

        info!(transaction_id = %transaction_id, product_number = %product_number, "Sending ASBIS sale");
        let response = self.exchange(&soft_request).await?;
        if !response.is_success() {
            return Err(ProviderError::rejected(
                response.error_code.trim(),
                response.error_text.trim(),
            ));
        }

        let value = response
            .token()
            .ok_or_else(|| ProviderError::malformed("sale response carries no token"))?;
        Ok(OrderResponse {
            value,
            order_id: Some(response.auth_code.trim().to_string()).filter(|id| !id.is_empty()),
            link: response.link(),
            transaction_id,
        })
    }

    async fn cancel_order(&self, request: &CancelRequest) -> Result<CancelResponse, ProviderError> {
        let product_number = Self::product_number(request.provider_product_id.as_deref())?;
        let cancel_id = Uuid::new_v4().to_string();
        let soft_request = self.build_request(
            TransactionType::Cancel,
            cancel_id.clone(),
            Some(request.transaction_id.as_str()),
            product_number,
        );

        info!(
            transaction_id = %request.transaction_id,
            cancel_transaction_id = %cancel_id,
            "Sending ASBIS cancel"
        );
        let response = self.exchange(&soft_request).await?;
        if !response.is_success() {
            warn!(
                error_code = %response.error_code,
                error_text = %response.error_text,
                "ASBIS refused the cancellation"
            );
        }

        Ok(CancelResponse {
            success: response.is_success(),
            transaction_id: Some(cancel_id),
        })
    }
}
