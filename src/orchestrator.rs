//! Key orchestrator
//!
//! Runs the key workflows end to end: catalog routing, vendor selection,
//! pool fallback, compensating cancellation and the lifecycle guards around
//! them. Transport layers call into [`KeyOrchestrator`] only.

use std::sync::Arc;

use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::catalog::{CatalogLookup, ProductRouting};
use crate::error::{ServiceError, codes};
use crate::models::key::{Activation, ActivationSource, KeyStatus, KeyView, Model};
use crate::providers::{
    CancelPolicy, CancelRequest, CatalogEntry, OrderRequest, ProviderAdapter, ProviderDescriptor,
    ProviderError, ProviderRegistry,
};
use crate::repositories::{KeyFilter, NewKey, PageRequest, SortSpec};
use crate::service::{KeyImport, KeyService};
use crate::validation;

/// Activation input as supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, ToSchema)]
pub struct ActivateRequest {
    pub product_id: String,
    pub order_id: String,
    pub customer_phone: String,
}

/// One page of keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct KeyListing {
    pub items: Vec<KeyView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

/// Outcome of a confirmed cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Cancellation {
    pub key_id: Uuid,
    pub order_id: String,
    /// True when the key row was deleted instead of marked cancelled
    pub removed: bool,
}

#[derive(Clone)]
pub struct KeyOrchestrator {
    keys: KeyService,
    catalog: Arc<dyn CatalogLookup>,
    registry: Arc<ProviderRegistry>,
}

impl KeyOrchestrator {
    pub fn new(
        keys: KeyService,
        catalog: Arc<dyn CatalogLookup>,
        registry: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            keys,
            catalog,
            registry,
        }
    }

    pub async fn list(
        &self,
        filter: KeyFilter,
        page: PageRequest,
        sort: Vec<SortSpec>,
    ) -> Result<KeyListing, ServiceError> {
        let page = self.keys.list(filter, page, sort).await?;
        Ok(KeyListing {
            items: page.items.into_iter().map(KeyView::from).collect(),
            total: page.total,
        })
    }

    /// Bulk-imports pre-provisioned keys. Results follow input order.
    pub async fn load(&self, items: Vec<KeyImport>) -> Result<Vec<KeyView>, ServiceError> {
        let requested = items.len();
        let loaded = self.keys.load(items).await?;
        counter!("keyhub_keys_loaded_total").increment(loaded.len() as u64);
        info!(requested, loaded = loaded.len(), "Keys loaded");
        Ok(loaded.into_iter().map(KeyView::from).collect())
    }

    pub async fn get(&self, id: &str) -> Result<KeyView, ServiceError> {
        self.keys.get(id).await.map(KeyView::from)
    }

    /// Issues a key for an order.
    ///
    /// The vendor is asked first; if it fails and the vendor allows pooled
    /// keys, the oldest unused key for the product is handed out instead.
    /// Either way the key is claimed with a conditional update, so a key is
    /// never activated twice. An order that already holds a key is refused
    /// before any vendor call.
    pub async fn activate(&self, request: ActivateRequest) -> Result<Activation, ServiceError> {
        let product_id = validation::required(
            &request.product_id,
            codes::PRODUCT_ID_REQUIRED,
            "product_id",
        )?;
        let order_id =
            validation::required(&request.order_id, codes::ORDER_ID_REQUIRED, "order_id")?;
        let customer_phone = validation::normalize_phone(&request.customer_phone)?;
        self.keys.ensure_order_unassigned(&order_id).await?;

        let routing = self.routing(&product_id).await?;
        let adapter = self.registry.resolve(&routing.provider_id)?;

        let order_request = OrderRequest {
            provider_id: routing.provider_id.clone(),
            product_id: product_id.clone(),
            provider_product_id: routing.provider_product_id.clone(),
            provider_external_product_id: routing.provider_external_product_id.clone(),
            promotion_key: routing.promotion_key.clone(),
            customer_phone: customer_phone.clone(),
        };

        let (key, link, source) = match adapter.create_order(&order_request).await {
            Ok(order) => {
                let transaction_id = order.transaction_id.clone();
                let new_key = NewKey {
                    provider_id: Some(routing.provider_id.clone()),
                    product_id: product_id.clone(),
                    provider_product_id: routing.provider_product_id.clone(),
                    value: order.value,
                    provider_order_id: order.order_id,
                    provider_transaction_id: Some(order.transaction_id),
                };
                let key = self
                    .keys
                    .store_issued(new_key)
                    .await
                    .map_err(|err| {
                        error!(
                            provider_id = %routing.provider_id,
                            order_id = %order_id,
                            transaction_id = %transaction_id,
                            error = %err,
                            "Vendor issued a key that could not be stored"
                        );
                        err
                    })?;
                (key, order.link, ActivationSource::Vendor)
            }
            Err(err) => {
                counter!("keyhub_vendor_failures_total", "operation" => "create_order", "reason" => err.label())
                    .increment(1);
                warn!(
                    provider_id = %routing.provider_id,
                    product_id = %product_id,
                    error = %err,
                    "Vendor order failed"
                );
                let key = self.pooled_key(adapter.as_ref(), &product_id, err).await?;
                (key, None, ActivationSource::Pool)
            }
        };

        self.keys.claim(key.id, &order_id, &customer_phone).await.map_err(|err| {
            if source == ActivationSource::Vendor {
                error!(
                    key_id = %key.id,
                    order_id = %order_id,
                    transaction_id = key.provider_transaction_id.as_deref().unwrap_or_default(),
                    "Vendor key could not be claimed for the order"
                );
            }
            err
        })?;

        let source_label = match source {
            ActivationSource::Vendor => "vendor",
            ActivationSource::Pool => "pool",
        };
        counter!("keyhub_activations_total", "source" => source_label).increment(1);
        info!(
            key_id = %key.id,
            product_id = %product_id,
            order_id = %order_id,
            source = source_label,
            "Key activated"
        );

        Ok(Activation {
            key_id: key.id,
            value: key.value,
            link,
            order_id,
            source,
        })
    }

    async fn pooled_key(
        &self,
        adapter: &dyn ProviderAdapter,
        product_id: &str,
        vendor_error: ProviderError,
    ) -> Result<Model, ServiceError> {
        if !adapter.supports_pool() {
            return Err(ServiceError::upstream_unavailable(
                codes::PROVIDER_NOT_AVAILABLE,
                format!("provider is unavailable: {vendor_error}"),
            )
            .with_field("provider_id", adapter.descriptor().id.clone()));
        }

        self.keys.find_pooled(product_id).await?.ok_or_else(|| {
            ServiceError::not_found(
                codes::NO_POOLED_KEY,
                "provider is unavailable and no pooled key is left",
            )
            .with_field("product_id", product_id)
        })
    }

    /// Cancels the key issued for `order_id`.
    ///
    /// Vendor-issued keys are reversed at the vendor first; local state only
    /// changes once the vendor confirms.
    pub async fn cancel(&self, order_id: &str) -> Result<Cancellation, ServiceError> {
        let order_id = validation::required(order_id, codes::ORDER_ID_REQUIRED, "order_id")?;

        let key = self
            .keys
            .get_by_order_id(&order_id)
            .await?
            .ok_or_else(|| {
                ServiceError::not_found(codes::OBJECT_NOT_FOUND, "no key for this order")
                    .with_field("order_id", order_id.as_str())
            })?;

        if key.status == KeyStatus::Cancelled {
            return Err(
                ServiceError::conflict(codes::ALREADY_CANCELLED, "key is already cancelled")
                    .with_field("order_id", order_id),
            );
        }

        let Some(transaction_id) = key.provider_transaction_id.clone() else {
            // Pooled or imported keys have nothing to reverse at the vendor.
            self.keys.cancel(key.id).await?;
            return Ok(self.cancelled(key.id, order_id, false));
        };

        let adapter = self
            .registry
            .resolve(key.provider_id.as_deref().unwrap_or_default())?;
        let cancel_request = CancelRequest {
            transaction_id: transaction_id.clone(),
            product_id: key.product_id.clone(),
            provider_product_id: key.provider_product_id.clone(),
            customer_phone: key.customer_phone.clone().unwrap_or_default(),
        };

        match adapter.cancel_order(&cancel_request).await {
            Ok(response) if response.success => {}
            Ok(_) => {
                counter!("keyhub_vendor_failures_total", "operation" => "cancel_order", "reason" => "refused")
                    .increment(1);
                return Err(ServiceError::upstream_unavailable(
                    codes::PROVIDER_NOT_AVAILABLE,
                    "provider did not confirm the cancellation",
                )
                .with_field("order_id", order_id));
            }
            Err(err) if err.is_unsupported() => {
                return Err(ServiceError::unsupported(format!(
                    "provider '{}' does not support cancellation",
                    adapter.descriptor().name
                )));
            }
            Err(err) => {
                counter!("keyhub_vendor_failures_total", "operation" => "cancel_order", "reason" => err.label())
                    .increment(1);
                warn!(key_id = %key.id, transaction_id = %transaction_id, error = %err, "Vendor cancellation failed");
                return Err(ServiceError::upstream_unavailable(
                    codes::PROVIDER_NOT_AVAILABLE,
                    format!("provider is unavailable: {err}"),
                )
                .with_field("order_id", order_id));
            }
        }

        let removed = match adapter.cancel_policy() {
            CancelPolicy::Remove => {
                self.keys.delete(key.id).await?;
                true
            }
            CancelPolicy::MarkCancelled => {
                self.keys.cancel(key.id).await?;
                false
            }
        };
        Ok(self.cancelled(key.id, order_id, removed))
    }

    fn cancelled(&self, key_id: Uuid, order_id: String, removed: bool) -> Cancellation {
        counter!("keyhub_cancellations_total").increment(1);
        info!(key_id = %key_id, order_id = %order_id, removed, "Key cancelled");
        Cancellation {
            key_id,
            order_id,
            removed,
        }
    }

    /// Lists the catalog of a connected vendor.
    pub async fn catalog(&self, provider_id: &str) -> Result<Vec<CatalogEntry>, ServiceError> {
        let provider_id =
            validation::required(provider_id, codes::PROVIDER_ID_REQUIRED, "provider_id")?;
        let adapter = self.registry.resolve(&provider_id)?;

        adapter.list_catalog().await.map_err(|err| match err {
            ProviderError::Unsupported { .. } => ServiceError::unsupported(format!(
                "provider '{}' does not publish a catalog",
                adapter.descriptor().name
            )),
            err => {
                warn!(provider_id = %provider_id, error = %err, "Vendor catalog request failed");
                ServiceError::upstream_unavailable(
                    codes::PROVIDER_NOT_AVAILABLE,
                    format!("provider is unavailable: {err}"),
                )
            }
        })
    }

    /// Vendor routing for a catalog product.
    pub async fn routing(&self, product_id: &str) -> Result<ProductRouting, ServiceError> {
        self.catalog.find_product(product_id).await?.ok_or_else(|| {
            ServiceError::not_found(codes::PRODUCT_NOT_FOUND, "product has no vendor routing")
                .with_field("product_id", product_id.trim())
        })
    }

    pub fn providers(&self) -> Vec<ProviderDescriptor> {
        self.registry.descriptors()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::error::ErrorKind;
    use crate::providers::{
        CancelResponse, OrderResponse, ProviderProtocol,
    };
    use crate::repositories::SeaOrmKeyRepository;
    use async_trait::async_trait;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const VENDOR: &str = "stub-vendor";

    struct StubAdapter {
        descriptor: ProviderDescriptor,
        order: Result<OrderResponse, ProviderError>,
        cancel: Result<CancelResponse, ProviderError>,
        policy: CancelPolicy,
        orders: AtomicUsize,
        cancels: AtomicUsize,
        last_order: Mutex<Option<OrderRequest>>,
    }

    impl StubAdapter {
        fn new(pool: bool) -> Self {
            let descriptor =
                ProviderDescriptor::minimal(VENDOR, "Stub", ProviderProtocol::CatalogRest);
            Self {
                descriptor: if pool { descriptor.with_pool() } else { descriptor },
                order: Ok(OrderResponse {
                    value: "VENDOR-KEY".to_string(),
                    order_id: Some("V-ORDER".to_string()),
                    transaction_id: "tx-1".to_string(),
                    link: Some("https://dl.example/1".to_string()),
                }),
                cancel: Ok(CancelResponse {
                    success: true,
                    transaction_id: None,
                }),
                policy: CancelPolicy::MarkCancelled,
                orders: AtomicUsize::new(0),
                cancels: AtomicUsize::new(0),
                last_order: Mutex::new(None),
            }
        }

        fn failing(pool: bool) -> Self {
            Self {
                order: Err(ProviderError::Network {
                    details: "connection refused".to_string(),
                    timeout: false,
                }),
                ..Self::new(pool)
            }
        }
    }

    #[async_trait]
    impl ProviderAdapter for StubAdapter {
        fn descriptor(&self) -> &ProviderDescriptor {
            &self.descriptor
        }

        async fn create_order(&self, request: &OrderRequest) -> Result<OrderResponse, ProviderError> {
            self.orders.fetch_add(1, Ordering::SeqCst);
            *self.last_order.lock().unwrap() = Some(request.clone());
            self.order.clone()
        }

        async fn cancel_order(&self, _request: &CancelRequest) -> Result<CancelResponse, ProviderError> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.cancel.clone()
        }

        fn cancel_policy(&self) -> CancelPolicy {
            self.policy
        }
    }

    fn routing(product_id: &str, provider_id: &str) -> ProductRouting {
        ProductRouting {
            product_id: product_id.to_string(),
            provider_id: provider_id.to_string(),
            provider_product_id: Some("SKU-1".to_string()),
            provider_external_product_id: None,
            promotion_key: Some("PROMO".to_string()),
        }
    }

    async fn orchestrator(adapter: Arc<StubAdapter>) -> KeyOrchestrator {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        let keys = KeyService::new(Arc::new(SeaOrmKeyRepository::new(Arc::new(db))), 100);
        let catalog = StaticCatalog::new()
            .with_product(routing("P1", VENDOR))
            .with_product(routing("P-ORPHAN", "missing-vendor"));
        let registry = ProviderRegistry::builder().register(adapter).build();
        KeyOrchestrator::new(keys, Arc::new(catalog), Arc::new(registry))
    }

    fn activate_request(order_id: &str) -> ActivateRequest {
        ActivateRequest {
            product_id: "P1".to_string(),
            order_id: order_id.to_string(),
            customer_phone: "+77011234567".to_string(),
        }
    }

    fn import(value: &str) -> KeyImport {
        KeyImport {
            product_id: "P1".to_string(),
            value: value.to_string(),
            ..KeyImport::default()
        }
    }

    async fn all_keys(orchestrator: &KeyOrchestrator) -> Vec<KeyView> {
        orchestrator
            .list(KeyFilter::default(), PageRequest::first(100), Vec::new())
            .await
            .unwrap()
            .items
    }

    #[tokio::test]
    async fn vendor_activation_persists_activated_key() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;

        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        assert_eq!(activation.value, "VENDOR-KEY");
        assert_eq!(activation.source, ActivationSource::Vendor);
        assert_eq!(activation.link.as_deref(), Some("https://dl.example/1"));

        let sent = adapter.last_order.lock().unwrap().clone().unwrap();
        assert_eq!(sent.customer_phone, "77011234567");
        assert_eq!(sent.provider_product_id.as_deref(), Some("SKU-1"));
        assert_eq!(sent.promotion_key.as_deref(), Some("PROMO"));

        let view = orchestrator.get(&activation.key_id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::Activated);
        assert_eq!(view.order_id.as_deref(), Some("O1"));
        assert_eq!(view.provider_order_id.as_deref(), Some("V-ORDER"));
        assert!(serde_json::to_value(&view).unwrap().get("value").is_none());
    }

    #[tokio::test]
    async fn unknown_product_makes_no_vendor_call() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;

        let mut request = activate_request("O1");
        request.product_id = "NOPE".to_string();
        let err = orchestrator.activate(request).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.code, codes::PRODUCT_NOT_FOUND);
        assert_eq!(adapter.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unregistered_vendor_is_named_and_nothing_changes() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;

        let mut request = activate_request("O1");
        request.product_id = "P-ORPHAN".to_string();
        let err = orchestrator.activate(request).await.unwrap_err();

        assert_eq!(err.code, codes::PROVIDER_NOT_CONNECTED);
        assert!(err.message.contains("missing-vendor"));
        assert!(all_keys(&orchestrator).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_lookup() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;

        let mut request = activate_request("O1");
        request.customer_phone = "12".to_string();
        assert_eq!(
            orchestrator.activate(request).await.unwrap_err().code,
            codes::INVALID_PHONE
        );

        let err = orchestrator.activate(activate_request(" ")).await.unwrap_err();
        assert_eq!(err.code, codes::ORDER_ID_REQUIRED);
        assert_eq!(adapter.orders.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn vendor_failure_without_pool_changes_nothing() {
        let adapter = Arc::new(StubAdapter::failing(false));
        let orchestrator = orchestrator(adapter.clone()).await;
        orchestrator.load(vec![import("POOLED")]).await.unwrap();

        let err = orchestrator.activate(activate_request("O1")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        assert_eq!(err.code, codes::PROVIDER_NOT_AVAILABLE);
        let keys = all_keys(&orchestrator).await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].status, KeyStatus::New);
    }

    #[tokio::test]
    async fn vendor_failure_falls_back_to_pool() {
        let adapter = Arc::new(StubAdapter::failing(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        let loaded = orchestrator.load(vec![import("POOLED")]).await.unwrap();

        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        assert_eq!(activation.value, "POOLED");
        assert_eq!(activation.source, ActivationSource::Pool);
        assert_eq!(activation.key_id, loaded[0].id);
        let view = orchestrator.get(&loaded[0].id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::Activated);
        assert_eq!(view.customer_phone.as_deref(), Some("77011234567"));
    }

    #[tokio::test]
    async fn empty_pool_reports_no_pooled_key() {
        let adapter = Arc::new(StubAdapter::failing(true));
        let orchestrator = orchestrator(adapter).await;

        let err = orchestrator.activate(activate_request("O1")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::NotFound);
        assert_eq!(err.code, codes::NO_POOLED_KEY);
    }

    #[tokio::test]
    async fn concurrent_pool_activations_hand_out_one_key() {
        let adapter = Arc::new(StubAdapter::failing(true));
        let orchestrator = orchestrator(adapter).await;
        orchestrator.load(vec![import("ONLY-ONE")]).await.unwrap();

        let (first, second) = tokio::join!(
            orchestrator.activate(activate_request("O1")),
            orchestrator.activate(activate_request("O2"))
        );

        let successes = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        let failure = if first.is_ok() { second } else { first };
        let err = failure.unwrap_err();
        assert!(matches!(err.kind, ErrorKind::Conflict | ErrorKind::NotFound));
    }

    #[tokio::test]
    async fn cancel_confirms_with_vendor_before_transition() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        let cancellation = orchestrator.cancel("O1").await.unwrap();

        assert_eq!(cancellation.key_id, activation.key_id);
        assert!(!cancellation.removed);
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 1);
        let view = orchestrator.get(&activation.key_id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::Cancelled);
        assert!(!view.is_status_valid);
    }

    #[tokio::test]
    async fn second_cancel_conflicts_without_vendor_call() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        orchestrator.activate(activate_request("O1")).await.unwrap();
        orchestrator.cancel("O1").await.unwrap();

        let err = orchestrator.cancel("O1").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code, codes::ALREADY_CANCELLED);
        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn vendor_cancel_failure_keeps_key_activated() {
        let adapter = Arc::new(StubAdapter {
            cancel: Err(ProviderError::Http {
                status: 502,
                body: None,
            }),
            ..StubAdapter::new(true)
        });
        let orchestrator = orchestrator(adapter.clone()).await;
        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        let err = orchestrator.cancel("O1").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::UpstreamUnavailable);
        let view = orchestrator.get(&activation.key_id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::Activated);
    }

    #[tokio::test]
    async fn unconfirmed_cancel_keeps_key_activated() {
        let adapter = Arc::new(StubAdapter {
            cancel: Ok(CancelResponse {
                success: false,
                transaction_id: None,
            }),
            ..StubAdapter::new(true)
        });
        let orchestrator = orchestrator(adapter).await;
        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        let err = orchestrator.cancel("O1").await.unwrap_err();

        assert_eq!(err.code, codes::PROVIDER_NOT_AVAILABLE);
        let view = orchestrator.get(&activation.key_id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::Activated);
    }

    #[tokio::test]
    async fn unsupported_cancel_is_reported() {
        let adapter = Arc::new(StubAdapter {
            cancel: Err(ProviderError::Unsupported {
                operation: "cancel_order",
            }),
            ..StubAdapter::new(true)
        });
        let orchestrator = orchestrator(adapter).await;
        orchestrator.activate(activate_request("O1")).await.unwrap();

        let err = orchestrator.cancel("O1").await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
    }

    #[tokio::test]
    async fn remove_policy_deletes_the_row() {
        let adapter = Arc::new(StubAdapter {
            policy: CancelPolicy::Remove,
            ..StubAdapter::new(false)
        });
        let orchestrator = orchestrator(adapter).await;
        let activation = orchestrator.activate(activate_request("O1")).await.unwrap();

        let cancellation = orchestrator.cancel("O1").await.unwrap();

        assert!(cancellation.removed);
        let err = orchestrator.get(&activation.key_id.to_string()).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn pooled_keys_cancel_locally() {
        let adapter = Arc::new(StubAdapter::failing(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        orchestrator.load(vec![import("POOLED")]).await.unwrap();
        orchestrator.activate(activate_request("O1")).await.unwrap();

        orchestrator.cancel(" O1 ").await.unwrap();

        assert_eq!(adapter.cancels.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn repeated_order_is_refused_and_cancel_stays_consistent() {
        let adapter = Arc::new(StubAdapter::failing(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        orchestrator.load(vec![import("K1"), import("K2")]).await.unwrap();

        let first = orchestrator.activate(activate_request("O1")).await.unwrap();
        let err = orchestrator.activate(activate_request("O1")).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code, codes::ORDER_ALREADY_EXISTS);
        assert_eq!(adapter.orders.load(Ordering::SeqCst), 1);

        let cancellation = orchestrator.cancel("O1").await.unwrap();
        assert_eq!(cancellation.key_id, first.key_id);
        assert_eq!(
            orchestrator.cancel("O1").await.unwrap_err().code,
            codes::ALREADY_CANCELLED
        );

        // Still refused after cancellation; K2 stays in the pool
        assert_eq!(
            orchestrator.activate(activate_request("O1")).await.unwrap_err().code,
            codes::ORDER_ALREADY_EXISTS
        );
        let keys = all_keys(&orchestrator).await;
        assert!(keys.iter().all(|key| key.status != KeyStatus::Activated));
        assert_eq!(
            keys.iter().filter(|key| key.status == KeyStatus::New).count(),
            1
        );
    }

    #[tokio::test]
    async fn vendor_value_colliding_with_pool_is_not_reused() {
        let adapter = Arc::new(StubAdapter::new(true));
        let orchestrator = orchestrator(adapter.clone()).await;
        let pooled = orchestrator.load(vec![import("VENDOR-KEY")]).await.unwrap();

        let err = orchestrator.activate(activate_request("O1")).await.unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code, codes::KEY_VALUE_CONFLICT);
        assert_eq!(adapter.orders.load(Ordering::SeqCst), 1);
        let view = orchestrator.get(&pooled[0].id.to_string()).await.unwrap();
        assert_eq!(view.status, KeyStatus::New);
        assert!(view.order_id.is_none());
        assert_eq!(
            orchestrator.cancel("O1").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn cancel_of_unknown_order_is_not_found() {
        let orchestrator = orchestrator(Arc::new(StubAdapter::new(true))).await;

        assert_eq!(
            orchestrator.cancel("missing").await.unwrap_err().kind,
            ErrorKind::NotFound
        );
        assert_eq!(
            orchestrator.cancel("").await.unwrap_err().code,
            codes::ORDER_ID_REQUIRED
        );
    }

    #[tokio::test]
    async fn catalog_without_support_is_unsupported() {
        let orchestrator = orchestrator(Arc::new(StubAdapter::new(true))).await;

        let err = orchestrator.catalog(VENDOR).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedOperation);
        assert_eq!(err.code, codes::METHOD_NOT_SUPPORTED);

        let err = orchestrator.catalog("other").await.unwrap_err();
        assert_eq!(err.code, codes::PROVIDER_NOT_CONNECTED);
    }

    #[tokio::test]
    async fn load_twice_yields_single_new_row() {
        let orchestrator = orchestrator(Arc::new(StubAdapter::new(true))).await;

        orchestrator.load(vec![import("ABC123")]).await.unwrap();
        orchestrator.load(vec![import("ABC123")]).await.unwrap();

        let keys = all_keys(&orchestrator).await;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].product_id, "P1");
        assert_eq!(keys[0].status, KeyStatus::New);
    }

    #[tokio::test]
    async fn routing_and_providers_are_exposed() {
        let orchestrator = orchestrator(Arc::new(StubAdapter::new(true))).await;

        let routing = orchestrator.routing("P1").await.unwrap();
        assert_eq!(routing.provider_id, VENDOR);
        assert_eq!(
            orchestrator.routing("P9").await.unwrap_err().code,
            codes::PRODUCT_NOT_FOUND
        );

        let providers = orchestrator.providers();
        assert_eq!(providers.len(), 1);
        assert!(providers[0].supports_pool);
    }
}
