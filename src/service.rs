//! Key domain service
//!
//! Thin layer over [`KeyRepository`] that owns input validation, load dedupe
//! and the translation of repository outcomes into [`ServiceError`]s. The
//! orchestrator never talks to the repository directly.

use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{ServiceError, codes};
use crate::models::key::{KeyStatus, Model};
use crate::repositories::{
    KeyFilter, KeyPage, KeyRepository, NewKey, PageRequest, RepositoryError, SortField, SortSpec,
};
use crate::validation;

/// One row of a bulk key import.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyImport {
    pub product_id: String,
    pub value: String,
    pub provider_id: Option<String>,
    pub provider_product_id: Option<String>,
}

#[derive(Clone)]
pub struct KeyService {
    repo: Arc<dyn KeyRepository>,
    max_page_size: u64,
}

impl KeyService {
    pub fn new(repo: Arc<dyn KeyRepository>, max_page_size: u64) -> Self {
        Self {
            repo,
            max_page_size,
        }
    }

    /// Lists keys. `page_size` must lie in `1..=max_page_size`; an empty sort
    /// falls back to newest first.
    pub async fn list(
        &self,
        filter: KeyFilter,
        page: PageRequest,
        sort: Vec<SortSpec>,
    ) -> Result<KeyPage, ServiceError> {
        validation::page_size(page.page_size, self.max_page_size)?;

        let filter = KeyFilter {
            provider_id: validation::optional(filter.provider_id.as_deref()),
            product_id: validation::optional(filter.product_id.as_deref()),
            status: filter.status,
            order_id: validation::optional(filter.order_id.as_deref()),
        };
        let sort = if sort.is_empty() {
            vec![SortSpec::desc(SortField::CreatedAt)]
        } else {
            sort
        };

        Ok(self.repo.list(&filter, &page, &sort).await?)
    }

    /// Imports keys with status `new`.
    ///
    /// All items are validated before the first write. Rows whose value already
    /// exists are not duplicated; the existing row is returned in its place.
    pub async fn load(&self, items: Vec<KeyImport>) -> Result<Vec<Model>, ServiceError> {
        if items.is_empty() {
            return Err(ServiceError::validation(
                codes::EMPTY_DATA,
                "at least one key is required",
            ));
        }

        let mut pending = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let key = Self::validate_import(item)
                .map_err(|err| err.with_field("index", index.to_string()))?;
            pending.push(key);
        }

        let mut loaded = Vec::with_capacity(pending.len());
        for key in pending {
            loaded.push(self.create_if_absent_by_value(key).await?);
        }
        Ok(loaded)
    }

    fn validate_import(item: &KeyImport) -> Result<NewKey, ServiceError> {
        Ok(NewKey {
            product_id: validation::required(
                &item.product_id,
                codes::PRODUCT_ID_REQUIRED,
                "product_id",
            )?,
            value: validation::required(&item.value, codes::VALUE_REQUIRED, "value")?,
            provider_id: validation::provider_id(item.provider_id.as_deref())?,
            provider_product_id: validation::optional(item.provider_product_id.as_deref()),
            provider_order_id: None,
            provider_transaction_id: None,
        })
    }

    /// Inserts `key` unless a row with the same value exists, in which case the
    /// existing row is returned unchanged.
    async fn create_if_absent_by_value(&self, key: NewKey) -> Result<Model, ServiceError> {
        if let Some(existing) = self.repo.get_by_value(&key.value).await? {
            Self::log_duplicate(&existing, &key);
            return Ok(existing);
        }

        match self.repo.create(key.clone()).await {
            Ok(created) => Ok(created),
            Err(RepositoryError::DuplicateValue) => {
                // Lost an insert race; the winner's row is authoritative.
                let existing = self.repo.get_by_value(&key.value).await?.ok_or_else(|| {
                    ServiceError::internal("key vanished after a duplicate value insert")
                })?;
                Self::log_duplicate(&existing, &key);
                Ok(existing)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Stores a key a vendor has just issued.
    ///
    /// Unlike imports, an existing row with the same value is never reused:
    /// it would carry neither the vendor transaction id nor the right
    /// lifecycle state.
    pub async fn store_issued(&self, key: NewKey) -> Result<Model, ServiceError> {
        match self.repo.create(key).await {
            Ok(created) => Ok(created),
            Err(RepositoryError::DuplicateValue) => Err(ServiceError::conflict(
                codes::KEY_VALUE_CONFLICT,
                "vendor issued a key value that is already stored",
            )),
            Err(err) => Err(err.into()),
        }
    }

    fn log_duplicate(existing: &Model, key: &NewKey) {
        if existing.product_id == key.product_id {
            info!(key_id = %existing.id, product_id = %key.product_id, "Key already loaded, skipping");
        } else {
            warn!(
                key_id = %existing.id,
                existing_product_id = %existing.product_id,
                product_id = %key.product_id,
                "Key value already stored under another product, reusing existing row"
            );
        }
    }

    /// Fetches a key by its textual id. Malformed ids are reported as not found.
    pub async fn get(&self, id: &str) -> Result<Model, ServiceError> {
        let not_found =
            || ServiceError::not_found(codes::OBJECT_NOT_FOUND, "key not found").with_field("id", id.trim());
        let id = Uuid::parse_str(id.trim()).map_err(|_| not_found())?;
        self.repo.get(id).await?.ok_or_else(not_found)
    }

    pub async fn get_by_order_id(&self, order_id: &str) -> Result<Option<Model>, ServiceError> {
        Ok(self.repo.get_by_order_id(order_id).await?)
    }

    /// Fails with `order_already_exists` when a key is already assigned to `order_id`.
    pub async fn ensure_order_unassigned(&self, order_id: &str) -> Result<(), ServiceError> {
        match self.repo.get_by_order_id(order_id).await? {
            Some(existing) => Err(ServiceError::conflict(
                codes::ORDER_ALREADY_EXISTS,
                "order already has a key",
            )
            .with_field("order_id", order_id)
            .with_field("key_id", existing.id.to_string())),
            None => Ok(()),
        }
    }

    /// Oldest `new` key for `product_id`, if any.
    pub async fn find_pooled(&self, product_id: &str) -> Result<Option<Model>, ServiceError> {
        let filter = KeyFilter {
            product_id: Some(product_id.to_string()),
            status: Some(KeyStatus::New),
            ..KeyFilter::default()
        };
        let page = self
            .repo
            .list(
                &filter,
                &PageRequest::first(1),
                &[SortSpec::asc(SortField::CreatedAt)],
            )
            .await?;
        Ok(page.items.into_iter().next())
    }

    /// Atomically activates a `new` key for an order.
    pub async fn claim(
        &self,
        id: Uuid,
        order_id: &str,
        customer_phone: &str,
    ) -> Result<(), ServiceError> {
        if self.repo.claim(id, order_id, customer_phone).await? {
            Ok(())
        } else {
            Err(
                ServiceError::conflict(codes::ALREADY_ACTIVATED, "key is already activated")
                    .with_field("key_id", id.to_string()),
            )
        }
    }

    /// Atomically moves an `activated` key to `cancelled`.
    pub async fn cancel(&self, id: Uuid) -> Result<(), ServiceError> {
        if self
            .repo
            .transition(id, KeyStatus::Activated, KeyStatus::Cancelled)
            .await?
        {
            Ok(())
        } else {
            Err(
                ServiceError::conflict(codes::ALREADY_CANCELLED, "key is already cancelled")
                    .with_field("key_id", id.to_string()),
            )
        }
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), ServiceError> {
        if self.repo.delete(id).await? {
            Ok(())
        } else {
            Err(ServiceError::not_found(codes::OBJECT_NOT_FOUND, "key not found")
                .with_field("key_id", id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::MEGOGO_PROVIDER_ID;
    use crate::repositories::SeaOrmKeyRepository;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn service() -> KeyService {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        KeyService::new(Arc::new(SeaOrmKeyRepository::new(Arc::new(db))), 10)
    }

    fn import(product_id: &str, value: &str) -> KeyImport {
        KeyImport {
            product_id: product_id.to_string(),
            value: value.to_string(),
            ..KeyImport::default()
        }
    }

    async fn count(service: &KeyService) -> u64 {
        let page = PageRequest {
            only_count: true,
            ..PageRequest::first(10)
        };
        service
            .list(KeyFilter::default(), page, Vec::new())
            .await
            .unwrap()
            .total
            .unwrap()
    }

    #[tokio::test]
    async fn load_twice_keeps_one_row() {
        let service = service().await;

        let first = service.load(vec![import("P1", "ABC123")]).await.unwrap();
        let second = service.load(vec![import(" P1 ", " ABC123 ")]).await.unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(first[0].status, KeyStatus::New);
        assert_eq!(first[0].value, "ABC123");
        assert_eq!(count(&service).await, 1);
    }

    #[tokio::test]
    async fn load_reuses_row_across_products() {
        let service = service().await;

        let first = service.load(vec![import("P1", "SHARED")]).await.unwrap();
        let second = service.load(vec![import("P2", "SHARED")]).await.unwrap();

        assert_eq!(first[0].id, second[0].id);
        assert_eq!(second[0].product_id, "P1");
    }

    #[tokio::test]
    async fn load_validates_every_item_before_writing() {
        let service = service().await;

        let err = service
            .load(vec![import("P1", "GOOD"), import("P1", "  ")])
            .await
            .unwrap_err();

        assert_eq!(err.code, codes::VALUE_REQUIRED);
        assert_eq!(err.fields.get("index").map(String::as_str), Some("1"));
        assert_eq!(count(&service).await, 0);
    }

    #[tokio::test]
    async fn load_rejects_empty_batch_and_unknown_provider() {
        let service = service().await;

        assert_eq!(service.load(Vec::new()).await.unwrap_err().code, codes::EMPTY_DATA);

        let mut item = import("P1", "V1");
        item.provider_id = Some("unknown".to_string());
        assert_eq!(
            service.load(vec![item]).await.unwrap_err().code,
            codes::INVALID_PROVIDER_ID
        );

        let mut item = import("P1", "V1");
        item.provider_id = Some(MEGOGO_PROVIDER_ID.to_string());
        let loaded = service.load(vec![item]).await.unwrap();
        assert_eq!(loaded[0].provider_id.as_deref(), Some(MEGOGO_PROVIDER_ID));
    }

    #[tokio::test]
    async fn get_treats_malformed_ids_as_missing() {
        let service = service().await;

        let err = service.get("not-a-uuid").await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);

        let err = service.get(&Uuid::new_v4().to_string()).await.unwrap_err();
        assert_eq!(err.code, codes::OBJECT_NOT_FOUND);
    }

    #[tokio::test]
    async fn list_enforces_page_size() {
        let service = service().await;

        let err = service
            .list(KeyFilter::default(), PageRequest::first(11), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INCORRECT_PAGE_SIZE);

        let err = service
            .list(KeyFilter::default(), PageRequest::first(0), Vec::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, codes::INCORRECT_PAGE_SIZE);
    }

    #[tokio::test]
    async fn claim_and_cancel_follow_the_lifecycle() {
        let service = service().await;
        let key = service.load(vec![import("P1", "K1")]).await.unwrap().remove(0);

        let err = service.cancel(key.id).await.unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);

        service.claim(key.id, "O1", "77011234567").await.unwrap();
        let err = service.claim(key.id, "O2", "77011234567").await.unwrap_err();
        assert_eq!(err.code, codes::ALREADY_ACTIVATED);

        let activated = service.get_by_order_id("O1").await.unwrap().unwrap();
        assert_eq!(activated.status, KeyStatus::Activated);
        assert_eq!(activated.customer_phone.as_deref(), Some("77011234567"));

        service.cancel(key.id).await.unwrap();
        assert_eq!(
            service.cancel(key.id).await.unwrap_err().code,
            codes::ALREADY_CANCELLED
        );
    }

    #[tokio::test]
    async fn one_key_per_order() {
        let service = service().await;
        let loaded = service
            .load(vec![import("P1", "K1"), import("P1", "K2")])
            .await
            .unwrap();
        service.ensure_order_unassigned("O1").await.unwrap();
        service.claim(loaded[0].id, "O1", "77011234567").await.unwrap();

        let err = service.ensure_order_unassigned("O1").await.unwrap_err();
        assert_eq!(err.code, codes::ORDER_ALREADY_EXISTS);
        assert_eq!(
            err.fields.get("key_id").map(String::as_str),
            Some(loaded[0].id.to_string().as_str())
        );

        // The unique index still holds when the check is skipped
        let err = service
            .claim(loaded[1].id, "O1", "77011234567")
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code, codes::ORDER_ALREADY_EXISTS);
        assert_eq!(service.find_pooled("P1").await.unwrap().unwrap().id, loaded[1].id);
    }

    #[tokio::test]
    async fn store_issued_never_reuses_existing_rows() {
        let service = service().await;
        service.load(vec![import("P1", "VENDOR-KEY")]).await.unwrap();

        let err = service
            .store_issued(NewKey {
                product_id: "P1".to_string(),
                value: "VENDOR-KEY".to_string(),
                provider_transaction_id: Some("tx-1".to_string()),
                ..NewKey::default()
            })
            .await
            .unwrap_err();

        assert_eq!(err.kind, ErrorKind::Conflict);
        assert_eq!(err.code, codes::KEY_VALUE_CONFLICT);
        let pooled = service.find_pooled("P1").await.unwrap().unwrap();
        assert!(pooled.provider_transaction_id.is_none());
    }

    #[tokio::test]
    async fn find_pooled_returns_oldest_new_key() {
        let service = service().await;
        let loaded = service
            .load(vec![import("P1", "OLD"), import("P1", "NEWER"), import("P2", "OTHER")])
            .await
            .unwrap();
        service.claim(loaded[0].id, "O1", "77011234567").await.unwrap();

        let pooled = service.find_pooled("P1").await.unwrap().unwrap();
        assert_eq!(pooled.value, "NEWER");
        assert!(service.find_pooled("P3").await.unwrap().is_none());
    }
}
