//! Key repository
//!
//! [`KeyRepository`] is the persistence port the key service depends on;
//! [`SeaOrmKeyRepository`] implements it over the `keys` table.
//!
//! Status changes go through [`KeyRepository::update_if_status`], a single
//! conditional `UPDATE … WHERE id = ? AND status = ?`. Callers inspect the
//! returned flag instead of reading the row first, so two concurrent claims on
//! the same key can never both succeed.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, DbErr, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use thiserror::Error;
use uuid::Uuid;

use crate::error::{ServiceError, codes, is_unique_violation};
use crate::models::key::{ActiveModel, Column, Entity, KeyStatus, Model};

/// Errors surfaced by key persistence.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("a key with this value already exists")]
    DuplicateValue,
    #[error("another key is already assigned to this order")]
    DuplicateOrder,
    #[error("status cannot move from {from} to {to}")]
    InvalidTransition { from: KeyStatus, to: KeyStatus },
    #[error("database error: {0}")]
    Database(#[from] DbErr),
}

impl From<RepositoryError> for ServiceError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::DuplicateValue => {
                ServiceError::internal("key value collided with an existing row")
            }
            RepositoryError::DuplicateOrder => ServiceError::conflict(
                codes::ORDER_ALREADY_EXISTS,
                "order already has a key",
            ),
            err @ RepositoryError::InvalidTransition { .. } => {
                ServiceError::internal(err.to_string())
            }
            RepositoryError::Database(err) => err.into(),
        }
    }
}

/// Equality filters for listing keys. `None` means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub provider_id: Option<String>,
    pub product_id: Option<String>,
    pub status: Option<KeyStatus>,
    pub order_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    CreatedAt,
    UpdatedAt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortSpec {
    pub field: SortField,
    pub descending: bool,
}

impl SortSpec {
    pub const fn asc(field: SortField) -> Self {
        Self {
            field,
            descending: false,
        }
    }

    pub const fn desc(field: SortField) -> Self {
        Self {
            field,
            descending: true,
        }
    }

    /// Parses `created_at` / `-updated_at`. Unknown fields yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let (name, descending) = match raw.strip_prefix('-') {
            Some(name) => (name, true),
            None => (raw, false),
        };
        let field = match name {
            "created_at" => SortField::CreatedAt,
            "updated_at" => SortField::UpdatedAt,
            _ => return None,
        };
        Some(Self { field, descending })
    }

    fn column(&self) -> Column {
        match self.field {
            SortField::CreatedAt => Column::CreatedAt,
            SortField::UpdatedAt => Column::UpdatedAt,
        }
    }
}

/// Zero-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u64,
    pub page_size: u64,
    pub with_total_count: bool,
    pub only_count: bool,
}

impl PageRequest {
    pub fn first(page_size: u64) -> Self {
        Self {
            page: 0,
            page_size,
            with_total_count: false,
            only_count: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub items: Vec<Model>,
    pub total: Option<u64>,
}

/// Fields of a freshly created key. Status always starts as `new`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewKey {
    pub provider_id: Option<String>,
    pub product_id: String,
    pub provider_product_id: Option<String>,
    pub value: String,
    pub provider_order_id: Option<String>,
    pub provider_transaction_id: Option<String>,
}

/// Partial update. `None` leaves a column untouched; for nullable columns
/// `Some(None)` clears it. `value` and `provider_transaction_id` are write-once
/// and cannot be patched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPatch {
    pub status: Option<KeyStatus>,
    pub provider_id: Option<Option<String>>,
    pub provider_product_id: Option<Option<String>>,
    pub customer_phone: Option<Option<String>>,
    pub order_id: Option<Option<String>>,
    pub provider_order_id: Option<Option<String>>,
}

impl KeyPatch {
    /// Patch moving a `new` key to `activated` for the given order.
    pub fn activation(order_id: &str, customer_phone: &str) -> Self {
        Self {
            status: Some(KeyStatus::Activated),
            order_id: Some(Some(order_id.to_string())),
            customer_phone: Some(Some(customer_phone.to_string())),
            ..Self::default()
        }
    }

    pub fn status(status: KeyStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    fn column_values(&self) -> Vec<(Column, SimpleExpr)> {
        let mut values = Vec::new();
        if let Some(status) = self.status {
            values.push((Column::Status, Expr::value(status)));
        }
        let nullable = [
            (Column::ProviderId, &self.provider_id),
            (Column::ProviderProductId, &self.provider_product_id),
            (Column::CustomerPhone, &self.customer_phone),
            (Column::OrderId, &self.order_id),
            (Column::ProviderOrderId, &self.provider_order_id),
        ];
        for (column, change) in nullable {
            if let Some(value) = change {
                values.push((column, Expr::value(value.clone())));
            }
        }
        values
    }
}

/// Persistence port for keys.
#[async_trait]
pub trait KeyRepository: Send + Sync {
    /// Inserts a `new` key. Fails with [`RepositoryError::DuplicateValue`] if the value exists.
    async fn create(&self, key: NewKey) -> Result<Model, RepositoryError>;

    /// Applies `patch` unconditionally. Returns false if the key does not exist.
    async fn update(&self, id: Uuid, patch: KeyPatch) -> Result<bool, RepositoryError>;

    /// Applies `patch` only while the key still has status `expected`. Must be atomic.
    async fn update_if_status(
        &self,
        id: Uuid,
        expected: KeyStatus,
        patch: KeyPatch,
    ) -> Result<bool, RepositoryError>;

    async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError>;

    /// The key assigned to `order_id`. Order ids are unique across keys.
    async fn get_by_order_id(&self, order_id: &str) -> Result<Option<Model>, RepositoryError>;

    async fn get_by_value(&self, value: &str) -> Result<Option<Model>, RepositoryError>;

    async fn list(
        &self,
        filter: &KeyFilter,
        page: &PageRequest,
        sort: &[SortSpec],
    ) -> Result<KeyPage, RepositoryError>;

    /// Physically removes a key. Returns false if nothing was deleted.
    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError>;

    /// Claims a `new` key for an order. False means someone else got there first.
    async fn claim(
        &self,
        id: Uuid,
        order_id: &str,
        customer_phone: &str,
    ) -> Result<bool, RepositoryError> {
        self.update_if_status(
            id,
            KeyStatus::New,
            KeyPatch::activation(order_id, customer_phone),
        )
        .await
    }

    /// Moves a key from `from` to `to` if it is still in `from`. Pairs that
    /// break the `new -> activated -> cancelled` order are refused outright.
    async fn transition(
        &self,
        id: Uuid,
        from: KeyStatus,
        to: KeyStatus,
    ) -> Result<bool, RepositoryError> {
        if !from.can_transition_to(to) {
            return Err(RepositoryError::InvalidTransition { from, to });
        }
        self.update_if_status(id, from, KeyPatch::status(to)).await
    }
}

/// SeaORM-backed [`KeyRepository`].
#[derive(Debug, Clone)]
pub struct SeaOrmKeyRepository {
    db: Arc<DatabaseConnection>,
}

impl SeaOrmKeyRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    async fn apply_patch(
        &self,
        id: Uuid,
        expected: Option<KeyStatus>,
        patch: KeyPatch,
    ) -> Result<bool, RepositoryError> {
        let mut update = Entity::update_many()
            .col_expr(Column::UpdatedAt, Expr::value(Utc::now().fixed_offset()))
            .filter(Column::Id.eq(id));
        for (column, value) in patch.column_values() {
            update = update.col_expr(column, value);
        }
        if let Some(expected) = expected {
            update = update.filter(Column::Status.eq(expected));
        }

        // `value` is never patched, so the order id index is the only unique one in play
        let result = update.exec(&*self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::DuplicateOrder
            } else {
                RepositoryError::Database(err)
            }
        })?;
        Ok(result.rows_affected > 0)
    }
}

#[async_trait]
impl KeyRepository for SeaOrmKeyRepository {
    async fn create(&self, key: NewKey) -> Result<Model, RepositoryError> {
        let now = Utc::now().fixed_offset();
        let model = ActiveModel {
            id: Set(Uuid::new_v4()),
            provider_id: Set(key.provider_id),
            product_id: Set(key.product_id),
            provider_product_id: Set(key.provider_product_id),
            value: Set(key.value),
            status: Set(KeyStatus::New),
            customer_phone: Set(None),
            order_id: Set(None),
            provider_order_id: Set(key.provider_order_id),
            provider_transaction_id: Set(key.provider_transaction_id),
            created_at: Set(now),
            updated_at: Set(now),
        };

        model.insert(&*self.db).await.map_err(|err| {
            if is_unique_violation(&err) {
                RepositoryError::DuplicateValue
            } else {
                RepositoryError::Database(err)
            }
        })
    }

    async fn update(&self, id: Uuid, patch: KeyPatch) -> Result<bool, RepositoryError> {
        self.apply_patch(id, None, patch).await
    }

    async fn update_if_status(
        &self,
        id: Uuid,
        expected: KeyStatus,
        patch: KeyPatch,
    ) -> Result<bool, RepositoryError> {
        self.apply_patch(id, Some(expected), patch).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Model>, RepositoryError> {
        Ok(Entity::find_by_id(id).one(&*self.db).await?)
    }

    async fn get_by_order_id(&self, order_id: &str) -> Result<Option<Model>, RepositoryError> {
        Ok(Entity::find()
            .filter(Column::OrderId.eq(order_id))
            .one(&*self.db)
            .await?)
    }

    async fn get_by_value(&self, value: &str) -> Result<Option<Model>, RepositoryError> {
        Ok(Entity::find()
            .filter(Column::Value.eq(value))
            .one(&*self.db)
            .await?)
    }

    async fn list(
        &self,
        filter: &KeyFilter,
        page: &PageRequest,
        sort: &[SortSpec],
    ) -> Result<KeyPage, RepositoryError> {
        let mut query = Entity::find();
        if let Some(provider_id) = &filter.provider_id {
            query = query.filter(Column::ProviderId.eq(provider_id.as_str()));
        }
        if let Some(product_id) = &filter.product_id {
            query = query.filter(Column::ProductId.eq(product_id.as_str()));
        }
        if let Some(status) = filter.status {
            query = query.filter(Column::Status.eq(status));
        }
        if let Some(order_id) = &filter.order_id {
            query = query.filter(Column::OrderId.eq(order_id.as_str()));
        }

        let total = if page.with_total_count || page.only_count {
            Some(query.clone().count(&*self.db).await?)
        } else {
            None
        };
        if page.only_count {
            return Ok(KeyPage {
                items: Vec::new(),
                total,
            });
        }

        if sort.is_empty() {
            query = query.order_by_desc(Column::CreatedAt);
        }
        for spec in sort {
            let order = if spec.descending {
                Order::Desc
            } else {
                Order::Asc
            };
            query = query.order_by(spec.column(), order);
        }
        // Stable paging across equal timestamps
        query = query.order_by_asc(Column::Id);

        let items = query
            .offset(page.page.saturating_mul(page.page_size))
            .limit(page.page_size)
            .all(&*self.db)
            .await?;

        Ok(KeyPage { items, total })
    }

    async fn delete(&self, id: Uuid) -> Result<bool, RepositoryError> {
        let result = Entity::delete_by_id(id).exec(&*self.db).await?;
        Ok(result.rows_affected > 0)
    }
}
