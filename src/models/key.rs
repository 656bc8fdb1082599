//! Key entity model
//!
//! SeaORM entity for the `keys` table plus the caller-facing views built from
//! it. The raw `value` column only ever leaves the crate through
//! [`Activation`].

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle status of a key: `new → activated → cancelled`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    #[sea_orm(string_value = "new")]
    New,
    #[sea_orm(string_value = "activated")]
    Activated,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::New => "new",
            KeyStatus::Activated => "activated",
            KeyStatus::Cancelled => "cancelled",
        }
    }

    /// Parses the lowercase wire form.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(KeyStatus::New),
            "activated" => Some(KeyStatus::Activated),
            "cancelled" => Some(KeyStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether moving from `self` to `next` respects the lifecycle ordering.
    pub fn can_transition_to(&self, next: KeyStatus) -> bool {
        matches!(
            (self, next),
            (KeyStatus::New, KeyStatus::Activated) | (KeyStatus::Activated, KeyStatus::Cancelled)
        )
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key entity
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Vendor that owns the key, when known
    pub provider_id: Option<String>,

    /// Catalog product identifier
    pub product_id: String,

    /// Vendor's own product identifier (SKU)
    pub provider_product_id: Option<String>,

    /// Secret key material; unique and write-once
    #[sea_orm(unique)]
    pub value: String,

    pub status: KeyStatus,

    /// Normalized customer phone, set on activation
    pub customer_phone: Option<String>,

    /// Caller order id, set on activation
    pub order_id: Option<String>,

    pub provider_order_id: Option<String>,

    /// Vendor correlation id used for compensating cancellation
    pub provider_transaction_id: Option<String>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Key as returned by list/get/load. Never carries the key value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct KeyView {
    pub id: Uuid,
    #[schema(value_type = String, format = DateTime)]
    pub created_at: DateTimeWithTimeZone,
    #[schema(value_type = String, format = DateTime)]
    pub updated_at: DateTimeWithTimeZone,
    pub provider_id: Option<String>,
    pub product_id: String,
    pub provider_product_id: Option<String>,
    pub status: KeyStatus,
    pub customer_phone: Option<String>,
    pub order_id: Option<String>,
    pub provider_order_id: Option<String>,
    /// True while the key is `new` or `activated`
    pub is_status_valid: bool,
}

impl From<Model> for KeyView {
    fn from(model: Model) -> Self {
        Self {
            id: model.id,
            created_at: model.created_at,
            updated_at: model.updated_at,
            provider_id: model.provider_id,
            product_id: model.product_id,
            provider_product_id: model.provider_product_id,
            is_status_valid: matches!(model.status, KeyStatus::New | KeyStatus::Activated),
            status: model.status,
            customer_phone: model.customer_phone,
            order_id: model.order_id,
            provider_order_id: model.provider_order_id,
        }
    }
}

/// Where an activated key came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ActivationSource {
    /// Freshly issued by the vendor
    Vendor,
    /// Claimed from the pre-provisioned pool after a vendor failure
    Pool,
}

/// Result of a successful activation; the only payload that reveals a key value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Activation {
    pub key_id: Uuid,
    pub value: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    pub order_id: String,
    pub source: ActivationSource,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn model(status: KeyStatus) -> Model {
        let now = Utc::now().fixed_offset();
        Model {
            id: Uuid::new_v4(),
            provider_id: Some("vendor".to_string()),
            product_id: "P1".to_string(),
            provider_product_id: None,
            value: "SECRET".to_string(),
            status,
            customer_phone: None,
            order_id: None,
            provider_order_id: None,
            provider_transaction_id: Some("tx-1".to_string()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn view_never_serializes_value() {
        let view = KeyView::from(model(KeyStatus::New));
        let json = serde_json::to_value(&view).unwrap();
        assert!(json.get("value").is_none());
        assert!(json.get("provider_transaction_id").is_none());
        assert_eq!(json["status"], "new");
        assert_eq!(json["is_status_valid"], true);
    }

    #[test]
    fn cancelled_keys_are_not_status_valid() {
        assert!(!KeyView::from(model(KeyStatus::Cancelled)).is_status_valid);
        assert!(KeyView::from(model(KeyStatus::Activated)).is_status_valid);
    }

    #[test]
    fn lifecycle_only_moves_forward() {
        assert!(KeyStatus::New.can_transition_to(KeyStatus::Activated));
        assert!(KeyStatus::Activated.can_transition_to(KeyStatus::Cancelled));
        assert!(!KeyStatus::New.can_transition_to(KeyStatus::Cancelled));
        assert!(!KeyStatus::Cancelled.can_transition_to(KeyStatus::New));
        assert!(!KeyStatus::Activated.can_transition_to(KeyStatus::New));
    }

    #[test]
    fn parses_wire_status() {
        assert_eq!(KeyStatus::parse("activated"), Some(KeyStatus::Activated));
        assert_eq!(KeyStatus::parse("ACTIVATED"), None);
    }
}
