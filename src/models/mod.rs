//! # Data Models
//!
//! Entities and caller-facing payloads for the keyhub service.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod key;

pub use key::{Activation, ActivationSource, Entity as Key, KeyStatus, KeyView};

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "keyhub".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
