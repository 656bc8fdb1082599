//! Vendor integrations
//!
//! One [`ProviderAdapter`] per vendor protocol, and the [`ProviderRegistry`]
//! the orchestrator resolves them through.

pub mod asbis;
pub mod comportal;
pub mod megogo;
pub mod metadata;
pub mod registry;
pub mod trait_;

pub use asbis::AsbisAdapter;
pub use comportal::ComportalAdapter;
pub use megogo::MegogoAdapter;
pub use metadata::{ProviderDescriptor, ProviderProtocol};
pub use registry::{ProviderRegistry, RegistryBuilder, RegistryError};
pub use trait_::{
    CancelPolicy, CancelRequest, CancelResponse, CatalogEntry, OrderRequest, OrderResponse,
    ProviderAdapter, ProviderError,
};

/// Routing id of the catalog-first REST vendor
pub const COMPORTAL_PROVIDER_ID: &str = "42eafc49-dd73-4ae8-9add-c0ffcd0a5a9e";
/// Routing id of the signed-XML vendor
pub const ASBIS_PROVIDER_ID: &str = "00ca36a3-4070-45fe-a319-dd7f5a04ee36";
/// Routing id of the signed-URL vendor
pub const MEGOGO_PROVIDER_ID: &str = "8ccd5764-7117-4bf8-9aa8-cad0d8910532";

/// Vendor ids accepted on key import.
pub const KNOWN_PROVIDER_IDS: [&str; 3] =
    [COMPORTAL_PROVIDER_ID, ASBIS_PROVIDER_ID, MEGOGO_PROVIDER_ID];
