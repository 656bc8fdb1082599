//! Provider registry
//!
//! Immutable map from vendor id to adapter. Built once at startup and shared
//! behind an `Arc`; lookups take no locks.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::config::AppConfig;
use crate::error::{ServiceError, codes};
use crate::providers::{
    AsbisAdapter, ComportalAdapter, MegogoAdapter, ProviderAdapter, ProviderDescriptor,
    ProviderError,
};

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Provider '{id}' not found")]
    ProviderNotFound { id: String },
}

impl From<RegistryError> for ServiceError {
    fn from(error: RegistryError) -> Self {
        match error {
            RegistryError::ProviderNotFound { id } => ServiceError::not_found(
                codes::PROVIDER_NOT_CONNECTED,
                format!("provider '{id}' is not connected"),
            )
            .with_field("provider_id", id),
        }
    }
}

/// Read-only set of connected vendors
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    /// Registers every vendor whose settings are complete.
    ///
    /// Missing settings are logged and skipped; so is an adapter that fails to
    /// build (for example an unreadable client certificate).
    pub fn from_config(config: &AppConfig) -> Self {
        let mut builder = Self::builder();

        match &config.comportal {
            Some(settings) => builder = builder.register_result("comportal", ComportalAdapter::new(settings)),
            None => warn!("Comportal adapter not registered: KEYHUB_COMPORTAL_URL is not set"),
        }
        match &config.asbis {
            Some(settings) => builder = builder.register_result("asbis", AsbisAdapter::new(settings)),
            None => warn!("ASBIS adapter not registered: KEYHUB_ASBIS_URL is not set"),
        }
        match &config.megogo {
            Some(settings) => builder = builder.register_result("megogo", MegogoAdapter::new(settings)),
            None => warn!("Megogo adapter not registered: KEYHUB_MEGOGO_URL is not set"),
        }

        let registry = builder.build();
        info!(providers = registry.len(), "Provider registry initialized");
        registry
    }

    /// Looks up the adapter for a vendor id (surrounding whitespace ignored).
    pub fn resolve(&self, id: &str) -> Result<Arc<dyn ProviderAdapter>, RegistryError> {
        self.adapters
            .get(id.trim())
            .cloned()
            .ok_or_else(|| RegistryError::ProviderNotFound {
                id: id.trim().to_string(),
            })
    }

    /// Descriptors of all connected vendors, sorted by name.
    pub fn descriptors(&self) -> Vec<ProviderDescriptor> {
        let mut descriptors: Vec<ProviderDescriptor> = self
            .adapters
            .values()
            .map(|adapter| adapter.descriptor().clone())
            .collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    pub fn len(&self) -> usize {
        self.adapters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl RegistryBuilder {
    /// Adds an adapter under its descriptor id, replacing any previous one.
    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        let id = adapter.descriptor().id.clone();
        if self.adapters.insert(id.clone(), adapter).is_some() {
            warn!(provider_id = %id, "Provider registered twice, keeping the latest adapter");
        }
        self
    }

    fn register_result<A>(self, name: &str, adapter: Result<A, ProviderError>) -> Self
    where
        A: ProviderAdapter + 'static,
    {
        match adapter {
            Ok(adapter) => {
                info!(provider = name, provider_id = %adapter.descriptor().id, "Provider adapter registered");
                self.register(Arc::new(adapter))
            }
            Err(err) => {
                error!(provider = name, error = %err, "Provider adapter could not be built, skipping");
                self
            }
        }
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            adapters: self.adapters,
        }
    }
}
