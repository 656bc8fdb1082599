//! # Server Configuration
//!
//! Router assembly, shared state and the serve loop for the keyhub API.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post},
};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::catalog::{CatalogLookup, MdmClient, StaticCatalog};
use crate::config::AppConfig;
use crate::handlers;
use crate::orchestrator::KeyOrchestrator;
use crate::providers::ProviderRegistry;
use crate::repositories::SeaOrmKeyRepository;
use crate::service::KeyService;
use crate::telemetry;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: DatabaseConnection,
    pub orchestrator: KeyOrchestrator,
}

impl AppState {
    /// Wires the orchestrator from configuration: vendor adapters, the catalog
    /// lookup and the key repository over `db`.
    pub fn from_config(config: AppConfig, db: DatabaseConnection) -> anyhow::Result<Self> {
        let registry = ProviderRegistry::from_config(&config);
        if registry.is_empty() {
            warn!("No vendor adapters registered; activations will fail");
        }
        let catalog = build_catalog(&config)?;
        let keys = KeyService::new(
            Arc::new(SeaOrmKeyRepository::new(Arc::new(db.clone()))),
            config.max_page_size,
        );

        Ok(Self {
            orchestrator: KeyOrchestrator::new(keys, catalog, Arc::new(registry)),
            config: Arc::new(config),
            db,
        })
    }
}

fn build_catalog(config: &AppConfig) -> anyhow::Result<Arc<dyn CatalogLookup>> {
    match config.mdm_url.as_deref().filter(|url| !url.trim().is_empty()) {
        Some(url) => {
            let client = MdmClient::new(url, config.mdm_token.clone(), config.mdm_timeout_secs)
                .context("building MDM client")?;
            Ok(Arc::new(client))
        }
        None => {
            warn!("KEYHUB_MDM_URL is not set; product routing uses an empty static catalog");
            Ok(Arc::new(StaticCatalog::new()))
        }
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .route("/keys", get(handlers::keys::list_keys))
        .route("/keys/load", post(handlers::keys::load_keys))
        .route("/keys/activate", post(handlers::keys::activate_key))
        .route("/keys/cancel", post(handlers::keys::cancel_key))
        .route("/keys/{id}", get(handlers::keys::get_key))
        .route("/providers", get(handlers::providers::list_providers))
        .route(
            "/providers/{id}/catalog",
            get(handlers::providers::provider_catalog),
        )
        .route(
            "/products/{id}/routing",
            get(handlers::products::product_routing),
        )
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(telemetry::trace_context_middleware))
        .layer(TraceLayer::new_for_http())
}

/// Serves `state` until Ctrl-C
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let addr = state
        .config
        .bind_addr()
        .context("Invalid server address")?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown signal received");
        }
        signal_token.cancel();
    });

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("Server stopped");
    Ok(())
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::keys::list_keys,
        crate::handlers::keys::load_keys,
        crate::handlers::keys::get_key,
        crate::handlers::keys::activate_key,
        crate::handlers::keys::cancel_key,
        crate::handlers::providers::list_providers,
        crate::handlers::providers::provider_catalog,
        crate::handlers::products::product_routing,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::KeyStatus,
            crate::models::KeyView,
            crate::models::Activation,
            crate::models::ActivationSource,
            crate::handlers::HealthStatus,
            crate::handlers::keys::LoadKeyItem,
            crate::handlers::keys::LoadKeysRequest,
            crate::handlers::keys::LoadKeysResponse,
            crate::handlers::keys::CancelKeyRequest,
            crate::handlers::providers::ProvidersResponse,
            crate::handlers::providers::CatalogResponse,
            crate::orchestrator::ActivateRequest,
            crate::orchestrator::KeyListing,
            crate::orchestrator::Cancellation,
            crate::catalog::ProductRouting,
            crate::providers::ProviderDescriptor,
            crate::providers::ProviderProtocol,
            crate::providers::CatalogEntry,
            crate::error::ApiError,
            crate::error::ErrorKind,
        )
    ),
    tags(
        (name = "root", description = "Service info and health"),
        (name = "keys", description = "Key lifecycle"),
        (name = "providers", description = "Connected vendors"),
        (name = "products", description = "Catalog routing"),
    ),
    info(
        title = "keyhub API",
        description = "Electronic key orchestration across vendor integrations",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
