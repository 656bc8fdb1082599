//! Test utilities for database and service setup.
//!
//! Provides in-memory SQLite databases with migrations applied, plus helpers
//! for building the key orchestrator over them.

use anyhow::Result;
use keyhub::catalog::{ProductRouting, StaticCatalog};
use keyhub::config::AppConfig;
use keyhub::orchestrator::KeyOrchestrator;
use keyhub::providers::ProviderRegistry;
use keyhub::repositories::SeaOrmKeyRepository;
use keyhub::server::AppState;
use keyhub::service::KeyService;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Same as [`setup_test_db`], wrapped in an `Arc`.
#[allow(dead_code)]
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    let db = setup_test_db().await?;
    Ok(Arc::new(db))
}

/// Routing entry for a catalog product.
#[allow(dead_code)]
pub fn routing(product_id: &str, provider_id: &str, provider_product_id: Option<&str>) -> ProductRouting {
    ProductRouting {
        product_id: product_id.to_string(),
        provider_id: provider_id.to_string(),
        provider_product_id: provider_product_id.map(str::to_string),
        ..ProductRouting::default()
    }
}

/// Builds application state over `db` with the given catalog and registry.
#[allow(dead_code)]
pub fn app_state(
    db: DatabaseConnection,
    catalog: StaticCatalog,
    registry: ProviderRegistry,
) -> AppState {
    let config = AppConfig {
        profile: "test".to_string(),
        ..AppConfig::default()
    };
    let keys = KeyService::new(
        Arc::new(SeaOrmKeyRepository::new(Arc::new(db.clone()))),
        config.max_page_size,
    );

    AppState {
        orchestrator: KeyOrchestrator::new(keys, Arc::new(catalog), Arc::new(registry)),
        config: Arc::new(config),
        db,
    }
}
