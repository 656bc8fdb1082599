//! # keyhub API Main Entry Point

use anyhow::Context;
use keyhub::{
    config::ConfigLoader,
    db,
    server::{AppState, run_server},
    telemetry,
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Layered env files and variables
    let config = ConfigLoader::new().load().context("loading configuration")?;

    telemetry::init_tracing(&config).context("initializing tracing")?;
    info!(profile = %config.profile, "Loaded configuration");
    if let Ok(redacted_json) = config.redacted_json() {
        info!(config = %redacted_json, "Effective configuration");
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;

    let state = AppState::from_config(config, db)?;
    run_server(state).await
}
