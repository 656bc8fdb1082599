//! Bulk-imports pre-provisioned keys from a CSV file.
//!
//! Each line is `product_id,value[,provider_id]`. Blank lines, `#` comments
//! and a leading `product_id,…` header are skipped.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use keyhub::{
    config::ConfigLoader,
    db,
    repositories::SeaOrmKeyRepository,
    service::{KeyImport, KeyService},
    telemetry,
};
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "load_keys", version, about = "Import pre-provisioned keys into the pool")]
struct Cli {
    /// CSV file with `product_id,value[,provider_id]` rows
    file: PathBuf,

    /// Rows written per batch
    #[arg(long, default_value_t = 500)]
    batch_size: usize,

    /// Parse and validate the file without writing
    #[arg(long, default_value_t = false)]
    dry_run: bool,
}

fn parse_rows(contents: &str) -> Result<Vec<KeyImport>> {
    let mut rows = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if rows.is_empty() && fields[0].eq_ignore_ascii_case("product_id") {
            continue;
        }
        if !(2..=3).contains(&fields.len()) {
            bail!(
                "line {}: expected product_id,value[,provider_id], got {} fields",
                index + 1,
                fields.len()
            );
        }

        rows.push(KeyImport {
            product_id: fields[0].to_string(),
            value: fields[1].to_string(),
            provider_id: fields.get(2).filter(|id| !id.is_empty()).map(|id| id.to_string()),
            provider_product_id: None,
        });
    }
    Ok(rows)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = ConfigLoader::new().load().context("loading configuration")?;
    telemetry::init_tracing(&config).context("initializing tracing")?;

    let contents = std::fs::read_to_string(&cli.file)
        .with_context(|| format!("reading {}", cli.file.display()))?;
    let rows = parse_rows(&contents)?;
    if rows.is_empty() {
        bail!("{} contains no keys", cli.file.display());
    }
    info!(rows = rows.len(), file = %cli.file.display(), "Parsed key file");

    if cli.dry_run {
        return Ok(());
    }

    let db = db::init_pool(&config)
        .await
        .context("initializing database connection pool")?;
    db::run_migrations(&db).await?;
    let service = KeyService::new(
        Arc::new(SeaOrmKeyRepository::new(Arc::new(db))),
        config.max_page_size,
    );

    let mut loaded = 0usize;
    for batch in rows.chunks(cli.batch_size.max(1)) {
        let stored = service
            .load(batch.to_vec())
            .await
            .with_context(|| format!("loading batch starting at row {}", loaded + 1))?;
        loaded += stored.len();
        info!(loaded, total = rows.len(), "Batch stored");
    }

    println!("Loaded {loaded} keys from {}", cli.file.display());
    Ok(())
}
