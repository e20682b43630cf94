//! Catalog command implementations.

use anyhow::Result;
use chrono::{DateTime, Utc};
use q2p_core::catalog::{create_catalog, sync_from_store};
use q2p_core::layout::PathLayout;
use q2p_core::storage::ObjectStoreGateway;
use q2p_core::Config;
use tracing::info;

/// Register processed artifacts that the catalog may have missed.
pub async fn sync(config: Config, since: Option<DateTime<Utc>>) -> Result<()> {
    let catalog = create_catalog(&config).await?;
    let destination = ObjectStoreGateway::from_url(&config.storage.destination, &config.storage)?;
    let layout = PathLayout::from_config(&config)?;

    info!(
        catalog = %catalog.name(),
        prefix = %layout.processed_prefix(),
        since = ?since,
        "Syncing catalog from processed artifacts"
    );

    let report = sync_from_store(catalog.as_ref(), &destination, &layout, since).await?;

    println!("Artifacts registered: {}", report.artifacts);
    println!("Keys ignored:         {}", report.ignored);
    println!("Tables:               {}", report.tables.len());
    for table in &report.tables {
        println!("  {}", table);
    }
    if !report.failed.is_empty() {
        println!("Failed:               {}", report.failed.len());
        for key in &report.failed {
            println!("  {}", key);
        }
        anyhow::bail!("{} artifacts could not be registered", report.failed.len());
    }
    Ok(())
}

/// Print every table with its location and columns.
pub async fn list(config: Config) -> Result<()> {
    let catalog = create_catalog(&config).await?;
    let tables = catalog.list_tables().await?;

    if tables.is_empty() {
        println!("No tables in {}", config.catalog.database_name);
        return Ok(());
    }

    for name in tables {
        let Some(entry) = catalog.get_table(&name).await? else {
            continue;
        };
        println!("{} -> {}", entry.table_name, entry.location);
        for column in entry.schema.columns() {
            println!("  {:<32} {}", column.name, column.column_type);
        }
        println!("  partitions: {}", entry.partitions.len());
    }
    Ok(())
}
