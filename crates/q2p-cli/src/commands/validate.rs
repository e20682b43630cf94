//! Validate command implementation.

use anyhow::Result;
use q2p_core::layout::PathLayout;
use q2p_core::Config;

/// Validate a configuration and show the naming it implies.
pub fn run(config: &Config) -> Result<()> {
    config.validate()?;
    let layout = PathLayout::from_config(config)?;
    let now = chrono::Utc::now();

    println!("Configuration is valid");
    println!();
    println!("Queue:       {}", config.queue.url);
    println!(
        "Source:      {} (raw prefix {})",
        config.storage.source,
        layout.raw_prefix()
    );
    println!(
        "Destination: {} (processed prefix {})",
        config.storage.destination,
        layout.processed_prefix()
    );
    println!(
        "Catalog:     {:?} database {}",
        config.catalog.catalog_type, config.catalog.database_name
    );
    println!();
    println!("Today's table:     {}", layout.table_name(now));
    println!("Today's partition: {}", layout.partition_location(now));
    Ok(())
}
