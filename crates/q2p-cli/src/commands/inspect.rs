//! Inspect command implementation.

use anyhow::Result;
use q2p_core::inspect::{PipelineInspector, PipelineReport};
use q2p_core::Config;

/// Print object counts and queue depth.
pub async fn run(config: Config, json: bool) -> Result<()> {
    let inspector = PipelineInspector::from_config(&config).await?;
    let report = inspector.report(0).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&config, &report);
    }
    Ok(())
}

fn print_report(config: &Config, report: &PipelineReport) {
    println!("Pipeline at {}", report.generated_at.to_rfc3339());
    println!();
    println!(
        "Raw objects:       {:>10}  ({}{})",
        report.raw_objects, config.storage.source, config.storage.raw_prefix
    );
    println!(
        "Processed objects: {:>10}  ({}{})",
        report.processed_objects, config.storage.destination, config.storage.processed_prefix
    );
    println!();
    println!("Queue {}", config.queue.url);
    println!("  available: {}", report.queue.available);
    println!("  in flight: {}", report.queue.in_flight);
    println!("  delayed:   {}", report.queue.delayed);
}
