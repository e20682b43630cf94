//! Status command implementation.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Health response from the server.
#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: String,
    phase: Phase,
    components: BTreeMap<String, ComponentStatus>,
}

#[derive(Debug, Deserialize)]
struct Phase {
    phase: String,
    reason: Option<String>,
}

/// Component status from the server.
#[derive(Debug, Deserialize)]
struct ComponentStatus {
    status: String,
    reason: Option<String>,
}

/// Show status and health.
pub async fn run(url: &str) -> Result<()> {
    let base = url.trim_end_matches('/');
    println!("Checking health at {}...\n", base);

    let client = reqwest::Client::new();

    match client.get(format!("{base}/health")).send().await {
        Ok(response) => {
            let status_code = response.status();
            match response.json::<HealthResponse>().await {
                Ok(health) => {
                    print_health_status(&health, status_code.as_u16());
                }
                Err(e) => {
                    println!("Failed to parse health response: {}", e);
                    println!("HTTP Status: {}", status_code);
                }
            }
        }
        Err(e) => {
            println!("Failed to connect to health endpoint: {}", e);
            println!("\nIs the q2p worker running?");
            println!("Start it with: q2p worker --config <path-to-config>");
            return Ok(());
        }
    }

    println!("\n--- Metrics ---");
    match client.get(format!("{base}/metrics")).send().await {
        Ok(response) => {
            let text = response.text().await.context("Failed to read metrics")?;
            print_metrics(&text);
        }
        Err(e) => {
            println!("Failed to fetch metrics: {}", e);
        }
    }

    Ok(())
}

fn status_tag(status: &str) -> &'static str {
    match status {
        "healthy" => "[OK]",
        "degraded" => "[WARN]",
        "unhealthy" => "[FAIL]",
        _ => "[?]",
    }
}

fn print_health_status(health: &HealthResponse, status_code: u16) {
    println!(
        "{} Overall Status: {} (HTTP {})",
        status_tag(&health.status),
        health.status.to_uppercase(),
        status_code
    );
    match &health.phase.reason {
        Some(reason) => println!("Phase: {} ({})", health.phase.phase, reason),
        None => println!("Phase: {}", health.phase.phase),
    }
    println!();

    if !health.components.is_empty() {
        println!("Components:");
        for (name, status) in &health.components {
            let tag = status_tag(&status.status);
            if let Some(reason) = &status.reason {
                println!("  {} {}: {} ({})", tag, name, status.status, reason);
            } else {
                println!("  {} {}: {}", tag, name, status.status);
            }
        }
    }
}

/// Parse unlabelled `name value` samples from Prometheus text.
fn parse_samples(metrics_text: &str) -> HashMap<&str, u64> {
    let mut values = HashMap::new();

    for line in metrics_text.lines() {
        if line.starts_with('#') || line.is_empty() || line.contains('{') {
            continue;
        }

        let mut parts = line.split_whitespace();
        if let (Some(name), Some(value)) = (parts.next(), parts.next()) {
            if let Ok(value) = value.parse::<u64>() {
                values.insert(name, value);
            }
        }
    }

    values
}

fn print_metrics(metrics_text: &str) {
    let values = parse_samples(metrics_text);
    if values.is_empty() {
        println!("No metrics available yet.");
        return;
    }

    let rows = [
        ("Messages Received", "q2p_messages_received_total"),
        ("Acknowledged", "q2p_messages_acknowledged_total"),
        ("Released", "q2p_messages_released_total"),
        ("Rows Written", "q2p_rows_written_total"),
        ("Bytes Written", "q2p_bytes_written_total"),
        ("Lines Skipped", "q2p_lines_skipped_total"),
        ("Tasks In Flight", "q2p_tasks_in_flight"),
        ("Queue Depth", "q2p_queue_depth"),
    ];
    for (label, name) in rows {
        if let Some(v) = values.get(name) {
            println!("{:<18} {}", format!("{label}:"), format_number(*v));
        }
    }
}

fn format_number(n: u64) -> String {
    if n >= 1_000_000_000 {
        format!("{:.2}B", n as f64 / 1_000_000_000.0)
    } else if n >= 1_000_000 {
        format!("{:.2}M", n as f64 / 1_000_000.0)
    } else if n >= 1_000 {
        format!("{:.2}K", n as f64 / 1_000.0)
    } else {
        n.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_samples_skips_labels_and_comments() {
        let text = "# HELP q2p_rows_written_total Rows\n\
                    # TYPE q2p_rows_written_total counter\n\
                    q2p_rows_written_total 42\n\
                    q2p_failures_total{reason=\"source_missing\"} 3\n";
        let values = parse_samples(text);
        assert_eq!(values.get("q2p_rows_written_total"), Some(&42));
        assert_eq!(values.len(), 1);
    }

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_500), "1.50K");
        assert_eq!(format_number(2_000_000), "2.00M");
    }

    #[test]
    fn test_health_response_shape() {
        let body = r#"{"status":"unhealthy","phase":{"phase":"halted","reason":"catalog: denied"},
            "components":{"catalog":{"status":"unhealthy","reason":"denied"},"queue":{"status":"healthy"}}}"#;
        let health: HealthResponse = serde_json::from_str(body).unwrap();
        assert_eq!(health.phase.phase, "halted");
        assert_eq!(health.components["queue"].status, "healthy");
        assert!(health.components["queue"].reason.is_none());
    }
}
