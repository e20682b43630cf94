//! Q2P CLI - queue-driven JSON lines to Parquet ingestion tool.

use anyhow::Result;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use q2p_core::config::LogFormat;
use q2p_core::{Config, Error as CoreError};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Exit codes for CLI operations.
///
/// Following Unix conventions:
/// - 0: Success
/// - 1-127: Application errors
/// - 128+N: Signal N received (e.g., 130 = SIGINT)
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Successful execution
    Success = 0,
    /// Configuration error (invalid config file, missing required fields)
    ConfigError = 1,
    /// Queue error (receive, acknowledge, release)
    QueueError = 2,
    /// Catalog error (Glue registration, schema conflict)
    CatalogError = 3,
    /// Storage error (S3, filesystem)
    StorageError = 4,
    /// Credentials lack a required permission
    AccessDenied = 5,
    /// Health check failure
    HealthCheckError = 6,
    /// Conversion error
    ConversionError = 7,
    /// General runtime error
    RuntimeError = 10,
    /// Signal interrupt (SIGINT = 2, so 128 + 2 = 130)
    #[allow(dead_code)]
    SignalInterrupt = 130,
}

impl ExitCode {
    /// Map an error to an exit code, preferring the typed core error.
    fn from_error(error: &anyhow::Error) -> Self {
        if let Some(core) = error.downcast_ref::<CoreError>() {
            if core.is_access_denied() {
                return ExitCode::AccessDenied;
            }
            return match core {
                CoreError::Config(_) => ExitCode::ConfigError,
                CoreError::Queue(_) | CoreError::Notification(_) => ExitCode::QueueError,
                CoreError::Storage(_) | CoreError::Io(_) => ExitCode::StorageError,
                CoreError::Catalog(_) => ExitCode::CatalogError,
                CoreError::Conversion(_) => ExitCode::ConversionError,
                CoreError::Serialization(_) => ExitCode::RuntimeError,
            };
        }

        let error_str = error.to_string().to_lowercase();
        if error_str.contains("config") || error_str.contains("toml") || error_str.contains("parse")
        {
            ExitCode::ConfigError
        } else if error_str.contains("health") {
            ExitCode::HealthCheckError
        } else {
            ExitCode::RuntimeError
        }
    }
}

mod commands;
mod server;

#[derive(Parser)]
#[command(name = "q2p")]
#[command(about = "Queue-driven JSON lines to Parquet ingestion CLI", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "Q2P_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose logging (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ingestion worker with its health and metrics server
    Worker {
        /// Override the queue URL
        #[arg(long)]
        queue_url: Option<String>,

        /// Override the number of concurrent tasks
        #[arg(long)]
        max_in_flight: Option<usize>,

        /// Override the health server port
        #[arg(long)]
        health_port: Option<u16>,

        /// Stop after this many consecutive empty receives
        #[arg(long)]
        max_empty_polls: Option<u32>,
    },

    /// Upload a JSON lines object and send its key to the queue
    SendTest {
        /// Local JSON lines file (defaults to two sample events)
        #[arg(long)]
        file: Option<PathBuf>,

        /// Object key (defaults to <raw_prefix>test_<timestamp>.jsonl)
        #[arg(long)]
        key: Option<String>,
    },

    /// Show a running worker's health and metrics
    Status {
        /// Worker base URL
        #[arg(long, default_value = "http://localhost:8080")]
        url: String,
    },

    /// Show object counts and queue depth
    Inspect {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Catalog operations
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },

    /// Validate configuration file
    Validate,

    /// Convert a local JSON lines file to Parquet
    Convert {
        /// Input file
        input: PathBuf,

        /// Output file (defaults to the input with a .parquet extension)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Override the maximum fraction of unparseable lines
        #[arg(long)]
        max_skip_ratio: Option<f64>,
    },
}

#[derive(Subcommand)]
enum CatalogAction {
    /// Register every processed artifact with the catalog
    Sync {
        /// Only artifacts modified after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },
    /// List registered tables and their schemas
    List,
}

#[tokio::main]
async fn main() {
    let exit_code = run_cli().await;
    std::process::exit(exit_code as i32);
}

/// Main CLI execution logic with proper error handling.
async fn run_cli() -> ExitCode {
    let cli = Cli::parse();

    // Logging settings come from the config when it parses (JSON otherwise)
    let monitoring = cli
        .config
        .as_ref()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|content| toml::from_str::<Config>(&content).ok())
        .map(|config| config.monitoring);
    let log_format = monitoring
        .as_ref()
        .map(|m| m.log_format.clone())
        .unwrap_or(LogFormat::Json);
    let base_level = monitoring
        .as_ref()
        .map(|m| m.log_level.as_str())
        .unwrap_or("info");

    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match cli.verbose {
            0 => EnvFilter::new(base_level),
            1 => EnvFilter::new("debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    match log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(filter)
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(fmt::layer())
                .with(filter)
                .init();
        }
    }

    let result = execute_command(cli).await;

    match result {
        Ok(()) => ExitCode::Success,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            ExitCode::from_error(&e)
        }
    }
}

/// Execute the CLI command.
async fn execute_command(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Worker {
            queue_url,
            max_in_flight,
            health_port,
            max_empty_polls,
        } => {
            let mut config = load_config(&cli.config)?;
            if let Some(url) = queue_url {
                config.queue.url = url;
            }
            if let Some(n) = max_in_flight {
                config.worker.max_in_flight = n;
            }
            if let Some(port) = health_port {
                config.monitoring.health_port = port;
            }
            if max_empty_polls.is_some() {
                config.worker.max_empty_polls = max_empty_polls;
            }
            config.validate()?;
            commands::worker::run(config).await?;
        }

        Commands::SendTest { file, key } => {
            let config = load_config(&cli.config)?;
            commands::send_test::run(config, file.as_deref(), key).await?;
        }

        Commands::Status { url } => {
            commands::status::run(&url).await?;
        }

        Commands::Inspect { json } => {
            let config = load_config(&cli.config)?;
            commands::inspect::run(config, json).await?;
        }

        Commands::Catalog { action } => {
            let config = load_config(&cli.config)?;
            match action {
                CatalogAction::Sync { since } => {
                    commands::catalog::sync(config, since).await?;
                }
                CatalogAction::List => {
                    commands::catalog::list(config).await?;
                }
            }
        }

        Commands::Validate => {
            let config = load_config(&cli.config)?;
            commands::validate::run(&config)?;
        }

        Commands::Convert {
            input,
            output,
            max_skip_ratio,
        } => {
            let processing = match &cli.config {
                Some(_) => load_config(&cli.config)?.processing,
                None => Default::default(),
            };
            commands::convert::run(processing, &input, output, max_skip_ratio)?;
        }
    }

    Ok(())
}

fn load_config(path: &Option<PathBuf>) -> Result<Config> {
    let path = path.clone().unwrap_or_else(|| PathBuf::from("config.toml"));

    let content = std::fs::read_to_string(&path)
        .map_err(|e| CoreError::Config(format!("cannot read {}: {e}", path.display())))?;
    let config: Config = toml::from_str(&content).map_err(CoreError::from)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use q2p_core::error::StorageError;

    #[test]
    fn test_exit_code_from_core_error() {
        let err = anyhow::Error::from(CoreError::Config("bad".into()));
        assert_eq!(ExitCode::from_error(&err), ExitCode::ConfigError);

        let err = anyhow::Error::from(CoreError::from(StorageError::AccessDenied {
            path: "processed/".into(),
            message: "403".into(),
        }));
        assert_eq!(ExitCode::from_error(&err), ExitCode::AccessDenied);
    }

    #[test]
    fn test_exit_code_from_message() {
        let err = anyhow::anyhow!("health endpoint unreachable");
        assert_eq!(ExitCode::from_error(&err), ExitCode::HealthCheckError);
        assert_eq!(
            ExitCode::from_error(&anyhow::anyhow!("boom")),
            ExitCode::RuntimeError
        );
    }

    #[test]
    fn test_cli_parses_catalog_sync() {
        let cli = Cli::try_parse_from([
            "q2p",
            "catalog",
            "sync",
            "--since",
            "2026-10-01T00:00:00Z",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Catalog {
                action: CatalogAction::Sync { since: Some(_) }
            }
        ));
    }

    #[test]
    fn test_cli_parses_send_test_and_worker_exit() {
        let cli = Cli::try_parse_from(["q2p", "send-test", "--key", "raw/sample.jsonl"]).unwrap();
        match cli.command {
            Commands::SendTest { file, key } => {
                assert!(file.is_none());
                assert_eq!(key.as_deref(), Some("raw/sample.jsonl"));
            }
            _ => panic!("expected send-test"),
        }

        let cli = Cli::try_parse_from(["q2p", "worker", "--max-empty-polls", "3"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Worker {
                max_empty_polls: Some(3),
                ..
            }
        ));
    }
}
