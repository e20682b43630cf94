//! Configuration structures for q2p.
//!
//! Configuration is loaded from TOML files and can be overridden via CLI flags.
//! The resulting [`Config`] is immutable and handed to the worker at
//! construction.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Queue configuration
    pub queue: QueueConfig,

    /// Source and destination stores
    pub storage: StorageConfig,

    /// Conversion and layout configuration
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Worker concurrency and retry configuration
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Monitoring configuration
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

/// Notification queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct QueueConfig {
    /// Queue URL (`https://sqs...` or `memory://name`)
    pub url: String,

    /// AWS region for the queue
    pub region: Option<String>,

    /// Long-poll wait in seconds (SQS allows at most 20)
    #[serde(default = "default_wait_time_seconds")]
    pub wait_time_seconds: u64,

    /// Maximum messages per receive call (SQS allows at most 10)
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    /// Visibility timeout applied to leased messages
    #[serde(default = "default_visibility_timeout_seconds")]
    pub visibility_timeout_seconds: u64,
}

impl QueueConfig {
    /// Long-poll wait as a duration.
    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_seconds)
    }

    /// Visibility timeout as a duration.
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }
}

/// Object store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Store holding raw input (`s3://bucket`, `memory://name` or a local path)
    pub source: String,

    /// Store receiving Parquet artifacts
    pub destination: String,

    /// Namespace for unprocessed input
    #[serde(default = "default_raw_prefix")]
    pub raw_prefix: String,

    /// Namespace for converted artifacts
    #[serde(default = "default_processed_prefix")]
    pub processed_prefix: String,

    /// AWS region
    pub region: Option<String>,

    /// S3 endpoint (for MinIO or other S3-compatible storage)
    pub endpoint: Option<String>,

    /// AWS access key ID
    pub access_key_id: Option<String>,

    /// AWS secret access key
    pub secret_access_key: Option<String>,

    /// Allow plain HTTP endpoints
    #[serde(default)]
    pub allow_http: bool,

    /// Payloads larger than this are uploaded with multipart upload
    #[serde(default = "default_multipart_threshold_bytes")]
    pub multipart_threshold_bytes: usize,
}

/// Conversion and output layout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProcessingConfig {
    /// strftime pattern for the processing-date partition path
    #[serde(default = "default_partition_format")]
    pub partition_format: String,

    /// strftime pattern for the catalog table name
    #[serde(default = "default_table_name_format")]
    pub table_name_format: String,

    /// Abort conversion when the unparseable fraction exceeds this
    #[serde(default = "default_max_skip_ratio")]
    pub max_skip_ratio: f64,

    /// Parquet compression
    #[serde(default)]
    pub compression: ParquetCompression,

    /// Maximum rows per Parquet row group
    #[serde(default = "default_row_group_size")]
    pub row_group_size: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            partition_format: default_partition_format(),
            table_name_format: default_table_name_format(),
            max_skip_ratio: default_max_skip_ratio(),
            compression: ParquetCompression::default(),
            row_group_size: default_row_group_size(),
        }
    }
}

/// Parquet compression codec.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum ParquetCompression {
    /// Snappy compression (default, good balance)
    #[default]
    Snappy,
    /// Zstd compression (better ratio)
    Zstd,
    /// LZ4 compression (faster)
    Lz4,
    /// Gzip compression
    Gzip,
    /// No compression
    None,
}

/// Catalog configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CatalogConfig {
    /// Catalog backend
    #[serde(default)]
    pub catalog_type: CatalogType,

    /// Database the tables are registered in
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// AWS region (for Glue)
    pub aws_region: Option<String>,

    /// AWS access key ID
    pub aws_access_key_id: Option<String>,

    /// AWS secret access key
    pub aws_secret_access_key: Option<String>,

    /// Optimistic update attempts before giving up
    #[serde(default = "default_catalog_max_attempts")]
    pub max_attempts: u32,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            catalog_type: CatalogType::default(),
            database_name: default_database_name(),
            aws_region: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            max_attempts: default_catalog_max_attempts(),
        }
    }
}

/// Catalog backend type.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum CatalogType {
    /// AWS Glue Data Catalog
    #[default]
    Glue,
    /// Process-local catalog (local runs and tests)
    Memory,
}

/// Worker concurrency configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WorkerConfig {
    /// Maximum concurrently leased messages
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Time allowed for in-flight tasks to finish on shutdown
    #[serde(default = "default_shutdown_timeout_seconds")]
    pub shutdown_timeout_seconds: u64,

    /// Number of recent failures kept for inspection
    #[serde(default = "default_failure_history")]
    pub failure_history: usize,

    /// Stop after this many consecutive empty receives (run until cancelled when unset)
    #[serde(default)]
    pub max_empty_polls: Option<u32>,

    /// Backoff applied when releasing records after transient failures
    #[serde(default)]
    pub retry: RetrySettings,
}

impl WorkerConfig {
    /// Shutdown drain timeout as a duration.
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_seconds)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_in_flight: default_max_in_flight(),
            shutdown_timeout_seconds: default_shutdown_timeout_seconds(),
            failure_history: default_failure_history(),
            max_empty_polls: None,
            retry: RetrySettings::default(),
        }
    }
}

/// Backoff settings as they appear in the config file.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrySettings {
    /// Delay for the first retry in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound on the delay in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Add ±25% jitter
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter: true,
        }
    }
}

/// Monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    /// Health and metrics HTTP port
    #[serde(default = "default_health_port")]
    pub health_port: u16,

    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log format
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            health_port: default_health_port(),
            log_level: LogLevel::default(),
            log_format: LogFormat::default(),
        }
    }
}

/// Log level.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level
    Trace,
    /// Debug level
    Debug,
    /// Info level (default)
    #[default]
    Info,
    /// Warn level
    Warn,
    /// Error level
    Error,
}

impl LogLevel {
    /// Directive understood by `EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Log format.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (default)
    #[default]
    Json,
    /// Plain text format
    Text,
}

// Default value functions
fn default_wait_time_seconds() -> u64 {
    20
}
fn default_max_messages() -> usize {
    10
}
fn default_visibility_timeout_seconds() -> u64 {
    300
}
fn default_raw_prefix() -> String {
    "raw/".into()
}
fn default_processed_prefix() -> String {
    "processed/".into()
}
fn default_multipart_threshold_bytes() -> usize {
    16 * 1024 * 1024
}
fn default_partition_format() -> String {
    "year=%Y/month=%m/day=%d".into()
}
fn default_table_name_format() -> String {
    "year_%Y".into()
}
fn default_max_skip_ratio() -> f64 {
    0.5
}
fn default_row_group_size() -> usize {
    128 * 1024
}
fn default_database_name() -> String {
    "analytics".into()
}
fn default_catalog_max_attempts() -> u32 {
    3
}
fn default_max_in_flight() -> usize {
    4
}
fn default_shutdown_timeout_seconds() -> u64 {
    30
}
fn default_failure_history() -> usize {
    256
}
fn default_base_delay_ms() -> u64 {
    1_000
}
fn default_max_delay_ms() -> u64 {
    300_000
}
fn default_true() -> bool {
    true
}
fn default_health_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.queue.url.is_empty() {
            return Err(crate::Error::Config("Queue URL is required".into()));
        }

        if self.queue.max_messages == 0 || self.queue.max_messages > 10 {
            return Err(crate::Error::Config(
                "queue.max_messages must be between 1 and 10".into(),
            ));
        }

        if self.queue.wait_time_seconds > 20 {
            return Err(crate::Error::Config(
                "queue.wait_time_seconds must not exceed 20".into(),
            ));
        }

        if self.storage.source.is_empty() {
            return Err(crate::Error::Config("Source store is required".into()));
        }

        // Notification keys are bucket-absolute and cannot be read through a
        // rooted store.
        if let Some(location) = self.storage.source.strip_prefix("s3://") {
            if let Some((_, root)) = location.split_once('/') {
                if !root.trim_matches('/').is_empty() {
                    return Err(crate::Error::Config(format!(
                        "storage.source must name a bucket without a path, got {}; \
                         use storage.raw_prefix for the key namespace",
                        self.storage.source
                    )));
                }
            }
        }

        if self.storage.destination.is_empty() {
            return Err(crate::Error::Config("Destination store is required".into()));
        }

        if self.storage.raw_prefix == self.storage.processed_prefix
            && self.storage.source == self.storage.destination
        {
            return Err(crate::Error::Config(
                "Raw and processed prefixes must differ when sharing a store".into(),
            ));
        }

        let ratio = self.processing.max_skip_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(crate::Error::Config(format!(
                "processing.max_skip_ratio must be in (0, 1], got {ratio}"
            )));
        }

        if self.processing.row_group_size == 0 {
            return Err(crate::Error::Config(
                "processing.row_group_size must be positive".into(),
            ));
        }

        crate::layout::PathLayout::from_config(self)?;

        if self.catalog.database_name.is_empty() {
            return Err(crate::Error::Config("Catalog database name is required".into()));
        }

        if self.worker.max_in_flight == 0 {
            return Err(crate::Error::Config(
                "worker.max_in_flight must be at least 1".into(),
            ));
        }

        if self.worker.max_empty_polls == Some(0) {
            return Err(crate::Error::Config(
                "worker.max_empty_polls must be at least 1 when set".into(),
            ));
        }

        if self.worker.retry.base_delay_ms > self.worker.retry.max_delay_ms {
            tracing::warn!(
                base_delay_ms = self.worker.retry.base_delay_ms,
                max_delay_ms = self.worker.retry.max_delay_ms,
                "Retry base delay exceeds max delay; every retry will use the max"
            );
        }

        Ok(())
    }
}
