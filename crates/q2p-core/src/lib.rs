//! Q2P Core - queue-driven JSON lines to Parquet ingestion
//!
//! This library provides the core functionality for a worker that reacts to
//! object-created notifications and publishes query-ready data:
//!
//! - Leased, at-least-once consumption from SQS (or an in-memory queue)
//! - JSON lines to Parquet conversion with schema inference
//! - Idempotent artifact naming under date partitions
//! - Glue catalog registration with monotonic schema evolution
//! - Acknowledgment strictly after the artifact is cataloged

pub mod aws;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod convert;
pub mod error;
pub mod health;
pub mod inspect;
pub mod layout;
pub mod metrics;
pub mod queue;
pub mod schema;
pub mod storage;
pub mod worker;

// Re-export commonly used types
pub use config::Config;
pub use error::{CatalogError, ConversionError, NotificationError, QueueError, StorageError};
pub use error::{Error, ErrorClass, Result};
pub use worker::{IngestionWorker, WorkerSummary};
