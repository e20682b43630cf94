//! Worker metrics and their Prometheus text rendering.

mod prometheus;

pub use prometheus::{IngestionMetrics, TaskDurationHistogram};
