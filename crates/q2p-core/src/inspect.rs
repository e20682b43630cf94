//! Read-only view of the pipeline for operators.

use crate::config::Config;
use crate::layout::PathLayout;
use crate::queue::{create_queue, QueueDepth, QueueGateway};
use crate::storage::{count_objects, BlobStore, ObjectStoreGateway};
use crate::worker::{FailureLedger, FailureRecord};
use crate::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Point-in-time pipeline state.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineReport {
    pub generated_at: DateTime<Utc>,
    /// Objects under the raw prefix of the source store
    pub raw_objects: u64,
    /// Artifacts under the processed prefix of the destination store
    pub processed_objects: u64,
    pub queue: QueueDepth,
    /// Lifetime failure counts by reason
    pub failure_counts: BTreeMap<&'static str, u64>,
    /// Most recent failures, newest first
    pub recent_failures: Vec<FailureRecord>,
}

/// Queries counts, queue depth and recent failures.
///
/// Without a failure ledger (a process other than the worker) the failure
/// fields are empty.
pub struct PipelineInspector {
    layout: PathLayout,
    queue: Arc<dyn QueueGateway>,
    source: Arc<dyn BlobStore>,
    destination: Arc<dyn BlobStore>,
    failures: Option<Arc<FailureLedger>>,
}

impl PipelineInspector {
    pub fn new(
        layout: PathLayout,
        queue: Arc<dyn QueueGateway>,
        source: Arc<dyn BlobStore>,
        destination: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            layout,
            queue,
            source,
            destination,
            failures: None,
        }
    }

    /// Build gateways from configuration, without a failure ledger.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let queue = create_queue(&config.queue).await?;
        let source = ObjectStoreGateway::from_url(&config.storage.source, &config.storage)?;
        let destination =
            ObjectStoreGateway::from_url(&config.storage.destination, &config.storage)?;

        Ok(Self::new(
            PathLayout::from_config(config)?,
            queue,
            Arc::new(source),
            Arc::new(destination),
        ))
    }

    pub fn with_failure_ledger(mut self, failures: Arc<FailureLedger>) -> Self {
        self.failures = Some(failures);
        self
    }

    pub async fn raw_object_count(&self) -> Result<u64> {
        count_objects(self.source.as_ref(), self.layout.raw_prefix()).await
    }

    pub async fn processed_object_count(&self) -> Result<u64> {
        count_objects(self.destination.as_ref(), self.layout.processed_prefix()).await
    }

    pub async fn queue_depth(&self) -> Result<QueueDepth> {
        self.queue.depth().await
    }

    pub fn recent_failures(&self, limit: usize) -> Vec<FailureRecord> {
        self.failures
            .as_ref()
            .map(|ledger| ledger.recent(limit))
            .unwrap_or_default()
    }

    pub fn failure_counts(&self) -> BTreeMap<&'static str, u64> {
        self.failures
            .as_ref()
            .map(|ledger| ledger.counts())
            .unwrap_or_default()
    }

    /// Gather everything into one report.
    pub async fn report(&self, failure_limit: usize) -> Result<PipelineReport> {
        let (raw_objects, processed_objects, queue) = tokio::try_join!(
            self.raw_object_count(),
            self.processed_object_count(),
            self.queue_depth()
        )?;

        Ok(PipelineReport {
            generated_at: Utc::now(),
            raw_objects,
            processed_objects,
            queue,
            failure_counts: self.failure_counts(),
            recent_failures: self.recent_failures(failure_limit),
        })
    }
}
