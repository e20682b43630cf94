//! Worker orchestration.
//!
//! A single receive loop feeds up to `max_in_flight` tokio tasks gated by a
//! semaphore. The loop asks the queue for no more records than there are
//! free slots, so the number of leased records never exceeds the cap.

use super::failures::{FailureLedger, FailureRecord};
use super::task::{
    ArtifactSummary, Disposition, FailureReason, IngestionTask, RecordReport, TaskOutcome,
    TaskReport, TaskState,
};
use crate::catalog::{create_catalog, CatalogRegistrar, RegistrationOutcome};
use crate::config::Config;
use crate::convert::FormatConverter;
use crate::error::{CatalogError, ConversionError, Error, ErrorClass};
use crate::health::{component, HealthCheck, WorkerPhase};
use crate::inspect::PipelineInspector;
use crate::layout::PathLayout;
use crate::metrics::IngestionMetrics;
use crate::queue::{
    create_queue, parse_notification, ObjectRef, QueueGateway, RawRecord, RetryConfig,
};
use crate::schema::{ColumnType, TableSchema};
use crate::storage::{BlobStore, ObjectStoreGateway, PARQUET_CONTENT_TYPE};
use crate::Result;
use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Counts of what happened to records during one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub records: u64,
    pub acknowledged: u64,
    pub released: u64,
    pub interrupted: u64,
    pub unsettled: u64,
    /// Slots still running when the shutdown timeout expired
    pub aborted: u64,
}

impl WorkerSummary {
    fn observe(&mut self, joined: std::result::Result<RecordReport, JoinError>) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                if e.is_panic() {
                    error!(error = %e, "Ingestion slot panicked");
                }
                self.aborted += 1;
                return;
            }
        };

        self.records += 1;
        match report.disposition {
            Disposition::Acknowledged => self.acknowledged += 1,
            Disposition::Released { .. } => self.released += 1,
            Disposition::Interrupted | Disposition::Halted => self.interrupted += 1,
            Disposition::Unsettled { .. } => self.unsettled += 1,
        }
    }
}

/// Decrements the in-flight gauge even when a slot is aborted.
struct InFlight<'a>(&'a IngestionMetrics);

impl<'a> InFlight<'a> {
    fn enter(metrics: &'a IngestionMetrics) -> Self {
        metrics.task_started();
        Self(metrics)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.task_finished();
    }
}

/// Event-driven ingestion worker.
pub struct IngestionWorker {
    layout: PathLayout,
    queue: Arc<dyn QueueGateway>,
    source: Arc<dyn BlobStore>,
    destination: Arc<dyn BlobStore>,
    catalog: Arc<dyn CatalogRegistrar>,
    converter: FormatConverter,
    retry: RetryConfig,
    metrics: Arc<IngestionMetrics>,
    health: Arc<HealthCheck>,
    failures: Arc<FailureLedger>,
    max_in_flight: usize,
    max_messages: usize,
    wait_time: Duration,
    shutdown_timeout: Duration,
    max_empty_polls: Option<u32>,
    /// First systemic error; returned by `run`
    halt_error: Mutex<Option<Error>>,
    /// Cancelled on a systemic error; closes intake
    halted: CancellationToken,
}

impl IngestionWorker {
    /// Create a worker over already constructed gateways.
    pub fn new(
        config: &Config,
        queue: Arc<dyn QueueGateway>,
        source: Arc<dyn BlobStore>,
        destination: Arc<dyn BlobStore>,
        catalog: Arc<dyn CatalogRegistrar>,
    ) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            layout: PathLayout::from_config(config)?,
            queue,
            source,
            destination,
            catalog,
            converter: FormatConverter::new(&config.processing),
            retry: RetryConfig::from(&config.worker.retry),
            metrics: Arc::new(IngestionMetrics::new()),
            health: Arc::new(HealthCheck::for_worker()),
            failures: Arc::new(FailureLedger::new(config.worker.failure_history)),
            max_in_flight: config.worker.max_in_flight,
            max_messages: config.queue.max_messages.max(1),
            wait_time: config.queue.wait_time(),
            shutdown_timeout: config.worker.shutdown_timeout(),
            max_empty_polls: config.worker.max_empty_polls,
            halt_error: Mutex::new(None),
            halted: CancellationToken::new(),
        })
    }

    /// Build every gateway from configuration.
    pub async fn from_config(config: &Config) -> Result<Self> {
        config.validate()?;

        let queue = create_queue(&config.queue).await?;
        let source = Arc::new(ObjectStoreGateway::from_url(
            &config.storage.source,
            &config.storage,
        )?);
        let destination = Arc::new(ObjectStoreGateway::from_url(
            &config.storage.destination,
            &config.storage,
        )?);
        let catalog = create_catalog(config).await?;

        info!(
            queue = %queue.name(),
            source = %source.bucket(),
            destination = %destination.bucket(),
            catalog = %catalog.name(),
            "Ingestion worker initialized"
        );

        Self::new(config, queue, source, destination, catalog)
    }

    pub fn with_metrics(mut self, metrics: Arc<IngestionMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_health(mut self, health: Arc<HealthCheck>) -> Self {
        for name in component::ALL {
            if health.get_component_status(name).is_none() {
                health.register_component(name);
            }
        }
        self.health = health;
        self
    }

    pub fn with_failure_ledger(mut self, failures: Arc<FailureLedger>) -> Self {
        self.failures = failures;
        self
    }

    /// Replace the backoff policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> &Arc<IngestionMetrics> {
        &self.metrics
    }

    pub fn health(&self) -> &Arc<HealthCheck> {
        &self.health
    }

    pub fn failures(&self) -> &Arc<FailureLedger> {
        &self.failures
    }

    pub fn layout(&self) -> &PathLayout {
        &self.layout
    }

    pub fn queue(&self) -> Arc<dyn QueueGateway> {
        Arc::clone(&self.queue)
    }

    /// Read-only view over this worker's gateways and failure ledger.
    pub fn inspector(&self) -> PipelineInspector {
        PipelineInspector::new(
            self.layout.clone(),
            Arc::clone(&self.queue),
            Arc::clone(&self.source),
            Arc::clone(&self.destination),
        )
        .with_failure_ledger(Arc::clone(&self.failures))
    }

    /// Receive and process records until `shutdown` is cancelled, a
    /// systemic fault halts intake, or `max_empty_polls` consecutive
    /// receives come back empty.
    ///
    /// In-flight records get `shutdown_timeout` to finish; slots still
    /// running after that are aborted and their records reappear once the
    /// visibility timeout lapses. Returns the halting error, if any.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) -> Result<WorkerSummary> {
        let intake = shutdown.child_token();
        let slots = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks: JoinSet<RecordReport> = JoinSet::new();
        let mut summary = WorkerSummary::default();
        let mut receive_failures = 0u32;
        let mut empty_polls = 0u32;

        self.health.set_phase(WorkerPhase::Running);
        info!(
            queue = %self.queue.name(),
            max_in_flight = self.max_in_flight,
            "Ingestion worker started"
        );

        loop {
            while let Some(joined) = tasks.try_join_next() {
                summary.observe(joined);
            }

            let first = tokio::select! {
                biased;
                _ = intake.cancelled() => break,
                _ = self.halted.cancelled() => break,
                permit = Arc::clone(&slots).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };
            let mut permits = vec![first];
            while permits.len() < self.max_messages {
                match Arc::clone(&slots).try_acquire_owned() {
                    Ok(permit) => permits.push(permit),
                    Err(_) => break,
                }
            }

            let received = tokio::select! {
                biased;
                _ = intake.cancelled() => break,
                _ = self.halted.cancelled() => break,
                result = self.queue.receive(permits.len(), self.wait_time) => result,
            };

            let records = match received {
                Ok(records) => {
                    receive_failures = 0;
                    self.health.mark_healthy(component::QUEUE);
                    records
                }
                Err(e) if e.is_access_denied() => {
                    self.halt(component::QUEUE, e);
                    break;
                }
                Err(e) => {
                    self.metrics.record_receive_error();
                    self.health
                        .mark_degraded(component::QUEUE, &format!("Receive failed: {e}"));
                    let delay = self.retry.calculate_delay(receive_failures);
                    receive_failures = receive_failures.saturating_add(1);
                    warn!(error = %e, delay_ms = delay.as_millis() as u64, "Queue receive failed");

                    tokio::select! {
                        _ = intake.cancelled() => break,
                        _ = self.halted.cancelled() => break,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            if records.is_empty() {
                empty_polls = empty_polls.saturating_add(1);
                if self.max_empty_polls.is_some_and(|limit| empty_polls >= limit) {
                    info!(empty_polls, "No records left, stopping intake");
                    break;
                }
                // A zero wait time returns immediately; let slots progress.
                tokio::task::yield_now().await;
                continue;
            }
            empty_polls = 0;
            self.metrics.record_received(records.len());
            debug!(count = records.len(), "Received records");

            for (record, permit) in records.into_iter().zip(permits) {
                let worker = Arc::clone(&self);
                let cancel = shutdown.clone();
                tasks.spawn(async move {
                    let _permit = permit;
                    worker.process_record(record, &cancel).await
                });
            }
        }

        self.health.set_phase(WorkerPhase::Draining);
        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Draining in-flight records");
        }

        let drained =
            tokio::time::timeout(self.shutdown_timeout, drain(&mut tasks, &mut summary)).await;
        if drained.is_err() {
            warn!(
                remaining = tasks.len(),
                timeout_secs = self.shutdown_timeout.as_secs(),
                "Shutdown timeout exceeded, aborting remaining slots"
            );
            tasks.abort_all();
            drain(&mut tasks, &mut summary).await;
        }

        self.health.set_phase(WorkerPhase::Stopped);
        info!(
            records = summary.records,
            acknowledged = summary.acknowledged,
            released = summary.released,
            interrupted = summary.interrupted,
            aborted = summary.aborted,
            "Ingestion worker stopped"
        );

        match self.halt_error.lock().take() {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// Drive one queue record to its final state and settle it.
    pub async fn process_record(
        &self,
        record: RawRecord,
        cancel: &CancellationToken,
    ) -> RecordReport {
        let span = info_span!(
            "record",
            message_id = %record.message_id,
            delivery = record.delivery_count
        );

        async {
            let started = Instant::now();
            let _in_flight = InFlight::enter(&self.metrics);

            let tasks = match parse_notification(&record.body, self.source.bucket()) {
                Ok(objects) => self.process_objects(&record, objects, cancel).await,
                Err(e) => {
                    let reason = FailureReason::MalformedNotification;
                    vec![TaskReport {
                        source_key: None,
                        trace: vec![TaskState::Received, TaskState::Failed(reason)],
                        outcome: TaskOutcome::Failed {
                            reason,
                            detail: e.to_string(),
                        },
                    }]
                }
            };

            let report = self.settle(record, tasks).await;
            self.metrics.record_task_duration(started.elapsed());
            report
        }
        .instrument(span)
        .await
    }

    async fn process_objects(
        &self,
        record: &RawRecord,
        objects: Vec<ObjectRef>,
        cancel: &CancellationToken,
    ) -> Vec<TaskReport> {
        let mut reports = Vec::with_capacity(objects.len());

        for object in objects {
            let source_key = object.key.clone();
            let mut trace = vec![TaskState::Received];

            let outcome = match IngestionTask::plan(record, object, self.source.bucket(), &self.layout)
            {
                Ok(task) => {
                    trace.push(TaskState::Parsed);
                    self.process_task(&task, &mut trace, cancel)
                        .instrument(info_span!("task", source_key = %task.source.key))
                        .await
                }
                Err(e) => {
                    let reason = FailureReason::MalformedNotification;
                    trace.push(TaskState::Failed(reason));
                    TaskOutcome::Failed {
                        reason,
                        detail: e.to_string(),
                    }
                }
            };

            let stop = matches!(
                outcome,
                TaskOutcome::Halted { .. } | TaskOutcome::Interrupted
            );
            reports.push(TaskReport {
                source_key: Some(source_key),
                trace,
                outcome,
            });
            if stop {
                break;
            }
        }

        reports
    }

    async fn process_task(
        &self,
        task: &IngestionTask,
        trace: &mut Vec<TaskState>,
        cancel: &CancellationToken,
    ) -> TaskOutcome {
        if cancel.is_cancelled() {
            return TaskOutcome::Interrupted;
        }
        let raw = match self.source.get(&task.source.key).await {
            Ok(raw) => {
                self.health.mark_healthy(component::SOURCE_STORE);
                raw
            }
            Err(e) => return self.task_error(component::SOURCE_STORE, e, trace),
        };
        trace.push(TaskState::Downloaded);
        debug!(bytes = raw.len(), state = "downloaded", "Source downloaded");

        if cancel.is_cancelled() {
            return TaskOutcome::Interrupted;
        }
        let registered = match self.catalog.get_table(&task.table_name).await {
            Ok(entry) => entry.map(|entry| entry.schema).unwrap_or_default(),
            Err(e) => return self.task_error(component::CATALOG, e, trace),
        };
        let converter = self.converter.clone();
        let format = task.format;
        let converted = tokio::task::spawn_blocking(move || {
            converter.convert_for(&raw, format, &registered)
        })
        .await;
        let artifact = match converted {
            Ok(Ok(artifact)) => {
                self.health.mark_healthy(component::CONVERTER);
                artifact
            }
            Ok(Err(e)) => return self.task_error(component::CONVERTER, e.into(), trace),
            Err(e) => {
                let e = ConversionError::Aborted(e.to_string());
                return self.task_error(component::CONVERTER, e.into(), trace);
            }
        };
        trace.push(TaskState::Converted);
        let byte_size = artifact.byte_size();
        debug!(
            rows = artifact.row_count,
            skipped = artifact.skipped_lines,
            bytes = byte_size,
            state = "converted",
            "Converted to Parquet"
        );

        if cancel.is_cancelled() {
            return TaskOutcome::Interrupted;
        }
        if let Err(e) = self
            .destination
            .put(
                &task.destination_key,
                artifact.payload.clone(),
                PARQUET_CONTENT_TYPE,
            )
            .await
        {
            return self.task_error(component::DESTINATION_STORE, e, trace);
        }
        self.health.mark_healthy(component::DESTINATION_STORE);
        self.metrics
            .record_conversion(artifact.row_count, artifact.skipped_lines, byte_size);
        trace.push(TaskState::Uploaded);
        debug!(destination_key = %task.destination_key, state = "uploaded", "Artifact uploaded");

        if cancel.is_cancelled() {
            return TaskOutcome::Interrupted;
        }
        if let Err(e) = self.catalog_artifact(task, &artifact.schema).await {
            if let Error::Catalog(CatalogError::SchemaConflict {
                column, existing, ..
            }) = &e
            {
                // The table gained the column after it was read above.
                let adapts = ColumnType::from_glue_type(existing)
                    .is_some_and(|registered| artifact.adapts_to(column, registered));
                if adapts {
                    info!(
                        column = %column,
                        registered = %existing,
                        "Table changed during conversion, retrying"
                    );
                    self.metrics.record_retryable_error();
                    return TaskOutcome::Retry {
                        component: component::CATALOG,
                        detail: e.to_string(),
                    };
                }
            }
            return self.task_error(component::CATALOG, e, trace);
        }
        self.health.mark_healthy(component::CATALOG);
        trace.push(TaskState::Cataloged);

        TaskOutcome::Cataloged(ArtifactSummary {
            destination_key: task.destination_key.clone(),
            table_name: task.table_name.clone(),
            row_count: artifact.row_count,
            skipped_lines: artifact.skipped_lines,
            byte_size,
        })
    }

    async fn catalog_artifact(
        &self,
        task: &IngestionTask,
        schema: &TableSchema,
    ) -> Result<()> {
        let outcome = self
            .catalog
            .register(&task.table_name, &task.table_location, schema)
            .await?;

        match &outcome {
            RegistrationOutcome::Created => {
                self.metrics.record_table_created();
                info!(table = %task.table_name, columns = schema.len(), "Catalog table created");
            }
            RegistrationOutcome::Extended { added } => {
                self.metrics.record_schema_extension();
                info!(table = %task.table_name, added = added.len(), "Catalog schema extended");
            }
            RegistrationOutcome::Unchanged => {}
        }

        self.catalog
            .add_partition(
                &task.table_name,
                &task.partition_values,
                &task.partition_location,
            )
            .await
    }

    /// Map a step error onto the task's outcome.
    fn task_error(
        &self,
        component: &'static str,
        error: Error,
        trace: &mut Vec<TaskState>,
    ) -> TaskOutcome {
        let detail = error.to_string();

        if error.is_access_denied() {
            trace.push(TaskState::Failed(FailureReason::AccessDenied));
            self.halt_error.lock().get_or_insert(error);
            return TaskOutcome::Halted { component, detail };
        }

        match (error.class(), FailureReason::of(&error)) {
            (ErrorClass::Terminal, Some(reason)) => {
                trace.push(TaskState::Failed(reason));
                TaskOutcome::Failed { reason, detail }
            }
            (ErrorClass::Systemic, _) => {
                self.health.mark_unhealthy(component, &detail);
                self.metrics.record_retryable_error();
                TaskOutcome::Retry { component, detail }
            }
            _ => {
                self.health.mark_degraded(component, &detail);
                self.metrics.record_retryable_error();
                TaskOutcome::Retry { component, detail }
            }
        }
    }

    /// Acknowledge, release or hold the record according to its tasks.
    async fn settle(&self, record: RawRecord, mut tasks: Vec<TaskReport>) -> RecordReport {
        let halted = tasks.iter().find_map(|task| match &task.outcome {
            TaskOutcome::Halted { component, detail } => Some((*component, detail.clone())),
            _ => None,
        });
        let interrupted = tasks
            .iter()
            .any(|task| task.outcome == TaskOutcome::Interrupted);
        let retry = tasks
            .iter()
            .any(|task| matches!(task.outcome, TaskOutcome::Retry { .. }));

        let disposition = if let Some((component, detail)) = halted {
            error!(component, error = %detail, "Access denied, halting intake");
            self.health.halt(component, &detail);
            self.halted.cancel();
            self.record_failures(&record, &tasks);
            self.release(&record, Duration::ZERO, Disposition::Halted)
                .await
        } else if interrupted {
            info!("Interrupted by shutdown, releasing");
            self.release(&record, Duration::ZERO, Disposition::Interrupted)
                .await
        } else if retry {
            let delay = self.retry.release_delay(record.delivery_count);
            self.release(&record, delay, Disposition::Released { delay })
                .await
        } else {
            match self.queue.acknowledge(&record.lease).await {
                Ok(()) => {
                    self.metrics.record_acknowledged();
                    for task in &mut tasks {
                        if let TaskOutcome::Cataloged(artifact) = &task.outcome {
                            task.trace.push(TaskState::Acknowledged);
                            self.metrics.record_completed();
                            info!(
                                destination_key = %artifact.destination_key,
                                table = %artifact.table_name,
                                rows = artifact.row_count,
                                state = "acknowledged",
                                "Object ingested"
                            );
                        }
                    }
                    self.record_failures(&record, &tasks);
                    Disposition::Acknowledged
                }
                Err(e) => self.unsettled(e),
            }
        };

        RecordReport {
            message_id: record.message_id,
            delivery_count: record.delivery_count,
            tasks,
            disposition,
        }
    }

    async fn release(
        &self,
        record: &RawRecord,
        delay: Duration,
        disposition: Disposition,
    ) -> Disposition {
        match self.queue.release(&record.lease, delay).await {
            Ok(()) => {
                self.metrics.record_released();
                debug!(delay_ms = delay.as_millis() as u64, "Record released");
                disposition
            }
            Err(e) => self.unsettled(e),
        }
    }

    fn unsettled(&self, error: Error) -> Disposition {
        warn!(error = %error, "Could not settle record, it will reappear after its visibility timeout");
        let detail = error.to_string();
        if error.is_access_denied() {
            self.halt(component::QUEUE, error);
        } else {
            self.health.mark_degraded(component::QUEUE, &detail);
        }
        Disposition::Unsettled { detail }
    }

    fn record_failures(&self, record: &RawRecord, tasks: &[TaskReport]) {
        for task in tasks {
            let (reason, detail) = match &task.outcome {
                TaskOutcome::Failed { reason, detail } => (*reason, detail),
                TaskOutcome::Halted { detail, .. } => (FailureReason::AccessDenied, detail),
                _ => continue,
            };

            warn!(
                source_key = task.source_key.as_deref().unwrap_or("-"),
                reason = %reason,
                error = %detail,
                "Task failed"
            );
            self.metrics.record_failure(reason);
            self.failures.record(FailureRecord {
                source_key: task.source_key.clone(),
                message_id: record.message_id.clone(),
                reason,
                detail: detail.clone(),
                recorded_at: Utc::now(),
            });
        }
    }

    fn halt(&self, component: &str, error: Error) {
        error!(component, error = %error, "Systemic failure, halting intake");
        self.health.halt(component, &error.to_string());
        self.halt_error.lock().get_or_insert(error);
        self.halted.cancel();
    }
}

async fn drain(tasks: &mut JoinSet<RecordReport>, summary: &mut WorkerSummary) {
    while let Some(joined) = tasks.join_next().await {
        summary.observe(joined);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::config::tests::test_config;
    use crate::queue::{InMemoryQueue, QueueGateway};
    use crate::storage::ObjectStoreGateway;
    use bytes::Bytes;
    use object_store::PutPayload;

    struct Fixture {
        queue: Arc<InMemoryQueue>,
        source: Arc<ObjectStoreGateway>,
        destination: Arc<ObjectStoreGateway>,
        catalog: Arc<InMemoryCatalog>,
        worker: IngestionWorker,
    }

    fn fixture() -> Fixture {
        let config = test_config();
        let queue = Arc::new(InMemoryQueue::new("q", Duration::from_secs(30)));
        let source = Arc::new(ObjectStoreGateway::in_memory("raw-bucket"));
        let destination = Arc::new(ObjectStoreGateway::in_memory("processed-bucket"));
        let catalog = Arc::new(InMemoryCatalog::new());
        let worker = IngestionWorker::new(
            &config,
            queue.clone(),
            source.clone(),
            destination.clone(),
            catalog.clone(),
        )
        .unwrap()
        .with_retry(
            RetryConfig::new(Duration::from_millis(10), Duration::from_millis(100)).without_jitter(),
        );

        Fixture {
            queue,
            source,
            destination,
            catalog,
            worker,
        }
    }

    async fn put_raw(store: &ObjectStoreGateway, key: &str, body: &str) {
        store
            .put(key, PutPayload::from(Bytes::from(body.to_string())), "application/x-ndjson")
            .await
            .unwrap();
    }

    async fn next_record(queue: &InMemoryQueue) -> RawRecord {
        queue
            .receive(1, Duration::ZERO)
            .await
            .unwrap()
            .pop()
            .unwrap()
    }

    #[tokio::test]
    async fn test_record_walks_every_state() {
        let f = fixture();
        put_raw(&f.source, "raw/a.jsonl", "{\"id\":1}\n{\"id\":2}\n").await;
        f.queue.publish("raw/a.jsonl");

        let record = next_record(&f.queue).await;
        let report = f
            .worker
            .process_record(record, &CancellationToken::new())
            .await;

        assert!(report.is_acknowledged());
        assert_eq!(
            report.tasks[0].trace,
            vec![
                TaskState::Received,
                TaskState::Parsed,
                TaskState::Downloaded,
                TaskState::Converted,
                TaskState::Uploaded,
                TaskState::Cataloged,
                TaskState::Acknowledged,
            ]
        );
        assert_eq!(f.catalog.len(), 1);
        assert_eq!(f.worker.metrics().tasks_completed_total(), 1);
        assert_eq!(f.worker.metrics().tasks_in_flight(), 0);

        let TaskOutcome::Cataloged(artifact) = &report.tasks[0].outcome else {
            panic!("expected a cataloged artifact");
        };
        assert!(f.destination.exists(&artifact.destination_key).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_source_is_acknowledged_and_recorded() {
        let f = fixture();
        f.queue.publish("raw/gone.jsonl");

        let record = next_record(&f.queue).await;
        let report = f
            .worker
            .process_record(record, &CancellationToken::new())
            .await;

        assert!(report.is_acknowledged());
        assert_eq!(
            report.tasks[0].final_state(),
            Some(TaskState::Failed(FailureReason::SourceMissing))
        );
        assert_eq!(f.worker.failures().count(FailureReason::SourceMissing), 1);
        assert!(f.catalog.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_record_is_released_immediately() {
        let f = fixture();
        put_raw(&f.source, "raw/a.jsonl", "{\"id\":1}\n").await;
        f.queue.publish("raw/a.jsonl");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let record = next_record(&f.queue).await;
        let report = f.worker.process_record(record, &cancel).await;

        assert_eq!(report.disposition, Disposition::Interrupted);
        assert_eq!(report.tasks[0].final_state(), Some(TaskState::Parsed));
        assert_eq!(f.queue.total_acknowledgments(), 0);
        assert_eq!(f.queue.len(), 1);
        assert!(!f.queue.receive(1, Duration::ZERO).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_cancellation() {
        let f = fixture();
        let worker = Arc::new(f.worker);
        let shutdown = CancellationToken::new();

        let handle = tokio::spawn(Arc::clone(&worker).run(shutdown.clone()));
        shutdown.cancel();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary, WorkerSummary::default());
        assert_eq!(worker.health().phase(), WorkerPhase::Stopped);
    }
}
