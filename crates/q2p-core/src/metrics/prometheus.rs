//! Prometheus metrics export.

use crate::worker::FailureReason;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Histogram bucket boundaries in milliseconds for task duration.
/// Converts to seconds: [0.1, 0.5, 1, 5, 15, 60, 300]
const TASK_DURATION_BUCKETS_MS: [u64; 7] = [100, 500, 1_000, 5_000, 15_000, 60_000, 300_000];

const PREFIX: &str = "q2p";

/// Ingestion metrics with counters, gauges, and a task duration histogram.
#[derive(Default)]
pub struct IngestionMetrics {
    // === COUNTERS ===
    messages_received_total: AtomicU64,
    messages_acknowledged_total: AtomicU64,
    messages_released_total: AtomicU64,
    objects_converted_total: AtomicU64,
    rows_written_total: AtomicU64,
    lines_skipped_total: AtomicU64,
    bytes_written_total: AtomicU64,
    tables_created_total: AtomicU64,
    schema_extensions_total: AtomicU64,
    retryable_errors_total: AtomicU64,
    tasks_completed_total: AtomicU64,
    receive_errors_total: AtomicU64,
    /// Indexed by `FailureReason::index`
    failures: [AtomicU64; FailureReason::COUNT],

    // === GAUGES ===
    tasks_in_flight: AtomicU64,
    queue_depth: AtomicU64,

    // === HISTOGRAM: task_duration_seconds ===
    task_duration_sum_ms: AtomicU64,
    task_duration_count: AtomicU64,
    /// Buckets: [0.1s, 0.5s, 1s, 5s, 15s, 60s, 300s, +Inf]
    task_duration_buckets: [AtomicU64; 8],
}

/// Snapshot of the task duration histogram.
#[derive(Debug, Clone)]
pub struct TaskDurationHistogram {
    pub sum_seconds: f64,
    pub count: u64,
    /// Cumulative (upper bound in seconds, count) pairs
    pub buckets: Vec<(f64, u64)>,
    pub inf_bucket: u64,
}

impl IngestionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    // === COUNTER RECORDING ===

    pub fn record_received(&self, count: usize) {
        self.messages_received_total
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn record_acknowledged(&self) {
        self.messages_acknowledged_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_released(&self) {
        self.messages_released_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a converted and uploaded object.
    pub fn record_conversion(&self, rows: usize, skipped_lines: usize, bytes: usize) {
        self.objects_converted_total.fetch_add(1, Ordering::Relaxed);
        self.rows_written_total
            .fetch_add(rows as u64, Ordering::Relaxed);
        self.lines_skipped_total
            .fetch_add(skipped_lines as u64, Ordering::Relaxed);
        self.bytes_written_total
            .fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_table_created(&self) {
        self.tables_created_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_schema_extension(&self) {
        self.schema_extensions_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retryable_error(&self) {
        self.retryable_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a task that reached `Acknowledged` after cataloging.
    pub fn record_completed(&self) {
        self.tasks_completed_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, reason: FailureReason) {
        self.failures[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one task took from receive to its final state.
    pub fn record_task_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.task_duration_sum_ms
            .fetch_add(duration_ms, Ordering::Relaxed);
        self.task_duration_count.fetch_add(1, Ordering::Relaxed);

        // Buckets are cumulative (le = less than or equal)
        for (i, &bucket_ms) in TASK_DURATION_BUCKETS_MS.iter().enumerate() {
            if duration_ms <= bucket_ms {
                self.task_duration_buckets[i].fetch_add(1, Ordering::Relaxed);
            }
        }
        self.task_duration_buckets[7].fetch_add(1, Ordering::Relaxed);
    }

    // === GAUGE UPDATES ===

    pub fn task_started(&self) {
        self.tasks_in_flight.fetch_add(1, Ordering::Relaxed);
    }

    pub fn task_finished(&self) {
        let _ = self
            .tasks_in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| v.checked_sub(1));
    }

    pub fn set_queue_depth(&self, depth: u64) {
        self.queue_depth.store(depth, Ordering::Relaxed);
    }

    // === GETTERS ===

    pub fn messages_received_total(&self) -> u64 {
        self.messages_received_total.load(Ordering::Relaxed)
    }

    pub fn messages_acknowledged_total(&self) -> u64 {
        self.messages_acknowledged_total.load(Ordering::Relaxed)
    }

    pub fn messages_released_total(&self) -> u64 {
        self.messages_released_total.load(Ordering::Relaxed)
    }

    pub fn objects_converted_total(&self) -> u64 {
        self.objects_converted_total.load(Ordering::Relaxed)
    }

    pub fn rows_written_total(&self) -> u64 {
        self.rows_written_total.load(Ordering::Relaxed)
    }

    pub fn lines_skipped_total(&self) -> u64 {
        self.lines_skipped_total.load(Ordering::Relaxed)
    }

    pub fn bytes_written_total(&self) -> u64 {
        self.bytes_written_total.load(Ordering::Relaxed)
    }

    pub fn tables_created_total(&self) -> u64 {
        self.tables_created_total.load(Ordering::Relaxed)
    }

    pub fn schema_extensions_total(&self) -> u64 {
        self.schema_extensions_total.load(Ordering::Relaxed)
    }

    pub fn retryable_errors_total(&self) -> u64 {
        self.retryable_errors_total.load(Ordering::Relaxed)
    }

    pub fn tasks_completed_total(&self) -> u64 {
        self.tasks_completed_total.load(Ordering::Relaxed)
    }

    pub fn receive_errors_total(&self) -> u64 {
        self.receive_errors_total.load(Ordering::Relaxed)
    }

    pub fn failures(&self, reason: FailureReason) -> u64 {
        self.failures[reason.index()].load(Ordering::Relaxed)
    }

    pub fn failures_total(&self) -> u64 {
        self.failures
            .iter()
            .map(|counter| counter.load(Ordering::Relaxed))
            .sum()
    }

    pub fn tasks_in_flight(&self) -> u64 {
        self.tasks_in_flight.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    pub fn task_duration_histogram(&self) -> TaskDurationHistogram {
        TaskDurationHistogram {
            sum_seconds: self.task_duration_sum_ms.load(Ordering::Relaxed) as f64 / 1000.0,
            count: self.task_duration_count.load(Ordering::Relaxed),
            buckets: TASK_DURATION_BUCKETS_MS
                .iter()
                .zip(&self.task_duration_buckets)
                .map(|(&ms, count)| (ms as f64 / 1000.0, count.load(Ordering::Relaxed)))
                .collect(),
            inf_bucket: self.task_duration_buckets[7].load(Ordering::Relaxed),
        }
    }

    /// Export all metrics in Prometheus text format.
    ///
    /// ```
    /// use q2p_core::metrics::IngestionMetrics;
    ///
    /// let metrics = IngestionMetrics::new();
    /// metrics.record_received(2);
    /// let text = metrics.export_prometheus_text();
    /// assert!(text.contains("q2p_messages_received_total 2"));
    /// ```
    pub fn export_prometheus_text(&self) -> String {
        let mut out = String::with_capacity(4096);

        // === COUNTERS ===
        let counters: [(&str, &str, u64); 12] = [
            (
                "messages_received_total",
                "Notifications received from the queue",
                self.messages_received_total(),
            ),
            (
                "messages_acknowledged_total",
                "Notifications acknowledged (deleted from the queue)",
                self.messages_acknowledged_total(),
            ),
            (
                "messages_released_total",
                "Notifications released for redelivery",
                self.messages_released_total(),
            ),
            (
                "objects_converted_total",
                "Raw objects converted and uploaded",
                self.objects_converted_total(),
            ),
            (
                "rows_written_total",
                "Rows written to Parquet artifacts",
                self.rows_written_total(),
            ),
            (
                "lines_skipped_total",
                "Unparseable input lines skipped",
                self.lines_skipped_total(),
            ),
            (
                "bytes_written_total",
                "Parquet bytes uploaded",
                self.bytes_written_total(),
            ),
            (
                "tables_created_total",
                "Catalog tables created",
                self.tables_created_total(),
            ),
            (
                "schema_extensions_total",
                "Catalog schema extensions",
                self.schema_extensions_total(),
            ),
            (
                "retryable_errors_total",
                "Transient errors that led to a release",
                self.retryable_errors_total(),
            ),
            (
                "tasks_completed_total",
                "Tasks converted, cataloged and acknowledged",
                self.tasks_completed_total(),
            ),
            (
                "receive_errors_total",
                "Failed queue receive calls",
                self.receive_errors_total(),
            ),
        ];
        for (name, help, value) in counters {
            write_metric(&mut out, name, help, "counter", value);
        }

        let _ = writeln!(out, "# HELP {PREFIX}_failures_total Terminal task failures by reason");
        let _ = writeln!(out, "# TYPE {PREFIX}_failures_total counter");
        for reason in FailureReason::ALL {
            let _ = writeln!(
                out,
                "{PREFIX}_failures_total{{reason=\"{}\"}} {}",
                reason.as_str(),
                self.failures(reason)
            );
        }
        out.push('\n');

        // === GAUGES ===
        write_metric(
            &mut out,
            "tasks_in_flight",
            "Tasks currently being processed",
            "gauge",
            self.tasks_in_flight(),
        );
        write_metric(
            &mut out,
            "queue_depth",
            "Approximate messages available in the queue",
            "gauge",
            self.queue_depth(),
        );

        // === HISTOGRAM: task_duration_seconds ===
        let hist = self.task_duration_histogram();
        let _ = writeln!(
            out,
            "# HELP {PREFIX}_task_duration_seconds Time from receive to final task state"
        );
        let _ = writeln!(out, "# TYPE {PREFIX}_task_duration_seconds histogram");
        for (le, count) in &hist.buckets {
            let _ = writeln!(
                out,
                "{PREFIX}_task_duration_seconds_bucket{{le=\"{le}\"}} {count}"
            );
        }
        let _ = writeln!(
            out,
            "{PREFIX}_task_duration_seconds_bucket{{le=\"+Inf\"}} {}",
            hist.inf_bucket
        );
        let _ = writeln!(out, "{PREFIX}_task_duration_seconds_sum {}", hist.sum_seconds);
        let _ = writeln!(out, "{PREFIX}_task_duration_seconds_count {}", hist.count);

        out
    }
}

fn write_metric(out: &mut String, name: &str, help: &str, kind: &str, value: u64) {
    let _ = writeln!(out, "# HELP {PREFIX}_{name} {help}");
    let _ = writeln!(out, "# TYPE {PREFIX}_{name} {kind}");
    let _ = writeln!(out, "{PREFIX}_{name} {value}");
    out.push('\n');
}
