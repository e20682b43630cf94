//! Per-object task state, failure reasons and reports.

use crate::convert::SourceFormat;
use crate::error::{CatalogError, Error, NotificationError, StorageError};
use crate::layout::PathLayout;
use crate::queue::{LeaseToken, ObjectRef, RawRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Lifecycle of one ingestion task.
///
/// ```text
/// Received → Parsed → Downloaded → Converted → Uploaded → Cataloged → Acknowledged
///     ╰──────────┴──────────┴───────────┴──────────┴──────────┴──→ Failed(reason)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum TaskState {
    Received,
    Parsed,
    Downloaded,
    Converted,
    Uploaded,
    Cataloged,
    Acknowledged,
    Failed(FailureReason),
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Received => "received",
            TaskState::Parsed => "parsed",
            TaskState::Downloaded => "downloaded",
            TaskState::Converted => "converted",
            TaskState::Uploaded => "uploaded",
            TaskState::Cataloged => "cataloged",
            TaskState::Acknowledged => "acknowledged",
            TaskState::Failed(_) => "failed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Failed(reason) => write!(f, "failed({reason})"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Why a task ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Body unparseable, unknown bucket, or key outside the raw namespace
    MalformedNotification,
    /// Source object no longer exists
    SourceMissing,
    /// Input could not be converted
    ConversionError,
    /// Incoming column type contradicts the catalog
    SchemaConflict,
    /// Credentials lack a required permission
    AccessDenied,
}

impl FailureReason {
    pub const COUNT: usize = 5;

    pub const ALL: [FailureReason; Self::COUNT] = [
        FailureReason::MalformedNotification,
        FailureReason::SourceMissing,
        FailureReason::ConversionError,
        FailureReason::SchemaConflict,
        FailureReason::AccessDenied,
    ];

    pub fn index(&self) -> usize {
        match self {
            FailureReason::MalformedNotification => 0,
            FailureReason::SourceMissing => 1,
            FailureReason::ConversionError => 2,
            FailureReason::SchemaConflict => 3,
            FailureReason::AccessDenied => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::MalformedNotification => "malformed_notification",
            FailureReason::SourceMissing => "source_missing",
            FailureReason::ConversionError => "conversion_error",
            FailureReason::SchemaConflict => "schema_conflict",
            FailureReason::AccessDenied => "access_denied",
        }
    }

    /// Reason for a terminal error, if it names one directly.
    pub fn of(error: &Error) -> Option<Self> {
        match error {
            Error::Notification(_) => Some(FailureReason::MalformedNotification),
            Error::Storage(StorageError::NotFound { .. }) => Some(FailureReason::SourceMissing),
            Error::Conversion(_) => Some(FailureReason::ConversionError),
            Error::Catalog(CatalogError::SchemaConflict { .. }) => {
                Some(FailureReason::SchemaConflict)
            }
            e if e.is_access_denied() => Some(FailureReason::AccessDenied),
            _ => None,
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Work derived from one object named by a notification.
#[derive(Debug, Clone)]
pub struct IngestionTask {
    pub message_id: String,
    pub source: ObjectRef,
    pub destination_key: String,
    pub format: SourceFormat,
    pub lease: LeaseToken,
    /// Event time, else queue arrival time; stable across redeliveries
    pub processed_at: DateTime<Utc>,
    pub table_name: String,
    pub table_location: String,
    pub partition_values: Vec<(String, String)>,
    pub partition_location: String,
}

impl IngestionTask {
    /// Validate an object reference and derive every name from it.
    pub fn plan(
        record: &RawRecord,
        source: ObjectRef,
        expected_bucket: &str,
        layout: &PathLayout,
    ) -> Result<Self, NotificationError> {
        if source.bucket != expected_bucket {
            return Err(NotificationError::UnexpectedBucket {
                bucket: source.bucket,
                expected: expected_bucket.to_string(),
            });
        }
        if !layout.is_raw_key(&source.key) {
            return Err(NotificationError::OutsideRawPrefix {
                key: source.key,
                prefix: layout.raw_prefix().to_string(),
            });
        }

        let processed_at = source.event_time.unwrap_or(record.arrived_at);
        Ok(Self {
            message_id: record.message_id.clone(),
            destination_key: layout.destination_key(&source.bucket, &source.key, processed_at),
            format: SourceFormat::from_key(&source.key),
            lease: record.lease.clone(),
            processed_at,
            table_name: layout.table_name(processed_at),
            table_location: layout.table_location(processed_at),
            partition_values: layout.partition_values(processed_at),
            partition_location: layout.partition_location(processed_at),
            source,
        })
    }
}

/// Summary of a written artifact.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArtifactSummary {
    pub destination_key: String,
    pub table_name: String,
    pub row_count: usize,
    pub skipped_lines: usize,
    pub byte_size: usize,
}

/// How one task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    /// Converted, uploaded and cataloged
    Cataloged(ArtifactSummary),
    /// Terminal failure; the record is acknowledged
    Failed { reason: FailureReason, detail: String },
    /// Transient failure; the record is released with backoff
    Retry { component: &'static str, detail: String },
    /// Systemic failure; intake stops
    Halted { component: &'static str, detail: String },
    /// Cancellation observed between states
    Interrupted,
}

/// Trace and outcome of one task.
#[derive(Debug, Clone)]
pub struct TaskReport {
    /// Source key, absent when the body could not be parsed
    pub source_key: Option<String>,
    pub trace: Vec<TaskState>,
    pub outcome: TaskOutcome,
}

impl TaskReport {
    pub fn final_state(&self) -> Option<TaskState> {
        self.trace.last().copied()
    }
}

/// What happened to the queue record.
#[derive(Debug, Clone, PartialEq)]
pub enum Disposition {
    /// Deleted from the queue
    Acknowledged,
    /// Made visible again after `delay`
    Released { delay: Duration },
    /// Released immediately after cancellation
    Interrupted,
    /// Released immediately; intake stopped
    Halted,
    /// Acknowledge or release call itself failed; the record reappears
    /// after its visibility timeout
    Unsettled { detail: String },
}

/// Everything the worker did with one queue record.
#[derive(Debug, Clone)]
pub struct RecordReport {
    pub message_id: String,
    pub delivery_count: u32,
    pub tasks: Vec<TaskReport>,
    pub disposition: Disposition,
}

impl RecordReport {
    pub fn is_acknowledged(&self) -> bool {
        self.disposition == Disposition::Acknowledged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConversionError;
    use chrono::TimeZone;

    fn layout() -> PathLayout {
        PathLayout::new("raw/", "processed/", "year=%Y/month=%m/day=%d", "year_%Y").unwrap()
    }

    fn record() -> RawRecord {
        RawRecord {
            message_id: "m-1".into(),
            body: String::new(),
            arrived_at: Utc.with_ymd_and_hms(2026, 10, 16, 9, 0, 0).unwrap(),
            lease: LeaseToken::new("lease-1"),
            delivery_count: 1,
        }
    }

    fn object(bucket: &str, key: &str) -> ObjectRef {
        ObjectRef {
            bucket: bucket.into(),
            key: key.into(),
            event_time: None,
        }
    }

    #[test]
    fn test_plan_derives_names() {
        let task = IngestionTask::plan(
            &record(),
            object("raw-bucket", "raw/events/incoming/test.jsonl"),
            "raw-bucket",
            &layout(),
        )
        .unwrap();

        assert_eq!(task.table_name, "year_2026");
        assert_eq!(task.table_location, "processed/year=2026/");
        assert_eq!(task.partition_location, "processed/year=2026/month=10/day=16/");
        assert!(task
            .destination_key
            .starts_with("processed/year=2026/month=10/day=16/test-"));
        assert_eq!(task.format, SourceFormat::JsonLines);
    }

    #[test]
    fn test_plan_prefers_event_time() {
        let mut source = object("raw-bucket", "raw/a.jsonl");
        source.event_time = Some(Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 0).unwrap());

        let task = IngestionTask::plan(&record(), source, "raw-bucket", &layout()).unwrap();
        assert_eq!(task.table_name, "year_2025");
    }

    #[test]
    fn test_plan_rejects_foreign_locations() {
        let err = IngestionTask::plan(&record(), object("other", "raw/a.jsonl"), "raw-bucket", &layout())
            .unwrap_err();
        assert!(matches!(err, NotificationError::UnexpectedBucket { .. }));

        let err = IngestionTask::plan(
            &record(),
            object("raw-bucket", "processed/a.parquet"),
            "raw-bucket",
            &layout(),
        )
        .unwrap_err();
        assert!(matches!(err, NotificationError::OutsideRawPrefix { .. }));
    }

    #[test]
    fn test_failure_reason_mapping() {
        assert_eq!(
            FailureReason::of(&StorageError::NotFound { path: "k".into() }.into()),
            Some(FailureReason::SourceMissing)
        );
        assert_eq!(
            FailureReason::of(&ConversionError::NoRecords.into()),
            Some(FailureReason::ConversionError)
        );
        assert_eq!(
            FailureReason::of(&NotificationError::EmptyBody.into()),
            Some(FailureReason::MalformedNotification)
        );
        assert_eq!(
            FailureReason::of(&CatalogError::AccessDenied("glue".into()).into()),
            Some(FailureReason::AccessDenied)
        );
        assert_eq!(
            FailureReason::of(&CatalogError::Transport("timeout".into()).into()),
            None
        );
    }

    #[test]
    fn test_reason_indices_are_dense() {
        for (i, reason) in FailureReason::ALL.iter().enumerate() {
            assert_eq!(reason.index(), i);
        }
    }

    #[test]
    fn test_state_display() {
        assert_eq!(TaskState::Cataloged.to_string(), "cataloged");
        assert_eq!(
            TaskState::Failed(FailureReason::SchemaConflict).to_string(),
            "failed(schema_conflict)"
        );
    }
}
