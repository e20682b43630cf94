//! Ingestion worker: receive, convert, upload, catalog, acknowledge.
//!
//! Each queue record is driven through the task state machine in
//! [`TaskState`]. Acknowledgment is always the last transition, so a crash
//! at any earlier point leaves the record leased and it is redelivered after
//! its visibility timeout. Every step before it is idempotent: destination
//! keys are derived from the source location and the catalog merges schemas.

mod engine;
mod failures;
mod task;

pub use engine::{IngestionWorker, WorkerSummary};
pub use failures::{FailureLedger, FailureRecord};
pub use task::{
    ArtifactSummary, Disposition, FailureReason, IngestionTask, RecordReport, TaskOutcome,
    TaskReport, TaskState,
};
