//! Bounded record of terminal task failures.

use super::FailureReason;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

/// One failed task.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    /// Source key, or `None` when the body named no object
    pub source_key: Option<String>,
    pub message_id: String,
    pub reason: FailureReason,
    pub detail: String,
    pub recorded_at: DateTime<Utc>,
}

/// Ring buffer of the most recent failures plus lifetime counts by reason.
pub struct FailureLedger {
    capacity: usize,
    recent: Mutex<VecDeque<FailureRecord>>,
    totals: [AtomicU64; FailureReason::COUNT],
}

impl FailureLedger {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            recent: Mutex::new(VecDeque::with_capacity(capacity.clamp(1, 1024))),
            totals: Default::default(),
        }
    }

    pub fn record(&self, record: FailureRecord) {
        self.totals[record.reason.index()].fetch_add(1, Ordering::Relaxed);

        let mut recent = self.recent.lock();
        if recent.len() == self.capacity {
            recent.pop_front();
        }
        recent.push_back(record);
    }

    /// Up to `limit` records, newest first.
    pub fn recent(&self, limit: usize) -> Vec<FailureRecord> {
        self.recent.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Lifetime count for one reason, including evicted records.
    pub fn count(&self, reason: FailureReason) -> u64 {
        self.totals[reason.index()].load(Ordering::Relaxed)
    }

    /// Lifetime counts for every reason.
    pub fn counts(&self) -> BTreeMap<&'static str, u64> {
        FailureReason::ALL
            .iter()
            .map(|reason| (reason.as_str(), self.count(*reason)))
            .collect()
    }

    /// Records currently retained.
    pub fn len(&self) -> usize {
        self.recent.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.recent.lock().is_empty()
    }
}

impl Default for FailureLedger {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failure(key: &str, reason: FailureReason) -> FailureRecord {
        FailureRecord {
            source_key: Some(key.to_string()),
            message_id: format!("m-{key}"),
            reason,
            detail: "detail".into(),
            recorded_at: Utc::now(),
        }
    }

    #[test]
    fn test_ledger_is_bounded_and_newest_first() {
        let ledger = FailureLedger::new(2);
        ledger.record(failure("a", FailureReason::SourceMissing));
        ledger.record(failure("b", FailureReason::ConversionError));
        ledger.record(failure("c", FailureReason::ConversionError));

        assert_eq!(ledger.len(), 2);
        let keys: Vec<_> = ledger
            .recent(10)
            .into_iter()
            .filter_map(|r| r.source_key)
            .collect();
        assert_eq!(keys, vec!["c", "b"]);

        assert_eq!(ledger.count(FailureReason::SourceMissing), 1);
        assert_eq!(ledger.count(FailureReason::ConversionError), 2);
        assert_eq!(ledger.counts()["schema_conflict"], 0);
    }

    #[test]
    fn test_recent_respects_limit() {
        let ledger = FailureLedger::default();
        assert!(ledger.is_empty());
        for i in 0..5 {
            ledger.record(failure(&i.to_string(), FailureReason::MalformedNotification));
        }
        assert_eq!(ledger.recent(3).len(), 3);
    }

    #[test]
    fn test_record_serializes_reason() {
        let json = serde_json::to_value(failure("k", FailureReason::SchemaConflict)).unwrap();
        assert_eq!(json["reason"], "schema_conflict");
        assert_eq!(json["source_key"], "k");
    }
}
