//! Raw and processed object naming.
//!
//! Destination keys are derived from the source object and a processing
//! timestamp only, so a redelivered notification always targets the same
//! artifact:
//!
//! ```text
//! {processed_prefix}{partition_path}/{stem}-{crc32(bucket/key)}.parquet
//! processed/year=2026/month=10/day=16/test-1c291ca3.parquet
//! ```
//!
//! The first segment of the partition path selects the catalog table
//! (`year=2026` → `year_2026`); the remaining `name=value` segments are
//! partition values inside that table.

use crate::config::Config;
use crate::{Error, Result};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Extension of written artifacts.
pub const ARTIFACT_EXTENSION: &str = "parquet";

/// Naming rules for raw input and converted artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct PathLayout {
    raw_prefix: String,
    processed_prefix: String,
    partition_format: String,
    table_name_format: String,
}

impl PathLayout {
    /// Create a layout, validating both strftime patterns.
    pub fn new(
        raw_prefix: impl Into<String>,
        processed_prefix: impl Into<String>,
        partition_format: impl Into<String>,
        table_name_format: impl Into<String>,
    ) -> Result<Self> {
        let layout = Self {
            raw_prefix: normalize_prefix(raw_prefix.into()),
            processed_prefix: normalize_prefix(processed_prefix.into()),
            partition_format: partition_format.into().trim_matches('/').to_string(),
            table_name_format: table_name_format.into(),
        };

        validate_pattern("partition_format", &layout.partition_format)?;
        validate_pattern("table_name_format", &layout.table_name_format)?;

        if layout.table_name_format.contains('/') {
            return Err(Error::Config(
                "processing.table_name_format must not contain '/'".into(),
            ));
        }

        Ok(layout)
    }

    /// Build the layout from the storage and processing sections.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.storage.raw_prefix.clone(),
            config.storage.processed_prefix.clone(),
            config.processing.partition_format.clone(),
            config.processing.table_name_format.clone(),
        )
    }

    pub fn raw_prefix(&self) -> &str {
        &self.raw_prefix
    }

    pub fn processed_prefix(&self) -> &str {
        &self.processed_prefix
    }

    /// Whether `key` lives in the raw namespace.
    pub fn is_raw_key(&self, key: &str) -> bool {
        key.starts_with(&self.raw_prefix) && key.len() > self.raw_prefix.len()
    }

    /// Partition path for a processing timestamp, without surrounding slashes.
    pub fn partition_path(&self, at: DateTime<Utc>) -> String {
        at.format(&self.partition_format).to_string()
    }

    /// Catalog table name for a processing timestamp.
    pub fn table_name(&self, at: DateTime<Utc>) -> String {
        at.format(&self.table_name_format).to_string()
    }

    /// Storage prefix the table points at (first partition segment).
    pub fn table_location(&self, at: DateTime<Utc>) -> String {
        let path = self.partition_path(at);
        let table_segment = path.split('/').next().unwrap_or_default();
        format!("{}{}/", self.processed_prefix, table_segment)
    }

    /// Prefix holding all artifacts of one processing partition.
    pub fn partition_location(&self, at: DateTime<Utc>) -> String {
        format!("{}{}/", self.processed_prefix, self.partition_path(at))
    }

    /// `name=value` pairs below the table segment.
    pub fn partition_values(&self, at: DateTime<Utc>) -> Vec<(String, String)> {
        self.partition_path(at)
            .split('/')
            .skip(1)
            .filter_map(|segment| segment.split_once('='))
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect()
    }

    /// Names of the partition columns below the table segment.
    pub fn partition_keys(&self) -> Vec<String> {
        self.partition_values(DateTime::<Utc>::UNIX_EPOCH)
            .into_iter()
            .map(|(name, _)| name)
            .collect()
    }

    /// Deterministic artifact key for a source object.
    pub fn destination_key(&self, bucket: &str, source_key: &str, at: DateTime<Utc>) -> String {
        let file_name = source_key.rsplit('/').next().unwrap_or(source_key);
        let stem = match file_name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => file_name,
        };

        let mut hasher = crc32fast::Hasher::new();
        hasher.update(bucket.as_bytes());
        hasher.update(b"/");
        hasher.update(source_key.as_bytes());
        let digest = hasher.finalize();

        format!(
            "{}{}/{}-{:08x}.{}",
            self.processed_prefix,
            self.partition_path(at),
            stem,
            digest,
            ARTIFACT_EXTENSION
        )
    }

    /// Recover the processing timestamp from an artifact key.
    ///
    /// Used when rebuilding the catalog from stored artifacts. Fields the
    /// partition pattern does not carry default to zero.
    pub fn parse_artifact_key(&self, key: &str) -> Option<DateTime<Utc>> {
        let rest = key.strip_prefix(&self.processed_prefix)?;
        if !rest.ends_with(&format!(".{ARTIFACT_EXTENSION}")) {
            return None;
        }

        let depth = self.partition_format.split('/').count();
        let segments: Vec<&str> = rest.split('/').collect();
        if segments.len() <= depth {
            return None;
        }
        let partition = segments[..depth].join("/");

        if let Ok(naive) = NaiveDateTime::parse_from_str(&partition, &self.partition_format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
        NaiveDate::parse_from_str(&partition, &self.partition_format)
            .ok()
            .and_then(|date| date.and_hms_opt(0, 0, 0))
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

fn normalize_prefix(prefix: String) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}/")
    }
}

fn validate_pattern(name: &str, pattern: &str) -> Result<()> {
    if pattern.is_empty() {
        return Err(Error::Config(format!("processing.{name} must not be empty")));
    }
    if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
        return Err(Error::Config(format!(
            "processing.{name} is not a valid strftime pattern: {pattern}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout() -> PathLayout {
        PathLayout::new("raw/", "processed/", "year=%Y/month=%m/day=%d", "year_%Y").unwrap()
    }

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 16, 13, 45, 0).unwrap()
    }

    #[test]
    fn test_destination_key_is_deterministic() {
        let layout = layout();
        let first = layout.destination_key("raw-bucket", "raw/events/incoming/test.jsonl", at());
        let second = layout.destination_key("raw-bucket", "raw/events/incoming/test.jsonl", at());

        assert_eq!(first, second);
        assert!(first.starts_with("processed/year=2026/month=10/day=16/test-"));
        assert!(first.ends_with(".parquet"));
    }

    #[test]
    fn test_destination_key_distinguishes_directories() {
        let layout = layout();
        let a = layout.destination_key("b", "raw/a/test.jsonl", at());
        let b = layout.destination_key("b", "raw/b/test.jsonl", at());
        assert_ne!(a, b);
    }

    #[test]
    fn test_table_naming() {
        let layout = layout();
        assert_eq!(layout.table_name(at()), "year_2026");
        assert_eq!(layout.table_location(at()), "processed/year=2026/");
        assert_eq!(
            layout.partition_location(at()),
            "processed/year=2026/month=10/day=16/"
        );
        assert_eq!(
            layout.partition_values(at()),
            vec![
                ("month".to_string(), "10".to_string()),
                ("day".to_string(), "16".to_string())
            ]
        );
        assert_eq!(layout.partition_keys(), vec!["month", "day"]);
    }

    #[test]
    fn test_raw_key_detection() {
        let layout = layout();
        assert!(layout.is_raw_key("raw/events/incoming/test.jsonl"));
        assert!(!layout.is_raw_key("processed/x.parquet"));
        assert!(!layout.is_raw_key("raw/"));
    }

    #[test]
    fn test_prefix_normalization() {
        let layout = PathLayout::new("/raw", "processed", "year=%Y", "year_%Y").unwrap();
        assert_eq!(layout.raw_prefix(), "raw/");
        assert_eq!(layout.processed_prefix(), "processed/");

        let layout = PathLayout::new("", "out/", "dt=%Y-%m-%d", "events").unwrap();
        assert_eq!(layout.raw_prefix(), "");
        assert!(layout.partition_values(at()).is_empty());
    }

    #[test]
    fn test_invalid_patterns_rejected() {
        assert!(PathLayout::new("raw/", "p/", "year=%Q", "year_%Y").is_err());
        assert!(PathLayout::new("raw/", "p/", "", "year_%Y").is_err());
        assert!(PathLayout::new("raw/", "p/", "year=%Y", "a/b").is_err());
    }

    #[test]
    fn test_parse_artifact_key_round_trip() {
        let layout = layout();
        let key = layout.destination_key("raw-bucket", "raw/x.jsonl", at());
        let parsed = layout.parse_artifact_key(&key).unwrap();

        assert_eq!(layout.table_name(parsed), "year_2026");
        assert_eq!(layout.partition_path(parsed), layout.partition_path(at()));
        assert!(layout.parse_artifact_key("processed/year=2026/x.json").is_none());
        assert!(layout.parse_artifact_key("other/year=2026/month=10/day=16/x.parquet").is_none());
    }
}
