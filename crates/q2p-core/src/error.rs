//! Error types for q2p core library.
//!
//! Domain errors (queue, storage, notification, conversion, catalog) are
//! folded into a top-level [`Error`]. Each error also carries an
//! [`ErrorClass`] that drives the worker's acknowledgment policy.

use thiserror::Error;

/// Result type alias for q2p operations.
pub type Result<T> = std::result::Result<T, Error>;

/// How the ingestion worker must react to an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; release the record with backoff and retry later.
    Retryable,
    /// Permanent for this record; acknowledge and record the failure.
    Terminal,
    /// Configuration fault; stop accepting new work.
    Systemic,
}

/// Top-level error type for q2p.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Queue gateway error
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Object store gateway error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Notification payload could not be interpreted
    #[error("Malformed notification: {0}")]
    Notification(#[from] NotificationError),

    /// Format conversion error
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Catalog registration error
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Classify this error for the acknowledgment policy.
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Queue(e) => e.class(),
            Error::Storage(e) => e.class(),
            Error::Catalog(e) => e.class(),
            Error::Notification(_) | Error::Conversion(_) | Error::Serialization(_) => {
                ErrorClass::Terminal
            }
            Error::Config(_) => ErrorClass::Systemic,
            Error::Io(_) => ErrorClass::Retryable,
        }
    }

    /// True when the error implies missing permissions.
    pub fn is_access_denied(&self) -> bool {
        matches!(
            self,
            Error::Queue(QueueError::AccessDenied(_))
                | Error::Storage(StorageError::AccessDenied { .. })
                | Error::Catalog(CatalogError::AccessDenied(_))
        )
    }
}

/// Queue gateway errors.
#[derive(Error, Debug)]
pub enum QueueError {
    /// Connectivity or service-side failure
    #[error("Transport failure during {operation}: {message}")]
    Transport { operation: String, message: String },

    /// Credentials lack permission on the queue
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Lease token no longer owns the record
    #[error("Lease expired or unknown: {0}")]
    InvalidLease(String),
}

impl QueueError {
    pub(crate) fn transport(operation: &str, message: impl Into<String>) -> Self {
        QueueError::Transport {
            operation: operation.to_string(),
            message: message.into(),
        }
    }

    fn class(&self) -> ErrorClass {
        match self {
            QueueError::Transport { .. } => ErrorClass::Retryable,
            QueueError::AccessDenied(_) => ErrorClass::Systemic,
            QueueError::InvalidLease(_) => ErrorClass::Terminal,
        }
    }
}

/// Object store gateway errors.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Object does not exist
    #[error("Object not found: {path}")]
    NotFound { path: String },

    /// Credentials lack permission for the object
    #[error("Access denied for {path}: {message}")]
    AccessDenied { path: String, message: String },

    /// Connectivity or service-side failure
    #[error("Transport failure for {path}: {message}")]
    Transport { path: String, message: String },

    /// Store URL or key could not be interpreted
    #[error("Invalid location: {0}")]
    InvalidLocation(String),
}

impl StorageError {
    fn class(&self) -> ErrorClass {
        match self {
            StorageError::NotFound { .. } => ErrorClass::Terminal,
            StorageError::AccessDenied { .. } => ErrorClass::Systemic,
            StorageError::Transport { .. } => ErrorClass::Retryable,
            StorageError::InvalidLocation(_) => ErrorClass::Systemic,
        }
    }
}

/// Notification payload errors.
#[derive(Error, Debug)]
pub enum NotificationError {
    /// Body is empty or whitespace
    #[error("Empty message body")]
    EmptyBody,

    /// Body looked like JSON but did not parse
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// Required field absent
    #[error("Missing field: {0}")]
    MissingField(&'static str),

    /// Notification refers to a bucket this worker does not read
    #[error("Unexpected bucket {bucket}, expected {expected}")]
    UnexpectedBucket { bucket: String, expected: String },

    /// Key is outside the raw namespace
    #[error("Key {key} is outside the raw prefix {prefix}")]
    OutsideRawPrefix { key: String, prefix: String },

    /// Key cannot be addressed as an object path
    #[error("Unaddressable key {key:?}: {reason}")]
    InvalidKey { key: String, reason: String },
}

/// Format conversion errors.
#[derive(Error, Debug)]
pub enum ConversionError {
    /// Too many unparseable lines
    #[error("Skip ratio exceeded: {skipped} of {total} lines unparseable (threshold {threshold})")]
    SkipRatioExceeded {
        skipped: usize,
        total: usize,
        threshold: f64,
    },

    /// No parseable record in input
    #[error("Input contains no records")]
    NoRecords,

    /// Arrow batch construction failed
    #[error("Arrow error: {0}")]
    Arrow(String),

    /// Parquet encoding failed
    #[error("Parquet error: {0}")]
    Parquet(String),

    /// Conversion task did not complete
    #[error("Converter aborted: {0}")]
    Aborted(String),
}

/// Catalog registrar errors.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// Column reused with an incompatible type
    #[error(
        "Schema conflict on {table}.{column}: registered as {existing}, incoming {incoming}"
    )]
    SchemaConflict {
        table: String,
        column: String,
        existing: String,
        incoming: String,
    },

    /// Connectivity or service-side failure
    #[error("Catalog transport failure: {0}")]
    Transport(String),

    /// Credentials lack permission on the catalog
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Concurrent modification lost the race too many times
    #[error("Concurrent modification of {table} after {attempts} attempts")]
    ConcurrentModification { table: String, attempts: u32 },

    /// Circuit breaker is open
    #[error("Catalog circuit open: {0}")]
    CircuitOpen(String),

    /// Table definition could not be built or read
    #[error("Invalid table definition: {0}")]
    InvalidTable(String),
}

impl CatalogError {
    pub(crate) fn class(&self) -> ErrorClass {
        match self {
            CatalogError::SchemaConflict { .. } | CatalogError::InvalidTable(_) => {
                ErrorClass::Terminal
            }
            CatalogError::AccessDenied(_) => ErrorClass::Systemic,
            CatalogError::Transport(_)
            | CatalogError::ConcurrentModification { .. }
            | CatalogError::CircuitOpen(_) => ErrorClass::Retryable,
        }
    }
}

// Conversion implementations for external error types

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<arrow::error::ArrowError> for ConversionError {
    fn from(err: arrow::error::ArrowError) -> Self {
        ConversionError::Arrow(err.to_string())
    }
}

impl From<parquet::errors::ParquetError> for ConversionError {
    fn from(err: parquet::errors::ParquetError) -> Self {
        ConversionError::Parquet(err.to_string())
    }
}

impl From<object_store::Error> for StorageError {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => StorageError::NotFound { path },
            object_store::Error::PermissionDenied { path, source } => StorageError::AccessDenied {
                path,
                message: source.to_string(),
            },
            object_store::Error::Unauthenticated { path, source } => StorageError::AccessDenied {
                path,
                message: source.to_string(),
            },
            object_store::Error::InvalidPath { source } => {
                StorageError::InvalidLocation(source.to_string())
            }
            other => StorageError::Transport {
                path: String::new(),
                message: other.to_string(),
            },
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        Error::Storage(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::Config("invalid value".into());
        assert_eq!(err.to_string(), "Configuration error: invalid value");

        let err: Error = StorageError::NotFound {
            path: "raw/a.jsonl".into(),
        }
        .into();
        assert_eq!(err.to_string(), "Storage error: Object not found: raw/a.jsonl");
    }

    #[test]
    fn test_error_classes() {
        assert_eq!(
            Error::from(QueueError::transport("receive", "timeout")).class(),
            ErrorClass::Retryable
        );
        assert_eq!(
            Error::from(StorageError::NotFound { path: "k".into() }).class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            Error::from(ConversionError::NoRecords).class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            Error::from(CatalogError::SchemaConflict {
                table: "t".into(),
                column: "a".into(),
                existing: "bigint".into(),
                incoming: "string".into(),
            })
            .class(),
            ErrorClass::Terminal
        );
        assert_eq!(
            Error::from(CatalogError::AccessDenied("glue".into())).class(),
            ErrorClass::Systemic
        );
        assert_eq!(
            Error::from(CatalogError::CircuitOpen("glue".into())).class(),
            ErrorClass::Retryable
        );
    }

    #[test]
    fn test_access_denied_detection() {
        let err: Error = StorageError::AccessDenied {
            path: "raw/x".into(),
            message: "403".into(),
        }
        .into();
        assert!(err.is_access_denied());
        assert!(!Error::from(NotificationError::EmptyBody).is_access_denied());
    }

    #[test]
    fn test_object_store_not_found_mapping() {
        let err = object_store::Error::NotFound {
            path: "raw/missing.jsonl".into(),
            source: "gone".into(),
        };
        let mapped: StorageError = err.into();
        assert!(matches!(mapped, StorageError::NotFound { path } if path == "raw/missing.jsonl"));
    }

    #[test]
    fn test_skip_ratio_message() {
        let err = ConversionError::SkipRatioExceeded {
            skipped: 51,
            total: 100,
            threshold: 0.5,
        };
        assert!(err.to_string().contains("51 of 100"));
    }
}
