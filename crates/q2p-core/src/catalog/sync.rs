//! Rebuild catalog entries from artifacts already in the destination store.
//!
//! Recovers tables after a crash between upload and registration without
//! waiting for redelivery, and seeds a fresh catalog from existing data.

use super::CatalogRegistrar;
use crate::error::ConversionError;
use crate::layout::PathLayout;
use crate::schema::TableSchema;
use crate::storage::BlobStore;
use crate::Result;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Summary of a sync run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    /// Artifacts whose schema was registered
    pub artifacts: usize,
    /// Keys under the processed prefix that are not artifacts
    pub ignored: usize,
    /// Artifacts that could not be read or registered
    pub failed: Vec<String>,
    /// Tables touched
    pub tables: BTreeSet<String>,
}

/// Read the schema from an artifact's Parquet footer.
pub async fn probe_schema(store: &dyn BlobStore, key: &str) -> Result<TableSchema> {
    let bytes = store.get(key).await?;
    let builder =
        ParquetRecordBatchReaderBuilder::try_new(bytes).map_err(ConversionError::from)?;
    Ok(TableSchema::from_arrow(builder.schema()))
}

/// Register every artifact under the processed prefix, optionally only
/// those modified after `after`.
pub async fn sync_from_store(
    catalog: &dyn CatalogRegistrar,
    store: &dyn BlobStore,
    layout: &PathLayout,
    after: Option<DateTime<Utc>>,
) -> Result<SyncReport> {
    let mut report = SyncReport::default();
    let mut listing = store.list(layout.processed_prefix(), after);

    while let Some(object) = listing.try_next().await? {
        let Some(at) = layout.parse_artifact_key(&object.key) else {
            report.ignored += 1;
            continue;
        };

        let table = layout.table_name(at);
        let registered = register_artifact(catalog, store, layout, &object.key, at).await;

        match registered {
            Ok(()) => {
                report.artifacts += 1;
                report.tables.insert(table);
            }
            Err(e) if e.is_access_denied() => return Err(e),
            Err(e) => {
                warn!(key = %object.key, error = %e, "Failed to register artifact");
                report.failed.push(object.key);
            }
        }
    }

    info!(
        artifacts = report.artifacts,
        tables = report.tables.len(),
        failed = report.failed.len(),
        "Catalog sync complete"
    );
    Ok(report)
}

async fn register_artifact(
    catalog: &dyn CatalogRegistrar,
    store: &dyn BlobStore,
    layout: &PathLayout,
    key: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    let table = layout.table_name(at);
    let schema = probe_schema(store, key).await?;
    catalog
        .register(&table, &layout.table_location(at), &schema)
        .await?;
    catalog
        .add_partition(
            &table,
            &layout.partition_values(at),
            &layout.partition_location(at),
        )
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::convert::{FormatConverter, SourceFormat};
    use crate::storage::{ObjectStoreGateway, PARQUET_CONTENT_TYPE};
    use chrono::TimeZone;

    fn layout() -> PathLayout {
        PathLayout::new("raw/", "processed/", "year=%Y/month=%m/day=%d", "year_%Y").unwrap()
    }

    async fn put_artifact(store: &ObjectStoreGateway, key: &str, raw: &[u8]) {
        let artifact = FormatConverter::default()
            .convert(raw, SourceFormat::JsonLines)
            .unwrap();
        store
            .put(key, artifact.payload, PARQUET_CONTENT_TYPE)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_probe_schema_reads_footer() {
        let store = ObjectStoreGateway::in_memory("processed-bucket");
        put_artifact(&store, "processed/a.parquet", b"{\"a\":1,\"b\":\"x\"}\n").await;

        let schema = probe_schema(&store, "processed/a.parquet").await.unwrap();
        assert_eq!(schema.names(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_sync_registers_tables_and_partitions() {
        let store = ObjectStoreGateway::in_memory("processed-bucket");
        let layout = layout();
        let at = Utc.with_ymd_and_hms(2026, 10, 16, 0, 0, 0).unwrap();

        let first = layout.destination_key("raw-bucket", "raw/one.jsonl", at);
        let second = layout.destination_key("raw-bucket", "raw/two.jsonl", at);
        put_artifact(&store, &first, b"{\"a\":1}\n").await;
        put_artifact(&store, &second, b"{\"b\":true}\n").await;
        store
            .put("processed/_SUCCESS", "".into(), "text/plain")
            .await
            .unwrap();

        let catalog = InMemoryCatalog::new();
        let report = sync_from_store(&catalog, &store, &layout, None).await.unwrap();

        assert_eq!(report.artifacts, 2);
        assert_eq!(report.ignored, 1);
        assert!(report.failed.is_empty());

        let entry = catalog.get_table("year_2026").await.unwrap().unwrap();
        assert_eq!(entry.schema.names(), vec!["a", "b"]);
        assert_eq!(entry.location, "processed/year=2026/");
        assert_eq!(entry.partitions, vec!["processed/year=2026/month=10/day=16/"]);
    }

    #[tokio::test]
    async fn test_sync_records_unreadable_artifacts() {
        let store = ObjectStoreGateway::in_memory("processed-bucket");
        store
            .put(
                "processed/year=2026/month=10/day=16/bad-00000000.parquet",
                "not parquet".into(),
                PARQUET_CONTENT_TYPE,
            )
            .await
            .unwrap();

        let catalog = InMemoryCatalog::new();
        let report = sync_from_store(&catalog, &store, &layout(), None).await.unwrap();
        assert_eq!(report.artifacts, 0);
        assert_eq!(report.failed.len(), 1);
        assert!(catalog.is_empty());
    }
}
