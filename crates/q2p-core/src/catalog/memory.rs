use super::{CatalogEntry, CatalogRegistrar, RegistrationOutcome};
use crate::error::CatalogError;
use crate::schema::{SchemaMerge, TableSchema};
use crate::Result;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

/// Process-local catalog.
///
/// Each table entry is updated under its map shard lock, so concurrent
/// registrations of the same table serialize.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    tables: DashMap<String, CatalogEntry>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[async_trait]
impl CatalogRegistrar for InMemoryCatalog {
    async fn register(
        &self,
        table: &str,
        location: &str,
        schema: &TableSchema,
    ) -> Result<RegistrationOutcome> {
        match self.tables.entry(table.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(CatalogEntry {
                    table_name: table.to_string(),
                    location: location.to_string(),
                    schema: schema.clone(),
                    partitions: Vec::new(),
                });
                info!(table, columns = schema.len(), "Created table");
                Ok(RegistrationOutcome::Created)
            }
            Entry::Occupied(mut occupied) => {
                let merge = SchemaMerge::merge(table, &occupied.get().schema, schema)?;
                if !merge.has_changes() {
                    debug!(table, "Table already covers schema");
                    return Ok(RegistrationOutcome::Unchanged);
                }
                info!(table, added = merge.added.len(), "Extended table schema");
                occupied.get_mut().schema = merge.schema;
                Ok(RegistrationOutcome::Extended { added: merge.added })
            }
        }
    }

    async fn add_partition(
        &self,
        table: &str,
        values: &[(String, String)],
        location: &str,
    ) -> Result<()> {
        let mut entry = self
            .tables
            .get_mut(table)
            .ok_or_else(|| CatalogError::InvalidTable(format!("{table} is not registered")))?;

        if !entry.partitions.iter().any(|p| p == location) {
            debug!(table, partition = ?values, "Added partition");
            entry.partitions.push(location.to_string());
            entry.partitions.sort();
        }
        Ok(())
    }

    async fn get_table(&self, table: &str) -> Result<Option<CatalogEntry>> {
        Ok(self.tables.get(table).map(|entry| entry.clone()))
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Column, ColumnType};
    use crate::Error;
    use std::sync::Arc;

    fn schema(columns: &[(&str, ColumnType)]) -> TableSchema {
        TableSchema::new(
            columns
                .iter()
                .map(|(name, ty)| Column::new(*name, *ty))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_register_create_then_unchanged() {
        let catalog = InMemoryCatalog::new();
        let s = schema(&[("a", ColumnType::Long)]);

        let first = catalog.register("year_2026", "processed/year=2026/", &s).await.unwrap();
        assert_eq!(first, RegistrationOutcome::Created);

        let second = catalog.register("year_2026", "processed/year=2026/", &s).await.unwrap();
        assert_eq!(second, RegistrationOutcome::Unchanged);
        assert_eq!(catalog.len(), 1);
    }

    #[tokio::test]
    async fn test_register_extends_monotonically() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register("t", "p/", &schema(&[("a", ColumnType::Long), ("b", ColumnType::String)]))
            .await
            .unwrap();

        let outcome = catalog
            .register("t", "p/", &schema(&[("c", ColumnType::Boolean)]))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            RegistrationOutcome::Extended {
                added: vec![Column::new("c", ColumnType::Boolean)]
            }
        );

        let entry = catalog.get_table("t").await.unwrap().unwrap();
        assert_eq!(entry.schema.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_register_conflict_leaves_table_untouched() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register("t", "p/", &schema(&[("a", ColumnType::Long)]))
            .await
            .unwrap();

        let err = catalog
            .register("t", "p/", &schema(&[("z", ColumnType::Long), ("a", ColumnType::String)]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Catalog(CatalogError::SchemaConflict { ref column, .. }) if column == "a"
        ));

        let entry = catalog.get_table("t").await.unwrap().unwrap();
        assert_eq!(entry.schema.names(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_partitions_are_deduplicated() {
        let catalog = InMemoryCatalog::new();
        catalog.register("t", "p/", &TableSchema::default()).await.unwrap();

        let values = vec![("month".to_string(), "10".to_string())];
        catalog.add_partition("t", &values, "p/month=10/").await.unwrap();
        catalog.add_partition("t", &values, "p/month=10/").await.unwrap();

        let entry = catalog.get_table("t").await.unwrap().unwrap();
        assert_eq!(entry.partitions, vec!["p/month=10/"]);
        assert!(catalog.add_partition("missing", &values, "x/").await.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_registration_is_serialized() {
        let catalog = Arc::new(InMemoryCatalog::new());
        let mut handles = Vec::new();
        for i in 0..8 {
            let catalog = catalog.clone();
            handles.push(tokio::spawn(async move {
                let name = format!("c{i}");
                catalog
                    .register("t", "p/", &schema(&[(name.as_str(), ColumnType::Long)]))
                    .await
                    .unwrap()
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entry = catalog.get_table("t").await.unwrap().unwrap();
        assert_eq!(entry.schema.len(), 8);
        assert_eq!(catalog.list_tables().await.unwrap(), vec!["t"]);
    }
}
