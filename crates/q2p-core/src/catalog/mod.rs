//! Catalog registrar: table definitions over processed artifacts.
//!
//! Registration is create-or-merge and idempotent. A table's schema only
//! ever grows: new columns are appended and existing ones are never
//! dropped or retyped (see [`SchemaMerge`](crate::schema::SchemaMerge)).

mod glue;
mod memory;
mod sync;

pub use glue::GlueCatalog;
pub use memory::InMemoryCatalog;
pub use sync::{probe_schema, sync_from_store, SyncReport};

use crate::config::{CatalogType, Config};
use crate::layout::PathLayout;
use crate::schema::{Column, TableSchema};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

/// A registered table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CatalogEntry {
    pub table_name: String,
    /// Storage location the table reads from
    pub location: String,
    pub schema: TableSchema,
    /// Registered partition locations
    pub partitions: Vec<String>,
}

/// What a registration call changed.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistrationOutcome {
    /// The table did not exist and was created
    Created,
    /// Columns were appended to an existing table
    Extended { added: Vec<Column> },
    /// The table already covered the schema
    Unchanged,
}

impl RegistrationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RegistrationOutcome::Created => "created",
            RegistrationOutcome::Extended { .. } => "extended",
            RegistrationOutcome::Unchanged => "unchanged",
        }
    }
}

/// Catalog registrar interface.
#[async_trait]
pub trait CatalogRegistrar: Send + Sync {
    /// Create the table or widen its schema with `schema`.
    ///
    /// Fails with `CatalogError::SchemaConflict` when a column already
    /// registered has a different type.
    async fn register(
        &self,
        table: &str,
        location: &str,
        schema: &TableSchema,
    ) -> Result<RegistrationOutcome>;

    /// Register a partition of an existing table. Idempotent.
    async fn add_partition(
        &self,
        table: &str,
        values: &[(String, String)],
        location: &str,
    ) -> Result<()>;

    /// Look up one table.
    async fn get_table(&self, table: &str) -> Result<Option<CatalogEntry>>;

    /// Names of all tables in the database.
    async fn list_tables(&self) -> Result<Vec<String>>;

    /// Backend name for logs.
    fn name(&self) -> &str;
}

/// Build the catalog configured in `config`.
pub async fn create_catalog(config: &Config) -> Result<Arc<dyn CatalogRegistrar>> {
    match config.catalog.catalog_type {
        CatalogType::Memory => Ok(Arc::new(InMemoryCatalog::new())),
        CatalogType::Glue => {
            let layout = PathLayout::from_config(config)?;
            let catalog = GlueCatalog::new(
                &config.catalog,
                &config.storage.destination,
                layout.partition_keys(),
            )
            .await?;
            Ok(Arc::new(catalog))
        }
    }
}
