//! AWS Glue Data Catalog registrar.
//!
//! Tables are Hive-style external Parquet tables. Schema updates use the
//! table `VersionId` for optimistic concurrency: a lost race re-reads the
//! table and merges again, up to `max_attempts` times.

use super::{CatalogEntry, CatalogRegistrar, RegistrationOutcome};
use crate::aws::{is_access_denied_code, load_sdk_config, StaticCredentials};
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
use crate::config::CatalogConfig;
use crate::error::CatalogError;
use crate::schema::{Column, ColumnType, SchemaMerge, TableSchema};
use crate::{Error, Result};
use async_trait::async_trait;
use aws_sdk_glue::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_glue::types::{
    Column as GlueColumn, DatabaseInput, PartitionInput, SerDeInfo, StorageDescriptor, Table,
    TableInput,
};
use aws_sdk_glue::Client as GlueClient;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

const PARQUET_INPUT_FORMAT: &str = "org.apache.hadoop.hive.ql.io.parquet.MapredParquetInputFormat";
const PARQUET_OUTPUT_FORMAT: &str =
    "org.apache.hadoop.hive.ql.io.parquet.MapredParquetOutputFormat";
const PARQUET_SERDE: &str = "org.apache.hadoop.hive.ql.io.parquet.serde.ParquetHiveSerDe";

const ENTITY_NOT_FOUND: &str = "EntityNotFoundException";
const ALREADY_EXISTS: &str = "AlreadyExistsException";
const CONCURRENT_MODIFICATION: &str = "ConcurrentModificationException";

/// Glue table as read back for merging.
struct RegisteredTable {
    schema: TableSchema,
    location: String,
    version_id: Option<String>,
}

/// Catalog registrar backed by AWS Glue.
pub struct GlueCatalog {
    client: GlueClient,
    database: String,
    /// URL the relative artifact locations are resolved against
    location_root: String,
    partition_keys: Vec<String>,
    max_attempts: u32,
    circuit_breaker: CircuitBreaker,
}

impl GlueCatalog {
    /// Create a Glue registrar for tables stored under `location_root`
    /// (the destination store URL, e.g. `s3://processed-bucket`).
    pub async fn new(
        config: &CatalogConfig,
        location_root: &str,
        partition_keys: Vec<String>,
    ) -> Result<Self> {
        let credentials = StaticCredentials::from_parts(
            config.aws_access_key_id.as_deref(),
            config.aws_secret_access_key.as_deref(),
        );
        let sdk_config = load_sdk_config(config.aws_region.as_deref(), credentials, None).await;

        let circuit_breaker = CircuitBreaker::new(
            CircuitBreakerConfig::new("glue-catalog")
                .with_failure_threshold(5)
                .with_reset_timeout(Duration::from_secs(30))
                .with_success_threshold(2),
        );

        info!(
            database = %config.database_name,
            region = config.aws_region.as_deref().unwrap_or("default"),
            "AWS Glue catalog initialized"
        );

        Ok(Self {
            client: GlueClient::new(&sdk_config),
            database: config.database_name.clone(),
            location_root: location_root.trim_end_matches('/').to_string(),
            partition_keys,
            max_attempts: config.max_attempts.max(1),
            circuit_breaker,
        })
    }

    pub fn circuit(&self) -> CircuitSnapshot {
        self.circuit_breaker.snapshot()
    }

    fn check_circuit_breaker(&self) -> std::result::Result<(), CatalogError> {
        if !self.circuit_breaker.is_allowed() {
            warn!("Circuit breaker is open, rejecting catalog request");
            return Err(CatalogError::CircuitOpen(
                "Glue operations temporarily blocked".to_string(),
            ));
        }
        Ok(())
    }

    /// Feed an outcome into the breaker and lift it into the crate error.
    fn observe<T>(&self, result: std::result::Result<T, CatalogError>) -> Result<T> {
        self.circuit_breaker
            .record_outcome(result.as_ref().err().map(CatalogError::class));
        result.map_err(Error::from)
    }

    fn absolute_location(&self, location: &str) -> String {
        format!("{}/{}", self.location_root, location.trim_start_matches('/'))
    }

    fn relative_location(&self, location: &str) -> String {
        location
            .strip_prefix(&self.location_root)
            .map(|rest| rest.trim_start_matches('/').to_string())
            .unwrap_or_else(|| location.to_string())
    }

    fn storage_descriptor(
        &self,
        location: &str,
        schema: Option<&TableSchema>,
    ) -> std::result::Result<StorageDescriptor, CatalogError> {
        let columns = match schema {
            Some(schema) => Some(
                schema
                    .columns()
                    .iter()
                    .map(|c| glue_column(&c.name, c.column_type.glue_type()))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
            ),
            None => None,
        };

        Ok(StorageDescriptor::builder()
            .set_columns(columns)
            .location(self.absolute_location(location))
            .input_format(PARQUET_INPUT_FORMAT)
            .output_format(PARQUET_OUTPUT_FORMAT)
            .serde_info(
                SerDeInfo::builder()
                    .serialization_library(PARQUET_SERDE)
                    .build(),
            )
            .build())
    }

    fn table_input(
        &self,
        table: &str,
        location: &str,
        schema: &TableSchema,
    ) -> std::result::Result<TableInput, CatalogError> {
        let partition_keys = self
            .partition_keys
            .iter()
            .map(|name| glue_column(name, "string"))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut parameters = HashMap::new();
        parameters.insert("classification".to_string(), "parquet".to_string());
        parameters.insert("EXTERNAL".to_string(), "TRUE".to_string());

        TableInput::builder()
            .name(table)
            .description("Parquet table registered by q2p")
            .storage_descriptor(self.storage_descriptor(location, Some(schema))?)
            .set_partition_keys(Some(partition_keys))
            .set_parameters(Some(parameters))
            .table_type("EXTERNAL_TABLE")
            .build()
            .map_err(|e| CatalogError::InvalidTable(format!("Failed to build table input: {e}")))
    }

    async fn fetch_table(
        &self,
        table: &str,
    ) -> std::result::Result<Option<RegisteredTable>, CatalogError> {
        let result = self
            .client
            .get_table()
            .database_name(&self.database)
            .name(table)
            .send()
            .await;

        match result {
            Ok(output) => Ok(output.table().map(|t| self.registered_table(t))),
            Err(e) if e.code() == Some(ENTITY_NOT_FOUND) => Ok(None),
            Err(e) => Err(classify("get_table", e)),
        }
    }

    fn registered_table(&self, table: &Table) -> RegisteredTable {
        let descriptor = table.storage_descriptor();
        let columns = descriptor
            .map(|sd| sd.columns())
            .unwrap_or_default()
            .iter()
            .map(|c| {
                let column_type = c
                    .r#type()
                    .and_then(ColumnType::from_glue_type)
                    .unwrap_or(ColumnType::String);
                Column::new(c.name(), column_type)
            })
            .collect();

        RegisteredTable {
            schema: TableSchema::new(columns),
            location: descriptor
                .and_then(|sd| sd.location())
                .map(|l| self.relative_location(l))
                .unwrap_or_default(),
            version_id: table.version_id().map(str::to_string),
        }
    }

    async fn ensure_database(&self) -> std::result::Result<(), CatalogError> {
        let input = DatabaseInput::builder()
            .name(&self.database)
            .description("Database created by q2p")
            .build()
            .map_err(|e| CatalogError::InvalidTable(format!("Failed to build database input: {e}")))?;

        match self.client.create_database().database_input(input).send().await {
            Ok(_) => {
                info!(database = %self.database, "Created Glue database");
                Ok(())
            }
            Err(e) if e.code() == Some(ALREADY_EXISTS) => Ok(()),
            Err(e) => Err(classify("create_database", e)),
        }
    }

    /// One optimistic create-or-merge round. `Ok(None)` means the race was
    /// lost and the caller should retry.
    async fn try_register(
        &self,
        table: &str,
        location: &str,
        schema: &TableSchema,
    ) -> std::result::Result<Option<RegistrationOutcome>, CatalogError> {
        let Some(existing) = self.fetch_table(table).await? else {
            let input = self.table_input(table, location, schema)?;
            let result = self
                .client
                .create_table()
                .database_name(&self.database)
                .table_input(input)
                .send()
                .await;

            return match result {
                Ok(_) => {
                    info!(table, columns = schema.len(), "Created Glue table");
                    Ok(Some(RegistrationOutcome::Created))
                }
                Err(e) if e.code() == Some(ALREADY_EXISTS) => Ok(None),
                Err(e) if e.code() == Some(ENTITY_NOT_FOUND) => {
                    self.ensure_database().await?;
                    Ok(None)
                }
                Err(e) => Err(classify("create_table", e)),
            };
        };

        let merge = SchemaMerge::merge(table, &existing.schema, schema)?;
        if !merge.has_changes() {
            debug!(table, "Glue table already covers schema");
            return Ok(Some(RegistrationOutcome::Unchanged));
        }

        let location = if existing.location.is_empty() {
            location
        } else {
            existing.location.as_str()
        };
        let input = self.table_input(table, location, &merge.schema)?;
        let result = self
            .client
            .update_table()
            .database_name(&self.database)
            .table_input(input)
            .set_version_id(existing.version_id)
            .send()
            .await;

        match result {
            Ok(_) => {
                info!(table, added = merge.added.len(), "Extended Glue table schema");
                Ok(Some(RegistrationOutcome::Extended { added: merge.added }))
            }
            Err(e) if e.code() == Some(CONCURRENT_MODIFICATION) => Ok(None),
            Err(e) => Err(classify("update_table", e)),
        }
    }

    async fn partition_locations(
        &self,
        table: &str,
    ) -> std::result::Result<Vec<String>, CatalogError> {
        let mut locations = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .get_partitions()
                .database_name(&self.database)
                .table_name(table)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| classify("get_partitions", e))?;

            locations.extend(
                output
                    .partitions()
                    .iter()
                    .filter_map(|p| p.storage_descriptor().and_then(|sd| sd.location()))
                    .map(|l| self.relative_location(l)),
            );

            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        locations.sort();
        Ok(locations)
    }

    async fn create_partition(
        &self,
        table: &str,
        values: &[(String, String)],
        location: &str,
    ) -> std::result::Result<(), CatalogError> {
        let input = PartitionInput::builder()
            .set_values(Some(values.iter().map(|(_, v)| v.clone()).collect()))
            .storage_descriptor(self.storage_descriptor(location, None)?)
            .build();

        let result = self
            .client
            .create_partition()
            .database_name(&self.database)
            .table_name(table)
            .partition_input(input)
            .send()
            .await;

        match result {
            Ok(_) => {
                debug!(table, partition = ?values, "Added Glue partition");
                Ok(())
            }
            Err(e) if e.code() == Some(ALREADY_EXISTS) => Ok(()),
            Err(e) => Err(classify("create_partition", e)),
        }
    }

    async fn load_entry(
        &self,
        table: &str,
    ) -> std::result::Result<Option<CatalogEntry>, CatalogError> {
        let Some(registered) = self.fetch_table(table).await? else {
            return Ok(None);
        };
        let partitions = self.partition_locations(table).await?;

        Ok(Some(CatalogEntry {
            table_name: table.to_string(),
            location: registered.location,
            schema: registered.schema,
            partitions,
        }))
    }

    async fn table_names(&self) -> std::result::Result<Vec<String>, CatalogError> {
        let mut names = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let result = self
                .client
                .get_tables()
                .database_name(&self.database)
                .set_next_token(next_token.take())
                .send()
                .await;
            let output = match result {
                Ok(output) => output,
                Err(e) if e.code() == Some(ENTITY_NOT_FOUND) => return Ok(Vec::new()),
                Err(e) => return Err(classify("get_tables", e)),
            };

            names.extend(output.table_list().iter().map(|t| t.name().to_string()));
            match output.next_token() {
                Some(token) if !token.is_empty() => next_token = Some(token.to_string()),
                _ => break,
            }
        }

        names.sort();
        Ok(names)
    }
}

#[async_trait]
impl CatalogRegistrar for GlueCatalog {
    async fn register(
        &self,
        table: &str,
        location: &str,
        schema: &TableSchema,
    ) -> Result<RegistrationOutcome> {
        self.check_circuit_breaker()?;

        for attempt in 1..=self.max_attempts {
            match self.try_register(table, location, schema).await {
                Ok(Some(outcome)) => return self.observe(Ok(outcome)),
                Ok(None) => {
                    debug!(table, attempt, "Glue table changed concurrently, retrying");
                }
                Err(e) => return self.observe(Err(e)),
            }
        }

        self.observe(Err(CatalogError::ConcurrentModification {
            table: table.to_string(),
            attempts: self.max_attempts,
        }))
    }

    async fn add_partition(
        &self,
        table: &str,
        values: &[(String, String)],
        location: &str,
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        self.check_circuit_breaker()?;
        let result = self.create_partition(table, values, location).await;
        self.observe(result)
    }

    async fn get_table(&self, table: &str) -> Result<Option<CatalogEntry>> {
        self.check_circuit_breaker()?;
        let result = self.load_entry(table).await;
        self.observe(result)
    }

    async fn list_tables(&self) -> Result<Vec<String>> {
        self.check_circuit_breaker()?;
        let result = self.table_names().await;
        self.observe(result)
    }

    fn name(&self) -> &str {
        "glue"
    }
}

fn glue_column(name: &str, glue_type: &str) -> std::result::Result<GlueColumn, CatalogError> {
    GlueColumn::builder()
        .name(name)
        .r#type(glue_type)
        .build()
        .map_err(|e| CatalogError::InvalidTable(format!("Failed to build column {name}: {e}")))
}

fn classify<E, R>(operation: &str, err: SdkError<E, R>) -> CatalogError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let message = format!("{operation}: {}", DisplayErrorContext(&err));
    if is_access_denied_code(err.code()) {
        CatalogError::AccessDenied(message)
    } else {
        CatalogError::Transport(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn catalog() -> GlueCatalog {
        let config = CatalogConfig {
            aws_region: Some("us-east-1".into()),
            aws_access_key_id: Some("test_key".into()),
            aws_secret_access_key: Some("test_secret".into()),
            ..CatalogConfig::default()
        };
        GlueCatalog::new(
            &config,
            "s3://processed-bucket/",
            vec!["month".into(), "day".into()],
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_locations_resolve_against_root() {
        let catalog = catalog().await;
        assert_eq!(
            catalog.absolute_location("processed/year=2026/"),
            "s3://processed-bucket/processed/year=2026/"
        );
        assert_eq!(
            catalog.relative_location("s3://processed-bucket/processed/year=2026/"),
            "processed/year=2026/"
        );
    }

    #[tokio::test]
    async fn test_table_input_shape() {
        let catalog = catalog().await;
        let schema = TableSchema::new(vec![
            Column::new("id", ColumnType::Long),
            Column::new("name", ColumnType::String),
        ]);

        let input = catalog
            .table_input("year_2026", "processed/year=2026/", &schema)
            .unwrap();
        assert_eq!(input.name(), "year_2026");
        assert_eq!(input.table_type(), Some("EXTERNAL_TABLE"));

        let sd = input.storage_descriptor().unwrap();
        let columns: Vec<(&str, Option<&str>)> =
            sd.columns().iter().map(|c| (c.name(), c.r#type())).collect();
        assert_eq!(columns, vec![("id", Some("bigint")), ("name", Some("string"))]);
        assert_eq!(sd.location(), Some("s3://processed-bucket/processed/year=2026/"));
        assert_eq!(sd.input_format(), Some(PARQUET_INPUT_FORMAT));

        let keys: Vec<&str> = input.partition_keys().iter().map(|c| c.name()).collect();
        assert_eq!(keys, vec!["month", "day"]);
    }

    #[tokio::test]
    async fn test_circuit_starts_closed() {
        let catalog = catalog().await;
        assert_eq!(
            catalog.circuit().state,
            crate::circuit_breaker::CircuitState::Closed
        );
        assert_eq!(catalog.name(), "glue");
    }
}
