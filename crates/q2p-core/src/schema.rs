//! Column types, schema inference and monotonic schema merging.
//!
//! Inference keeps columns in first-seen order and resolves each column to
//! the most specific type that holds every observed value:
//!
//! - identical types stay as they are
//! - `long` mixed with `double` becomes `double`
//! - any other mix becomes `string`
//! - nulls never influence the type
//!
//! A column seen only as null has no observed type. Resolving against the
//! registered table gives it the registered type (`string` for a new
//! column), and a `long` column is written as `double` when the table
//! already holds it as `double`.
//!
//! Merging is what the catalog does across calls: columns are appended,
//! never removed, and never retyped.

use crate::error::CatalogError;
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Primitive column types produced by conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// Boolean type
    Boolean,
    /// 64-bit integer
    Long,
    /// 64-bit float
    Double,
    /// UTF-8 string; also holds nested values as JSON text
    String,
}

impl ColumnType {
    /// Type of a single JSON value; `None` for null.
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(ColumnType::Boolean),
            Value::Number(n) if n.is_i64() => Some(ColumnType::Long),
            // u64 beyond i64::MAX does not fit a long column
            Value::Number(n) if n.is_u64() => Some(ColumnType::Double),
            Value::Number(_) => Some(ColumnType::Double),
            Value::String(_) | Value::Array(_) | Value::Object(_) => Some(ColumnType::String),
        }
    }

    /// Whether every value of `self` can be stored in a `target` column.
    pub fn fits_into(self, target: Self) -> bool {
        self == target || (self == ColumnType::Long && target == ColumnType::Double)
    }

    /// Most specific type holding values of both types.
    pub fn unify(self, other: Self) -> Self {
        use ColumnType::*;

        match (self, other) {
            (a, b) if a == b => a,
            (Long, Double) | (Double, Long) => Double,
            _ => String,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Long => "long",
            ColumnType::Double => "double",
            ColumnType::String => "string",
        }
    }

    /// Hive/Glue type name.
    pub fn glue_type(&self) -> &'static str {
        match self {
            ColumnType::Boolean => "boolean",
            ColumnType::Long => "bigint",
            ColumnType::Double => "double",
            ColumnType::String => "string",
        }
    }

    /// Parse a Hive/Glue type name. Unknown names map to `None`.
    pub fn from_glue_type(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "boolean" => Some(ColumnType::Boolean),
            "bigint" | "long" | "int" | "integer" | "smallint" | "tinyint" => {
                Some(ColumnType::Long)
            }
            "double" | "float" => Some(ColumnType::Double),
            "string" => Some(ColumnType::String),
            other if other.starts_with("varchar") || other.starts_with("char") => {
                Some(ColumnType::String)
            }
            _ => None,
        }
    }

    /// Arrow type used in written artifacts.
    pub fn arrow_type(&self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Long => DataType::Int64,
            ColumnType::Double => DataType::Float64,
            ColumnType::String => DataType::Utf8,
        }
    }

    /// Column type for an Arrow type read back from an artifact.
    pub fn from_arrow(data_type: &DataType) -> Self {
        match data_type {
            DataType::Boolean => ColumnType::Boolean,
            DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32 => ColumnType::Long,
            DataType::Float16 | DataType::Float32 | DataType::Float64 | DataType::UInt64 => {
                ColumnType::Double
            }
            _ => ColumnType::String,
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named, typed column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
        }
    }
}

/// Ordered list of columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    columns: Vec<Column>,
}

impl TableSchema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Arrow schema with every column nullable.
    pub fn to_arrow(&self) -> SchemaRef {
        let fields: Vec<Field> = self
            .columns
            .iter()
            .map(|c| Field::new(&c.name, c.column_type.arrow_type(), true))
            .collect();
        Arc::new(Schema::new(fields))
    }

    pub fn from_arrow(schema: &Schema) -> Self {
        Self::new(
            schema
                .fields()
                .iter()
                .map(|f| Column::new(f.name().clone(), ColumnType::from_arrow(f.data_type())))
                .collect(),
        )
    }
}

/// Incremental schema inference over JSON objects.
#[derive(Debug, Default)]
pub struct SchemaInference {
    columns: Vec<(String, Option<ColumnType>)>,
    index: HashMap<String, usize>,
}

impl SchemaInference {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one record into the running schema.
    pub fn observe(&mut self, record: &Map<String, Value>) {
        for (name, value) in record {
            let observed = ColumnType::of(value);
            match self.index.get(name) {
                Some(&position) => {
                    let slot = &mut self.columns[position].1;
                    *slot = match (*slot, observed) {
                        (Some(current), Some(seen)) => Some(current.unify(seen)),
                        (current, None) => current,
                        (None, seen) => seen,
                    };
                }
                None => {
                    self.index.insert(name.clone(), self.columns.len());
                    self.columns.push((name.clone(), observed));
                }
            }
        }
    }

    /// Columns seen only as null so far.
    pub fn untyped_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|(_, ty)| ty.is_none())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Schema for a table with no registered columns.
    pub fn finish(self) -> TableSchema {
        self.resolve(&TableSchema::default())
    }

    /// Schema aligned with the columns already registered for the table.
    pub fn resolve(self, registered: &TableSchema) -> TableSchema {
        TableSchema::new(
            self.columns
                .into_iter()
                .map(|(name, observed)| {
                    let existing = registered.column(&name).map(|c| c.column_type);
                    let column_type = match (observed, existing) {
                        (None, Some(existing)) => existing,
                        (None, None) => ColumnType::String,
                        (Some(observed), Some(existing)) if observed.fits_into(existing) => {
                            existing
                        }
                        (Some(observed), _) => observed,
                    };
                    Column::new(name, column_type)
                })
                .collect(),
        )
    }
}

/// Outcome of merging an incoming schema into a registered one.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaMerge {
    /// Registered columns followed by newly appended ones
    pub schema: TableSchema,
    /// Columns appended by this merge
    pub added: Vec<Column>,
}

impl SchemaMerge {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty()
    }

    /// Widen `existing` with the columns of `incoming`.
    ///
    /// Existing order is preserved and new columns are appended in their
    /// incoming order. Columns absent from `incoming` are kept. A column
    /// whose type differs fails with `CatalogError::SchemaConflict`.
    pub fn merge(
        table: &str,
        existing: &TableSchema,
        incoming: &TableSchema,
    ) -> Result<Self, CatalogError> {
        let mut columns = existing.columns().to_vec();
        let mut added = Vec::new();

        for column in incoming.columns() {
            match existing.column(&column.name) {
                Some(registered) if registered.column_type != column.column_type => {
                    return Err(CatalogError::SchemaConflict {
                        table: table.to_string(),
                        column: column.name.clone(),
                        existing: registered.column_type.to_string(),
                        incoming: column.column_type.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    debug!(table, column = %column.name, column_type = %column.column_type, "Appending column");
                    columns.push(column.clone());
                    added.push(column.clone());
                }
            }
        }

        Ok(Self {
            schema: TableSchema::new(columns),
            added,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn infer(records: &[Value]) -> TableSchema {
        let mut inference = SchemaInference::new();
        for record in records {
            inference.observe(record.as_object().unwrap());
        }
        inference.finish()
    }

    fn infer_against(records: &[Value], registered: &TableSchema) -> TableSchema {
        let mut inference = SchemaInference::new();
        for record in records {
            inference.observe(record.as_object().unwrap());
        }
        inference.resolve(registered)
    }

    fn schema(columns: &[(&str, ColumnType)]) -> TableSchema {
        TableSchema::new(
            columns
                .iter()
                .map(|(name, ty)| Column::new(*name, *ty))
                .collect(),
        )
    }

    #[test]
    fn test_infer_first_seen_order() {
        let inferred = infer(&[
            json!({"zeta": 1, "alpha": "a"}),
            json!({"mid": true, "zeta": 2}),
        ]);
        assert_eq!(inferred.names(), vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_infer_numeric_promotion() {
        let inferred = infer(&[json!({"v": 1}), json!({"v": 2.5})]);
        assert_eq!(inferred.column("v").unwrap().column_type, ColumnType::Double);
    }

    #[test]
    fn test_infer_conflict_becomes_string() {
        let inferred = infer(&[json!({"v": 1}), json!({"v": "one"})]);
        assert_eq!(inferred.column("v").unwrap().column_type, ColumnType::String);

        let inferred = infer(&[json!({"v": true}), json!({"v": 1.0})]);
        assert_eq!(inferred.column("v").unwrap().column_type, ColumnType::String);
    }

    #[test]
    fn test_infer_nulls_do_not_change_type() {
        let inferred = infer(&[json!({"v": null}), json!({"v": 3}), json!({"v": null})]);
        assert_eq!(inferred.column("v").unwrap().column_type, ColumnType::Long);

        let inferred = infer(&[json!({"only_null": null})]);
        assert_eq!(
            inferred.column("only_null").unwrap().column_type,
            ColumnType::String
        );
    }

    #[test]
    fn test_resolve_uses_registered_types() {
        let registered = schema(&[
            ("score", ColumnType::Long),
            ("ratio", ColumnType::Double),
            ("flag", ColumnType::Boolean),
        ]);

        let mut inference = SchemaInference::new();
        for record in [
            json!({"score": null, "ratio": 2, "flag": null, "fresh": null}),
            json!({"score": null, "ratio": 3, "flag": null, "fresh": null}),
        ] {
            inference.observe(record.as_object().unwrap());
        }
        assert_eq!(inference.untyped_columns(), vec!["score", "flag", "fresh"]);

        let resolved = inference.resolve(&registered);
        assert_eq!(
            resolved,
            schema(&[
                ("score", ColumnType::Long),
                ("ratio", ColumnType::Double),
                ("flag", ColumnType::Boolean),
                ("fresh", ColumnType::String),
            ])
        );
        let merge = SchemaMerge::merge("t", &registered, &resolved).unwrap();
        assert_eq!(merge.added, vec![Column::new("fresh", ColumnType::String)]);
    }

    #[test]
    fn test_resolve_keeps_incompatible_types() {
        let registered = schema(&[("v", ColumnType::Long)]);
        let resolved = infer_against(&[json!({"v": 1.5})], &registered);
        assert_eq!(resolved.column("v").unwrap().column_type, ColumnType::Double);
        assert!(SchemaMerge::merge("t", &registered, &resolved).is_err());
    }

    #[test]
    fn test_infer_nested_values_are_strings() {
        let inferred = infer(&[json!({"obj": {"a": 1}, "arr": [1, 2]})]);
        assert_eq!(inferred.column("obj").unwrap().column_type, ColumnType::String);
        assert_eq!(inferred.column("arr").unwrap().column_type, ColumnType::String);
    }

    #[test]
    fn test_large_unsigned_is_double() {
        assert_eq!(ColumnType::of(&json!(u64::MAX)), Some(ColumnType::Double));
        assert_eq!(ColumnType::of(&json!(-5)), Some(ColumnType::Long));
    }

    #[test]
    fn test_merge_appends_new_columns() {
        let existing = schema(&[("a", ColumnType::Long)]);
        let incoming = schema(&[("a", ColumnType::Long), ("b", ColumnType::String)]);

        let merge = SchemaMerge::merge("t", &existing, &incoming).unwrap();
        assert!(merge.has_changes());
        assert_eq!(merge.schema.names(), vec!["a", "b"]);
        assert_eq!(merge.added, vec![Column::new("b", ColumnType::String)]);
    }

    #[test]
    fn test_merge_retains_missing_columns() {
        let existing = schema(&[("a", ColumnType::Long), ("b", ColumnType::String)]);
        let incoming = schema(&[("c", ColumnType::Double), ("a", ColumnType::Long)]);

        let merge = SchemaMerge::merge("t", &existing, &incoming).unwrap();
        assert_eq!(merge.schema.names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_merge_identical_is_unchanged() {
        let existing = schema(&[("a", ColumnType::Long)]);
        let merge = SchemaMerge::merge("t", &existing, &existing).unwrap();
        assert!(!merge.has_changes());
        assert_eq!(merge.schema, existing);
    }

    #[test]
    fn test_merge_type_conflict() {
        let existing = schema(&[("a", ColumnType::Long)]);
        let incoming = schema(&[("a", ColumnType::String)]);

        let err = SchemaMerge::merge("year_2026", &existing, &incoming).unwrap_err();
        match err {
            CatalogError::SchemaConflict {
                table,
                column,
                existing,
                incoming,
            } => {
                assert_eq!(table, "year_2026");
                assert_eq!(column, "a");
                assert_eq!(existing, "long");
                assert_eq!(incoming, "string");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_glue_type_mapping() {
        for ty in [
            ColumnType::Boolean,
            ColumnType::Long,
            ColumnType::Double,
            ColumnType::String,
        ] {
            assert_eq!(ColumnType::from_glue_type(ty.glue_type()), Some(ty));
        }
        assert_eq!(ColumnType::from_glue_type("varchar(20)"), Some(ColumnType::String));
        assert_eq!(ColumnType::from_glue_type("array<int>"), None);
    }

    #[test]
    fn test_arrow_schema_round_trip() {
        let original = schema(&[
            ("flag", ColumnType::Boolean),
            ("n", ColumnType::Long),
            ("x", ColumnType::Double),
            ("s", ColumnType::String),
        ]);
        let arrow = original.to_arrow();
        assert!(arrow.fields().iter().all(|f| f.is_nullable()));
        assert_eq!(TableSchema::from_arrow(&arrow), original);
    }
}
