//! Format converter: JSON lines in, Parquet out.
//!
//! Each non-blank line is parsed independently. Lines that are not valid
//! JSON objects are skipped and counted; conversion fails only when the
//! skipped fraction exceeds the configured threshold, which signals a
//! wholesale format mismatch rather than sparse corruption.
//!
//! The converter is synchronous and CPU bound; the worker runs it on the
//! blocking pool.

mod sink;

use crate::config::{ParquetCompression, ProcessingConfig};
use crate::error::ConversionError;
use crate::schema::{Column, ColumnType, SchemaInference, TableSchema};
use arrow::array::{
    ArrayRef, BooleanBuilder, Float64Builder, Int64Builder, RecordBatch, StringBuilder,
};
use object_store::PutPayload;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::{Map, Value};
use sink::PayloadSink;
use std::sync::Arc;
use tracing::{debug, warn};

/// Hint about the encoding of a raw object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Newline-delimited JSON (`.jsonl`, `.ndjson`, `.json`)
    JsonLines,
    /// Unrecognized extension; decoded as JSON lines
    Unspecified,
}

impl SourceFormat {
    /// Derive the hint from an object key.
    pub fn from_key(key: &str) -> Self {
        let file_name = key.rsplit('/').next().unwrap_or(key);
        match file_name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
            Some(ext) if matches!(ext.as_str(), "jsonl" | "ndjson" | "json") => {
                SourceFormat::JsonLines
            }
            _ => SourceFormat::Unspecified,
        }
    }
}

/// Output of a successful conversion.
#[derive(Debug, Clone)]
pub struct ConvertedArtifact {
    /// Parquet bytes, chunked
    pub payload: PutPayload,
    /// Inferred schema, in column order
    pub schema: TableSchema,
    /// Rows written
    pub row_count: usize,
    /// Unparseable lines skipped
    pub skipped_lines: usize,
    /// Non-blank input lines
    pub total_lines: usize,
    /// Columns seen only as null; typed from the registered table
    pub untyped_columns: Vec<String>,
}

impl ConvertedArtifact {
    /// Encoded size in bytes.
    pub fn byte_size(&self) -> usize {
        self.payload.content_length()
    }

    /// Whether converting again against a table that registers `column` as
    /// `registered` would produce a compatible artifact.
    pub fn adapts_to(&self, column: &str, registered: ColumnType) -> bool {
        if self.untyped_columns.iter().any(|name| name == column) {
            return true;
        }
        self.schema
            .column(column)
            .is_some_and(|c| c.column_type.fits_into(registered))
    }
}

/// JSON lines to Parquet converter.
#[derive(Debug, Clone)]
pub struct FormatConverter {
    max_skip_ratio: f64,
    compression: ParquetCompression,
    row_group_size: usize,
}

impl Default for FormatConverter {
    fn default() -> Self {
        Self::new(&ProcessingConfig::default())
    }
}

impl FormatConverter {
    pub fn new(config: &ProcessingConfig) -> Self {
        Self {
            max_skip_ratio: config.max_skip_ratio,
            compression: config.compression,
            row_group_size: config.row_group_size.max(1),
        }
    }

    pub fn with_max_skip_ratio(mut self, ratio: f64) -> Self {
        self.max_skip_ratio = ratio;
        self
    }

    pub fn with_compression(mut self, compression: ParquetCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Convert raw JSON lines into a Parquet artifact for a new table.
    pub fn convert(
        &self,
        raw: &[u8],
        format: SourceFormat,
    ) -> Result<ConvertedArtifact, ConversionError> {
        self.convert_for(raw, format, &TableSchema::default())
    }

    /// Convert raw JSON lines, typing columns to match `registered` where
    /// the observed values allow it.
    pub fn convert_for(
        &self,
        raw: &[u8],
        format: SourceFormat,
        registered: &TableSchema,
    ) -> Result<ConvertedArtifact, ConversionError> {
        if format == SourceFormat::Unspecified {
            debug!("No format hint, decoding as JSON lines");
        }

        let mut records: Vec<Map<String, Value>> = Vec::new();
        let mut inference = SchemaInference::new();
        let mut total_lines = 0usize;
        let mut skipped_lines = 0usize;

        for (line_number, line) in raw.split(|b| *b == b'\n').enumerate() {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            total_lines += 1;

            match serde_json::from_slice::<Value>(line) {
                Ok(Value::Object(record)) => {
                    inference.observe(&record);
                    records.push(record);
                }
                Ok(_) => {
                    skipped_lines += 1;
                    debug!(line = line_number + 1, "Skipping non-object line");
                }
                Err(e) => {
                    skipped_lines += 1;
                    debug!(line = line_number + 1, error = %e, "Skipping unparseable line");
                }
            }
        }

        if total_lines == 0 {
            return Err(ConversionError::NoRecords);
        }

        let ratio = skipped_lines as f64 / total_lines as f64;
        if ratio > self.max_skip_ratio {
            return Err(ConversionError::SkipRatioExceeded {
                skipped: skipped_lines,
                total: total_lines,
                threshold: self.max_skip_ratio,
            });
        }

        if records.is_empty() {
            return Err(ConversionError::NoRecords);
        }

        if skipped_lines > 0 {
            warn!(
                skipped = skipped_lines,
                total = total_lines,
                "Skipped unparseable lines"
            );
        }

        let untyped_columns = inference.untyped_columns();
        let schema = inference.resolve(registered);
        let batch = build_batch(&schema, &records)?;
        let payload = self.write_parquet(&batch)?;

        Ok(ConvertedArtifact {
            payload,
            schema,
            row_count: records.len(),
            skipped_lines,
            total_lines,
            untyped_columns,
        })
    }

    fn writer_properties(&self) -> WriterProperties {
        let compression = match self.compression {
            ParquetCompression::Snappy => Compression::SNAPPY,
            ParquetCompression::Gzip => Compression::GZIP(Default::default()),
            ParquetCompression::Lz4 => Compression::LZ4,
            ParquetCompression::Zstd => Compression::ZSTD(Default::default()),
            ParquetCompression::None => Compression::UNCOMPRESSED,
        };

        WriterProperties::builder()
            .set_compression(compression)
            .set_max_row_group_size(self.row_group_size)
            .build()
    }

    fn write_parquet(&self, batch: &RecordBatch) -> Result<PutPayload, ConversionError> {
        let mut sink = PayloadSink::new();
        let mut writer =
            ArrowWriter::try_new(&mut sink, batch.schema(), Some(self.writer_properties()))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(sink.freeze())
    }
}

fn build_batch(
    schema: &TableSchema,
    records: &[Map<String, Value>],
) -> Result<RecordBatch, ConversionError> {
    let arrays: Vec<ArrayRef> = schema
        .columns()
        .iter()
        .map(|column| build_column(column, records))
        .collect();

    Ok(RecordBatch::try_new(schema.to_arrow(), arrays)?)
}

fn build_column(column: &Column, records: &[Map<String, Value>]) -> ArrayRef {
    let values = records.iter().map(|record| record.get(&column.name));

    match column.column_type {
        ColumnType::Boolean => {
            let mut builder = BooleanBuilder::with_capacity(records.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_bool));
            }
            Arc::new(builder.finish())
        }
        ColumnType::Long => {
            let mut builder = Int64Builder::with_capacity(records.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_i64));
            }
            Arc::new(builder.finish())
        }
        ColumnType::Double => {
            let mut builder = Float64Builder::with_capacity(records.len());
            for value in values {
                builder.append_option(value.and_then(Value::as_f64));
            }
            Arc::new(builder.finish())
        }
        ColumnType::String => {
            let mut builder = StringBuilder::with_capacity(records.len(), records.len() * 16);
            for value in values {
                match value {
                    None | Some(Value::Null) => builder.append_null(),
                    Some(Value::String(s)) => builder.append_value(s),
                    Some(other) => builder.append_value(other.to_string()),
                }
            }
            Arc::new(builder.finish())
        }
    }
}
