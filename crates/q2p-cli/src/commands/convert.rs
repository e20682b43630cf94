//! Convert command implementation.

use anyhow::{Context, Result};
use q2p_core::config::ProcessingConfig;
use q2p_core::convert::{FormatConverter, SourceFormat};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Convert a local JSON lines file and report what was kept.
pub fn run(
    processing: ProcessingConfig,
    input: &Path,
    output: Option<PathBuf>,
    max_skip_ratio: Option<f64>,
) -> Result<()> {
    let raw = std::fs::read(input).with_context(|| format!("reading {}", input.display()))?;

    let mut converter = FormatConverter::new(&processing);
    if let Some(ratio) = max_skip_ratio {
        anyhow::ensure!(
            ratio > 0.0 && ratio <= 1.0,
            "max skip ratio must be in (0, 1], got {ratio}"
        );
        converter = converter.with_max_skip_ratio(ratio);
    }

    let format = SourceFormat::from_key(&input.to_string_lossy());
    let artifact = converter.convert(&raw, format)?;

    let output = output.unwrap_or_else(|| input.with_extension("parquet"));
    let mut writer = BufWriter::new(
        File::create(&output).with_context(|| format!("creating {}", output.display()))?,
    );
    for chunk in artifact.payload.iter() {
        writer.write_all(chunk)?;
    }
    writer.flush()?;

    println!("Wrote {}", output.display());
    println!("  rows:    {}", artifact.row_count);
    println!(
        "  skipped: {} of {} lines",
        artifact.skipped_lines, artifact.total_lines
    );
    println!("  bytes:   {}", artifact.byte_size());
    println!("  schema:");
    for column in artifact.schema.columns() {
        println!("    {:<32} {}", column.name, column.column_type);
    }
    Ok(())
}
