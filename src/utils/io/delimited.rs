//! Delimited text output
//!
//! Report and progress tables are rendered as Arrow record batches of text
//! columns and written with the Arrow CSV writer. Archive templates carry an
//! extra label line (`<template>,<version>`) above the column header.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{ArrayRef, StringArray};
use arrow::csv::WriterBuilder;
use arrow_schema::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;

use crate::error::util::{atomic_write, ensure_directory};
use crate::error::{Result, StudyError};
use crate::utils::logging::{log_operation_complete, log_operation_start};

/// Build a batch of nullable text columns
///
/// Empty strings are written as nulls so they render as empty cells.
pub fn text_batch(columns: &[String], rows: &[Vec<String>]) -> Result<RecordBatch> {
    if let Some(row) = rows.iter().find(|r| r.len() != columns.len()) {
        return Err(StudyError::config(format!(
            "row has {} values for {} columns",
            row.len(),
            columns.len()
        )));
    }

    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));
    let arrays: Vec<ArrayRef> = (0..columns.len())
        .map(|i| {
            let values: StringArray = rows
                .iter()
                .map(|row| Some(row[i].as_str()).filter(|v| !v.is_empty()))
                .collect();
            Arc::new(values) as ArrayRef
        })
        .collect();

    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Render a batch as CSV text, optionally preceded by a label line
pub fn render_csv(batch: &RecordBatch, label: Option<&str>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    if let Some(label) = label {
        buffer.extend_from_slice(label.as_bytes());
        buffer.push(b'\n');
    }
    {
        let mut writer = WriterBuilder::new().with_header(true).build(&mut buffer);
        writer.write(batch)?;
    }
    Ok(buffer)
}

/// Write a text table, replacing any previous file atomically
///
/// # Arguments
/// * `path` - Destination file
/// * `label` - Optional first line written above the header
/// * `columns` - Column names
/// * `rows` - Row values in column order
pub fn write_table(
    path: &Path,
    label: Option<&str>,
    columns: &[String],
    rows: &[Vec<String>],
) -> Result<()> {
    let start = Instant::now();
    log_operation_start("Writing table", path);

    let batch = text_batch(columns, rows)?;
    let data = render_csv(&batch, label)?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent, "report output")?;
    }
    atomic_write(path, &data)?;

    log_operation_complete("wrote", path, rows.len(), Some(start.elapsed()));
    Ok(())
}
