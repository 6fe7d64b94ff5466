//! Raw export loading
//!
//! Survey and task exports arrive as CSV or Parquet files. Each file is read
//! into Arrow record batches on a blocking thread and flattened into a
//! [`RawExport`] of text cells; typing is left to the normalizer.

use std::collections::BTreeMap;
use std::io::Seek;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::{Array, AsArray};
use arrow::compute::cast;
use arrow::csv::ReaderBuilder;
use arrow::csv::reader::Format;
use arrow_schema::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use crate::error::util::safe_open_file;
use crate::error::{Result, SourceStructureError, StudyError};
use crate::models::raw::RawExport;
use crate::utils::logging::{log_operation_complete, log_operation_start};

/// Read batches from a delimited export, every column as text
fn read_csv_batches(path: &Path, delimiter: u8) -> Result<(Vec<String>, Vec<RecordBatch>)> {
    let mut file = safe_open_file(path, "raw export")?;
    let (inferred, _) = Format::default()
        .with_header(true)
        .with_delimiter(delimiter)
        .infer_schema(&mut file, Some(0))?;
    file.rewind().map_err(|e| StudyError::io_with_path(e, path))?;

    let columns: Vec<String> = inferred.fields().iter().map(|f| f.name().clone()).collect();
    let schema = Arc::new(Schema::new(
        columns
            .iter()
            .map(|name| Field::new(name, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    ));

    let reader = ReaderBuilder::new(schema)
        .with_header(true)
        .with_delimiter(delimiter)
        .build(file)?;
    let batches = reader.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((columns, batches))
}

fn read_parquet_batches(path: &Path) -> Result<(Vec<String>, Vec<RecordBatch>)> {
    let file = safe_open_file(path, "raw export")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let columns = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let batches = builder
        .build()?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((columns, batches))
}

/// Flatten a batch into rows of text cells
fn batch_rows(batch: &RecordBatch) -> Result<Vec<Vec<Option<String>>>> {
    let columns = batch
        .columns()
        .iter()
        .map(|column| cast(column, &DataType::Utf8))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok((0..batch.num_rows())
        .map(|row| {
            columns
                .iter()
                .map(|column| {
                    let text = column.as_string::<i32>();
                    (!text.is_null(row)).then(|| text.value(row).to_string())
                })
                .collect()
        })
        .collect())
}

/// Read one export file synchronously
///
/// The file's modification time becomes the export's extraction time.
pub fn read_export(source_id: &str, path: &Path) -> Result<RawExport> {
    let start = Instant::now();
    log_operation_start("Reading raw export", path);

    let (columns, batches) = match path.extension().and_then(|e| e.to_str()) {
        Some("parquet") => read_parquet_batches(path)?,
        Some("csv") => read_csv_batches(path, b',')?,
        Some("tsv" | "txt") => read_csv_batches(path, b'\t')?,
        _ => {
            return Err(SourceStructureError::Unreadable {
                source_id: source_id.to_string(),
                reason: format!("unsupported export format: {}", path.display()),
            }
            .into());
        }
    };

    let mut export = RawExport::new(source_id, columns);
    for batch in &batches {
        export.rows.extend(batch_rows(batch)?);
    }
    export.extracted_at = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(|t| DateTime::<Utc>::from(t).naive_utc());

    log_operation_complete("read", path, export.num_rows(), Some(start.elapsed()));
    Ok(export)
}

/// Load one export without blocking the runtime
pub async fn load_export(source_id: String, path: PathBuf) -> Result<RawExport> {
    let target = path.clone();
    tokio::task::spawn_blocking(move || read_export(&source_id, &path))
        .await
        .map_err(|e| StudyError::io_with_path(std::io::Error::other(e), target))?
}

/// Load every configured export concurrently
///
/// # Arguments
/// * `exports` - Export path per source id
/// * `concurrency` - Files read at the same time
///
/// # Returns
/// One result per source, in source id order
pub async fn load_exports(
    exports: &BTreeMap<String, PathBuf>,
    concurrency: usize,
) -> Vec<(String, Result<RawExport>)> {
    let mut results: Vec<(String, Result<RawExport>)> = stream::iter(exports.clone())
        .map(|(source_id, path)| async move {
            let result = load_export(source_id.clone(), path).await;
            (source_id, result)
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    results.sort_by(|a, b| a.0.cmp(&b.0));
    log::info!("Loaded {} raw exports", results.len());
    results
}
