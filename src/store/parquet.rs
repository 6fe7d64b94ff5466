//! Parquet-backed canonical store
//!
//! Rows live in memory and are snapshotted to a single Parquet file on
//! [`ParquetStore::flush`]. The snapshot is written next to the target and
//! renamed over it, so a crash never leaves a half-written store.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use arrow_schema::{DataType, Field, FieldRef, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::error::util::{atomic_write, ensure_directory, safe_open_file};
use crate::models::canonical::{CanonicalRow, Provenance, RowKey};
use crate::utils::logging::{log_operation_complete, log_operation_start};

use super::{CanonicalStore, KeyFilter, MemoryStore};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

/// Flat row layout of the snapshot
///
/// Key columns stay queryable; fields and provenance are JSON documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct StoredRow {
    participant: String,
    visit: String,
    instrument: String,
    source_id: String,
    collected_at: String,
    fields: String,
    provenance: String,
}

impl StoredRow {
    fn schema() -> Schema {
        Schema::new(vec![
            Field::new("participant", DataType::Utf8, false),
            Field::new("visit", DataType::Utf8, false),
            Field::new("instrument", DataType::Utf8, false),
            Field::new("source_id", DataType::Utf8, false),
            Field::new("collected_at", DataType::Utf8, false),
            Field::new("fields", DataType::Utf8, false),
            Field::new("provenance", DataType::Utf8, false),
        ])
    }

    fn from_canonical(row: &CanonicalRow) -> Result<Self> {
        Ok(Self {
            participant: row.key.participant.clone(),
            visit: row.key.visit.clone(),
            instrument: row.key.instrument.clone(),
            source_id: row.provenance.source_id.clone(),
            collected_at: row.collected_at().format(TIMESTAMP_FORMAT).to_string(),
            fields: serde_json::to_string(&row.fields)?,
            provenance: serde_json::to_string(&row.provenance)?,
        })
    }

    fn into_canonical(self) -> Result<CanonicalRow> {
        let provenance: Provenance = serde_json::from_str(&self.provenance)?;
        Ok(CanonicalRow::new(
            RowKey::new(self.participant, self.visit, self.instrument),
            serde_json::from_str(&self.fields)?,
            provenance,
        ))
    }
}

/// Canonical store persisted as a Parquet snapshot
#[derive(Debug)]
pub struct ParquetStore {
    path: PathBuf,
    rows: MemoryStore,
    dirty: bool,
}

impl ParquetStore {
    /// Open the store at `path`, starting empty if no snapshot exists
    pub fn open(path: &Path) -> Result<Self> {
        let rows = if path.exists() {
            read_snapshot(path)?
        } else {
            log::info!("No canonical store at {}, starting empty", path.display());
            MemoryStore::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            rows,
            dirty: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the snapshot if anything changed since the last flush
    pub fn flush(&mut self) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        write_snapshot(&self.path, &self.rows)?;
        self.dirty = false;
        Ok(())
    }
}

impl CanonicalStore for ParquetStore {
    fn get(&self, key: &RowKey) -> Option<&CanonicalRow> {
        self.rows.get(key)
    }

    fn put(&mut self, row: CanonicalRow) -> Result<Option<CanonicalRow>> {
        let previous = self.rows.put(row)?;
        self.dirty = true;
        Ok(previous)
    }

    fn list(&self, filter: &KeyFilter) -> Vec<&CanonicalRow> {
        self.rows.list(filter)
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}

fn read_snapshot(path: &Path) -> Result<MemoryStore> {
    let start = Instant::now();
    log_operation_start("Reading canonical store", path);

    let file = safe_open_file(path, "canonical store")?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;

    let mut rows = Vec::new();
    for batch in reader {
        let stored: Vec<StoredRow> = serde_arrow::from_record_batch(&batch?)?;
        for row in stored {
            rows.push(row.into_canonical()?);
        }
    }

    log_operation_complete("read", path, rows.len(), Some(start.elapsed()));
    Ok(rows.into_iter().collect())
}

fn write_snapshot(path: &Path, rows: &MemoryStore) -> Result<()> {
    let start = Instant::now();
    let stored = rows
        .iter()
        .map(StoredRow::from_canonical)
        .collect::<Result<Vec<_>>>()?;

    let schema = Arc::new(StoredRow::schema());
    let fields: Vec<FieldRef> = schema.fields().iter().map(Arc::clone).collect();
    let batch: RecordBatch = serde_arrow::to_record_batch(&fields, &stored)?;

    let mut writer = ArrowWriter::try_new(Vec::new(), schema, None)?;
    writer.write(&batch)?;
    let buffer = writer.into_inner()?;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_directory(parent, "canonical store")?;
    }
    atomic_write(path, &buffer)?;

    log_operation_complete("wrote", path, stored.len(), Some(start.elapsed()));
    Ok(())
}
