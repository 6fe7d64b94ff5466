//! Raw export normalization
//!
//! Turns one raw export into canonical rows using its declared
//! [`SourceSchema`]. Structural problems (missing required columns, a header
//! that does not belong to the schema) reject the whole export. Cell-level
//! problems drop only the offending row and are reported as
//! [`ValidationError`]s.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use rayon::prelude::*;
use smallvec::SmallVec;
use rustc_hash::FxHashMap;

use crate::config::PipelineConfig;
use crate::error::{SourceStructureError, ValidationError};
use crate::models::canonical::{CanonicalRow, FieldValue, Provenance, RowKey};
use crate::models::participant::Cohort;
use crate::models::raw::RawExport;
use crate::schema::adapt::{DateFormatConfig, parse_date_string, parse_datetime_string};
use crate::schema::source::{
    ColumnSpec, FieldKind, SchemaIssue, SourceSchema, check_export_header,
};

/// Canonical rows and row-level errors from one export
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizeOutput {
    pub rows: Vec<CanonicalRow>,
    pub errors: Vec<ValidationError>,
}

/// Generic normalizer driven by source schemas
#[derive(Debug, Clone)]
pub struct Normalizer {
    date_formats: DateFormatConfig,
    missing_values: BTreeSet<String>,
    pilot_ids: BTreeSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::new(&PipelineConfig::default())
    }
}

type RowErrors = SmallVec<[ValidationError; 2]>;

impl Normalizer {
    #[must_use]
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            date_formats: config.date_format_config.clone(),
            missing_values: config.missing_values.iter().cloned().collect(),
            pilot_ids: config.pilot_ids.iter().cloned().collect(),
        }
    }

    /// Normalize one export
    ///
    /// # Errors
    /// Returns a [`SourceStructureError`] and emits nothing when the export
    /// cannot be read with `schema` at all.
    pub fn normalize(
        &self,
        export: &RawExport,
        schema: &SourceSchema,
    ) -> Result<NormalizeOutput, SourceStructureError> {
        check_structure(export, schema)?;

        let dates = schema.date_formats.as_ref().unwrap_or(&self.date_formats);
        let columns: FxHashMap<&str, usize> = export
            .columns
            .iter()
            .enumerate()
            .map(|(i, c)| (c.as_str(), i))
            .collect();

        let results: Vec<Result<CanonicalRow, RowErrors>> = export
            .rows
            .par_iter()
            .enumerate()
            .map(|(row_idx, cells)| {
                let ctx = RowContext {
                    normalizer: self,
                    schema,
                    export,
                    columns: &columns,
                    dates,
                    row_idx,
                    cells,
                };
                ctx.normalize_row()
            })
            .collect();

        let mut output = NormalizeOutput::default();
        for result in results {
            match result {
                Ok(row) => output.rows.push(row),
                Err(errors) => output.errors.extend(errors),
            }
        }

        log::debug!(
            "Normalized {}: {} rows kept, {} validation errors",
            schema.source_id,
            output.rows.len(),
            output.errors.len()
        );
        Ok(output)
    }

    fn is_missing(&self, cell: Option<&String>) -> bool {
        cell.is_none_or(|c| {
            let c = c.trim();
            c.is_empty() || self.missing_values.contains(c)
        })
    }
}

fn check_structure(export: &RawExport, schema: &SourceSchema) -> Result<(), SourceStructureError> {
    if export.source_id != schema.source_id {
        return Err(SourceStructureError::SchemaMismatch {
            expected: schema.source_id.clone(),
            found: export.source_id.clone(),
        });
    }
    if export.columns.is_empty() {
        return Err(SourceStructureError::Unreadable {
            source_id: export.source_id.clone(),
            reason: "export has no header".to_string(),
        });
    }

    let mut seen = BTreeSet::new();
    for column in &export.columns {
        if !seen.insert(column.as_str()) {
            return Err(SourceStructureError::DuplicateColumn {
                source_id: export.source_id.clone(),
                column: column.clone(),
            });
        }
    }

    let report = check_export_header(export, schema);
    for issue in &report.issues {
        match issue {
            SchemaIssue::MissingRequired(column) => {
                return Err(SourceStructureError::MissingColumn {
                    source_id: export.source_id.clone(),
                    column: column.clone(),
                });
            }
            SchemaIssue::MissingOptional(column) => {
                log::debug!("{}: optional column {column} absent", export.source_id);
            }
            SchemaIssue::Unexpected(_) => {}
        }
    }

    if let Some((row, cells)) = export
        .rows
        .iter()
        .enumerate()
        .find(|(_, cells)| cells.len() != export.columns.len())
    {
        return Err(SourceStructureError::RaggedRow {
            source_id: export.source_id.clone(),
            row,
            expected: export.columns.len(),
            found: cells.len(),
        });
    }
    Ok(())
}

struct RowContext<'a> {
    normalizer: &'a Normalizer,
    schema: &'a SourceSchema,
    export: &'a RawExport,
    columns: &'a FxHashMap<&'a str, usize>,
    dates: &'a DateFormatConfig,
    row_idx: usize,
    cells: &'a [Option<String>],
}

impl RowContext<'_> {
    fn cell(&self, column: &str) -> Option<&String> {
        let idx = *self.columns.get(column)?;
        let cell = self.cells.get(idx)?.as_ref();
        if self.normalizer.is_missing(cell) {
            None
        } else {
            cell
        }
    }

    fn error(&self, participant: Option<&str>, field: &str, reason: impl Into<String>) -> ValidationError {
        ValidationError {
            source_id: self.schema.source_id.clone(),
            row: self.row_idx,
            participant: participant.map(str::to_string),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    fn normalize_row(&self) -> Result<CanonicalRow, RowErrors> {
        let mut errors = RowErrors::new();

        let id_column = &self.schema.participant.column;
        let participant = self
            .cell(id_column)
            .and_then(|raw| self.schema.participant.normalize(raw));
        let Some(participant) = participant else {
            errors.push(self.error(None, id_column, "participant id is empty"));
            return Err(errors);
        };

        let visit_cell = self.schema.visit.column().and_then(|c| self.cell(c));
        let visit = self.schema.visit.resolve(visit_cell.map(String::as_str));
        if visit.is_none() {
            errors.push(self.error(
                Some(participant.as_str()),
                self.schema.visit.column().unwrap_or("visit"),
                "visit label is empty",
            ));
        }

        let collected_at = self.collected_at();
        if collected_at.is_none() {
            errors.push(self.error(
                Some(participant.as_str()),
                self.schema.timestamp_column.as_deref().unwrap_or("timestamp"),
                "no collection timestamp",
            ));
        }

        let mut fields = BTreeMap::new();
        for spec in &self.schema.fields {
            match self.field_value(spec) {
                Ok(Some(value)) => {
                    fields.insert(spec.field_name().to_string(), value);
                }
                Ok(None) => {}
                Err(reason) => errors.push(self.error(Some(participant.as_str()), spec.field_name(), reason)),
            }
        }

        match (visit, collected_at) {
            (Some(visit), Some(collected_at)) if errors.is_empty() => {
                let cohort = if self.normalizer.pilot_ids.contains(&participant)
                    || self.schema.pilot_ids.contains(&participant)
                {
                    Cohort::Pilot
                } else {
                    Cohort::Study
                };
                let key = RowKey::new(participant, visit, &self.schema.instrument);
                let provenance =
                    Provenance::new(&self.schema.source_id, self.row_idx, cohort, collected_at);
                Ok(CanonicalRow::new(key, fields, provenance))
            }
            _ => Err(errors),
        }
    }

    fn collected_at(&self) -> Option<NaiveDateTime> {
        match &self.schema.timestamp_column {
            Some(column) => self
                .cell(column)
                .and_then(|raw| parse_datetime_string(raw, self.dates)),
            None => self.export.extracted_at,
        }
    }

    /// Typed value of one declared column
    ///
    /// `Ok(None)` means the cell is empty and the column optional.
    fn field_value(&self, spec: &ColumnSpec) -> Result<Option<FieldValue>, String> {
        let Some(raw) = self.cell(&spec.column) else {
            return if spec.required {
                Err("required value is missing".to_string())
            } else {
                Ok(None)
            };
        };
        let raw = raw.trim();

        let value = match &spec.kind {
            FieldKind::Integer { min, max } => {
                let value = parse_integer(raw).ok_or_else(|| format!("'{raw}' is not an integer"))?;
                if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
                    return Err(format!("{value} is outside [{}, {}]", bound(*min), bound(*max)));
                }
                FieldValue::integer(value)
            }
            FieldKind::Number { min, max } => {
                let value = raw
                    .parse::<f64>()
                    .ok()
                    .filter(|v| v.is_finite())
                    .ok_or_else(|| format!("'{raw}' is not a number"))?;
                if min.is_some_and(|m| value < m) || max.is_some_and(|m| value > m) {
                    return Err(format!("{value} is outside [{}, {}]", bound(*min), bound(*max)));
                }
                FieldValue::number(value)
            }
            FieldKind::Choice { legend, other } => {
                let code = normalize_code(raw);
                let label = legend
                    .get(code)
                    .ok_or_else(|| format!("code '{raw}' is not in the legend"))?;
                match other {
                    Some(other) if other.code == code => match self.cell(&other.text_column) {
                        Some(text) => FieldValue::free_text(text.trim()),
                        None => FieldValue::category(code, label),
                    },
                    _ => FieldValue::category(code, label),
                }
            }
            FieldKind::Date => {
                let date = parse_date_string(raw, self.dates)
                    .ok_or_else(|| format!("'{raw}' is not a recognised date"))?;
                FieldValue::date(date)
            }
            FieldKind::Text => FieldValue::text(raw),
            FieldKind::FreeText => FieldValue::free_text(raw),
        };
        Ok(Some(value))
    }
}

fn bound<T: ToString>(b: Option<T>) -> String {
    b.map_or_else(|| "..".to_string(), |v| v.to_string())
}

/// Integers as exported by spreadsheets may carry a `.0` suffix
fn parse_integer(raw: &str) -> Option<i64> {
    raw.parse::<i64>().ok().or_else(|| {
        let value = raw.parse::<f64>().ok()?;
        (value.fract() == 0.0 && value.abs() < 9.0e15).then_some(value as i64)
    })
}

/// `"2.0"` and `"2"` name the same legend entry
fn normalize_code(raw: &str) -> &str {
    raw.strip_suffix(".0")
        .filter(|s| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit() || c == '-'))
        .unwrap_or(raw)
}
