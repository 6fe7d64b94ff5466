//! Declarative source schemas
//!
//! Each raw export (survey platform download, task rating log, visit
//! record) is described by a [`SourceSchema`]. One generic normalizer
//! consumes the declaration; no source gets its own code path.

use std::collections::BTreeMap;

use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::models::raw::RawExport;
use crate::schema::adapt::DateFormatConfig;

/// How the participant identifier is read and normalized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantColumn {
    pub column: String,
    /// Prefix added to bare numeric ids (`7` -> `ER0007`)
    #[serde(default)]
    pub prefix: Option<String>,
    /// Zero-pad width applied to the numeric part
    #[serde(default)]
    pub pad_width: Option<usize>,
}

impl ParticipantColumn {
    /// Normalize a raw identifier cell
    ///
    /// Numeric cells (including `"7.0"` as written by spreadsheet exports)
    /// are padded and prefixed; anything else is kept as written.
    #[must_use]
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        let prefix = self.prefix.as_deref().unwrap_or("");
        let digits = raw.strip_suffix(".0").unwrap_or(raw);
        if digits.is_empty() {
            return None;
        }

        if digits.chars().all(|c| c.is_ascii_digit()) {
            let width = self.pad_width.unwrap_or(0);
            return Some(format!("{prefix}{digits:0>width$}"));
        }
        Some(raw.to_string())
    }
}

/// Where the visit label comes from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "from", rename_all = "snake_case")]
pub enum VisitSpec {
    /// Every row of the source belongs to the same visit
    Fixed { label: String },
    /// Visit is read from a column, optionally relabelled
    Column {
        column: String,
        #[serde(default)]
        labels: BTreeMap<String, String>,
    },
}

impl VisitSpec {
    #[must_use]
    pub fn column(&self) -> Option<&str> {
        match self {
            Self::Fixed { .. } => None,
            Self::Column { column, .. } => Some(column),
        }
    }

    /// Resolve the visit label for a row
    #[must_use]
    pub fn resolve(&self, cell: Option<&str>) -> Option<String> {
        match self {
            Self::Fixed { label } => Some(label.clone()),
            Self::Column { labels, .. } => {
                let raw = cell?.trim();
                if raw.is_empty() {
                    return None;
                }
                Some(labels.get(raw).cloned().unwrap_or_else(|| raw.to_string()))
            }
        }
    }
}

/// The "other, please specify" companion of a choice question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtherSpec {
    /// Legend code meaning "other"
    pub code: String,
    /// Column holding the respondent's free text
    pub text_column: String,
}

/// Declared kind of a field, with its type and range check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldKind {
    Integer {
        #[serde(default)]
        min: Option<i64>,
        #[serde(default)]
        max: Option<i64>,
    },
    Number {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    Choice {
        legend: BTreeMap<String, String>,
        #[serde(default)]
        other: Option<OtherSpec>,
    },
    Date,
    Text,
    FreeText,
}

/// One raw column mapped onto one canonical field
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub column: String,
    /// Canonical field name, defaults to the column name
    #[serde(default)]
    pub field: Option<String>,
    pub kind: FieldKind,
    #[serde(default)]
    pub required: bool,
}

impl ColumnSpec {
    #[must_use]
    pub fn new(column: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            column: column.into(),
            field: None,
            kind,
            required: false,
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn renamed(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// Canonical field this column populates
    #[must_use]
    pub fn field_name(&self) -> &str {
        self.field.as_deref().unwrap_or(&self.column)
    }
}

/// Declaration of one raw export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSchema {
    pub source_id: String,
    /// Instrument the source's rows belong to
    pub instrument: String,
    pub participant: ParticipantColumn,
    pub visit: VisitSpec,
    /// Column giving the collection time of each row
    #[serde(default)]
    pub timestamp_column: Option<String>,
    pub fields: Vec<ColumnSpec>,
    /// Per-source override of the pipeline date formats
    #[serde(default)]
    pub date_formats: Option<DateFormatConfig>,
    /// Participants belonging to the pilot cohort
    #[serde(default)]
    pub pilot_ids: Vec<String>,
}

impl SourceSchema {
    /// Every column a conforming export must contain
    ///
    /// A declared timestamp column is required: without it no row has a
    /// collection time.
    pub fn required_columns(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.participant.column.as_str())
            .chain(self.visit.column())
            .chain(self.timestamp_column.as_deref())
            .chain(
                self.fields
                    .iter()
                    .filter(|f| f.required)
                    .map(|f| f.column.as_str()),
            )
            .unique()
    }

    /// Columns the schema knows about, required or not
    pub fn known_columns(&self) -> impl Iterator<Item = &str> {
        self.required_columns()
            .chain(self.fields.iter().map(|f| f.column.as_str()))
            .chain(self.fields.iter().filter_map(|f| match &f.kind {
                FieldKind::Choice {
                    other: Some(other), ..
                } => Some(other.text_column.as_str()),
                _ => None,
            }))
    }
}

/// Header comparison between an export and its declared schema
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SchemaCompatibilityReport {
    /// Whether every required column is present
    pub compatible: bool,
    /// List of incompatibility issues, if any
    pub issues: Vec<SchemaIssue>,
}

/// A column-level difference between export and schema
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaIssue {
    MissingRequired(String),
    MissingOptional(String),
    /// Present in the export but not declared; ignored
    Unexpected(String),
}

/// Compare an export header against the schema's declared columns
#[must_use]
pub fn check_export_header(export: &RawExport, schema: &SourceSchema) -> SchemaCompatibilityReport {
    let mut issues = Vec::new();

    for column in schema.required_columns() {
        if export.column_index(column).is_none() {
            issues.push(SchemaIssue::MissingRequired(column.to_string()));
        }
    }
    for spec in schema.fields.iter().filter(|f| !f.required) {
        if export.column_index(&spec.column).is_none() {
            issues.push(SchemaIssue::MissingOptional(spec.column.clone()));
        }
    }
    let known: Vec<&str> = schema.known_columns().collect();
    for column in &export.columns {
        if !known.contains(&column.as_str()) {
            issues.push(SchemaIssue::Unexpected(column.clone()));
        }
    }

    SchemaCompatibilityReport {
        compatible: !issues
            .iter()
            .any(|i| matches!(i, SchemaIssue::MissingRequired(_))),
        issues,
    }
}
