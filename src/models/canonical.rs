//! Canonical row model
//!
//! A canonical row is the cleaned, deduplicated representation of one
//! instrument's data for one participant at one visit. Every row carries the
//! provenance of the raw source that produced it, including alternatives the
//! aggregator discarded.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::models::participant::Cohort;

/// Storage key of a canonical row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowKey {
    pub participant: String,
    pub visit: String,
    pub instrument: String,
}

impl RowKey {
    #[must_use]
    pub fn new(
        participant: impl Into<String>,
        visit: impl Into<String>,
        instrument: impl Into<String>,
    ) -> Self {
        Self {
            participant: participant.into(),
            visit: visit.into(),
            instrument: instrument.into(),
        }
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.participant, self.visit, self.instrument)
    }
}

/// A value that passed a typed check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StructuredValue {
    Integer(i64),
    Number(f64),
    /// Coded response with its legend label
    Category { code: String, label: String },
    Date(NaiveDate),
    Text(String),
}

/// Canonical field value
///
/// Free-text responses (typically the "other, please specify" companion of a
/// choice question) are kept verbatim for manual reconciliation and are never
/// coerced into a structured value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Structured(StructuredValue),
    FreeText(String),
}

impl FieldValue {
    #[must_use]
    pub const fn integer(value: i64) -> Self {
        Self::Structured(StructuredValue::Integer(value))
    }

    #[must_use]
    pub const fn number(value: f64) -> Self {
        Self::Structured(StructuredValue::Number(value))
    }

    #[must_use]
    pub const fn date(value: NaiveDate) -> Self {
        Self::Structured(StructuredValue::Date(value))
    }

    #[must_use]
    pub fn text(value: impl Into<String>) -> Self {
        Self::Structured(StructuredValue::Text(value.into()))
    }

    #[must_use]
    pub fn category(code: impl Into<String>, label: impl Into<String>) -> Self {
        Self::Structured(StructuredValue::Category {
            code: code.into(),
            label: label.into(),
        })
    }

    #[must_use]
    pub fn free_text(value: impl Into<String>) -> Self {
        Self::FreeText(value.into())
    }

    /// Numeric view of the value, if it has one
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Structured(StructuredValue::Integer(i)) => Some(*i as f64),
            Self::Structured(StructuredValue::Number(n)) => Some(*n),
            Self::Structured(StructuredValue::Category { code, .. }) => code.parse().ok(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Self::Structured(StructuredValue::Date(d)) => Some(*d),
            _ => None,
        }
    }

    /// Key used when recoding: category code, or the rendered value
    #[must_use]
    pub fn recode_key(&self) -> String {
        match self {
            Self::Structured(StructuredValue::Category { code, .. }) => code.clone(),
            other => other.render(),
        }
    }

    #[must_use]
    pub const fn is_free_text(&self) -> bool {
        matches!(self, Self::FreeText(_))
    }

    /// Text rendering used in report output
    ///
    /// Categories render as their label, dates as ISO, whole numbers without
    /// a fractional part.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Structured(StructuredValue::Integer(i)) => i.to_string(),
            Self::Structured(StructuredValue::Number(n)) => render_number(*n),
            Self::Structured(StructuredValue::Category { label, .. }) => label.clone(),
            Self::Structured(StructuredValue::Date(d)) => d.format("%Y-%m-%d").to_string(),
            Self::Structured(StructuredValue::Text(s)) | Self::FreeText(s) => s.clone(),
        }
    }
}

/// Render a float without trailing `.0` for whole numbers
#[must_use]
pub fn render_number(n: f64) -> String {
    if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// Why the aggregator dropped an alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscardReason {
    /// Another source is authoritative for the instrument
    NotAuthoritative,
    /// An equally authoritative source collected the data later
    Superseded,
}

/// A raw alternative kept for audit after losing aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscardedAlternative {
    pub source_id: String,
    pub row: usize,
    pub collected_at: NaiveDateTime,
    pub reason: DiscardReason,
    pub fields: BTreeMap<String, FieldValue>,
}

/// Which raw source produced a canonical row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    pub source_id: String,
    /// Row index within the raw export
    pub row: usize,
    pub cohort: Cohort,
    pub collected_at: NaiveDateTime,
    /// Alternatives the aggregator did not pick, sorted by source then time
    #[serde(default)]
    pub discarded: Vec<DiscardedAlternative>,
}

impl Provenance {
    #[must_use]
    pub fn new(
        source_id: impl Into<String>,
        row: usize,
        cohort: Cohort,
        collected_at: NaiveDateTime,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            row,
            cohort,
            collected_at,
            discarded: Vec::new(),
        }
    }

    /// Short operator-facing description
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} row {} at {}", self.source_id, self.row, self.collected_at)
    }
}

/// Cleaned data for one (participant, visit, instrument)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRow {
    pub key: RowKey,
    pub fields: BTreeMap<String, FieldValue>,
    pub provenance: Provenance,
}

impl CanonicalRow {
    #[must_use]
    pub const fn new(
        key: RowKey,
        fields: BTreeMap<String, FieldValue>,
        provenance: Provenance,
    ) -> Self {
        Self {
            key,
            fields,
            provenance,
        }
    }

    #[must_use]
    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.fields.get(field)
    }

    #[must_use]
    pub const fn collected_at(&self) -> NaiveDateTime {
        self.provenance.collected_at
    }

    #[must_use]
    pub fn participant(&self) -> &str {
        &self.key.participant
    }
}
