//! Error handling for the reporting pipeline.
//!
//! Row- and participant-scoped conditions ([`ValidationError`],
//! [`MappingFailure`], [`ManifestMismatch`]) are plain values that get
//! accumulated next to successful results. Conditions that abort one
//! operation are wrapped by [`StudyError`].

pub mod util;

use std::fmt;
use std::io;
use std::path::PathBuf;

use chrono::NaiveDate;
use smallvec::SmallVec;

use crate::models::canonical::Provenance;

/// Specialized error type for the reporting pipeline
#[derive(Debug, thiserror::Error)]
pub enum StudyError {
    /// Error opening, reading or writing a file
    #[error("IO error{}: {source}", path_suffix(.path))]
    Io {
        source: io::Error,
        path: Option<PathBuf>,
    },

    /// Error decoding or encoding JSON documents
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Error from the Arrow layer
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Error from the Parquet layer
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// Error converting between serde types and record batches
    #[error("Serialization error: {0}")]
    SerdeArrow(#[from] serde_arrow::Error),

    /// A raw export is structurally unusable
    #[error(transparent)]
    SourceStructure(#[from] SourceStructureError),

    /// Two rows for the same triple could not be ranked
    #[error(transparent)]
    DuplicateAmbiguity(#[from] DuplicateAmbiguity),

    /// A close date falls outside the family's defined range
    #[error(transparent)]
    OutOfRangeCycle(#[from] OutOfRangeCycle),

    /// Configuration is inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Participant or visit invariants were violated
    #[error("Roster error: {0}")]
    Roster(String),

    /// Status ledger failure
    #[error("Ledger error: {0}")]
    Ledger(String),
}

fn path_suffix(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" ({})", p.display()))
        .unwrap_or_default()
}

impl From<io::Error> for StudyError {
    fn from(source: io::Error) -> Self {
        Self::Io { source, path: None }
    }
}

impl StudyError {
    /// Create an IO error carrying the path it relates to
    pub fn io_with_path(source: io::Error, path: impl Into<PathBuf>) -> Self {
        Self::Io {
            source,
            path: Some(path.into()),
        }
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, StudyError>;

/// A single field of a single raw row failed its type or range check.
///
/// The row is dropped; the error is reported and the pass continues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Source the row came from
    pub source_id: String,
    /// Zero-based row index within the export
    pub row: usize,
    /// Participant id as far as it could be resolved
    pub participant: Option<String>,
    /// Canonical field (or raw column) that failed
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} row {} (participant {}): field '{}': {}",
            self.source_id,
            self.row,
            self.participant.as_deref().unwrap_or("?"),
            self.field,
            self.reason
        )
    }
}

/// A raw export cannot be normalized at all
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceStructureError {
    /// A column the schema requires is absent from the header
    #[error("source '{source_id}' is missing required column '{column}'")]
    MissingColumn { source_id: String, column: String },

    /// The export declares the same column twice
    #[error("source '{source_id}' has duplicate column '{column}'")]
    DuplicateColumn { source_id: String, column: String },

    /// A row has a different number of cells than the header
    #[error("source '{source_id}' row {row} has {found} cells, header has {expected}")]
    RaggedRow {
        source_id: String,
        row: usize,
        expected: usize,
        found: usize,
    },

    /// The export was handed to the wrong schema
    #[error("export from '{found}' cannot be normalized with schema for '{expected}'")]
    SchemaMismatch { expected: String, found: String },

    /// Nothing usable could be read
    #[error("source '{source_id}' is empty or unreadable: {reason}")]
    Unreadable { source_id: String, reason: String },
}

/// Aggregation tie that must go to an operator
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error(
    "ambiguous duplicate for {participant}/{visit}/{instrument}: {} vs {}",
    .first.describe(),
    .second.describe()
)]
pub struct DuplicateAmbiguity {
    pub participant: String,
    pub visit: String,
    pub instrument: String,
    pub first: Provenance,
    pub second: Provenance,
}

/// Why one template field could not be produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldFailureReason {
    /// No canonical value exists for the field's source
    MissingSource { source: String },
    /// The source value is outside the recode's domain
    OutOfDomain { source: String, value: String },
    /// The source value has the wrong kind for the transform
    InvalidValue { source: String, detail: String },
}

impl fmt::Display for FieldFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSource { source } => write!(f, "no value for {source}"),
            Self::OutOfDomain { source, value } => {
                write!(f, "value '{value}' of {source} is outside the recode domain")
            }
            Self::InvalidValue { source, detail } => write!(f, "{source}: {detail}"),
        }
    }
}

/// A required template field that failed to resolve
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    /// Template field name
    pub field: String,
    pub reason: FieldFailureReason,
}

/// Every failing required field for one participant's report row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingFailure {
    pub template: String,
    pub participant: String,
    /// Set for visit-grain templates
    pub visit: Option<String>,
    pub fields: SmallVec<[FieldFailure; 4]>,
}

impl MappingFailure {
    /// Names of the failing template fields, in template order
    #[must_use]
    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.field.as_str()).collect()
    }
}

impl fmt::Display for MappingFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} for {}", self.template, self.participant)?;
        if let Some(visit) = &self.visit {
            write!(f, " at {visit}")?;
        }
        write!(f, ": ")?;
        for (i, failure) in self.fields.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{} ({})", failure.field, failure.reason)?;
        }
        Ok(())
    }
}

/// A close date the family has no cycle for
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OutOfRangeCycle {
    #[error("close date {close_date} precedes the {family} epoch {epoch}")]
    BeforeEpoch {
        family: String,
        close_date: NaiveDate,
        epoch: NaiveDate,
    },

    #[error("close date {close_date} is after the {family} horizon {horizon}")]
    AfterHorizon {
        family: String,
        close_date: NaiveDate,
        horizon: NaiveDate,
    },

    #[error("unknown report family '{0}'")]
    UnknownFamily(String),
}

/// Expected unit that is missing or malformed for a participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestMismatch {
    pub stage: String,
    pub unit: String,
    /// Units short of the expected minimum
    pub missing: usize,
    /// Units present but beyond the expected maximum or internally inconsistent
    pub malformed: usize,
}

impl ManifestMismatch {
    /// Units counted against completeness
    #[must_use]
    pub const fn deficit(&self) -> usize {
        self.missing + self.malformed
    }
}
