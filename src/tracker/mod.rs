//! Submission status tracking
//!
//! Records, per (participant, report type, cycle), whether the participant is
//! pending, submitted or manually excluded. Manual exclusions are sticky:
//! automatic recomputation never overrides them.

pub mod ledger;

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

pub use ledger::StatusTracker;

/// Submission state of one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportState {
    Pending,
    Submitted,
    ExcludedManual,
}

impl ReportState {
    /// Whether the participant belongs in the report for this key
    #[must_use]
    pub const fn in_scope(self) -> bool {
        matches!(self, Self::Pending | Self::Submitted)
    }
}

impl fmt::Display for ReportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Submitted => write!(f, "submitted"),
            Self::ExcludedManual => write!(f, "excluded-manual"),
        }
    }
}

/// Who asked for a state change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "origin", rename_all = "snake_case")]
pub enum MarkOrigin {
    /// The pipeline
    Automatic,
    /// A curator; required to change an excluded-manual entry
    Manual { curator: String, note: String },
}

impl MarkOrigin {
    #[must_use]
    pub fn manual(curator: impl Into<String>, note: impl Into<String>) -> Self {
        Self::Manual {
            curator: curator.into(),
            note: note.into(),
        }
    }

    #[must_use]
    pub const fn is_manual(&self) -> bool {
        matches!(self, Self::Manual { .. })
    }
}

/// Identity of a status entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StatusKey {
    pub participant: String,
    pub report_type: String,
    pub cycle: String,
}

impl StatusKey {
    #[must_use]
    pub fn new(
        participant: impl Into<String>,
        report_type: impl Into<String>,
        cycle: impl Into<String>,
    ) -> Self {
        Self {
            participant: participant.into(),
            report_type: report_type.into(),
            cycle: cycle.into(),
        }
    }
}

impl fmt::Display for StatusKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.report_type, self.cycle, self.participant)
    }
}

/// One audited write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub at: NaiveDateTime,
    #[serde(flatten)]
    pub origin: MarkOrigin,
    pub previous: Option<ReportState>,
    pub state: ReportState,
}

/// Persisted ledger entry with its full history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEntry {
    pub key: StatusKey,
    pub state: ReportState,
    pub history: Vec<AuditRecord>,
}

/// Result of a mark request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    /// State written
    Applied(ReportState),
    /// Already in the requested state
    Unchanged(ReportState),
    /// Automatic mark refused by a manual exclusion
    Overridden,
}
