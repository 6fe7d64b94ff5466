//! External report templates
//!
//! A template is a named, versioned, ordered list of output fields. Each
//! field carries a transform describing how its value is computed from
//! canonical data. Templates are configuration; the mapper interprets them.

use std::collections::{BTreeMap, BTreeSet};

use chrono::format::{Item, StrftimeItems};
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyError};

/// Row granularity of a template
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grain {
    /// One row per participant
    #[default]
    Participant,
    /// One row per participant and visit of the primary instrument
    Visit,
}

/// Which visit a field reference reads from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisitSelector {
    /// The visit of the row being built; the earliest visit for
    /// participant-grain templates
    #[default]
    Current,
    /// Earliest visit carrying the instrument
    Earliest,
    Named(String),
}

/// Reference to one canonical field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRef {
    pub instrument: String,
    pub field: String,
    #[serde(default)]
    pub visit: VisitSelector,
}

impl FieldRef {
    #[must_use]
    pub fn new(instrument: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            field: field.into(),
            visit: VisitSelector::Current,
        }
    }

    #[must_use]
    pub fn at(mut self, visit: VisitSelector) -> Self {
        self.visit = visit;
        self
    }

    /// `instrument.field`, used in failure messages
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{}.{}", self.instrument, self.field)
    }
}

/// Participant-level values not stored in any instrument row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantAttribute {
    Id,
    EnrollmentDate,
    Cohort,
    /// A demographic attribute held on the roster
    Demographic(String),
}

/// A date input to a derivation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    Field(FieldRef),
    EnrollmentDate,
    /// Date of the visit being reported
    VisitDate,
}

/// One checkbox of a multi-select question
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectOption {
    pub source: FieldRef,
    pub label: String,
    /// Free text appended as `label - text` when this is the only selection
    #[serde(default)]
    pub detail: Option<FieldRef>,
}

/// Value compared by a classification condition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueSource {
    Field(FieldRef),
    /// An earlier output field of the same template
    Output(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOp {
    In,
    NotIn,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    pub source: ValueSource,
    pub op: ConditionOp,
    pub values: Vec<String>,
}

/// Label assigned when every condition holds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifyRule {
    pub when: Vec<Condition>,
    pub label: String,
}

/// Computed transforms
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Derivation {
    Sum {
        sources: Vec<FieldRef>,
    },
    AgeInMonths {
        birth: DateSource,
        at: DateSource,
    },
    FormatDate {
        source: DateSource,
        format: String,
    },
    /// First source that has a value
    Coalesce {
        sources: Vec<FieldRef>,
    },
    /// `value * factor + offset`, optionally rounded
    Scale {
        source: FieldRef,
        factor: f64,
        #[serde(default)]
        offset: f64,
        #[serde(default)]
        decimals: Option<u32>,
    },
    /// Checkbox group resolved to one label
    MultiSelect {
        options: Vec<SelectOption>,
        /// Label used when more than one box is checked
        multiple: String,
    },
    Concat {
        sources: Vec<FieldRef>,
        #[serde(default)]
        separator: String,
    },
    /// Ordered rules; first matching rule wins
    Classify {
        rules: Vec<ClassifyRule>,
        #[serde(default)]
        default: Option<String>,
    },
}

/// How one output field is produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FieldTransform {
    Copy {
        source: FieldRef,
    },
    Recode {
        source: FieldRef,
        map: BTreeMap<String, String>,
        #[serde(default)]
        default: Option<String>,
    },
    Constant {
        value: String,
    },
    Participant {
        attribute: ParticipantAttribute,
        /// chrono format for date-valued attributes
        #[serde(default)]
        format: Option<String>,
    },
    Visit,
    VisitDate {
        #[serde(default)]
        format: Option<String>,
    },
    Derived {
        derivation: Derivation,
    },
}

/// One output column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateField {
    pub name: String,
    #[serde(default)]
    pub required: bool,
    pub transform: FieldTransform,
}

impl TemplateField {
    #[must_use]
    pub fn required(name: impl Into<String>, transform: FieldTransform) -> Self {
        Self {
            name: name.into(),
            required: true,
            transform,
        }
    }

    #[must_use]
    pub fn optional(name: impl Into<String>, transform: FieldTransform) -> Self {
        Self {
            name: name.into(),
            required: false,
            transform,
        }
    }
}

/// Fixed comment written for pilot-cohort participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PilotComment {
    pub field: String,
    pub text: String,
}

/// A named, versioned external report layout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportTemplate {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub grain: Grain,
    /// Instrument whose rows decide who (and which visits) get a row
    pub primary_instrument: String,
    pub fields: Vec<TemplateField>,
    #[serde(default)]
    pub pilot_comment: Option<PilotComment>,
}

impl ReportTemplate {
    /// First line of the submission file, e.g. `ndar_subject,01`
    #[must_use]
    pub fn label(&self) -> String {
        format!("{},{}", self.name, self.version)
    }

    /// Key the status tracker files this template under, e.g. `ndar_subject01`
    #[must_use]
    pub fn report_type(&self) -> String {
        format!("{}{}", self.name, self.version)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    #[must_use]
    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    /// Check the template is internally consistent
    ///
    /// Field names must be unique, `Output` references must name an earlier
    /// field, date formats must be valid chrono formats and the pilot comment
    /// must target a declared field.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(StudyError::config(format!(
                "template {} declares no fields",
                self.label()
            )));
        }

        let mut seen = BTreeSet::new();
        for field in &self.fields {
            for output in output_references(&field.transform) {
                if !seen.contains(output) {
                    return Err(StudyError::config(format!(
                        "template {}: field {} refers to {output}, which is not an earlier field",
                        self.label(),
                        field.name
                    )));
                }
            }
            if let Some(format) = date_format(&field.transform) {
                if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
                    return Err(StudyError::config(format!(
                        "template {}: field {} has invalid date format '{format}'",
                        self.label(),
                        field.name
                    )));
                }
            }
            if !seen.insert(field.name.as_str()) {
                return Err(StudyError::config(format!(
                    "template {}: duplicate field {}",
                    self.label(),
                    field.name
                )));
            }
        }

        if let Some(comment) = &self.pilot_comment {
            if !seen.contains(comment.field.as_str()) {
                return Err(StudyError::config(format!(
                    "template {}: pilot comment field {} is not declared",
                    self.label(),
                    comment.field
                )));
            }
        }
        Ok(())
    }
}

fn date_format(transform: &FieldTransform) -> Option<&str> {
    match transform {
        FieldTransform::Participant { format, .. } | FieldTransform::VisitDate { format } => {
            format.as_deref()
        }
        FieldTransform::Derived {
            derivation: Derivation::FormatDate { format, .. },
        } => Some(format.as_str()),
        _ => None,
    }
}

fn output_references(transform: &FieldTransform) -> Vec<&str> {
    match transform {
        FieldTransform::Derived {
            derivation: Derivation::Classify { rules, .. },
        } => rules
            .iter()
            .flat_map(|r| &r.when)
            .filter_map(|c| match &c.source {
                ValueSource::Output(name) => Some(name.as_str()),
                ValueSource::Field(_) => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}
