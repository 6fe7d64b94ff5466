//! Participant and visit model
//!
//! A participant's identifier never changes once created. Demographic
//! attributes may be corrected, but every correction is kept as an
//! [`Amendment`] so the change can be audited. Visits form an ordered,
//! append-only sequence that cannot start before enrollment.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use itertools::Itertools;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyError};
use crate::models::canonical::{CanonicalRow, FieldValue};

/// Study arm a participant belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cohort {
    Pilot,
    #[default]
    Study,
}

impl fmt::Display for Cohort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pilot => write!(f, "pilot"),
            Self::Study => write!(f, "study"),
        }
    }
}

/// Participant's standing in the protocol
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StudyStatus {
    #[default]
    Enrolled,
    /// Lost to follow-up at or after `visit`
    Lost { visit: String, reason: String },
    /// Excluded by the study team at or after `visit`
    Excluded { visit: String, reason: String },
    /// Consent withdrawn; never reported anywhere
    Withdrew { visit: String, reason: String },
}

impl StudyStatus {
    /// Visit from which the status applies, `None` while enrolled
    #[must_use]
    pub fn from_visit(&self) -> Option<&str> {
        match self {
            Self::Enrolled => None,
            Self::Lost { visit, .. } | Self::Excluded { visit, .. } | Self::Withdrew { visit, .. } => {
                Some(visit)
            }
        }
    }
}

/// One scheduled data collection event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
    pub label: String,
    pub date: NaiveDate,
}

/// Recorded correction to a demographic attribute
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Amendment {
    pub attribute: String,
    pub previous: Option<FieldValue>,
    pub value: FieldValue,
    pub reason: String,
    pub amended_at: NaiveDateTime,
}

/// A person enrolled in the study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Participant {
    id: String,
    pub enrolled_on: NaiveDate,
    pub cohort: Cohort,
    demographics: BTreeMap<String, FieldValue>,
    visits: Vec<Visit>,
    pub status: StudyStatus,
    amendments: Vec<Amendment>,
}

impl Participant {
    #[must_use]
    pub fn new(id: impl Into<String>, enrolled_on: NaiveDate, cohort: Cohort) -> Self {
        Self {
            id: id.into(),
            enrolled_on,
            cohort,
            demographics: BTreeMap::new(),
            visits: Vec::new(),
            status: StudyStatus::Enrolled,
            amendments: Vec::new(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn visits(&self) -> &[Visit] {
        &self.visits
    }

    #[must_use]
    pub fn visit(&self, label: &str) -> Option<&Visit> {
        self.visits.iter().find(|v| v.label == label)
    }

    /// Position of a visit in the participant's sequence
    #[must_use]
    pub fn visit_index(&self, label: &str) -> Option<usize> {
        self.visits.iter().position(|v| v.label == label)
    }

    #[must_use]
    pub fn demographics(&self) -> &BTreeMap<String, FieldValue> {
        &self.demographics
    }

    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&FieldValue> {
        self.demographics.get(name)
    }

    #[must_use]
    pub fn amendments(&self) -> &[Amendment] {
        &self.amendments
    }

    #[must_use]
    pub const fn is_withdrawn(&self) -> bool {
        matches!(self.status, StudyStatus::Withdrew { .. })
    }

    /// Set an attribute the first time it is observed
    ///
    /// Existing values are left alone; use [`Participant::amend`] to change them.
    pub fn record_attribute(&mut self, name: impl Into<String>, value: FieldValue) {
        self.demographics.entry(name.into()).or_insert(value);
    }

    /// Correct a demographic attribute, keeping the previous value on record
    pub fn amend(
        &mut self,
        attribute: impl Into<String>,
        value: FieldValue,
        reason: impl Into<String>,
        amended_at: NaiveDateTime,
    ) {
        let attribute = attribute.into();
        let previous = self.demographics.insert(attribute.clone(), value.clone());
        self.amendments.push(Amendment {
            attribute,
            previous,
            value,
            reason: reason.into(),
            amended_at,
        });
    }

    /// Append a visit to the end of the sequence
    ///
    /// # Errors
    /// Fails when the visit precedes enrollment or the last visit, or when the
    /// label already exists.
    pub fn append_visit(&mut self, label: impl Into<String>, date: NaiveDate) -> Result<()> {
        let label = label.into();
        if date < self.enrolled_on {
            return Err(StudyError::Roster(format!(
                "visit {label} of {} on {date} precedes enrollment on {}",
                self.id, self.enrolled_on
            )));
        }
        if self.visit(&label).is_some() {
            return Err(StudyError::Roster(format!(
                "visit {label} already recorded for {}",
                self.id
            )));
        }
        if let Some(last) = self.visits.last() {
            if date < last.date {
                return Err(StudyError::Roster(format!(
                    "visit {label} of {} on {date} precedes previous visit {} on {}",
                    self.id, last.label, last.date
                )));
            }
        }
        self.visits.push(Visit { label, date });
        Ok(())
    }

    /// Whether the status change rules out data at `visit`
    ///
    /// Visits are compared by position; unknown labels are compared by name
    /// against the status visit only.
    #[must_use]
    pub fn inactive_at(&self, visit: &str) -> bool {
        let Some(from) = self.status.from_visit() else {
            return false;
        };
        match (self.visit_index(from), self.visit_index(visit)) {
            (Some(from_idx), Some(visit_idx)) => visit_idx >= from_idx,
            _ => from == visit,
        }
    }
}

/// How the roster is read from the canonical store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterSpec {
    /// Instrument holding consent and demographic data
    pub instrument: String,
    /// Date field giving the enrollment (consent) date
    pub enrollment_field: String,
    /// Fields copied into the participant's demographic attributes
    #[serde(default)]
    pub attributes: Vec<String>,
}

/// Curated correction to a participant's demographics
///
/// Applied through [`Participant::amend`] every time the roster is built, so
/// the correction and its audit record survive a rebuild from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmendmentSpec {
    pub participant: String,
    pub attribute: String,
    pub value: FieldValue,
    pub reason: String,
    pub amended_at: NaiveDateTime,
}

/// The study population
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    participants: BTreeMap<String, Participant>,
}

impl Roster {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a participant
    ///
    /// # Errors
    /// Identifiers are immutable; inserting an existing id fails.
    pub fn insert(&mut self, participant: Participant) -> Result<()> {
        if self.participants.contains_key(participant.id()) {
            return Err(StudyError::Roster(format!(
                "participant {} already exists",
                participant.id()
            )));
        }
        self.participants
            .insert(participant.id().to_string(), participant);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Participant> {
        self.participants.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut Participant> {
        self.participants.get_mut(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    /// Build the roster from aggregated canonical rows
    ///
    /// Participants come from the roster instrument; visits are appended in
    /// date order using the earliest collection date seen for each visit.
    /// Visits violating the ordering rules are returned, not fatal.
    #[must_use]
    pub fn from_canonical(rows: &[CanonicalRow], spec: &RosterSpec) -> (Self, Vec<StudyError>) {
        let mut roster = Self::new();
        let mut problems = Vec::new();

        for row in rows.iter().filter(|r| r.key.instrument == spec.instrument) {
            let Some(enrolled_on) = row.get(&spec.enrollment_field).and_then(FieldValue::as_date)
            else {
                problems.push(StudyError::Roster(format!(
                    "{} has no enrollment date in {}",
                    row.key.participant, spec.enrollment_field
                )));
                continue;
            };
            if roster.get(row.participant()).is_some() {
                continue;
            }
            let mut participant =
                Participant::new(row.participant(), enrolled_on, row.provenance.cohort);
            for attribute in &spec.attributes {
                if let Some(value) = row.get(attribute) {
                    participant.record_attribute(attribute.clone(), value.clone());
                }
            }
            // Insert cannot fail: presence was checked above
            let _ = roster.insert(participant);
        }

        let visit_dates = rows
            .iter()
            .map(|r| {
                (
                    (r.key.participant.clone(), r.key.visit.clone()),
                    r.collected_at().date(),
                )
            })
            .into_grouping_map()
            .min();

        let ordered = visit_dates
            .into_iter()
            .sorted_by(|((pa, va), da), ((pb, vb), db)| {
                pa.cmp(pb).then(da.cmp(db)).then(va.cmp(vb))
            });

        for ((participant_id, visit), date) in ordered {
            let Some(participant) = roster.get_mut(&participant_id) else {
                continue;
            };
            if let Err(e) = participant.append_visit(visit, date) {
                problems.push(e);
            }
        }

        (roster, problems)
    }
}
