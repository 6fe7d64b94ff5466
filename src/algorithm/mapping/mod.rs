//! Template schema mapping
//!
//! Projects canonical rows onto an external [`ReportTemplate`]. The mapper
//! produces one row per participant (or participant and visit) in scope, or a
//! [`MappingFailure`](crate::error::MappingFailure) listing every required
//! field that could not be resolved.

pub mod mapper;
pub mod transforms;

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::models::canonical::{CanonicalRow, FieldValue};
use crate::models::participant::Participant;
use crate::schema::template::{FieldRef, VisitSelector};

pub use mapper::{MappingOutput, ReportRow, map_template};

/// Canonical rows of one participant, indexed by instrument and visit
#[derive(Debug, Clone)]
pub struct ParticipantRows<'a> {
    participant: &'a Participant,
    /// instrument -> rows in visit order
    by_instrument: BTreeMap<&'a str, Vec<&'a CanonicalRow>>,
}

impl<'a> ParticipantRows<'a> {
    /// Index the rows belonging to `participant`
    ///
    /// Rows are ordered by the participant's visit sequence; visits unknown
    /// to the roster sort after known ones by collection time.
    #[must_use]
    pub fn new(participant: &'a Participant, rows: impl IntoIterator<Item = &'a CanonicalRow>) -> Self {
        let mut by_instrument: BTreeMap<&str, Vec<&CanonicalRow>> = BTreeMap::new();
        for row in rows.into_iter().filter(|r| r.participant() == participant.id()) {
            by_instrument
                .entry(row.key.instrument.as_str())
                .or_default()
                .push(row);
        }
        for rows in by_instrument.values_mut() {
            rows.sort_by_key(|r| {
                (
                    participant.visit_index(&r.key.visit).unwrap_or(usize::MAX),
                    r.collected_at(),
                    r.key.visit.clone(),
                )
            });
        }
        Self {
            participant,
            by_instrument,
        }
    }

    #[must_use]
    pub const fn participant(&self) -> &'a Participant {
        self.participant
    }

    /// Rows of an instrument in visit order
    #[must_use]
    pub fn instrument(&self, instrument: &str) -> &[&'a CanonicalRow] {
        self.by_instrument
            .get(instrument)
            .map_or(&[], Vec::as_slice)
    }

    /// Row of an instrument at a visit
    #[must_use]
    pub fn row(&self, instrument: &str, visit: &str) -> Option<&'a CanonicalRow> {
        self.instrument(instrument)
            .iter()
            .find(|r| r.key.visit == visit)
            .copied()
    }

    /// Resolve a field reference relative to the visit being reported
    #[must_use]
    pub fn field(&self, reference: &FieldRef, current_visit: Option<&str>) -> Option<&'a FieldValue> {
        let row = match &reference.visit {
            VisitSelector::Current => match current_visit {
                Some(visit) => self.row(&reference.instrument, visit),
                None => self.instrument(&reference.instrument).first().copied(),
            },
            VisitSelector::Earliest => self.instrument(&reference.instrument).first().copied(),
            VisitSelector::Named(visit) => self.row(&reference.instrument, visit),
        }?;
        row.get(&reference.field)
    }

    /// Date of a visit: the roster date, else the earliest collection date
    #[must_use]
    pub fn visit_date(&self, visit: &str) -> Option<NaiveDate> {
        self.participant
            .visit(visit)
            .map(|v| v.date)
            .or_else(|| {
                self.by_instrument
                    .values()
                    .flatten()
                    .filter(|r| r.key.visit == visit)
                    .map(|r| r.collected_at().date())
                    .min()
            })
    }
}
