//! Row assembly for report templates

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::error::{FieldFailure, FieldFailureReason, MappingFailure};
use crate::models::canonical::CanonicalRow;
use crate::models::participant::{Cohort, Roster};
use crate::schema::template::{
    DateSource, Derivation, FieldTransform, Grain, ParticipantAttribute, ReportTemplate,
};

use super::ParticipantRows;
use super::transforms::{RowScope, evaluate};

/// One template-conformant output row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRow {
    pub participant: String,
    /// Set for visit-grain templates
    pub visit: Option<String>,
    /// Values in template field order; empty for unresolved optional fields
    pub values: Vec<String>,
}

/// Rows and failures for one template
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MappingOutput {
    pub rows: Vec<ReportRow>,
    pub failures: Vec<MappingFailure>,
}

/// Map the canonical rows of every participant in `scope` onto `template`
///
/// # Arguments
/// * `template` - The template to fill
/// * `roster` - Participants and their visits
/// * `rows` - Canonical rows; rows of participants outside `scope` are ignored
/// * `scope` - Participants to report
///
/// # Returns
/// Output rows sorted by participant then visit, and one failure per row
/// that could not be produced
#[must_use]
pub fn map_template(
    template: &ReportTemplate,
    roster: &Roster,
    rows: &[CanonicalRow],
    scope: &BTreeSet<String>,
) -> MappingOutput {
    let participants: Vec<_> = scope
        .iter()
        .filter_map(|id| {
            let participant = roster.get(id);
            if participant.is_none() {
                log::warn!("{}: {id} is in scope but not on the roster", template.label());
            }
            participant
        })
        .filter(|p| !p.is_withdrawn())
        .collect();

    let mut by_participant: BTreeMap<&str, Vec<&CanonicalRow>> = BTreeMap::new();
    for row in rows.iter().filter(|r| scope.contains(r.participant())) {
        by_participant.entry(row.participant()).or_default().push(row);
    }

    let results: Vec<Vec<Result<ReportRow, MappingFailure>>> = participants
        .par_iter()
        .map(|participant| {
            let own = by_participant
                .get(participant.id())
                .map(Vec::as_slice)
                .unwrap_or_default();
            let view = ParticipantRows::new(participant, own.iter().copied());
            map_participant(template, &view)
        })
        .collect();

    let mut output = MappingOutput::default();
    for result in results.into_iter().flatten() {
        match result {
            Ok(row) => output.rows.push(row),
            Err(failure) => {
                log::warn!("Mapping failed: {failure}");
                output.failures.push(failure);
            }
        }
    }
    output
}

fn map_participant(
    template: &ReportTemplate,
    view: &ParticipantRows<'_>,
) -> Vec<Result<ReportRow, MappingFailure>> {
    let participant = view.participant();
    let primary = view.instrument(&template.primary_instrument);
    if primary.is_empty() {
        return vec![Err(missing_primary(template, participant.id()))];
    }

    match template.grain {
        Grain::Participant => primary
            .first()
            .map(|row| vec![map_row(template, view, Some(row.key.visit.as_str()))])
            .unwrap_or_default(),
        Grain::Visit => primary
            .iter()
            .filter(|row| !participant.inactive_at(&row.key.visit))
            .map(|row| map_row(template, view, Some(row.key.visit.as_str())))
            .collect(),
    }
}

/// A participant with no row of the primary instrument cannot be reported
fn missing_primary(template: &ReportTemplate, participant: &str) -> MappingFailure {
    MappingFailure {
        template: template.label(),
        participant: participant.to_string(),
        visit: None,
        fields: template
            .fields
            .iter()
            .filter(|f| f.required)
            .map(|f| FieldFailure {
                field: f.name.clone(),
                reason: FieldFailureReason::MissingSource {
                    source: template.primary_instrument.clone(),
                },
            })
            .collect(),
    }
}

fn map_row(
    template: &ReportTemplate,
    view: &ParticipantRows<'_>,
    visit: Option<&str>,
) -> Result<ReportRow, MappingFailure> {
    let participant = view.participant();
    let pilot_field = template
        .pilot_comment
        .as_ref()
        .filter(|_| participant.cohort == Cohort::Pilot);

    let mut outputs: Vec<(String, Option<String>)> = Vec::with_capacity(template.fields.len());
    let mut failures: SmallVec<[FieldFailure; 4]> = SmallVec::new();

    for field in &template.fields {
        let result = match pilot_field {
            Some(comment) if comment.field == field.name => Ok(Some(comment.text.clone())),
            _ => {
                let scope = RowScope {
                    rows: view,
                    visit,
                    outputs: &outputs,
                };
                evaluate(&field.transform, &scope)
            }
        };

        let value = match result {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                if field.required {
                    failures.push(FieldFailure {
                        field: field.name.clone(),
                        reason: FieldFailureReason::MissingSource {
                            source: describe_source(&field.transform),
                        },
                    });
                }
                None
            }
            Err(reason) => {
                if field.required {
                    failures.push(FieldFailure {
                        field: field.name.clone(),
                        reason,
                    });
                } else {
                    log::debug!(
                        "{}: optional field {} left empty for {}: {reason}",
                        template.label(),
                        field.name,
                        participant.id()
                    );
                }
                None
            }
        };
        outputs.push((field.name.clone(), value));
    }

    let grain_visit = match template.grain {
        Grain::Participant => None,
        Grain::Visit => visit.map(str::to_string),
    };

    if !failures.is_empty() {
        return Err(MappingFailure {
            template: template.label(),
            participant: participant.id().to_string(),
            visit: grain_visit,
            fields: failures,
        });
    }

    Ok(ReportRow {
        participant: participant.id().to_string(),
        visit: grain_visit,
        values: outputs
            .into_iter()
            .map(|(_, value)| value.unwrap_or_default())
            .collect(),
    })
}

/// Name of the input a transform reads, for failure messages
fn describe_source(transform: &FieldTransform) -> String {
    match transform {
        FieldTransform::Copy { source } | FieldTransform::Recode { source, .. } => {
            source.describe()
        }
        FieldTransform::Constant { .. } => "constant".to_string(),
        FieldTransform::Participant { attribute, .. } => match attribute {
            ParticipantAttribute::Id => "participant id".to_string(),
            ParticipantAttribute::EnrollmentDate => "enrollment date".to_string(),
            ParticipantAttribute::Cohort => "cohort".to_string(),
            ParticipantAttribute::Demographic(name) => format!("participant {name}"),
        },
        FieldTransform::Visit => "visit".to_string(),
        FieldTransform::VisitDate { .. } => "visit date".to_string(),
        FieldTransform::Derived { derivation } => match derivation {
            Derivation::Sum { sources }
            | Derivation::Coalesce { sources }
            | Derivation::Concat { sources, .. } => {
                sources.iter().map(|s| s.describe()).collect::<Vec<_>>().join(", ")
            }
            Derivation::AgeInMonths { birth, at } => {
                format!("{}, {}", describe_date(birth), describe_date(at))
            }
            Derivation::FormatDate { source, .. } => describe_date(source),
            Derivation::Scale { source, .. } => source.describe(),
            Derivation::MultiSelect { options, .. } => options
                .iter()
                .map(|o| o.source.describe())
                .collect::<Vec<_>>()
                .join(", "),
            Derivation::Classify { .. } => "classification inputs".to_string(),
        },
    }
}

fn describe_date(source: &DateSource) -> String {
    match source {
        DateSource::Field(reference) => reference.describe(),
        DateSource::EnrollmentDate => "enrollment date".to_string(),
        DateSource::VisitDate => "visit date".to_string(),
    }
}
