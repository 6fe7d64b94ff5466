//! Field transforms
//!
//! Every transform is a pure function of the participant's canonical rows,
//! the visit being reported and the fields already produced for the row.
//! `Ok(None)` means the input is absent; `Err` means it is present but
//! unusable.

use std::fmt::Write;

use chrono::NaiveDate;

use crate::error::FieldFailureReason;
use crate::models::canonical::{FieldValue, render_number};
use crate::schema::adapt::age_in_months;
use crate::schema::template::{
    Condition, ConditionOp, DateSource, Derivation, FieldRef, FieldTransform, ParticipantAttribute,
    SelectOption, ValueSource,
};

use super::ParticipantRows;

pub type TransformResult = Result<Option<String>, FieldFailureReason>;

/// Everything a transform may read
pub struct RowScope<'s, 'a> {
    pub rows: &'s ParticipantRows<'a>,
    /// Visit being reported
    pub visit: Option<&'s str>,
    /// Output fields produced so far, in template order
    pub outputs: &'s [(String, Option<String>)],
}

impl RowScope<'_, '_> {
    fn field(&self, reference: &FieldRef) -> Option<&FieldValue> {
        self.rows.field(reference, self.visit)
    }

    fn output(&self, name: &str) -> Option<&str> {
        self.outputs
            .iter()
            .find(|(n, _)| n == name)
            .and_then(|(_, v)| v.as_deref())
    }

    fn visit_date(&self) -> Option<NaiveDate> {
        self.rows.visit_date(self.visit?)
    }

    fn date(&self, source: &DateSource) -> Result<Option<NaiveDate>, FieldFailureReason> {
        match source {
            DateSource::EnrollmentDate => Ok(Some(self.rows.participant().enrolled_on)),
            DateSource::VisitDate => Ok(self.visit_date()),
            DateSource::Field(reference) => match self.field(reference) {
                None => Ok(None),
                Some(value) => value.as_date().map(Some).ok_or_else(|| {
                    FieldFailureReason::InvalidValue {
                        source: reference.describe(),
                        detail: format!("'{}' is not a date", value.render()),
                    }
                }),
            },
        }
    }

    fn number(&self, reference: &FieldRef) -> Result<Option<f64>, FieldFailureReason> {
        match self.field(reference) {
            None => Ok(None),
            Some(value) => value.as_number().map(Some).ok_or_else(|| {
                FieldFailureReason::InvalidValue {
                    source: reference.describe(),
                    detail: format!("'{}' is not numeric", value.render()),
                }
            }),
        }
    }
}

/// Evaluate one field transform
pub fn evaluate(transform: &FieldTransform, scope: &RowScope<'_, '_>) -> TransformResult {
    match transform {
        FieldTransform::Copy { source } => Ok(scope.field(source).map(FieldValue::render)),
        FieldTransform::Recode { source, map, default } => {
            let Some(value) = scope.field(source) else {
                return Ok(None);
            };
            let key = value.recode_key();
            map.get(&key)
                .or_else(|| map.get(&value.render()))
                .or(default.as_ref())
                .cloned()
                .map(Some)
                .ok_or_else(|| FieldFailureReason::OutOfDomain {
                    source: source.describe(),
                    value: key,
                })
        }
        FieldTransform::Constant { value } => Ok(Some(value.clone())),
        FieldTransform::Participant { attribute, format } => {
            let participant = scope.rows.participant();
            let value = match attribute {
                ParticipantAttribute::Id => Some(participant.id().to_string()),
                ParticipantAttribute::EnrollmentDate => {
                    Some(format_date(participant.enrolled_on, format.as_deref())?)
                }
                ParticipantAttribute::Cohort => Some(participant.cohort.to_string()),
                ParticipantAttribute::Demographic(name) => participant
                    .attribute(name)
                    .map(|value| match (value.as_date(), format) {
                        (Some(date), Some(format)) => format_date(date, Some(format.as_str())),
                        _ => Ok(value.render()),
                    })
                    .transpose()?,
            };
            Ok(value)
        }
        FieldTransform::Visit => Ok(scope.visit.map(str::to_string)),
        FieldTransform::VisitDate { format } => {
            scope
                .visit_date()
                .map(|d| format_date(d, format.as_deref()))
                .transpose()
        }
        FieldTransform::Derived { derivation } => derive(derivation, scope),
    }
}

/// Render a date; an invalid format is a field failure
fn format_date(date: NaiveDate, format: Option<&str>) -> Result<String, FieldFailureReason> {
    let format = format.unwrap_or("%Y-%m-%d");
    let mut rendered = String::new();
    write!(rendered, "{}", date.format(format)).map_err(|_| FieldFailureReason::InvalidValue {
        source: "date format".to_string(),
        detail: format!("'{format}' is not a valid date format"),
    })?;
    Ok(rendered)
}

fn derive(derivation: &Derivation, scope: &RowScope<'_, '_>) -> TransformResult {
    match derivation {
        Derivation::Sum { sources } => {
            let mut total = 0.0;
            for source in sources {
                match scope.number(source)? {
                    Some(value) => total += value,
                    None => return Ok(None),
                }
            }
            Ok(Some(render_number(total)))
        }
        Derivation::AgeInMonths { birth, at } => {
            let (Some(birth), Some(at)) = (scope.date(birth)?, scope.date(at)?) else {
                return Ok(None);
            };
            if at < birth {
                return Err(FieldFailureReason::InvalidValue {
                    source: "age".to_string(),
                    detail: format!("birth date {birth} is after {at}"),
                });
            }
            Ok(Some(age_in_months(birth, at).to_string()))
        }
        Derivation::FormatDate { source, format } => {
            scope
                .date(source)?
                .map(|d| format_date(d, Some(format.as_str())))
                .transpose()
        }
        Derivation::Coalesce { sources } => Ok(sources
            .iter()
            .find_map(|s| scope.field(s))
            .map(FieldValue::render)),
        Derivation::Scale {
            source,
            factor,
            offset,
            decimals,
        } => Ok(scope.number(source)?.map(|value| {
            let scaled = value * factor + offset;
            match decimals {
                Some(d) => format!("{scaled:.prec$}", prec = *d as usize),
                None => render_number(scaled),
            }
        })),
        Derivation::MultiSelect { options, multiple } => multi_select(options, multiple, scope),
        Derivation::Concat { sources, separator } => {
            let parts: Vec<String> = sources
                .iter()
                .filter_map(|s| scope.field(s))
                .map(FieldValue::render)
                .collect();
            Ok((!parts.is_empty()).then(|| parts.join(separator)))
        }
        Derivation::Classify { rules, default } => {
            for rule in rules {
                let mut all = true;
                for condition in &rule.when {
                    match holds(condition, scope) {
                        Some(true) => {}
                        Some(false) => all = false,
                        None => return Ok(None),
                    }
                }
                if all {
                    return Ok(Some(rule.label.clone()));
                }
            }
            Ok(default.clone())
        }
    }
}

/// A checkbox counts as ticked when it holds 1 or a yes-like label
fn is_checked(value: &FieldValue) -> bool {
    value.as_number().is_some_and(|n| n == 1.0)
        || matches!(value.render().to_ascii_lowercase().as_str(), "checked" | "yes" | "true")
}

fn multi_select(options: &[SelectOption], multiple: &str, scope: &RowScope<'_, '_>) -> TransformResult {
    let mut answered = false;
    let mut checked = Vec::new();
    for option in options {
        if let Some(value) = scope.field(&option.source) {
            answered = true;
            if is_checked(value) {
                checked.push(option);
            }
        }
    }

    match checked.as_slice() {
        [] if answered => Err(FieldFailureReason::InvalidValue {
            source: options
                .first()
                .map(|o| o.source.describe())
                .unwrap_or_default(),
            detail: "no option selected".to_string(),
        }),
        [] => Ok(None),
        [only] => {
            let detail = only
                .detail
                .as_ref()
                .and_then(|d| scope.field(d))
                .map(FieldValue::render)
                .filter(|s| !s.trim().is_empty());
            Ok(Some(match detail {
                Some(text) => format!("{} - {}", only.label, text.trim()),
                None => only.label.clone(),
            }))
        }
        _ => Ok(Some(multiple.to_string())),
    }
}

/// `None` when the compared value is absent
fn holds(condition: &Condition, scope: &RowScope<'_, '_>) -> Option<bool> {
    let candidates: Vec<String> = match &condition.source {
        ValueSource::Field(reference) => {
            let value = scope.field(reference)?;
            vec![value.recode_key(), value.render()]
        }
        ValueSource::Output(name) => vec![scope.output(name)?.to_string()],
    };
    let matched = candidates.iter().any(|c| condition.values.contains(c));
    Some(match condition.op {
        ConditionOp::In => matched,
        ConditionOp::NotIn => !matched,
    })
}
