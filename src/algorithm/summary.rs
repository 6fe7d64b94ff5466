//! Enrollment summaries
//!
//! Aggregate tables over the participants reported in a cycle, such as
//! minority and ethnicity enrollment counts or a sex × ethnicity × race
//! breakdown.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::models::participant::Participant;
use crate::schema::template::ConditionOp;

/// Test against a participant's demographic attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCondition {
    pub attribute: String,
    pub op: ConditionOp,
    pub values: Vec<String>,
}

impl AttributeCondition {
    /// Compares both the coded and the labelled form of the attribute
    ///
    /// A missing attribute never matches `In` and always matches `NotIn`.
    #[must_use]
    pub fn holds(&self, participant: &Participant) -> bool {
        let matched = participant.attribute(&self.attribute).is_some_and(|value| {
            let label = value.render();
            let code = value.recode_key();
            self.values.iter().any(|v| *v == label || *v == code)
        });
        match self.op {
            ConditionOp::In => matched,
            ConditionOp::NotIn => !matched,
        }
    }
}

/// One counted column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountColumn {
    pub label: String,
    /// Every condition must hold; empty counts everyone
    #[serde(default)]
    pub when: Vec<AttributeCondition>,
    /// Added to the count, for enrollment reported outside this study
    #[serde(default)]
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SummaryKind {
    /// A single row of conditional counts
    CategoryCounts { columns: Vec<CountColumn> },
    /// One row per distinct combination of attribute values
    GroupCounts { attributes: Vec<String> },
}

/// Summary produced for every cycle of a family
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySpec {
    pub name: String,
    pub family: String,
    #[serde(flatten)]
    pub kind: SummaryKind,
}

/// Rendered summary
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SummaryTable {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SummarySpec {
    /// Compute the summary over `participants`
    #[must_use]
    pub fn compute<'a>(&self, participants: impl IntoIterator<Item = &'a Participant>) -> SummaryTable {
        let participants: Vec<&Participant> = participants.into_iter().collect();
        match &self.kind {
            SummaryKind::CategoryCounts { columns } => {
                let counts = columns
                    .iter()
                    .map(|column| {
                        let matched = participants
                            .iter()
                            .filter(|p| column.when.iter().all(|c| c.holds(p)))
                            .count() as u64;
                        (matched + column.offset).to_string()
                    })
                    .collect();
                SummaryTable {
                    name: self.name.clone(),
                    columns: columns.iter().map(|c| c.label.clone()).collect(),
                    rows: vec![counts],
                }
            }
            SummaryKind::GroupCounts { attributes } => {
                let mut groups: BTreeMap<Vec<String>, u64> = BTreeMap::new();
                for participant in &participants {
                    let group = attributes
                        .iter()
                        .map(|a| {
                            participant
                                .attribute(a)
                                .map(|v| v.render())
                                .unwrap_or_default()
                        })
                        .collect();
                    *groups.entry(group).or_default() += 1;
                }

                let mut columns = attributes.clone();
                columns.push("count".to_string());
                SummaryTable {
                    name: self.name.clone(),
                    columns,
                    rows: groups
                        .into_iter()
                        .map(|(mut group, count)| {
                            group.push(count.to_string());
                            group
                        })
                        .collect(),
                }
            }
        }
    }
}
