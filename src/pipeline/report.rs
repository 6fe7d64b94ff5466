//! Report builds for one submission cycle
//!
//! Resolves the cycle, decides which participants are in scope, maps the
//! template and optionally records the submission in the status ledger.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;

use crate::algorithm::cycle::{CycleResolver, SubmissionCycle};
use crate::algorithm::mapping::{ReportRow, map_template};
use crate::algorithm::summary::{SummarySpec, SummaryTable};
use crate::error::{MappingFailure, Result};
use crate::models::canonical::CanonicalRow;
use crate::models::participant::{Cohort, Participant, Roster};
use crate::schema::template::ReportTemplate;
use crate::store::{CanonicalStore, KeyFilter};
use crate::tracker::{MarkOrigin, MarkOutcome, ReportState, StatusKey, StatusTracker};
use crate::utils::io::write_table;

/// Shared inputs of every report build
#[derive(Clone, Copy)]
pub struct ReportContext<'a> {
    pub resolver: &'a CycleResolver,
    pub tracker: &'a StatusTracker,
    pub store: &'a dyn CanonicalStore,
    pub roster: &'a Roster,
}

/// One template filled for one cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutput {
    pub cycle: SubmissionCycle,
    /// `<template>,<version>` label line
    pub label: String,
    pub report_type: String,
    pub columns: Vec<String>,
    pub rows: Vec<ReportRow>,
    pub failures: Vec<MappingFailure>,
    /// Eligible by date but left out: withdrawn or manually excluded
    pub skipped: Vec<String>,
}

impl ReportOutput {
    /// `<output root>/cycle_<close date>/<report type>_dataset.csv`
    #[must_use]
    pub fn path(&self, root: &Path) -> PathBuf {
        self.cycle
            .output_dir(root)
            .join(format!("{}_dataset.csv", self.report_type))
    }

    /// Write the rows with the archive's label line
    pub fn write(&self, root: &Path) -> Result<PathBuf> {
        let path = self.path(root);
        let rows: Vec<Vec<String>> = self.rows.iter().map(|r| r.values.clone()).collect();
        write_table(&path, Some(&self.label), &self.columns, &rows)?;
        Ok(path)
    }
}

fn eligible<'r>(roster: &'r Roster, cycle: &SubmissionCycle) -> (Vec<&'r Participant>, Vec<String>) {
    let mut candidates = Vec::new();
    let mut withdrawn = Vec::new();
    for participant in roster.iter().filter(|p| cycle.includes(p.enrolled_on)) {
        if participant.is_withdrawn() {
            withdrawn.push(participant.id().to_string());
        } else {
            candidates.push(participant);
        }
    }
    (candidates, withdrawn)
}

/// Build `template` for the cycle of `family` closing on `close_date`
///
/// Participants enrolled inside the cycle's inclusion range are registered
/// as pending; the report covers those the ledger keeps in scope.
///
/// # Errors
/// Fails with [`crate::error::OutOfRangeCycle`] before any mapping when the
/// close date has no cycle, or when the ledger cannot be written.
pub fn build_report(
    ctx: &ReportContext<'_>,
    template: &ReportTemplate,
    family: &str,
    close_date: NaiveDate,
) -> Result<ReportOutput> {
    template.validate()?;
    let cycle = ctx.resolver.resolve(family, close_date)?;
    let report_type = template.report_type();
    let cycle_id = cycle.id();

    let (candidates, mut skipped) = eligible(ctx.roster, &cycle);
    let registered = ctx.tracker.register_candidates(
        &report_type,
        &cycle_id,
        candidates.iter().map(|p| p.id()),
    )?;
    log::info!("{report_type} {cycle_id}: {} eligible, {registered} newly pending", candidates.len());

    let in_ledger = ctx.tracker.scope_for(&report_type, &cycle_id);
    let mut scope = BTreeSet::new();
    for participant in &candidates {
        if in_ledger.contains(participant.id()) {
            scope.insert(participant.id().to_string());
        } else {
            skipped.push(participant.id().to_string());
        }
    }
    skipped.sort();

    let rows: Vec<CanonicalRow> = scope
        .iter()
        .flat_map(|id| ctx.store.list(&KeyFilter::participant(id.as_str())))
        .cloned()
        .collect();
    let mapped = map_template(template, ctx.roster, &rows, &scope);

    Ok(ReportOutput {
        cycle,
        label: template.label(),
        report_type,
        columns: template.column_names().map(str::to_string).collect(),
        rows: mapped.rows,
        failures: mapped.failures,
        skipped,
    })
}

/// Record every reported participant as submitted
///
/// # Returns
/// Number of entries that changed state
pub fn mark_submitted(tracker: &StatusTracker, output: &ReportOutput) -> Result<usize> {
    let cycle_id = output.cycle.id();
    let participants: BTreeSet<&str> = output.rows.iter().map(|r| r.participant.as_str()).collect();

    let mut changed = 0;
    for participant in participants {
        let key = StatusKey::new(participant, output.report_type.as_str(), cycle_id.as_str());
        if let MarkOutcome::Applied(_) =
            tracker.mark(&key, ReportState::Submitted, MarkOrigin::Automatic)?
        {
            changed += 1;
        }
    }
    Ok(changed)
}

/// Compute an enrollment summary for the cycle closing on `close_date`
///
/// Pilot and withdrawn participants are not counted.
pub fn build_summary(
    ctx: &ReportContext<'_>,
    spec: &SummarySpec,
    close_date: NaiveDate,
) -> Result<(SubmissionCycle, SummaryTable)> {
    let cycle = ctx.resolver.resolve(&spec.family, close_date)?;
    let (candidates, _) = eligible(ctx.roster, &cycle);
    let table = spec.compute(candidates.into_iter().filter(|p| p.cohort == Cohort::Study));
    Ok((cycle, table))
}

/// Write a summary table next to the cycle's reports
pub fn write_summary(root: &Path, cycle: &SubmissionCycle, table: &SummaryTable) -> Result<PathBuf> {
    let path = cycle
        .output_dir(root)
        .join(format!("{}_{}.csv", cycle.summary_name(), table.name));
    write_table(&path, None, &table.columns, &table.rows)?;
    Ok(path)
}
