//! Batch pipeline
//!
//! Raw exports are normalized, aggregated per participant and written to the
//! canonical store. Row- and participant-scoped failures are collected into
//! a [`PipelineReport`] instead of aborting the run.

pub mod report;

use std::collections::BTreeMap;

use itertools::Itertools;
use rayon::prelude::*;

use crate::algorithm::aggregate::{Authority, aggregate};
use crate::algorithm::normalize::Normalizer;
use crate::config::PipelineConfig;
use crate::error::{
    DuplicateAmbiguity, Result, SourceStructureError, StudyError, ValidationError,
};
use crate::models::canonical::CanonicalRow;
use crate::models::participant::Roster;
use crate::models::raw::RawExport;
use crate::store::{CanonicalStore, KeyFilter};
use crate::utils::logging::progress::{create_main_progress_bar, finish_progress_bar};

pub use report::{
    ReportContext, ReportOutput, build_report, build_summary, mark_submitted, write_summary,
};

/// Everything that went wrong, next to how much went right
#[derive(Debug, Default, Clone, PartialEq)]
pub struct PipelineReport {
    pub validation_errors: Vec<ValidationError>,
    /// Sources that produced no rows at all
    pub structure_errors: Vec<SourceStructureError>,
    pub ambiguities: Vec<DuplicateAmbiguity>,
    /// Canonical rows inserted or changed
    pub rows_written: usize,
    /// Participants aggregated
    pub participants: usize,
}

impl PipelineReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.validation_errors.is_empty()
            && self.structure_errors.is_empty()
            && self.ambiguities.is_empty()
    }
}

/// Normalize every export against its configured schema
fn normalize_exports(
    config: &PipelineConfig,
    exports: &[RawExport],
    report: &mut PipelineReport,
) -> Vec<CanonicalRow> {
    let normalizer = Normalizer::new(config);

    let results: Vec<_> = exports
        .par_iter()
        .map(|export| match config.source(&export.source_id) {
            Some(schema) => normalizer.normalize(export, schema),
            None => Err(SourceStructureError::Unreadable {
                source_id: export.source_id.clone(),
                reason: "no source schema configured".to_string(),
            }),
        })
        .collect();

    let mut rows = Vec::new();
    for result in results {
        match result {
            Ok(output) => {
                rows.extend(output.rows);
                report.validation_errors.extend(output.errors);
            }
            Err(e) => {
                log::error!("{e}");
                report.structure_errors.push(e);
            }
        }
    }
    rows
}

/// Normalize, aggregate and store the given exports
///
/// Rows already in the store for an affected participant take part in the
/// aggregation, so re-running with the same exports changes nothing.
///
/// # Arguments
/// * `config` - Source schemas, authority and missing-value markers
/// * `exports` - Raw exports, one per source
/// * `store` - Canonical store to update
///
/// # Returns
/// The accumulated failures and the number of rows written
pub fn run_participants(
    config: &PipelineConfig,
    exports: &[RawExport],
    store: &mut dyn CanonicalStore,
) -> Result<PipelineReport> {
    let mut report = PipelineReport::default();
    let rows = normalize_exports(config, exports, &mut report);

    let mut by_participant: BTreeMap<String, Vec<CanonicalRow>> = BTreeMap::new();
    for row in rows {
        by_participant
            .entry(row.key.participant.clone())
            .or_default()
            .push(row);
    }
    for (participant, candidates) in &mut by_participant {
        candidates.extend(
            store
                .list(&KeyFilter::participant(participant.as_str()))
                .into_iter()
                .cloned(),
        );
    }

    let authority = Authority::new(&config.authority);
    let pb = create_main_progress_bar(by_participant.len() as u64, Some("Aggregating participants"));
    let outputs: Vec<_> = by_participant
        .into_par_iter()
        .map(|(_, candidates)| {
            let output = aggregate(candidates, &authority);
            pb.inc(1);
            output
        })
        .collect();
    finish_progress_bar(&pb, Some("Aggregation complete"));

    report.participants = outputs.len();
    for output in outputs {
        report.ambiguities.extend(output.ambiguities);
        for row in output.rows {
            if store.get(&row.key) == Some(&row) {
                continue;
            }
            store.put(row)?;
            report.rows_written += 1;
        }
    }

    log::info!(
        "Pipeline pass: {} participants, {} rows written, {} validation errors, {} ambiguities",
        report.participants,
        report.rows_written,
        report.validation_errors.len(),
        report.ambiguities.len()
    );
    Ok(report)
}

/// Build the roster from the store and apply curated statuses and amendments
///
/// # Returns
/// The roster and the visit ordering problems found while building it
pub fn build_roster(
    config: &PipelineConfig,
    store: &dyn CanonicalStore,
) -> Result<(Roster, Vec<StudyError>)> {
    let spec = config
        .roster
        .as_ref()
        .ok_or_else(|| StudyError::config("no roster instrument configured"))?;

    let rows: Vec<CanonicalRow> = store.list(&KeyFilter::all()).into_iter().cloned().collect();
    let (mut roster, problems) = Roster::from_canonical(&rows, spec);

    for (id, status) in &config.participant_status {
        match roster.get_mut(id) {
            Some(participant) => participant.status = status.clone(),
            None => log::warn!("Status configured for unknown participant {id}"),
        }
    }

    for amendment in config.amendments.iter().sorted_by_key(|a| a.amended_at) {
        match roster.get_mut(&amendment.participant) {
            Some(participant) => participant.amend(
                amendment.attribute.clone(),
                amendment.value.clone(),
                amendment.reason.clone(),
                amendment.amended_at,
            ),
            None => log::warn!(
                "Amendment of {} configured for unknown participant {}",
                amendment.attribute,
                amendment.participant
            ),
        }
    }
    Ok((roster, problems))
}
