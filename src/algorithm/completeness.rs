//! Completeness checking against expected manifests
//!
//! For each participant and pipeline stage, the observed artifacts and
//! canonical rows are compared with the stage's manifest. The result is
//! `Complete` with the date the last unit was produced, `Deficit` with the
//! number of missing or malformed units, or `Absent` when nothing exists yet.

use std::fmt;
use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rayon::prelude::*;

use crate::error::{ManifestMismatch, Result, StudyError};
use crate::models::participant::{Cohort, Participant, Roster, StudyStatus};
use crate::schema::manifest::{ExpectedManifest, ExpectedUnit, UnitSource};
use crate::store::{CanonicalStore, KeyFilter};
use crate::utils::logging::log_warning;

/// Stage status for one participant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completeness {
    /// Every unit present; date of the most recent one
    Complete(NaiveDate),
    /// Number of units missing or malformed
    Deficit(usize),
    Absent,
}

/// A produced file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the inventory root, `/`-separated
    pub path: String,
    pub generated: NaiveDate,
}

impl Artifact {
    #[must_use]
    pub fn new(path: impl Into<String>, generated: NaiveDate) -> Self {
        Self {
            path: path.into(),
            generated,
        }
    }
}

/// Observed artifacts
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Inventory {
    artifacts: Vec<Artifact>,
}

impl Inventory {
    #[must_use]
    pub fn new(mut artifacts: Vec<Artifact>) -> Self {
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Self { artifacts }
    }

    /// Walk `root`, dating each file by its modification time
    ///
    /// A root that does not exist yet gives an empty inventory.
    pub fn from_dir(root: &Path) -> Result<Self> {
        if !root.exists() {
            log_warning("Artifact root does not exist yet", Some(root));
            return Ok(Self::default());
        }
        let mut artifacts = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            let entries = fs::read_dir(&dir).map_err(|e| StudyError::io_with_path(e, &dir))?;
            for entry in entries {
                let entry = entry.map_err(|e| StudyError::io_with_path(e, &dir))?;
                let path = entry.path();
                let metadata = entry
                    .metadata()
                    .map_err(|e| StudyError::io_with_path(e, &path))?;
                if metadata.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(root) else {
                    continue;
                };
                let modified = metadata
                    .modified()
                    .map_err(|e| StudyError::io_with_path(e, &path))?;
                let relative = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                artifacts.push(Artifact::new(
                    relative,
                    DateTime::<Utc>::from(modified).date_naive(),
                ));
            }
        }

        log::debug!("Inventory of {}: {} artifacts", root.display(), artifacts.len());
        Ok(Self::new(artifacts))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }
}

/// Outcome of checking one stage for one participant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCheck {
    pub status: Completeness,
    /// One entry per unit that did not meet its cardinality
    pub mismatches: Vec<ManifestMismatch>,
}

struct UnitObservation {
    present: usize,
    malformed_rows: usize,
    latest: Option<NaiveDate>,
}

fn observe_unit(
    participant: &str,
    manifest: &ExpectedManifest,
    unit: &ExpectedUnit,
    inventory: &Inventory,
    store: &dyn CanonicalStore,
) -> Result<UnitObservation> {
    match &unit.source {
        UnitSource::Files { .. } => {
            let Some(pattern) = unit.file_regex(participant, manifest.visit.as_deref())? else {
                return Ok(UnitObservation {
                    present: 0,
                    malformed_rows: 0,
                    latest: None,
                });
            };
            let matched: Vec<&Artifact> =
                inventory.iter().filter(|a| pattern.is_match(&a.path)).collect();
            Ok(UnitObservation {
                present: matched.len(),
                malformed_rows: 0,
                latest: matched.iter().map(|a| a.generated).max(),
            })
        }
        UnitSource::Rows {
            instrument,
            visit,
            required_fields,
        } => {
            let mut filter = KeyFilter::participant(participant).with_instrument(instrument);
            if let Some(visit) = visit.as_ref().or(manifest.visit.as_ref()) {
                filter = filter.with_visit(visit);
            }
            let rows = store.list(&filter);
            let malformed_rows = rows
                .iter()
                .filter(|row| required_fields.iter().any(|f| row.get(f).is_none()))
                .count();
            Ok(UnitObservation {
                present: rows.len(),
                malformed_rows,
                latest: rows.iter().map(|r| r.collected_at().date()).max(),
            })
        }
    }
}

/// Check one stage for one participant
///
/// # Arguments
/// * `participant` - Participant id
/// * `manifest` - Expected units of the stage
/// * `inventory` - Produced artifacts
/// * `store` - Canonical rows, for row units
///
/// # Returns
/// The stage status and one mismatch per unit short of or beyond its
/// expected cardinality
pub fn check_stage(
    participant: &str,
    manifest: &ExpectedManifest,
    inventory: &Inventory,
    store: &dyn CanonicalStore,
) -> Result<StageCheck> {
    let mut mismatches = Vec::new();
    let mut total_present = 0;
    let mut latest: Option<NaiveDate> = None;

    for unit in &manifest.units {
        let observed = observe_unit(participant, manifest, unit, inventory, store)?;
        total_present += observed.present;
        latest = latest.max(observed.latest);

        let missing = unit.expected.min().saturating_sub(observed.present);
        let mut malformed =
            observed.present.saturating_sub(unit.expected.max()) + observed.malformed_rows;
        // Inside the bounds but not one of the allowed counts
        if missing == 0 && malformed == 0 && !unit.expected.accepts(observed.present) {
            malformed = 1;
        }

        if missing > 0 || malformed > 0 {
            mismatches.push(ManifestMismatch {
                stage: manifest.stage.clone(),
                unit: unit.name.clone(),
                missing,
                malformed,
            });
        }
    }

    let status = if total_present == 0 {
        Completeness::Absent
    } else if mismatches.is_empty() {
        match latest {
            Some(date) => Completeness::Complete(date),
            None => Completeness::Absent,
        }
    } else {
        Completeness::Deficit(mismatches.iter().map(ManifestMismatch::deficit).sum())
    };

    Ok(StageCheck { status, mismatches })
}

/// One cell of the progress table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressCell {
    Complete(NaiveDate),
    Deficit(usize),
    Absent,
    Pilot,
    Lost,
    Excluded,
}

impl From<Completeness> for ProgressCell {
    fn from(status: Completeness) -> Self {
        match status {
            Completeness::Complete(date) => Self::Complete(date),
            Completeness::Deficit(n) => Self::Deficit(n),
            Completeness::Absent => Self::Absent,
        }
    }
}

impl fmt::Display for ProgressCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(date) => write!(f, "{}", date.format("%Y-%m-%d")),
            Self::Deficit(n) => write!(f, "deficit:{n}"),
            Self::Absent => Ok(()),
            Self::Pilot => write!(f, "pilot"),
            Self::Lost => write!(f, "lost"),
            Self::Excluded => write!(f, "excluded"),
        }
    }
}

/// Progress of one participant across stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRow {
    pub participant: String,
    /// In the order of [`ProgressTable::stages`]
    pub cells: Vec<ProgressCell>,
}

/// Participant × stage progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressTable {
    pub stages: Vec<String>,
    pub rows: Vec<ProgressRow>,
    pub mismatches: Vec<(String, ManifestMismatch)>,
}

impl ProgressTable {
    /// Cell for a participant and stage
    #[must_use]
    pub fn cell(&self, participant: &str, stage: &str) -> Option<ProgressCell> {
        let column = self.stages.iter().position(|s| s == stage)?;
        self.rows
            .iter()
            .find(|r| r.participant == participant)
            .and_then(|r| r.cells.get(column).copied())
    }

    /// Header for tabular output: `participant` then one column per stage
    #[must_use]
    pub fn columns(&self) -> Vec<String> {
        std::iter::once("participant".to_string())
            .chain(self.stages.iter().cloned())
            .collect()
    }

    /// Rendered cells, matching [`ProgressTable::columns`]
    #[must_use]
    pub fn text_rows(&self) -> Vec<Vec<String>> {
        self.rows
            .iter()
            .map(|row| {
                std::iter::once(row.participant.clone())
                    .chain(row.cells.iter().map(ToString::to_string))
                    .collect()
            })
            .collect()
    }
}

fn status_cell(participant: &Participant, manifest: &ExpectedManifest) -> Option<ProgressCell> {
    if participant.cohort == Cohort::Pilot {
        return Some(ProgressCell::Pilot);
    }
    let inactive = manifest
        .visit
        .as_deref()
        .map_or(participant.status.from_visit().is_some(), |v| {
            participant.inactive_at(v)
        });
    if !inactive {
        return None;
    }
    match participant.status {
        StudyStatus::Lost { .. } => Some(ProgressCell::Lost),
        StudyStatus::Excluded { .. } => Some(ProgressCell::Excluded),
        StudyStatus::Enrolled | StudyStatus::Withdrew { .. } => None,
    }
}

/// Build the progress table for every reportable participant
///
/// Withdrawn participants are left out. Pilot participants and visits at or
/// after a loss or exclusion are marked instead of checked.
pub fn progress_table(
    roster: &Roster,
    manifests: &[ExpectedManifest],
    inventory: &Inventory,
    store: &dyn CanonicalStore,
) -> Result<ProgressTable> {
    let participants: Vec<&Participant> = roster.iter().filter(|p| !p.is_withdrawn()).collect();

    let rows: Vec<(ProgressRow, Vec<ManifestMismatch>)> = participants
        .par_iter()
        .map(|participant| -> Result<(ProgressRow, Vec<ManifestMismatch>)> {
            let mut cells = Vec::with_capacity(manifests.len());
            let mut mismatches = Vec::new();
            for manifest in manifests {
                if let Some(cell) = status_cell(participant, manifest) {
                    cells.push(cell);
                    continue;
                }
                let check = check_stage(participant.id(), manifest, inventory, store)?;
                // Absent stages are not started, not short
                if matches!(check.status, Completeness::Deficit(_)) {
                    mismatches.extend(check.mismatches);
                }
                cells.push(check.status.into());
            }
            Ok((
                ProgressRow {
                    participant: participant.id().to_string(),
                    cells,
                },
                mismatches,
            ))
        })
        .collect::<Result<_>>()?;

    let mut table = ProgressTable {
        stages: manifests.iter().map(|m| m.stage.clone()).collect(),
        ..ProgressTable::default()
    };
    for (row, mismatches) in rows {
        table.mismatches.extend(
            mismatches
                .into_iter()
                .map(|m| (row.participant.clone(), m)),
        );
        table.rows.push(row);
    }
    Ok(table)
}
