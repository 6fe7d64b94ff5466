//! Cross-source aggregation
//!
//! Collapses every candidate row for a (participant, visit, instrument)
//! triple into one canonical row. The authoritative source for the
//! instrument wins first, then the latest collection time. Candidates that
//! still tie are reported as [`DuplicateAmbiguity`] and produce no row.
//!
//! The winner keeps every loser in its provenance. Because candidates are
//! ranked on a total order independent of input order, aggregating the same
//! multiset twice, or re-aggregating an aggregated set, gives the same output.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use itertools::Itertools;

use crate::error::DuplicateAmbiguity;
use crate::models::canonical::{CanonicalRow, DiscardReason, DiscardedAlternative, RowKey};

/// Aggregated rows and the triples that could not be resolved
#[derive(Debug, Default, Clone, PartialEq)]
pub struct AggregateOutput {
    /// One row per resolved triple, sorted by key
    pub rows: Vec<CanonicalRow>,
    pub ambiguities: Vec<DuplicateAmbiguity>,
}

/// Authoritative source per instrument
#[derive(Debug, Clone, Copy)]
pub struct Authority<'a> {
    sources: &'a BTreeMap<String, String>,
}

impl<'a> Authority<'a> {
    #[must_use]
    pub const fn new(sources: &'a BTreeMap<String, String>) -> Self {
        Self { sources }
    }

    fn is_authoritative(&self, row: &CanonicalRow) -> bool {
        self.sources
            .get(&row.key.instrument)
            .is_some_and(|s| *s == row.provenance.source_id)
    }

    /// Better candidates sort first
    fn rank(&self, a: &CanonicalRow, b: &CanonicalRow) -> Ordering {
        self.is_authoritative(b)
            .cmp(&self.is_authoritative(a))
            .then_with(|| b.collected_at().cmp(&a.collected_at()))
    }
}

/// Aggregate canonical rows from any number of sources
///
/// # Arguments
/// * `rows` - Candidate rows, in any order
/// * `authority` - Authoritative source per instrument
///
/// # Returns
/// One row per triple plus every unresolved tie
#[must_use]
pub fn aggregate(rows: impl IntoIterator<Item = CanonicalRow>, authority: &Authority<'_>) -> AggregateOutput {
    let groups: BTreeMap<RowKey, Vec<CanonicalRow>> = rows
        .into_iter()
        .map(|row| (row.key.clone(), row))
        .into_group_map()
        .into_iter()
        .collect();

    let mut output = AggregateOutput::default();
    for (key, candidates) in groups {
        match resolve(key, candidates, authority) {
            Ok(row) => output.rows.push(row),
            Err(ambiguity) => {
                log::warn!("{ambiguity}");
                output.ambiguities.push(ambiguity);
            }
        }
    }
    output
}

fn resolve(
    key: RowKey,
    candidates: Vec<CanonicalRow>,
    authority: &Authority<'_>,
) -> Result<CanonicalRow, DuplicateAmbiguity> {
    // Repeats of one raw row (the same export loaded twice, or a stored row
    // meeting its source row again) collapse, keeping every recorded discard
    let mut candidates: Vec<CanonicalRow> = candidates
        .into_iter()
        .sorted_by(|a, b| {
            authority
                .rank(a, b)
                .then_with(|| a.provenance.source_id.cmp(&b.provenance.source_id))
                .then_with(|| a.provenance.row.cmp(&b.provenance.row))
        })
        .coalesce(|mut a, b| {
            if a.provenance.source_id == b.provenance.source_id && a.provenance.row == b.provenance.row {
                a.provenance.discarded.extend(b.provenance.discarded);
                Ok(a)
            } else {
                Err((a, b))
            }
        })
        .collect();

    if candidates.len() > 1 && authority.rank(&candidates[0], &candidates[1]) == Ordering::Equal {
        return Err(DuplicateAmbiguity {
            participant: key.participant,
            visit: key.visit,
            instrument: key.instrument,
            first: candidates[0].provenance.clone(),
            second: candidates[1].provenance.clone(),
        });
    }

    let mut winner = candidates.remove(0);
    let winner_authoritative = authority.is_authoritative(&winner);

    let mut discarded = std::mem::take(&mut winner.provenance.discarded);
    for loser in candidates {
        let reason = if winner_authoritative && !authority.is_authoritative(&loser) {
            DiscardReason::NotAuthoritative
        } else {
            DiscardReason::Superseded
        };
        discarded.extend(loser.provenance.discarded.iter().cloned());
        discarded.push(DiscardedAlternative {
            source_id: loser.provenance.source_id,
            row: loser.provenance.row,
            collected_at: loser.provenance.collected_at,
            reason,
            fields: loser.fields,
        });
    }
    discarded.sort_by(|a, b| {
        a.source_id
            .cmp(&b.source_id)
            .then(a.collected_at.cmp(&b.collected_at))
            .then(a.row.cmp(&b.row))
    });
    discarded.dedup_by(|a, b| a.source_id == b.source_id && a.row == b.row);
    discarded.retain(|d| !(d.source_id == winner.provenance.source_id && d.row == winner.provenance.row));
    winner.provenance.discarded = discarded;

    Ok(winner)
}
