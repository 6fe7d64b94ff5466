use std::collections::BTreeMap;

use study_reports::error::SourceStructureError;
use study_reports::models::canonical::{DiscardReason, FieldValue, RowKey};
use study_reports::models::raw::RawExport;
use study_reports::pipeline::run_participants;
use study_reports::store::{CanonicalStore, KeyFilter, MemoryStore, ParquetStore};

use crate::utils::{
    QUALTRICS_PANAS, REDCAP_PANAS, config, demographics_export, panas_export,
};

fn panas_key(participant: &str, visit: &str) -> RowKey {
    RowKey::new(participant, visit, "panas")
}

fn exports() -> Vec<RawExport> {
    vec![
        demographics_export(),
        panas_export(
            QUALTRICS_PANAS,
            &[
                &["ER0009", "day2", "2022-03-02 09:00:00", "31", "14"],
                &["ER0010", "day2", "2022-03-16 10:00:00", "28", "20"],
            ],
        ),
        panas_export(
            REDCAP_PANAS,
            &[
                &["ER0009", "day2", "2022-03-02 15:00:00", "33", "12"],
                &["ER0010", "day2", "2022-03-16 10:00:00", "27", "21"],
                &["ER0011", "day2", "2022-04-03 10:00:00", "55", "11"],
            ],
        ),
    ]
}

/// The later of two sources wins and keeps the other as a discarded alternative
#[test]
fn test_later_source_wins_with_provenance() {
    let mut store = MemoryStore::new();
    let report = run_participants(&config(), &exports(), &mut store).unwrap();

    let row = store.get(&panas_key("ER0009", "visit_day2")).unwrap();
    assert_eq!(row.provenance.source_id, REDCAP_PANAS);
    assert_eq!(row.get("panas_pos"), Some(&FieldValue::integer(33)));
    assert_eq!(row.provenance.discarded.len(), 1);
    assert_eq!(row.provenance.discarded[0].source_id, QUALTRICS_PANAS);
    assert_eq!(row.provenance.discarded[0].reason, DiscardReason::Superseded);
    assert_eq!(
        row.provenance.discarded[0].fields.get("panas_pos"),
        Some(&FieldValue::integer(31))
    );

    assert_eq!(report.participants, 3);
}

/// Equal timestamps with no authority leave the triple unresolved
#[test]
fn test_tie_reported_and_not_stored() {
    let mut store = MemoryStore::new();
    let report = run_participants(&config(), &exports(), &mut store).unwrap();

    assert!(store.get(&panas_key("ER0010", "visit_day2")).is_none());
    assert_eq!(report.ambiguities.len(), 1);
    let ambiguity = &report.ambiguities[0];
    assert_eq!(ambiguity.participant, "ER0010");
    assert_eq!(ambiguity.instrument, "panas");
}

/// An authoritative source beats a later one
#[test]
fn test_authority_resolves_tie() {
    let mut config = config();
    config.authority = BTreeMap::from([("panas".to_string(), QUALTRICS_PANAS.to_string())]);

    let mut store = MemoryStore::new();
    let report = run_participants(&config, &exports(), &mut store).unwrap();

    assert!(report.ambiguities.is_empty());
    let tied = store.get(&panas_key("ER0010", "visit_day2")).unwrap();
    assert_eq!(tied.provenance.source_id, QUALTRICS_PANAS);
    let later = store.get(&panas_key("ER0009", "visit_day2")).unwrap();
    assert_eq!(later.provenance.source_id, QUALTRICS_PANAS);
    assert_eq!(later.provenance.discarded[0].reason, DiscardReason::NotAuthoritative);
}

/// Out-of-range values drop only their own row
#[test]
fn test_validation_error_drops_single_row() {
    let mut store = MemoryStore::new();
    let report = run_participants(&config(), &exports(), &mut store).unwrap();

    assert_eq!(report.validation_errors.len(), 1);
    let error = &report.validation_errors[0];
    assert_eq!(error.source_id, REDCAP_PANAS);
    assert_eq!(error.participant.as_deref(), Some("ER0011"));
    assert_eq!(error.field, "panas_pos");

    assert!(store.get(&panas_key("ER0011", "visit_day2")).is_none());
    assert!(store.get(&RowKey::new("ER0011", "visit_day1", "demographics")).is_some());
}

/// A source missing a required column contributes nothing
#[test]
fn test_missing_column_rejects_source() {
    let broken = RawExport::new(
        REDCAP_PANAS,
        vec!["subject".into(), "visit".into(), "completed".into(), "pos".into()],
    )
    .with_row(&["ER0009", "day3", "2022-03-09 09:00:00", "40"]);

    let mut store = MemoryStore::new();
    let report = run_participants(&config(), &[demographics_export(), broken], &mut store).unwrap();

    assert_eq!(
        report.structure_errors,
        vec![SourceStructureError::MissingColumn {
            source_id: REDCAP_PANAS.into(),
            column: "neg".into(),
        }]
    );
    assert!(
        store
            .list(&KeyFilter::all().with_instrument("panas"))
            .is_empty()
    );
    assert_eq!(store.len(), 3);
}

/// Running the same exports twice changes nothing the second time
#[test]
fn test_rerun_is_idempotent() {
    let config = config();
    let mut store = MemoryStore::new();
    let first = run_participants(&config, &exports(), &mut store).unwrap();
    let snapshot = store.clone();

    let second = run_participants(&config, &exports(), &mut store).unwrap();
    assert!(first.rows_written > 0);
    assert_eq!(second.rows_written, 0);
    assert_eq!(store, snapshot);
}

/// Export order has no influence on the stored rows
#[test]
fn test_export_order_does_not_matter() {
    let config = config();
    let mut forward = MemoryStore::new();
    run_participants(&config, &exports(), &mut forward).unwrap();

    let mut reversed_exports = exports();
    reversed_exports.reverse();
    let mut reversed = MemoryStore::new();
    run_participants(&config, &reversed_exports, &mut reversed).unwrap();

    assert_eq!(forward, reversed);
}

/// A late correction from another source replaces the stored row
#[test]
fn test_correction_in_later_run_replaces_row() {
    let config = config();
    let mut store = MemoryStore::new();
    run_participants(&config, &exports(), &mut store).unwrap();

    let correction = panas_export(
        QUALTRICS_PANAS,
        &[
            &["ER0009", "day3", "2022-03-09 09:00:00", "30", "15"],
            &["ER0009", "day2", "2022-03-03 08:00:00", "35", "10"],
        ],
    );
    let report = run_participants(&config, &[correction], &mut store).unwrap();

    assert_eq!(report.rows_written, 2);
    assert!(store.get(&panas_key("ER0009", "visit_day3")).is_some());
    let row = store.get(&panas_key("ER0009", "visit_day2")).unwrap();
    assert_eq!(row.provenance.source_id, QUALTRICS_PANAS);
    assert_eq!(row.get("panas_pos"), Some(&FieldValue::integer(35)));
    let sources: Vec<(&str, usize)> = row
        .provenance
        .discarded
        .iter()
        .map(|d| (d.source_id.as_str(), d.row))
        .collect();
    assert_eq!(sources, vec![(QUALTRICS_PANAS, 0), (REDCAP_PANAS, 0)]);
}

/// Stored rows survive a Parquet snapshot and keep the rerun a no-op
#[test]
fn test_parquet_store_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canonical.parquet");
    let config = config();

    let mut store = ParquetStore::open(&path).unwrap();
    run_participants(&config, &exports(), &mut store).unwrap();
    store.flush().unwrap();
    let expected: Vec<_> = store.list(&KeyFilter::all()).into_iter().cloned().collect();

    let mut reopened = ParquetStore::open(&path).unwrap();
    let actual: Vec<_> = reopened.list(&KeyFilter::all()).into_iter().cloned().collect();
    assert_eq!(actual, expected);

    let report = run_participants(&config, &exports(), &mut reopened).unwrap();
    assert_eq!(report.rows_written, 0);
}
