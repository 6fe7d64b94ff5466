use std::collections::BTreeMap;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

use parquet::arrow::ArrowWriter;

use study_reports::config::PipelineConfig;
use study_reports::error::StudyError;
use study_reports::models::canonical::{FieldValue, RowKey};
use study_reports::pipeline::run_participants;
use study_reports::store::{CanonicalStore, MemoryStore};
use study_reports::utils::io::text_batch;
use study_reports::load_exports;

use crate::utils::{DEMOGRAPHICS, QUALTRICS_PANAS, REDCAP_PANAS, config};

fn write_parquet_export(path: &Path, columns: &[&str], rows: &[&[&str]]) {
    let columns: Vec<String> = columns.iter().map(|c| (*c).to_string()).collect();
    let rows: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.iter().map(|c| (*c).to_string()).collect())
        .collect();
    let batch = text_batch(&columns, &rows).unwrap();

    let file = File::create(path).unwrap();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
    writer.write(&batch).unwrap();
    writer.close().unwrap();
}

fn export_files(dir: &Path) -> BTreeMap<String, PathBuf> {
    let demographics = dir.join("demographics.csv");
    fs::write(
        &demographics,
        "record_id,consent_date,dob,sex,ethnicity,race,race_other\n\
         9,2022-03-01,2000-06-06,2,1,1,\n\
         10.0,03/15/2022,1998-01-20,1,2,4,Kurdish\n",
    )
    .unwrap();

    let qualtrics = dir.join("panas_qualtrics.tsv");
    fs::write(
        &qualtrics,
        "subject\tvisit\tcompleted\tpos\tneg\n\
         ER0009\tday2\t2022-03-02 09:00:00\t31\t14\n",
    )
    .unwrap();

    let redcap = dir.join("panas_redcap.parquet");
    write_parquet_export(
        &redcap,
        &["subject", "visit", "completed", "pos", "neg"],
        &[
            &["ER0009", "day2", "2022-03-02 15:00:00", "33", "12"],
            &["ER0010", "day3", "2022-03-23 10:00:00", "26", ""],
        ],
    );

    BTreeMap::from([
        (DEMOGRAPHICS.to_string(), demographics),
        (QUALTRICS_PANAS.to_string(), qualtrics),
        (REDCAP_PANAS.to_string(), redcap),
    ])
}

/// CSV, TSV and Parquet exports load as text and normalize the same way
#[tokio::test]
async fn test_mixed_format_exports_through_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let files = export_files(dir.path());

    let loaded = load_exports(&files, 2).await;
    let sources: Vec<&str> = loaded.iter().map(|(s, _)| s.as_str()).collect();
    assert_eq!(sources, vec![QUALTRICS_PANAS, DEMOGRAPHICS, REDCAP_PANAS]);

    let exports: Vec<_> = loaded
        .into_iter()
        .map(|(_, result)| result.unwrap())
        .collect();
    assert!(exports.iter().all(|e| e.extracted_at.is_some()));

    let mut store = MemoryStore::new();
    let report = run_participants(&config(), &exports, &mut store).unwrap();

    assert!(report.structure_errors.is_empty());
    // The blank negative score is a required value
    assert_eq!(report.validation_errors.len(), 1);
    assert_eq!(report.validation_errors[0].field, "panas_neg");

    let consent = store
        .get(&RowKey::new("ER0010", "visit_day1", "demographics"))
        .unwrap();
    assert_eq!(
        consent.get("consent_date"),
        Some(&FieldValue::date(chrono::NaiveDate::from_ymd_opt(2022, 3, 15).unwrap()))
    );
    assert_eq!(consent.get("race"), Some(&FieldValue::free_text("Kurdish")));

    let panas = store
        .get(&RowKey::new("ER0009", "visit_day2", "panas"))
        .unwrap();
    assert_eq!(panas.provenance.source_id, REDCAP_PANAS);
    assert_eq!(panas.provenance.discarded[0].source_id, QUALTRICS_PANAS);
}

/// A missing file is reported per source and does not stop the others
#[tokio::test]
async fn test_missing_export_file_reported() {
    let dir = tempfile::tempdir().unwrap();
    let mut files = export_files(dir.path());
    files.insert(REDCAP_PANAS.to_string(), dir.path().join("absent.csv"));

    let loaded = load_exports(&files, 3).await;
    let failed: Vec<&str> = loaded
        .iter()
        .filter(|(_, r)| r.is_err())
        .map(|(s, _)| s.as_str())
        .collect();
    assert_eq!(failed, vec![REDCAP_PANAS]);
}

const CONFIG_JSON: &str = r#"{
    "workers": 2,
    "ledger_dir": "ledger",
    "store_path": "store/canonical.parquet",
    "output_dir": "/srv/reports",
    "exports": { "redcap_demographics": "raw/demographics.csv" },
    "sources": [
        {
            "source_id": "redcap_demographics",
            "instrument": "demographics",
            "participant": { "column": "record_id", "prefix": "ER", "pad_width": 4 },
            "visit": { "from": "fixed", "label": "visit_day1" },
            "timestamp_column": "consent_date",
            "fields": [
                { "column": "consent_date", "kind": { "type": "date" }, "required": true },
                { "column": "gender", "field": "sex",
                  "kind": { "type": "choice", "legend": { "1": "Male", "2": "Female" } } }
            ]
        }
    ],
    "families": [ { "name": "nda", "period_months": 6, "epoch": "2022-01-01" } ],
    "amendments": [
        {
            "participant": "ER0010",
            "attribute": "sex",
            "value": { "Structured": { "Category": { "code": "2", "label": "Female" } } },
            "reason": "entry error in consent form",
            "amended_at": "2022-05-01T12:00:00"
        }
    ]
}"#;

/// Relative paths resolve against the configuration file's directory
#[test]
fn test_config_file_paths_resolved() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.json");
    fs::write(&path, CONFIG_JSON).unwrap();

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.workers, 2);
    assert_eq!(config.ledger_dir, dir.path().join("ledger"));
    assert_eq!(config.store_path, dir.path().join("store/canonical.parquet"));
    assert_eq!(config.output_dir, PathBuf::from("/srv/reports"));
    assert_eq!(
        config.exports.get(DEMOGRAPHICS),
        Some(&dir.path().join("raw/demographics.csv"))
    );
    assert_eq!(config.sources[0].fields[1].field_name(), "sex");
    assert!(config.is_missing("NA"));
    assert_eq!(
        config.amendments[0].value,
        FieldValue::category("2", "Female")
    );
}

/// An export bound to an undeclared source is a configuration error
#[test]
fn test_config_rejects_unknown_export_source() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("study.json");
    fs::write(
        &path,
        CONFIG_JSON.replace(
            r#""exports": { "redcap_demographics""#,
            r#""exports": { "qualtrics_session""#,
        ),
    )
    .unwrap();

    assert!(matches!(
        PipelineConfig::from_file(&path),
        Err(StudyError::Config(_))
    ));
}
