use std::fs;

use study_reports::algorithm::completeness::{
    Artifact, Completeness, Inventory, ProgressCell, check_stage, progress_table,
};
use study_reports::models::participant::StudyStatus;
use study_reports::models::raw::RawExport;
use study_reports::schema::manifest::{Cardinality, ExpectedManifest, ExpectedUnit, UnitSource};
use study_reports::utils::io::write_table;

use crate::utils::{QUALTRICS_PANAS, config, date, demographics_export, loaded_store, panas_export};

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
    ]
}

fn mri_manifest(visit: &str) -> ExpectedManifest {
    ExpectedManifest {
        stage: format!("mri_{visit}"),
        visit: Some(visit.into()),
        units: vec![
            ExpectedUnit {
                name: "func".into(),
                source: UnitSource::Files {
                    pattern: "rawdata/sub-{participant}/ses-{visit}/func/*_bold.nii.gz".into(),
                },
                expected: Cardinality::Exactly(9),
            },
            ExpectedUnit {
                name: "fmap".into(),
                source: UnitSource::Files {
                    pattern: "rawdata/sub-{participant}/ses-{visit}/fmap/*_epi.nii.gz".into(),
                },
                expected: Cardinality::OneOf(vec![1, 2]),
            },
        ],
    }
}

fn panas_manifest() -> ExpectedManifest {
    ExpectedManifest {
        stage: "panas_day2".into(),
        visit: Some("visit_day2".into()),
        units: vec![ExpectedUnit {
            name: "panas".into(),
            source: UnitSource::Rows {
                instrument: "panas".into(),
                visit: None,
                required_fields: vec!["panas_pos".into()],
            },
            expected: Cardinality::Exactly(1),
        }],
    }
}

fn scans(participant: &str, func: usize, fmap: usize) -> Vec<Artifact> {
    let base = format!("rawdata/sub-{participant}/ses-visit_day2");
    let mut artifacts: Vec<Artifact> = (0..func)
        .map(|run| {
            Artifact::new(
                format!("{base}/func/sub-{participant}_run-{run}_bold.nii.gz"),
                date(2022, 3, 2 + (run % 3) as u32),
            )
        })
        .collect();
    artifacts.extend((0..fmap).map(|dir| {
        Artifact::new(
            format!("{base}/fmap/sub-{participant}_dir-{dir}_epi.nii.gz"),
            date(2022, 3, 3),
        )
    }));
    artifacts
}

/// Complete stages report their latest date, short ones their deficit
#[test]
fn test_progress_table_cells() {
    let mut config = config();
    config.participant_status.insert(
        "ER0010".into(),
        StudyStatus::Lost {
            visit: "visit_day3".into(),
            reason: "moved away".into(),
        },
    );
    let (store, roster) = loaded_store(&config, &exports());

    let mut artifacts = scans("ER0009", 9, 1);
    artifacts.extend(scans("ER0010", 8, 3));
    let inventory = Inventory::new(artifacts);
    let manifests = vec![
        mri_manifest("visit_day2"),
        panas_manifest(),
        mri_manifest("visit_day3"),
    ];

    let table = progress_table(&roster, &manifests, &inventory, &store).unwrap();

    assert_eq!(
        table.columns(),
        vec!["participant", "mri_visit_day2", "panas_day2", "mri_visit_day3"]
    );
    assert_eq!(
        table.cell("ER0009", "mri_visit_day2"),
        Some(ProgressCell::Complete(date(2022, 3, 4)))
    );
    assert_eq!(
        table.cell("ER0009", "panas_day2"),
        Some(ProgressCell::Complete(date(2022, 3, 2)))
    );
    assert_eq!(table.cell("ER0009", "mri_visit_day3"), Some(ProgressCell::Absent));

    assert_eq!(table.cell("ER0010", "mri_visit_day2"), Some(ProgressCell::Deficit(2)));
    assert_eq!(table.cell("ER0010", "mri_visit_day3"), Some(ProgressCell::Lost));
    assert_eq!(table.cell("ER0011", "panas_day2"), Some(ProgressCell::Absent));

    let units: Vec<(&str, &str, usize, usize)> = table
        .mismatches
        .iter()
        .map(|(p, m)| (p.as_str(), m.unit.as_str(), m.missing, m.malformed))
        .collect();
    assert_eq!(units, vec![("ER0010", "func", 1, 0), ("ER0010", "fmap", 0, 1)]);

    let rendered = table.text_rows();
    assert_eq!(rendered[1], vec!["ER0010", "deficit:2", "2022-03-16", "lost"]);
    assert_eq!(rendered[2], vec!["ER0011", "", "", ""]);
}

/// Pilot and withdrawn participants are marked or left out
#[test]
fn test_pilot_and_withdrawn_rows() {
    let mut config = config();
    config.pilot_ids = vec!["ER0009".into()];
    config.participant_status.insert(
        "ER0011".into(),
        StudyStatus::Withdrew {
            visit: "visit_day1".into(),
            reason: "participant request".into(),
        },
    );
    let (store, roster) = loaded_store(&config, &exports());

    let table = progress_table(&roster, &[panas_manifest()], &Inventory::default(), &store).unwrap();

    let participants: Vec<&str> = table.rows.iter().map(|r| r.participant.as_str()).collect();
    assert_eq!(participants, vec!["ER0009", "ER0010"]);
    assert_eq!(table.cell("ER0009", "panas_day2"), Some(ProgressCell::Pilot));
}

/// Rows missing a required field count as malformed
#[test]
fn test_row_unit_with_missing_field() {
    let (store, _) = loaded_store(&config(), &exports());
    let mut manifest = panas_manifest();
    if let UnitSource::Rows { required_fields, .. } = &mut manifest.units[0].source {
        required_fields.push("panas_total".into());
    }

    let check = check_stage("ER0009", &manifest, &Inventory::default(), &store).unwrap();
    assert_eq!(check.status, Completeness::Deficit(1));
    assert_eq!(check.mismatches[0].malformed, 1);
}

/// An inventory read from disk feeds the same check and the table writes out
#[test]
fn test_inventory_from_directory() {
    let dir = tempfile::tempdir().unwrap();
    let fmap = dir.path().join("rawdata/sub-ER0009/ses-visit_day2/fmap");
    fs::create_dir_all(&fmap).unwrap();
    fs::write(fmap.join("sub-ER0009_dir-AP_epi.nii.gz"), b"").unwrap();
    fs::write(fmap.join("sub-ER0009_dir-PA_epi.nii.gz"), b"").unwrap();

    let inventory = Inventory::from_dir(dir.path()).unwrap();
    assert_eq!(inventory.len(), 2);

    let (store, roster) = loaded_store(&config(), &exports());
    let check = check_stage("ER0009", &mri_manifest("visit_day2"), &inventory, &store).unwrap();
    assert_eq!(check.status, Completeness::Deficit(9));

    let table = progress_table(&roster, &[mri_manifest("visit_day2")], &inventory, &store).unwrap();
    let path = dir.path().join("progress.csv");
    write_table(&path, None, &table.columns(), &table.text_rows()).unwrap();
    let text = fs::read_to_string(&path).unwrap();
    assert!(text.starts_with("participant,mri_visit_day2\n"));
    assert!(text.contains("ER0009,deficit:9"));
}
