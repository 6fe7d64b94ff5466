use std::collections::BTreeSet;
use std::fs;

use study_reports::algorithm::summary::{SummaryKind, SummarySpec};
use study_reports::config::PipelineConfig;
use study_reports::error::{FieldFailureReason, OutOfRangeCycle, StudyError};
use study_reports::models::participant::{AmendmentSpec, Roster, StudyStatus};
use study_reports::models::raw::RawExport;
use study_reports::pipeline::{
    ReportContext, build_report, build_summary, mark_submitted, write_summary,
};
use study_reports::schema::template::{
    FieldRef, FieldTransform, Grain, ParticipantAttribute, ReportTemplate, TemplateField,
};
use study_reports::map_template;
use study_reports::models::canonical::{CanonicalRow, FieldValue};
use study_reports::store::{CanonicalStore, KeyFilter, MemoryStore};
use study_reports::tracker::{MarkOrigin, MarkOutcome, ReportState, StatusKey, StatusTracker};

use crate::utils::{
    QUALTRICS_PANAS, config, date, demographics_export, loaded_store, panas_export, resolver,
    subject_template,
};

const REPORT_TYPE: &str = "ndar_subject01";
const CYCLE: &str = "cycle_2022-12-31";

fn exports() -> Vec<RawExport> {
    vec![
        demographics_export(),
        panas_export(
            QUALTRICS_PANAS,
            &[
                &["ER0009", "day2", "2022-03-02 09:00:00", "31", "14"],
                &["ER0009", "day3", "2022-03-09 09:00:00", "29", "16"],
                &["ER0010", "day2", "2022-03-16 10:00:00", "28", "20"],
                &["ER0010", "day3", "2022-03-23 10:00:00", "26", "22"],
            ],
        ),
    ]
}

fn setup(config: &PipelineConfig) -> (MemoryStore, Roster) {
    loaded_store(config, &exports())
}

fn subject_row(output: &study_reports::ReportOutput, participant: &str) -> Vec<String> {
    output
        .rows
        .iter()
        .find(|r| r.participant == participant)
        .map(|r| r.values.clone())
        .unwrap_or_default()
}

fn panas_template(grain: Grain) -> ReportTemplate {
    ReportTemplate {
        name: "panas".into(),
        version: "01".into(),
        grain,
        primary_instrument: "panas".into(),
        fields: vec![
            TemplateField::required(
                "src_subject_id",
                FieldTransform::Participant {
                    attribute: ParticipantAttribute::Id,
                    format: None,
                },
            ),
            TemplateField::required(
                "interview_date",
                FieldTransform::VisitDate {
                    format: Some("%m/%d/%Y".into()),
                },
            ),
            TemplateField::required("visit", FieldTransform::Visit),
            TemplateField::required(
                "panas_pos",
                FieldTransform::Copy {
                    source: FieldRef::new("panas", "panas_pos"),
                },
            ),
        ],
        pilot_comment: None,
    }
}

/// Participants with complete data get rows; one missing input fails only its row
#[test]
fn test_subject_report_rows_and_failures() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();

    assert_eq!(output.cycle.id(), CYCLE);
    assert_eq!(output.label, "ndar_subject,01");
    assert_eq!(
        output.columns,
        vec!["src_subject_id", "interview_date", "interview_age", "sex", "race", "comments_misc"]
    );
    assert_eq!(output.rows.len(), 2);
    assert_eq!(
        subject_row(&output, "ER0009"),
        vec!["ER0009", "03/01/2022", "261", "F", "White", ""]
    );
    assert_eq!(
        subject_row(&output, "ER0010"),
        vec!["ER0010", "03/15/2022", "290", "M", "Kurdish", ""]
    );

    assert_eq!(output.failures.len(), 1);
    let failure = &output.failures[0];
    assert_eq!(failure.participant, "ER0011");
    let fields: Vec<&str> = failure.fields.iter().map(|f| f.field.as_str()).collect();
    assert_eq!(fields, vec!["interview_age"]);
    assert!(output.skipped.is_empty());

    // Everyone eligible is now pending in the ledger
    let scope = tracker.scope_for(REPORT_TYPE, CYCLE);
    assert_eq!(scope.len(), 3);
    assert_eq!(
        tracker.query(&StatusKey::new("ER0011", REPORT_TYPE, CYCLE)),
        Some(ReportState::Pending)
    );
}

/// The written file starts with the template label line
#[test]
fn test_report_file_layout() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let tracker = StatusTracker::open(&dir.path().join("ledger")).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();
    let out_root = dir.path().join("reports");
    let path = output.write(&out_root).unwrap();

    assert_eq!(path, out_root.join(CYCLE).join("ndar_subject01_dataset.csv"));
    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines[0], "ndar_subject,01");
    assert_eq!(
        lines[1],
        "src_subject_id,interview_date,interview_age,sex,race,comments_misc"
    );
    assert_eq!(lines[2], "ER0009,03/01/2022,261,F,White,");
    assert_eq!(lines.len(), 4);
}

/// Pilot participants are reported with the fixed comment
#[test]
fn test_pilot_comment() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.pilot_ids = vec!["ER0009".into()];
    let (store, roster) = setup(&config);
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();

    assert_eq!(subject_row(&output, "ER0009")[5], "PILOT PARTICIPANT");
    assert_eq!(subject_row(&output, "ER0010")[5], "");
}

/// Withdrawn participants are left out and listed as skipped
#[test]
fn test_withdrawn_participant_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.participant_status.insert(
        "ER0010".into(),
        StudyStatus::Withdrew {
            visit: "visit_day2".into(),
            reason: "participant request".into(),
        },
    );
    let (store, roster) = setup(&config);
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();

    assert_eq!(output.skipped, vec!["ER0010"]);
    assert!(output.rows.iter().all(|r| r.participant != "ER0010"));
    assert!(output.failures.iter().all(|f| f.participant != "ER0010"));
    assert_eq!(tracker.query(&StatusKey::new("ER0010", REPORT_TYPE, CYCLE)), None);
}

/// A curator's exclusion outlives rebuilds, submissions and a reopened ledger
#[test]
fn test_manual_exclusion_is_durable() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let excluded = StatusKey::new("ER0009", REPORT_TYPE, CYCLE);

    {
        let tracker = StatusTracker::open(dir.path()).unwrap();
        let outcome = tracker
            .mark(
                &excluded,
                ReportState::ExcludedManual,
                MarkOrigin::manual("curator", "consent scope does not cover sharing"),
            )
            .unwrap();
        assert_eq!(outcome, MarkOutcome::Applied(ReportState::ExcludedManual));
    }

    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };
    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();
    assert_eq!(output.skipped, vec!["ER0009"]);
    assert!(output.rows.iter().all(|r| r.participant != "ER0009"));

    mark_submitted(&tracker, &output).unwrap();
    assert_eq!(tracker.query(&excluded), Some(ReportState::ExcludedManual));
    assert_eq!(
        tracker
            .mark(&excluded, ReportState::Submitted, MarkOrigin::Automatic)
            .unwrap(),
        MarkOutcome::Overridden
    );

    let reopened = StatusTracker::open(dir.path()).unwrap();
    assert_eq!(reopened.query(&excluded), Some(ReportState::ExcludedManual));
    let entry = reopened.entry(&excluded).unwrap();
    assert!(entry.history.iter().any(|r| r.origin.is_manual()));
}

/// Submitted participants stay in scope for a rebuild of the same cycle
#[test]
fn test_submission_marks_and_rebuild() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let first = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();
    assert_eq!(mark_submitted(&tracker, &first).unwrap(), 2);
    assert_eq!(mark_submitted(&tracker, &first).unwrap(), 0);
    assert_eq!(
        tracker.query(&StatusKey::new("ER0009", REPORT_TYPE, CYCLE)),
        Some(ReportState::Submitted)
    );
    assert_eq!(
        tracker.query(&StatusKey::new("ER0011", REPORT_TYPE, CYCLE)),
        Some(ReportState::Pending)
    );

    let second = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();
    assert_eq!(second.rows, first.rows);
}

/// A close date with no cycle fails before anything is mapped or recorded
#[test]
fn test_out_of_range_cycle_records_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let err = build_report(&ctx, &subject_template(), "nda", date(2021, 6, 30)).unwrap_err();
    assert!(matches!(
        err,
        StudyError::OutOfRangeCycle(OutOfRangeCycle::BeforeEpoch { .. })
    ));
    assert!(fs::read_dir(dir.path()).unwrap().next().is_none());
}

/// Participants enrolled outside the window are not candidates
#[test]
fn test_window_limits_candidates() {
    let dir = tempfile::tempdir().unwrap();
    let (store, roster) = setup(&config());
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2023, 6, 30)).unwrap();
    assert_eq!(output.cycle.id(), "cycle_2023-06-30");
    assert!(output.rows.is_empty());
    assert!(output.failures.is_empty());
    assert!(tracker.scope_for(REPORT_TYPE, "cycle_2023-06-30").is_empty());
}

/// Visit-grain templates stop at the visit a participant was lost
#[test]
fn test_visit_grain_respects_lost_status() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.participant_status.insert(
        "ER0010".into(),
        StudyStatus::Lost {
            visit: "visit_day3".into(),
            reason: "no contact".into(),
        },
    );
    let (store, roster) = setup(&config);
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let panas = panas_template(Grain::Visit);

    let output = build_report(&ctx, &panas, "nda", date(2022, 12, 31)).unwrap();
    let rows: Vec<Vec<&str>> = output
        .rows
        .iter()
        .map(|r| r.values.iter().map(String::as_str).collect())
        .collect();
    assert_eq!(
        rows,
        vec![
            vec!["ER0009", "03/02/2022", "visit_day2", "31"],
            vec!["ER0009", "03/09/2022", "visit_day3", "29"],
            vec!["ER0010", "03/16/2022", "visit_day2", "28"],
        ]
    );
}

/// Group counts cover study participants only and land next to the reports
#[test]
fn test_enrollment_summary() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.pilot_ids = vec!["ER0011".into()];
    let (store, roster) = setup(&config);
    let resolver = resolver();
    let tracker = StatusTracker::open(&dir.path().join("ledger")).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let spec = SummarySpec {
        name: "sex".into(),
        family: "nda".into(),
        kind: SummaryKind::GroupCounts {
            attributes: vec!["sex".into()],
        },
    };
    let (cycle, table) = build_summary(&ctx, &spec, date(2022, 12, 31)).unwrap();
    assert_eq!(table.columns, vec!["sex", "count"]);
    assert_eq!(
        table.rows,
        vec![vec!["Female".to_string(), "1".into()], vec!["Male".into(), "1".into()]]
    );

    let path = write_summary(&dir.path().join("reports"), &cycle, &table).unwrap();
    assert!(path.ends_with("cycle_2022-12-31/report_nda_2022-01-01_2022-12-31_sex.csv"));
    assert!(path.exists());
}

/// A participant without any primary instrument row fails instead of vanishing
#[test]
fn test_missing_primary_instrument_is_a_failure() {
    let dir = tempfile::tempdir().unwrap();
    let exports = vec![
        demographics_export(),
        panas_export(
            QUALTRICS_PANAS,
            &[&["ER0009", "day2", "2022-03-02 09:00:00", "31", "14"]],
        ),
    ];
    let (store, roster) = loaded_store(&config(), &exports);
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    for grain in [Grain::Participant, Grain::Visit] {
        let output = build_report(&ctx, &panas_template(grain), "nda", date(2022, 12, 31)).unwrap();

        let reported: Vec<&str> = output.rows.iter().map(|r| r.participant.as_str()).collect();
        assert_eq!(reported, vec!["ER0009"]);
        let failed: Vec<&str> = output.failures.iter().map(|f| f.participant.as_str()).collect();
        assert_eq!(failed, vec!["ER0010", "ER0011"]);

        let failure = &output.failures[0];
        assert_eq!(failure.visit, None);
        assert_eq!(
            failure.field_names(),
            vec!["src_subject_id", "interview_date", "visit", "panas_pos"]
        );
        assert!(failure.fields.iter().all(|f| matches!(
            &f.reason,
            FieldFailureReason::MissingSource { source } if source == "panas"
        )));
    }
}

/// Mapping the same rows in any order gives the same rows and failures
#[test]
fn test_mapping_is_deterministic() {
    let (store, roster) = setup(&config());
    let rows: Vec<CanonicalRow> = store.list(&KeyFilter::all()).into_iter().cloned().collect();
    let mut reversed = rows.clone();
    reversed.reverse();
    let scope: BTreeSet<String> = ["ER0011", "ER0010", "ER0009"]
        .into_iter()
        .map(String::from)
        .collect();

    for template in [subject_template(), panas_template(Grain::Visit)] {
        let first = map_template(&template, &roster, &rows, &scope);
        let second = map_template(&template, &roster, &reversed, &scope);
        assert_eq!(first, second);
        assert_eq!(first, map_template(&template, &roster, &rows, &scope));
        assert!(!first.rows.is_empty());
        assert_eq!(first.failures.len(), 1);
        assert_eq!(first.failures[0].participant, "ER0011");
    }
}

/// A curated demographic correction reaches the report and stays on record
#[test]
fn test_amendment_applied_to_report() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config();
    config.amendments = vec![AmendmentSpec {
        participant: "ER0010".into(),
        attribute: "race".into(),
        value: FieldValue::category("2", "Asian"),
        reason: "participant corrected self-report at follow-up".into(),
        amended_at: date(2022, 5, 1).and_hms_opt(12, 0, 0).unwrap(),
    }];
    let (store, roster) = setup(&config);
    let resolver = resolver();
    let tracker = StatusTracker::open(dir.path()).unwrap();
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    let output = build_report(&ctx, &subject_template(), "nda", date(2022, 12, 31)).unwrap();
    assert_eq!(subject_row(&output, "ER0010")[4], "Asian");
    assert_eq!(subject_row(&output, "ER0009")[4], "White");

    let amendments = roster.get("ER0010").unwrap().amendments();
    assert_eq!(amendments.len(), 1);
    assert_eq!(amendments[0].previous, Some(FieldValue::free_text("Kurdish")));
    assert_eq!(amendments[0].value, FieldValue::category("2", "Asian"));
    assert!(roster.get("ER0009").unwrap().amendments().is_empty());
}
