//! Console output for operators
//!
//! Summaries printed at the end of a run so failures are visible without
//! digging through the log.

use std::path::Path;

use crate::algorithm::completeness::{ProgressCell, ProgressTable};
use crate::pipeline::{PipelineReport, ReportOutput};

/// Print the outcome of a normalization and aggregation pass
pub fn print_pipeline_summary(report: &PipelineReport) {
    println!(
        "Aggregated {} participants, wrote {} canonical rows",
        report.participants, report.rows_written
    );
    if !report.structure_errors.is_empty() {
        println!("Unusable sources:");
        for error in &report.structure_errors {
            println!("  - {error}");
        }
    }
    if !report.validation_errors.is_empty() {
        println!("{} rows dropped by validation", report.validation_errors.len());
    }
    if !report.ambiguities.is_empty() {
        println!("Ambiguous duplicates needing review:");
        for ambiguity in &report.ambiguities {
            println!("  - {ambiguity}");
        }
    }
}

/// Print the outcome of one report build
pub fn print_report_summary(output: &ReportOutput, path: Option<&Path>) {
    print!(
        "{} {}: {} rows, {} failures, {} skipped",
        output.report_type,
        output.cycle.id(),
        output.rows.len(),
        output.failures.len(),
        output.skipped.len()
    );
    match path {
        Some(path) => println!(" -> {}", path.display()),
        None => println!(),
    }
    for failure in &output.failures {
        println!("  - {failure}");
    }
}

/// Print how many participants are complete for each stage
pub fn print_progress_summary(table: &ProgressTable) {
    for (column, stage) in table.stages.iter().enumerate() {
        let complete = table
            .rows
            .iter()
            .filter(|row| matches!(row.cells.get(column), Some(ProgressCell::Complete(_))))
            .count();
        println!("{stage}: {complete}/{} complete", table.rows.len());
    }
}
