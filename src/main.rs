use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, bail};
use chrono::{NaiveDate, Utc};
use log::{info, warn};

use study_reports::algorithm::completeness::{Inventory, progress_table};
use study_reports::algorithm::cycle::CycleResolver;
use study_reports::pipeline::{
    ReportContext, build_report, build_roster, build_summary, mark_submitted, run_participants,
    write_summary,
};
use study_reports::store::ParquetStore;
use study_reports::tracker::StatusTracker;
use study_reports::utils::io::write_table;
use study_reports::utils::logging::console::{
    print_pipeline_summary, print_progress_summary, print_report_summary,
};
use study_reports::utils::logging::log_failures;
use study_reports::{PipelineConfig, StudyError, load_exports};

struct Args {
    config: PathBuf,
    close_date: NaiveDate,
    submit: bool,
}

fn parse_args() -> anyhow::Result<Args> {
    let mut config = None;
    let mut close_date = None;
    let mut submit = false;

    for arg in std::env::args().skip(1) {
        if arg == "--submit" {
            submit = true;
        } else if config.is_none() {
            config = Some(PathBuf::from(arg));
        } else if close_date.is_none() {
            close_date = Some(
                NaiveDate::parse_from_str(&arg, "%Y-%m-%d")
                    .with_context(|| format!("close date '{arg}' is not YYYY-MM-DD"))?,
            );
        } else {
            bail!("unexpected argument '{arg}'");
        }
    }

    let Some(config) = config else {
        bail!("usage: study-reports <config.json> [close-date] [--submit]");
    };
    Ok(Args {
        config,
        close_date: close_date.unwrap_or_else(|| Utc::now().date_naive()),
        submit,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args()?;
    let start = Instant::now();
    let config = PipelineConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    rayon::ThreadPoolBuilder::new()
        .num_threads(config.workers)
        .build_global()
        .context("configuring worker pool")?;

    // Normalize and aggregate
    let mut exports = Vec::new();
    for (source_id, result) in load_exports(&config.exports, config.workers).await {
        match result {
            Ok(export) => exports.push(export),
            Err(e) => warn!("Skipping source {source_id}: {e}"),
        }
    }

    let mut store = ParquetStore::open(&config.store_path)?;
    let report = run_participants(&config, &exports, &mut store)?;
    store.flush()?;
    log_failures("validation errors", &report.validation_errors, 20);
    print_pipeline_summary(&report);

    // Reports for the cycle closing on the requested date
    let (roster, problems) = build_roster(&config, &store)?;
    log_failures("roster problems", &problems, 20);
    info!("Roster holds {} participants", roster.len());

    let resolver = CycleResolver::new(config.families.clone())?;
    let tracker = StatusTracker::open(&config.ledger_dir)?;
    let ctx = ReportContext {
        resolver: &resolver,
        tracker: &tracker,
        store: &store,
        roster: &roster,
    };

    for binding in &config.reports {
        let Some(template) = config.template(&binding.template) else {
            continue;
        };
        let output = match build_report(&ctx, template, &binding.family, args.close_date) {
            Ok(output) => output,
            Err(StudyError::OutOfRangeCycle(e)) => {
                warn!("Not building {}: {e}", template.label());
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        let path = output.write(&config.output_dir)?;
        print_report_summary(&output, Some(&path));
        if args.submit {
            let marked = mark_submitted(&tracker, &output)?;
            info!("Marked {marked} participants submitted for {}", output.report_type);
        }
    }

    for summary in &config.summaries {
        match build_summary(&ctx, summary, args.close_date) {
            Ok((cycle, table)) => {
                let path = write_summary(&config.output_dir, &cycle, &table)?;
                info!("Wrote summary {} to {}", summary.name, path.display());
            }
            Err(StudyError::OutOfRangeCycle(e)) => warn!("Not building {}: {e}", summary.name),
            Err(e) => return Err(e.into()),
        }
    }

    // Progress against the expected manifests
    if let Some(artifacts_dir) = &config.artifacts_dir {
        let inventory = Inventory::from_dir(artifacts_dir)?;
        let table = progress_table(&roster, &config.manifests, &inventory, &store)?;
        let path = config.output_dir.join("progress.csv");
        write_table(&path, None, &table.columns(), &table.text_rows())?;
        print_progress_summary(&table);
    }

    info!("Finished in {:?}", start.elapsed());
    Ok(())
}
