//! Configuration for the reporting pipeline.
//!
//! Everything that is business logic rather than code (source schemas,
//! templates, cycle families, manifests) lives in one JSON document read by
//! [`PipelineConfig::from_file`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::algorithm::cycle::CycleFamily;
use crate::algorithm::summary::SummarySpec;
use crate::error::util::safe_read_to_string;
use crate::error::{Result, StudyError};
use crate::models::participant::{AmendmentSpec, RosterSpec, StudyStatus};
use crate::schema::{DateFormatConfig, ExpectedManifest, ReportTemplate, SourceSchema};

/// Markers survey exports use for "no answer"
pub const DEFAULT_MISSING_VALUES: &[&str] = &["", "nan", "NaN", "na", "NA", "n/a", "N/A"];

/// A template submitted on a family's schedule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportBinding {
    pub template: String,
    pub family: String,
}

/// Configuration for the reporting pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Date format configuration for string-to-date conversions
    pub date_format_config: DateFormatConfig,
    /// Cell values treated as empty
    pub missing_values: Vec<String>,
    /// Worker threads for per-participant processing
    pub workers: usize,
    /// Root of the status ledger
    pub ledger_dir: PathBuf,
    /// Parquet snapshot of the canonical store
    pub store_path: PathBuf,
    /// Root for report outputs (`<output_dir>/cycle_<date>/...`)
    pub output_dir: PathBuf,
    /// Root scanned for pipeline artifacts when checking completeness
    pub artifacts_dir: Option<PathBuf>,
    /// Raw export file per source id
    pub exports: BTreeMap<String, PathBuf>,
    pub sources: Vec<SourceSchema>,
    /// Authoritative source per instrument
    pub authority: BTreeMap<String, String>,
    pub roster: Option<RosterSpec>,
    /// Curated study status per participant
    pub participant_status: BTreeMap<String, StudyStatus>,
    /// Curated demographic corrections, applied in `amended_at` order
    pub amendments: Vec<AmendmentSpec>,
    /// Pilot participants across every source
    pub pilot_ids: Vec<String>,
    pub templates: Vec<ReportTemplate>,
    pub families: Vec<CycleFamily>,
    pub reports: Vec<ReportBinding>,
    pub summaries: Vec<SummarySpec>,
    pub manifests: Vec<ExpectedManifest>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            date_format_config: DateFormatConfig::default(),
            missing_values: DEFAULT_MISSING_VALUES.iter().map(|s| (*s).to_string()).collect(),
            workers: num_cpus::get(),
            ledger_dir: PathBuf::from("status_ledger"),
            store_path: PathBuf::from("canonical.parquet"),
            output_dir: PathBuf::from("reports"),
            artifacts_dir: None,
            exports: BTreeMap::new(),
            sources: Vec::new(),
            authority: BTreeMap::new(),
            roster: None,
            participant_status: BTreeMap::new(),
            amendments: Vec::new(),
            pilot_ids: Vec::new(),
            templates: Vec::new(),
            families: Vec::new(),
            reports: Vec::new(),
            summaries: Vec::new(),
            manifests: Vec::new(),
        }
    }
}

impl PipelineConfig {
    /// Read and validate a JSON configuration file
    ///
    /// Relative paths inside the file are resolved against its directory.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = safe_read_to_string(path, "pipeline configuration")?;
        let mut config: Self = serde_json::from_str(&text)?;
        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        config.validate()?;
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        let resolve = |p: &mut PathBuf| {
            if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        resolve(&mut self.ledger_dir);
        resolve(&mut self.store_path);
        resolve(&mut self.output_dir);
        if let Some(dir) = self.artifacts_dir.as_mut() {
            resolve(dir);
        }
        self.exports.values_mut().for_each(resolve);
    }

    /// Cross-check the configuration
    ///
    /// # Errors
    /// Fails on duplicate names, dangling references and invalid templates.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(StudyError::config("workers must be at least 1"));
        }

        let mut source_ids = BTreeSet::new();
        for source in &self.sources {
            if !source_ids.insert(source.source_id.as_str()) {
                return Err(StudyError::config(format!(
                    "duplicate source schema {}",
                    source.source_id
                )));
            }
        }
        for (instrument, source_id) in &self.authority {
            if !source_ids.contains(source_id.as_str()) {
                return Err(StudyError::config(format!(
                    "authority for {instrument} names unknown source {source_id}"
                )));
            }
        }
        for source_id in self.exports.keys() {
            if !source_ids.contains(source_id.as_str()) {
                return Err(StudyError::config(format!(
                    "export configured for unknown source {source_id}"
                )));
            }
        }

        let mut template_names = BTreeSet::new();
        for template in &self.templates {
            template.validate()?;
            if !template_names.insert(template.name.as_str()) {
                return Err(StudyError::config(format!(
                    "duplicate template {}",
                    template.name
                )));
            }
        }

        let families: BTreeSet<&str> = self.families.iter().map(|f| f.name.as_str()).collect();
        for binding in &self.reports {
            if !template_names.contains(binding.template.as_str()) {
                return Err(StudyError::config(format!(
                    "report binding names unknown template {}",
                    binding.template
                )));
            }
            if !families.contains(binding.family.as_str()) {
                return Err(StudyError::config(format!(
                    "report binding names unknown family {}",
                    binding.family
                )));
            }
        }
        for summary in &self.summaries {
            if !families.contains(summary.family.as_str()) {
                return Err(StudyError::config(format!(
                    "summary {} names unknown family {}",
                    summary.name, summary.family
                )));
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn source(&self, source_id: &str) -> Option<&SourceSchema> {
        self.sources.iter().find(|s| s.source_id == source_id)
    }

    #[must_use]
    pub fn template(&self, name: &str) -> Option<&ReportTemplate> {
        self.templates.iter().find(|t| t.name == name)
    }

    /// Whether `value` is one of the configured missing-value markers
    #[must_use]
    pub fn is_missing(&self, value: &str) -> bool {
        let value = value.trim();
        value.is_empty() || self.missing_values.iter().any(|m| m == value)
    }
}
