//! Core reconciliation and reporting algorithms
//!
//! Normalization of raw exports, aggregation into canonical rows, template
//! mapping, cycle resolution, completeness checking and enrollment summaries.

pub mod aggregate;
pub mod completeness;
pub mod cycle;
pub mod mapping;
pub mod normalize;
pub mod summary;

pub use aggregate::{AggregateOutput, Authority, aggregate};
pub use completeness::{
    Artifact, Completeness, Inventory, ProgressCell, ProgressTable, StageCheck, check_stage,
    progress_table,
};
pub use cycle::{CycleFamily, CycleResolver, Inclusion, SubmissionCycle};
pub use mapping::{MappingOutput, ReportRow, map_template};
pub use normalize::{NormalizeOutput, Normalizer};
pub use summary::{SummaryKind, SummarySpec, SummaryTable};
