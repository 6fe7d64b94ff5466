//! Reconciliation of participant survey and task exports into canonical
//! tables, and projection of those tables into versioned external report
//! templates on fixed submission cycles.

pub mod algorithm;
pub mod async_io;
pub mod config;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod schema;
pub mod store;
pub mod tracker;
pub mod utils;

// Re-export the most common types for easier use
// Core types
pub use config::PipelineConfig;
pub use error::{Result, StudyError};
pub use models::{CanonicalRow, FieldValue, Participant, RawExport, Roster, RowKey};

// Pipeline components
pub use algorithm::{
    Completeness, CycleFamily, CycleResolver, Normalizer, SubmissionCycle, aggregate,
    check_stage, map_template, progress_table,
};
pub use pipeline::{PipelineReport, ReportOutput, build_report, run_participants};
pub use store::{CanonicalStore, MemoryStore, ParquetStore};
pub use tracker::{ReportState, StatusTracker};

// Async functionality
pub use async_io::{load_exports, read_export};
