//! Declarative configuration consumed by the pipeline
//!
//! Source schemas describe raw exports, templates describe external
//! reports and manifests describe what each pipeline stage must produce.

pub mod adapt;
pub mod manifest;
pub mod source;
pub mod template;

// Re-export the main types for easier access
pub use adapt::DateFormatConfig;
pub use manifest::{Cardinality, ExpectedManifest, ExpectedUnit, UnitSource};
pub use source::{
    ColumnSpec, FieldKind, OtherSpec, ParticipantColumn, SchemaCompatibilityReport, SchemaIssue,
    SourceSchema, VisitSpec, check_export_header,
};
pub use template::{
    ClassifyRule, Condition, ConditionOp, DateSource, Derivation, FieldRef, FieldTransform, Grain,
    ParticipantAttribute, PilotComment, ReportTemplate, SelectOption, TemplateField, ValueSource,
    VisitSelector,
};
