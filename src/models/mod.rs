//! Domain models for the reporting pipeline
//!
//! Participants and their visits, raw exports as received, and the
//! canonical rows produced from them.

pub mod canonical;
pub mod participant;
pub mod raw;

pub use canonical::{
    CanonicalRow, DiscardReason, DiscardedAlternative, FieldValue, Provenance, RowKey,
    StructuredValue,
};
pub use participant::{
    AmendmentSpec, Cohort, Participant, Roster, RosterSpec, StudyStatus, Visit,
};
pub use raw::RawExport;
