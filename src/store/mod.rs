//! Canonical store
//!
//! The store is the single writable home of cleaned data. Report outputs and
//! progress tables are derived from it and never written back.

pub mod parquet;

use std::collections::BTreeMap;

use crate::error::Result;
use crate::models::canonical::{CanonicalRow, RowKey};

pub use self::parquet::ParquetStore;

/// Partial key used to list rows
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyFilter {
    pub participant: Option<String>,
    pub visit: Option<String>,
    pub instrument: Option<String>,
}

impl KeyFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn participant(participant: impl Into<String>) -> Self {
        Self {
            participant: Some(participant.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    #[must_use]
    pub fn with_visit(mut self, visit: impl Into<String>) -> Self {
        self.visit = Some(visit.into());
        self
    }

    #[must_use]
    pub fn matches(&self, key: &RowKey) -> bool {
        self.participant.as_ref().is_none_or(|p| *p == key.participant)
            && self.visit.as_ref().is_none_or(|v| *v == key.visit)
            && self.instrument.as_ref().is_none_or(|i| *i == key.instrument)
    }
}

/// Key-value access to canonical rows
pub trait CanonicalStore: Send + Sync {
    fn get(&self, key: &RowKey) -> Option<&CanonicalRow>;

    /// Insert or replace a row, returning the previous one
    fn put(&mut self, row: CanonicalRow) -> Result<Option<CanonicalRow>>;

    /// Rows matching `filter`, in key order
    fn list(&self, filter: &KeyFilter) -> Vec<&CanonicalRow>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory store ordered by key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStore {
    rows: BTreeMap<RowKey, CanonicalRow>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every row, in key order
    pub fn iter(&self) -> impl Iterator<Item = &CanonicalRow> {
        self.rows.values()
    }
}

impl FromIterator<CanonicalRow> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = CanonicalRow>>(iter: I) -> Self {
        Self {
            rows: iter.into_iter().map(|r| (r.key.clone(), r)).collect(),
        }
    }
}

impl CanonicalStore for MemoryStore {
    fn get(&self, key: &RowKey) -> Option<&CanonicalRow> {
        self.rows.get(key)
    }

    fn put(&mut self, row: CanonicalRow) -> Result<Option<CanonicalRow>> {
        Ok(self.rows.insert(row.key.clone(), row))
    }

    fn list(&self, filter: &KeyFilter) -> Vec<&CanonicalRow> {
        match &filter.participant {
            // Keys sort by participant first, so a participant filter is a range scan
            Some(participant) => self
                .rows
                .range(RowKey::new(participant.as_str(), "", "")..)
                .take_while(|(k, _)| k.participant == *participant)
                .filter(|(k, _)| filter.matches(k))
                .map(|(_, r)| r)
                .collect(),
            None => self
                .rows
                .iter()
                .filter(|(k, _)| filter.matches(k))
                .map(|(_, r)| r)
                .collect(),
        }
    }

    fn len(&self) -> usize {
        self.rows.len()
    }
}
