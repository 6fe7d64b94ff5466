//! Expected manifests
//!
//! A manifest lists, for one pipeline stage, the units (files or canonical
//! rows) that must exist before a participant counts as complete for it.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Result, StudyError};

/// How many matching units are acceptable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    Exactly(usize),
    /// Any of the listed counts, e.g. one or two field maps
    OneOf(Vec<usize>),
}

impl Cardinality {
    #[must_use]
    pub fn min(&self) -> usize {
        match self {
            Self::Exactly(n) => *n,
            Self::OneOf(options) => options.iter().copied().min().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn max(&self) -> usize {
        match self {
            Self::Exactly(n) => *n,
            Self::OneOf(options) => options.iter().copied().max().unwrap_or(0),
        }
    }

    #[must_use]
    pub fn accepts(&self, count: usize) -> bool {
        match self {
            Self::Exactly(n) => count == *n,
            Self::OneOf(options) => options.contains(&count),
        }
    }
}

/// Where a unit is looked for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitSource {
    /// Artifact paths matching a pattern
    ///
    /// `{participant}` and `{visit}` are substituted, `*` matches within one
    /// path segment.
    Files { pattern: String },
    /// Canonical rows of an instrument
    Rows {
        instrument: String,
        /// Defaults to the manifest's visit
        #[serde(default)]
        visit: Option<String>,
        /// Fields a row must carry to count as well formed
        #[serde(default)]
        required_fields: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedUnit {
    pub name: String,
    pub source: UnitSource,
    pub expected: Cardinality,
}

impl ExpectedUnit {
    /// Compile the file pattern for one participant
    ///
    /// Returns `None` for row units.
    pub fn file_regex(&self, participant: &str, visit: Option<&str>) -> Result<Option<Regex>> {
        let UnitSource::Files { pattern } = &self.source else {
            return Ok(None);
        };
        let substituted = pattern
            .replace("{participant}", participant)
            .replace("{visit}", visit.unwrap_or("*"));
        let body = substituted
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join("[^/]*");
        Regex::new(&format!("^{body}$"))
            .map(Some)
            .map_err(|e| StudyError::config(format!("unit {}: bad pattern: {e}", self.name)))
    }
}

/// Units that make up one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedManifest {
    pub stage: String,
    /// Visit the stage belongs to, if visit-specific
    #[serde(default)]
    pub visit: Option<String>,
    pub units: Vec<ExpectedUnit>,
}
