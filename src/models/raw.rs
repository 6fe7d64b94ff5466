//! Raw export model
//!
//! A raw export is exactly what a survey platform or task log handed over:
//! a header and rows of text cells, with no typing applied yet.

use chrono::NaiveDateTime;

/// One downloaded export, cells as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawExport {
    /// Identifier of the source schema this export belongs to
    pub source_id: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    /// When the export was pulled, used when rows carry no timestamp
    pub extracted_at: Option<NaiveDateTime>,
}

impl RawExport {
    #[must_use]
    pub fn new(source_id: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            source_id: source_id.into(),
            columns,
            rows: Vec::new(),
            extracted_at: None,
        }
    }

    /// Builder-style helper mostly used for fixtures
    #[must_use]
    pub fn with_row<S: AsRef<str>>(mut self, cells: &[S]) -> Self {
        self.rows.push(
            cells
                .iter()
                .map(|c| {
                    let c = c.as_ref();
                    if c.is_empty() { None } else { Some(c.to_string()) }
                })
                .collect(),
        );
        self
    }

    #[must_use]
    pub const fn with_extracted_at(mut self, at: NaiveDateTime) -> Self {
        self.extracted_at = Some(at);
        self
    }

    #[must_use]
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }
}
