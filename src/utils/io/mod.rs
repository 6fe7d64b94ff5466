//! IO utilities for report outputs
//!
//! Tables produced by the pipeline are written as delimited text.

pub mod delimited;

// Re-export commonly used functions for convenience
pub use delimited::{render_csv, text_batch, write_table};
