//! Async loading of raw exports
//! Reads CSV and Parquet exports concurrently into raw text tables

pub mod loader;

pub use loader::{load_export, load_exports, read_export};
