//! Shared utilities: logging, progress reporting and table output

pub mod io;
pub mod logging;

pub use logging::{log_operation_complete, log_operation_start, log_warning};
